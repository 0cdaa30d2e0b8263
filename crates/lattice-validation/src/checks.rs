//! Deterministic per-rule content checks.
//!
//! Each rule describes its check in metadata (`check` plus parameters); a
//! failed check yields exactly one violation. Rules with an unknown or
//! missing check kind are applied but cannot fail — the store decides what is
//! checkable, not this module.

use lattice_types::{RuleDocument, TextFix, Violation};

fn term_pattern(term: &str) -> String {
    let escaped = regex::escape(term);
    let prefix = if term.chars().next().is_some_and(|c| c.is_alphanumeric()) {
        r"\b"
    } else {
        ""
    };
    let suffix = if term.chars().last().is_some_and(|c| c.is_alphanumeric()) {
        r"\b"
    } else {
        ""
    };
    format!("(?i){prefix}{escaped}{suffix}")
}

fn check_forbidden_terms(rule: &RuleDocument, content: &str) -> Option<Violation> {
    let terms = rule.metadata_value("terms")?;
    let mut matched: Vec<String> = Vec::new();
    for term in terms.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let Ok(pattern) = regex::Regex::new(&term_pattern(term)) else {
            tracing::debug!(rule_id = %rule.id, term, "Unparseable forbidden term, skipping");
            continue;
        };
        if let Some(found) = pattern.find(content) {
            matched.push(found.as_str().to_string());
        }
    }
    if matched.is_empty() {
        return None;
    }

    let replacement = rule.metadata_value("replacement");
    let fix = replacement.map(|r| TextFix {
        find: matched[0].clone(),
        replace_with: r.to_string(),
    });
    let suggestion = match replacement {
        Some(r) => format!("Replace '{}' with '{r}'", matched[0]),
        None => rule.text.clone(),
    };

    Some(Violation {
        rule_id: rule.id.clone(),
        severity: rule.severity(),
        description: format!("Content contains forbidden terms: {}", matched.join(", ")),
        suggestion: Some(suggestion),
        auto_fixable: fix.is_some(),
        fix,
    })
}

fn parse_limit(rule: &RuleDocument) -> Option<usize> {
    rule.metadata_value("limit")?.parse().ok()
}

fn check_max_length(rule: &RuleDocument, content: &str) -> Option<Violation> {
    let limit = parse_limit(rule)?;
    let length = content.chars().count();
    (length > limit).then(|| Violation {
        rule_id: rule.id.clone(),
        severity: rule.severity(),
        description: format!("Content length {length} exceeds the limit of {limit}"),
        suggestion: Some(rule.text.clone()),
        auto_fixable: false,
        fix: None,
    })
}

fn check_min_length(rule: &RuleDocument, content: &str) -> Option<Violation> {
    let limit = parse_limit(rule)?;
    let length = content.chars().count();
    (length < limit).then(|| Violation {
        rule_id: rule.id.clone(),
        severity: rule.severity(),
        description: format!("Content length {length} is below the minimum of {limit}"),
        suggestion: Some(rule.text.clone()),
        auto_fixable: false,
        fix: None,
    })
}

fn check_required_section(rule: &RuleDocument, content: &str) -> Option<Violation> {
    let section = rule.metadata.get("section")?;
    if section.is_empty() || content.contains(section.as_str()) {
        return None;
    }
    Some(Violation {
        rule_id: rule.id.clone(),
        severity: rule.severity(),
        description: "Content is missing a required structural element".to_string(),
        suggestion: Some(rule.text.clone()),
        auto_fixable: false,
        fix: None,
    })
}

fn check_required_phrase(rule: &RuleDocument, content: &str) -> Option<Violation> {
    let phrase = rule.metadata_value("phrase")?;
    if content.to_lowercase().contains(&phrase.to_lowercase()) {
        return None;
    }
    Some(Violation {
        rule_id: rule.id.clone(),
        severity: rule.severity(),
        description: format!("Content is missing the required phrase '{phrase}'"),
        suggestion: Some(rule.text.clone()),
        auto_fixable: false,
        fix: None,
    })
}

/// Run a rule's deterministic check against content. `None` means the rule is
/// satisfied (or carries no enforceable check).
pub fn evaluate_rule(rule: &RuleDocument, content: &str) -> Option<Violation> {
    match rule.metadata_value("check") {
        Some("forbidden_terms") => check_forbidden_terms(rule, content),
        Some("max_length") => check_max_length(rule, content),
        Some("min_length") => check_min_length(rule, content),
        Some("required_section") => check_required_section(rule, content),
        Some("required_phrase") => check_required_phrase(rule, content),
        Some(other) => {
            tracing::debug!(rule_id = %rule.id, check = other, "Unknown check kind, rule cannot fail");
            None
        }
        None => None,
    }
}

/// Severity-weighted quality score over an applied rule set, clamped to [0, 1].
pub fn quality_score(rules_applied: usize, violations: &[Violation]) -> f64 {
    if rules_applied == 0 {
        return 0.0;
    }
    let weighted: f64 = violations.iter().map(|v| v.severity.weight()).sum();
    (1.0 - weighted / rules_applied as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use lattice_types::{Severity, REQUIRED_METADATA_KEYS};

    fn rule_with(priority: &str, extra: &[(&str, &str)]) -> RuleDocument {
        let mut metadata = HashMap::new();
        for key in REQUIRED_METADATA_KEYS {
            metadata.insert(key.to_string(), "value".to_string());
        }
        metadata.insert("priority".to_string(), priority.to_string());
        for (k, v) in extra {
            metadata.insert((*k).to_string(), (*v).to_string());
        }
        RuleDocument {
            id: "r1".to_string(),
            text: "Rule guidance text".to_string(),
            collection: "editorial_style".to_string(),
            distance: 0.2,
            metadata,
        }
    }

    #[test]
    fn forbidden_term_matches_whole_words_only() {
        let rule = rule_with(
            "high",
            &[("check", "forbidden_terms"), ("terms", "synergy")],
        );
        assert!(evaluate_rule(&rule, "pure synergy here").is_some());
        // Substring inside a longer word must not match.
        assert!(evaluate_rule(&rule, "synergyless prose").is_none());
    }

    #[test]
    fn forbidden_term_match_is_case_insensitive() {
        let rule = rule_with(
            "high",
            &[("check", "forbidden_terms"), ("terms", "synergy")],
        );
        let violation = evaluate_rule(&rule, "Synergy wins").unwrap();
        assert!(violation.description.contains("Synergy"));
        assert_eq!(violation.severity, Severity::Warning);
    }

    #[test]
    fn forbidden_terms_lists_every_match() {
        let rule = rule_with(
            "critical",
            &[
                ("check", "forbidden_terms"),
                ("terms", "synergy,leverage,paradigm"),
            ],
        );
        let violation = evaluate_rule(&rule, "leverage the synergy").unwrap();
        assert!(violation.description.contains("synergy"));
        assert!(violation.description.contains("leverage"));
        assert!(!violation.description.contains("paradigm"));
        assert_eq!(violation.severity, Severity::Critical);
    }

    #[test]
    fn forbidden_term_with_replacement_builds_exact_fix() {
        let rule = rule_with(
            "medium",
            &[
                ("check", "forbidden_terms"),
                ("terms", "utilize"),
                ("replacement", "use"),
            ],
        );
        let violation = evaluate_rule(&rule, "We utilize Rust").unwrap();
        assert!(violation.auto_fixable);
        let fix = violation.fix.unwrap();
        assert_eq!(fix.find, "utilize");
        assert_eq!(fix.replace_with, "use");
    }

    #[test]
    fn forbidden_term_without_replacement_is_not_auto_fixable() {
        let rule = rule_with(
            "high",
            &[("check", "forbidden_terms"), ("terms", "synergy")],
        );
        let violation = evaluate_rule(&rule, "synergy").unwrap();
        assert!(!violation.auto_fixable);
        assert!(violation.fix.is_none());
    }

    #[test]
    fn non_word_edge_terms_still_match() {
        let rule = rule_with(
            "high",
            &[("check", "forbidden_terms"), ("terms", "draft:")],
        );
        assert!(evaluate_rule(&rule, "draft: my post").is_some());
        assert!(evaluate_rule(&rule, "the draft was fine").is_none());
    }

    #[test]
    fn max_length_flags_overruns() {
        let rule = rule_with("high", &[("check", "max_length"), ("limit", "10")]);
        assert!(evaluate_rule(&rule, "short").is_none());
        let violation = evaluate_rule(&rule, "definitely too long").unwrap();
        assert!(violation.description.contains("exceeds"));
    }

    #[test]
    fn min_length_flags_thin_content() {
        let rule = rule_with("medium", &[("check", "min_length"), ("limit", "10")]);
        assert!(evaluate_rule(&rule, "long enough text").is_none());
        let violation = evaluate_rule(&rule, "thin").unwrap();
        assert_eq!(violation.severity, Severity::Info);
    }

    #[test]
    fn required_section_checks_containment() {
        let rule = rule_with(
            "medium",
            &[("check", "required_section"), ("section", "\n\n")],
        );
        assert!(evaluate_rule(&rule, "one paragraph only").is_some());
        assert!(evaluate_rule(&rule, "first\n\nsecond").is_none());
    }

    #[test]
    fn required_phrase_is_case_insensitive() {
        let rule = rule_with(
            "high",
            &[("check", "required_phrase"), ("phrase", "call to action")],
        );
        assert!(evaluate_rule(&rule, "ends with a Call To Action").is_none());
        assert!(evaluate_rule(&rule, "no closer here").is_some());
    }

    #[test]
    fn unknown_check_kind_cannot_fail() {
        let rule = rule_with("high", &[("check", "sentiment_model")]);
        assert!(evaluate_rule(&rule, "anything").is_none());
    }

    #[test]
    fn rule_without_check_cannot_fail() {
        let rule = rule_with("high", &[]);
        assert!(evaluate_rule(&rule, "anything").is_none());
    }

    // --- quality_score ---

    fn violation(severity: Severity) -> Violation {
        Violation {
            rule_id: "r".into(),
            severity,
            description: "d".into(),
            suggestion: None,
            auto_fixable: false,
            fix: None,
        }
    }

    #[test]
    fn clean_content_scores_one() {
        assert_eq!(quality_score(10, &[]), 1.0);
    }

    #[test]
    fn score_weights_by_severity() {
        let violations = vec![
            violation(Severity::Critical), // 2.0
            violation(Severity::Warning),  // 1.0
            violation(Severity::Info),     // 0.5
        ];
        let score = quality_score(10, &violations);
        assert!((score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn score_clamps_at_zero() {
        let violations: Vec<Violation> =
            (0..10).map(|_| violation(Severity::Critical)).collect();
        assert_eq!(quality_score(4, &violations), 0.0);
    }

    #[test]
    fn zero_rules_scores_zero() {
        assert_eq!(quality_score(0, &[]), 0.0);
    }
}
