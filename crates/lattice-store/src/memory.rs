//! In-memory rule store used by tests and the CLI's offline mode.
//!
//! Distances are computed as token-overlap (Jaccard) distance between the
//! query text and the rule text, which keeps queries deterministic without an
//! embedding model.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use lattice_types::{Result, RuleDocument};

use crate::client::{QueryFilters, RuleStore};

struct StoredRule {
    id: String,
    text: String,
    metadata: HashMap<String, String>,
}

/// Deterministic, process-local rule store.
pub struct InMemoryRuleStore {
    name: String,
    collections: RwLock<HashMap<String, Vec<StoredRule>>>,
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn overlap_distance(query: &str, text: &str) -> f64 {
    let q = tokens(query);
    let t = tokens(text);
    if q.is_empty() || t.is_empty() {
        return 1.0;
    }
    let shared = q.intersection(&t).count() as f64;
    let union = q.union(&t).count() as f64;
    1.0 - shared / union
}

fn list_contains(value: &str, wanted: &str) -> bool {
    value.split(',').map(str::trim).any(|v| v == wanted || v == "all")
}

impl InMemoryRuleStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn collections_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<StoredRule>>> {
        match self.collections.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert a rule into a collection. The rule's `source_collection`
    /// metadata is set to the collection name if absent, so seeded rules pass
    /// the provenance gate the same way store-sourced rules do.
    pub fn add_rule(
        &self,
        collection: &str,
        id: impl Into<String>,
        text: impl Into<String>,
        mut metadata: HashMap<String, String>,
    ) {
        metadata
            .entry("source_collection".to_string())
            .or_insert_with(|| collection.to_string());
        let rule = StoredRule {
            id: id.into(),
            text: text.into(),
            metadata,
        };
        let mut guard = match self.collections.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.entry(collection.to_string()).or_default().push(rule);
    }

    fn matches(rule: &StoredRule, filters: &QueryFilters) -> bool {
        if let Some(ref platform) = filters.platform {
            match rule.metadata.get("platforms") {
                Some(platforms) if list_contains(platforms, platform) => {}
                _ => return false,
            }
        }
        if let Some(ref workflow) = filters.workflow {
            match rule.metadata.get("workflows") {
                Some(workflows) if list_contains(workflows, workflow) => {}
                _ => return false,
            }
        }
        if let Some(ref checkpoint) = filters.checkpoint {
            if rule.metadata.get("checkpoint").map(String::as_str) != Some(checkpoint.as_str()) {
                return false;
            }
        }
        if filters.selective_only {
            let critical = rule.metadata.get("priority").map(String::as_str) == Some("critical");
            let eligible =
                rule.metadata.get("selective_eligible").map(String::as_str) == Some("true");
            if !critical && !eligible {
                return false;
            }
        }
        true
    }

    /// A store seeded with a working rule pack: editorial, per-platform, and
    /// structural collections plus checkpoint-tagged rules for every phase.
    pub fn seeded() -> Self {
        let store = Self::new("memory_rule_store");

        let meta = |category: &str, priority: &str, extra: &[(&str, &str)]| {
            let mut m = HashMap::new();
            m.insert("category".to_string(), category.to_string());
            m.insert("priority".to_string(), priority.to_string());
            m.insert("platforms".to_string(), "all".to_string());
            m.insert(
                "workflows".to_string(),
                "autonomous,checkpointed".to_string(),
            );
            m.insert("created_at".to_string(), "2026-01-12T09:00:00Z".to_string());
            m.insert("updated_at".to_string(), "2026-06-30T14:00:00Z".to_string());
            for (k, v) in extra {
                m.insert((*k).to_string(), (*v).to_string());
            }
            m
        };

        // Editorial style
        store.add_rule(
            "editorial_style",
            "es-buzzwords",
            "Avoid corporate buzzwords such as synergy, leverage, disrupt, or paradigm",
            meta(
                "style",
                "high",
                &[
                    ("check", "forbidden_terms"),
                    (
                        "terms",
                        "synergy,synergies,leverage,leveraging,disrupt,disrupting,paradigm",
                    ),
                ],
            ),
        );
        store.add_rule(
            "editorial_style",
            "es-utilize",
            "Prefer plain verbs; write use instead of utilize",
            meta(
                "style",
                "medium",
                &[
                    ("check", "forbidden_terms"),
                    ("terms", "utilize,utilizes,utilized,utilizing"),
                    ("replacement", "use"),
                ],
            ),
        );
        store.add_rule(
            "editorial_style",
            "es-length-max",
            "Keep posts under three thousand characters",
            meta(
                "style",
                "high",
                &[("check", "max_length"), ("limit", "3000")],
            ),
        );
        store.add_rule(
            "editorial_style",
            "es-length-min",
            "Give readers enough substance to act on",
            meta(
                "style",
                "medium",
                &[("check", "min_length"), ("limit", "20")],
            ),
        );
        store.add_rule(
            "editorial_style",
            "es-filler",
            "Cut filler words that weaken the message",
            meta(
                "style",
                "medium",
                &[
                    ("check", "forbidden_terms"),
                    ("terms", "very,really,basically"),
                ],
            ),
        );

        // Platform: LinkedIn
        let linkedin = |priority: &str, extra: &[(&str, &str)]| {
            let mut m = meta("platform", priority, extra);
            m.insert("platforms".to_string(), "linkedin".to_string());
            m
        };
        store.add_rule(
            "platform_linkedin",
            "li-limit",
            "Stay well under the LinkedIn visibility cutoff",
            linkedin("critical", &[("check", "max_length"), ("limit", "1300")]),
        );
        store.add_rule(
            "platform_linkedin",
            "li-engagement-bait",
            "Never use engagement bait phrases",
            linkedin(
                "critical",
                &[
                    ("check", "forbidden_terms"),
                    ("terms", "like and share,tag someone,comment below"),
                ],
            ),
        );
        store.add_rule(
            "platform_linkedin",
            "li-links",
            "Avoid bare calls to action",
            linkedin(
                "high",
                &[
                    ("check", "forbidden_terms"),
                    ("terms", "click here,buy now"),
                ],
            ),
        );
        store.add_rule(
            "platform_linkedin",
            "li-hook",
            "Open with a hook; one-line posts underperform",
            linkedin("high", &[("check", "min_length"), ("limit", "40")]),
        );

        // Platform: Twitter
        let twitter = |priority: &str, extra: &[(&str, &str)]| {
            let mut m = meta("platform", priority, extra);
            m.insert("platforms".to_string(), "twitter".to_string());
            m
        };
        store.add_rule(
            "platform_twitter",
            "tw-limit",
            "Respect the character ceiling",
            twitter("critical", &[("check", "max_length"), ("limit", "280")]),
        );
        store.add_rule(
            "platform_twitter",
            "tw-threads",
            "Flag thread markers explicitly",
            twitter(
                "medium",
                &[("check", "forbidden_terms"), ("terms", "1/n,a thread")],
            ),
        );
        store.add_rule(
            "platform_twitter",
            "tw-hashtags",
            "No more than two hashtags",
            twitter("high", &[("check", "min_length"), ("limit", "10")]),
        );
        store.add_rule(
            "platform_twitter",
            "tw-bait",
            "Never use engagement bait",
            twitter(
                "critical",
                &[("check", "forbidden_terms"), ("terms", "retweet if,like if")],
            ),
        );

        // Structural
        store.add_rule(
            "structural_rules",
            "st-paragraphs",
            "Separate ideas into paragraphs",
            meta(
                "structure",
                "medium",
                &[("check", "required_section"), ("section", "\n\n")],
            ),
        );
        store.add_rule(
            "structural_rules",
            "st-title",
            "Lead with a concrete claim, not a label",
            meta(
                "structure",
                "medium",
                &[("check", "min_length"), ("limit", "15")],
            ),
        );
        store.add_rule(
            "structural_rules",
            "st-scaffolding",
            "Ship no scaffolding text",
            meta(
                "structure",
                "critical",
                &[
                    ("check", "forbidden_terms"),
                    ("terms", "TODO,TBD,lorem ipsum"),
                ],
            ),
        );
        store.add_rule(
            "structural_rules",
            "st-ceiling",
            "Respect the outer length ceiling",
            meta(
                "structure",
                "high",
                &[("check", "max_length"), ("limit", "10000")],
            ),
        );

        // Checkpoint-tagged rules
        let checkpoint = |phase: &str, priority: &str, extra: &[(&str, &str)]| {
            let mut m = meta("checkpoint", priority, extra);
            m.insert("checkpoint".to_string(), phase.to_string());
            m.insert("selective_eligible".to_string(), "true".to_string());
            m
        };
        store.add_rule(
            "checkpoint_rules",
            "cp-pre-topic",
            "State a single clear topic before drafting",
            checkpoint(
                "pre_writing",
                "high",
                &[("check", "min_length"), ("limit", "10")],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-pre-scope",
            "Keep scope inside platform limits",
            checkpoint(
                "pre_writing",
                "critical",
                &[("check", "max_length"), ("limit", "10000")],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-pre-placeholder",
            "No placeholder text may survive planning",
            checkpoint(
                "pre_writing",
                "critical",
                &[("check", "forbidden_terms"), ("terms", "lorem ipsum,xxx")],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-pre-draft-marker",
            "Remove draft markers before the pipeline runs",
            checkpoint(
                "pre_writing",
                "high",
                &[("check", "forbidden_terms"), ("terms", "draft:")],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-mid-limit",
            "The working draft must stay inside the outer ceiling",
            checkpoint(
                "mid_writing",
                "critical",
                &[("check", "max_length"), ("limit", "10000")],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-mid-todo",
            "No open TODO items mid-draft",
            checkpoint(
                "mid_writing",
                "critical",
                &[("check", "forbidden_terms"), ("terms", "TODO,TBD")],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-mid-voice",
            "Drop press-release framing",
            checkpoint(
                "mid_writing",
                "high",
                &[
                    ("check", "forbidden_terms"),
                    ("terms", "we are pleased to announce"),
                ],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-mid-substance",
            "A mid-draft needs real substance",
            checkpoint(
                "mid_writing",
                "high",
                &[("check", "min_length"), ("limit", "20")],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-post-limit",
            "Final drafts must stay inside the ceiling",
            checkpoint(
                "post_writing",
                "critical",
                &[("check", "max_length"), ("limit", "10000")],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-post-claims",
            "No absolute claims in final copy",
            checkpoint(
                "post_writing",
                "high",
                &[
                    ("check", "forbidden_terms"),
                    ("terms", "guaranteed,risk-free"),
                ],
            ),
        );
        store.add_rule(
            "checkpoint_rules",
            "cp-post-substance",
            "Final copy needs real substance",
            checkpoint(
                "post_writing",
                "high",
                &[("check", "min_length"), ("limit", "10")],
            ),
        );

        store
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn query(
        &self,
        collection: &str,
        text: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<RuleDocument>> {
        let guard = self.collections_read();
        let Some(rules) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut documents: Vec<RuleDocument> = rules
            .iter()
            .filter(|rule| Self::matches(rule, filters))
            .map(|rule| RuleDocument {
                id: rule.id.clone(),
                text: rule.text.clone(),
                collection: collection.to_string(),
                distance: overlap_distance(text, &rule.text),
                metadata: rule.metadata.clone(),
            })
            .collect();
        documents.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        documents.truncate(limit);
        Ok(documents)
    }

    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn query_unknown_collection_returns_empty() {
        let store = InMemoryRuleStore::new("test");
        let docs = store
            .query("missing", "anything", &QueryFilters::none(), 4)
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn query_sorts_by_ascending_distance() {
        let store = InMemoryRuleStore::new("test");
        store.add_rule(
            "rules",
            "far",
            "completely unrelated words here",
            HashMap::new(),
        );
        store.add_rule("rules", "near", "rust services are fast", HashMap::new());

        let docs = store
            .query("rules", "fast rust services", &QueryFilters::none(), 10)
            .await
            .unwrap();
        assert_eq!(docs[0].id, "near");
        assert!(docs[0].distance < docs[1].distance);
    }

    #[tokio::test]
    async fn platform_filter_admits_all_tag() {
        let store = InMemoryRuleStore::new("test");
        let mut any = HashMap::new();
        any.insert("platforms".to_string(), "all".to_string());
        let mut li = HashMap::new();
        li.insert("platforms".to_string(), "linkedin".to_string());
        let mut tw = HashMap::new();
        tw.insert("platforms".to_string(), "twitter".to_string());
        store.add_rule("rules", "any", "generic rule", any);
        store.add_rule("rules", "li", "linkedin rule", li);
        store.add_rule("rules", "tw", "twitter rule", tw);

        let docs = store
            .query("rules", "q", &QueryFilters::for_platform("linkedin"), 10)
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert!(ids.contains(&"any"));
        assert!(ids.contains(&"li"));
        assert!(!ids.contains(&"tw"));
    }

    #[tokio::test]
    async fn checkpoint_filter_matches_tag() {
        let store = InMemoryRuleStore::seeded();
        let filters = QueryFilters::none()
            .with_checkpoint("pre_writing")
            .selective();
        let docs = store
            .query("checkpoint_rules", "planning a post", &filters, 10)
            .await
            .unwrap();
        assert_eq!(docs.len(), 4);
        assert!(docs
            .iter()
            .all(|d| d.metadata.get("checkpoint").map(String::as_str) == Some("pre_writing")));
    }

    #[tokio::test]
    async fn selective_filter_requires_critical_or_eligible() {
        let store = InMemoryRuleStore::new("test");
        let mut plain = HashMap::new();
        plain.insert("priority".to_string(), "medium".to_string());
        let mut critical = HashMap::new();
        critical.insert("priority".to_string(), "critical".to_string());
        store.add_rule("rules", "plain", "rule", plain);
        store.add_rule("rules", "crit", "rule", critical);

        let docs = store
            .query("rules", "q", &QueryFilters::none().selective(), 10)
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "crit");
    }

    #[tokio::test]
    async fn seeded_rules_all_pass_the_provenance_gate() {
        let store = InMemoryRuleStore::seeded();
        for collection in [
            "editorial_style",
            "platform_linkedin",
            "platform_twitter",
            "structural_rules",
            "checkpoint_rules",
        ] {
            let docs = store
                .query(collection, "anything at all", &QueryFilters::none(), 50)
                .await
                .unwrap();
            assert!(!docs.is_empty(), "collection {collection} is empty");
            for doc in docs {
                assert!(
                    doc.has_complete_provenance(),
                    "seeded rule {} missing {:?}",
                    doc.id,
                    doc.missing_metadata_keys()
                );
            }
        }
    }

    #[tokio::test]
    async fn limit_truncates_results() {
        let store = InMemoryRuleStore::seeded();
        let docs = store
            .query("editorial_style", "q", &QueryFilters::none(), 2)
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn overlap_distance_bounds() {
        assert_eq!(overlap_distance("", "anything"), 1.0);
        assert_eq!(overlap_distance("same words", "same words"), 0.0);
        let d = overlap_distance("rust services", "rust tooling");
        assert!(d > 0.0 && d < 1.0);
    }
}
