//! The two validation strategies and their shared rule-fetch path.
//!
//! Rules flow store → breaker → cache → strategy; the cache is consulted
//! first and refreshed on a live hit. When the breaker is open or the store
//! is down and no cache entry exists, validation fails with
//! `ValidationUnavailable` — never with a fabricated default rule set.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use lattice_store::{CircuitBreaker, QueryFilters, RuleCache, RuleStore};
use lattice_types::{
    LatticeError, Result, RuleDocument, ValidationMode, ValidationRequest, ValidationResult,
};

use crate::checks::{evaluate_rule, quality_score};

/// Comprehensive pulls up to this many rules from each of its collections.
const RULES_PER_COLLECTION: usize = 4;

// ---------------------------------------------------------------------------
// ValidationStrategy trait
// ---------------------------------------------------------------------------

/// One of the two validation algorithms. The set is closed: a third mode is a
/// new implementation plus a new [`ValidationMode`] variant, checked at
/// compile time — not a runtime string.
#[async_trait]
pub trait ValidationStrategy: Send + Sync {
    fn mode(&self) -> ValidationMode;

    async fn validate(&self, request: &ValidationRequest) -> Result<ValidationResult>;
}

// ---------------------------------------------------------------------------
// Shared dependencies and fetch path
// ---------------------------------------------------------------------------

/// Dependency-injected collaborators shared by both strategies. Explicitly
/// constructed and passed in — never ambient globals — so tests can inject
/// fresh instances.
#[derive(Clone)]
pub struct StrategyDeps {
    pub store: Arc<dyn RuleStore>,
    pub cache: Arc<RuleCache>,
    pub breaker: Arc<CircuitBreaker>,
}

impl StrategyDeps {
    pub fn new(
        store: Arc<dyn RuleStore>,
        cache: Arc<RuleCache>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            store,
            cache,
            breaker,
        }
    }

    fn cache_key(collection: &str, text: &str, filters: &QueryFilters) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        format!(
            "{collection}|{}|{}|{}|{}|{:x}",
            filters.platform.as_deref().unwrap_or("-"),
            filters.workflow.as_deref().unwrap_or("-"),
            filters.checkpoint.as_deref().unwrap_or("-"),
            filters.selective_only,
            hasher.finish()
        )
    }

    /// Fetch rules for one collection: cache first, then the store through
    /// the breaker. Only provenance-valid documents are returned or cached.
    async fn fetch_rules(
        &self,
        collection: &str,
        text: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<RuleDocument>> {
        let key = Self::cache_key(collection, text, filters);
        if let Some(docs) = self.cache.get(&key).await {
            return Ok(docs);
        }

        let result = self
            .breaker
            .call(|| self.store.query(collection, text, filters, limit))
            .await;

        match result {
            Ok(docs) => {
                let source_query = format!("{collection}:{text}");
                self.cache
                    .put(&key, docs.clone(), &source_query, None)
                    .await;
                Ok(docs
                    .into_iter()
                    .filter(RuleDocument::has_complete_provenance)
                    .collect())
            }
            Err(
                err @ (LatticeError::StoreUnavailable { .. }
                | LatticeError::RequestTimeout { .. }
                | LatticeError::CircuitOpen { .. }),
            ) => {
                tracing::warn!(collection, error = %err, "Rule fetch failed with no cache entry");
                Err(LatticeError::ValidationUnavailable {
                    collection: collection.to_string(),
                    reason: err.to_string(),
                })
            }
            Err(other) => Err(other),
        }
    }
}

fn build_result(
    mode: ValidationMode,
    rules: Vec<RuleDocument>,
    content: &str,
    started: Instant,
) -> Result<ValidationResult> {
    let violations: Vec<_> = rules
        .iter()
        .filter_map(|rule| evaluate_rule(rule, content))
        .collect();
    let suggestions: Vec<String> = violations
        .iter()
        .filter_map(|v| v.suggestion.clone())
        .collect();
    let score = quality_score(rules.len(), &violations);
    ValidationResult::new(
        mode,
        rules,
        violations,
        suggestions,
        score,
        started.elapsed().as_millis() as u64,
    )
}

// ---------------------------------------------------------------------------
// ComprehensiveStrategy
// ---------------------------------------------------------------------------

/// Broad validation for fully-autonomous generation paths: merges editorial,
/// platform-specific, and structural collections into an 8–12 rule set.
pub struct ComprehensiveStrategy {
    deps: StrategyDeps,
}

impl ComprehensiveStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }

    fn collections(platform: &str) -> [String; 3] {
        [
            "editorial_style".to_string(),
            format!("platform_{platform}"),
            "structural_rules".to_string(),
        ]
    }
}

#[async_trait]
impl ValidationStrategy for ComprehensiveStrategy {
    fn mode(&self) -> ValidationMode {
        ValidationMode::Comprehensive
    }

    async fn validate(&self, request: &ValidationRequest) -> Result<ValidationResult> {
        if request.mode != ValidationMode::Comprehensive {
            return Err(LatticeError::InvalidRequest(
                "comprehensive strategy received a non-comprehensive request".into(),
            ));
        }
        let started = Instant::now();
        let filters = QueryFilters::for_platform(&request.platform);
        let collections = Self::collections(&request.platform);

        let mut merged: Vec<RuleDocument> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for collection in &collections {
            let docs = self
                .deps
                .fetch_rules(collection, &request.content, &filters, RULES_PER_COLLECTION)
                .await?;
            for doc in docs {
                if seen.insert(doc.id.clone()) {
                    merged.push(doc);
                }
            }
        }
        merged.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let (min, max) = ValidationMode::Comprehensive.rule_range();
        merged.truncate(max);
        if merged.len() < min {
            return Err(LatticeError::ValidationUnavailable {
                collection: collections.join(","),
                reason: format!(
                    "only {} rules available, comprehensive validation needs at least {min}",
                    merged.len()
                ),
            });
        }

        tracing::debug!(
            platform = %request.platform,
            rules = merged.len(),
            "Comprehensive rule set assembled"
        );
        build_result(ValidationMode::Comprehensive, merged, &request.content, started)
    }
}

// ---------------------------------------------------------------------------
// SelectiveStrategy
// ---------------------------------------------------------------------------

/// Narrow validation for human-checkpointed paths: only rules tagged for the
/// requested checkpoint and marked critical or selective-eligible, 3–4 total.
pub struct SelectiveStrategy {
    deps: StrategyDeps,
}

impl SelectiveStrategy {
    pub fn new(deps: StrategyDeps) -> Self {
        Self { deps }
    }
}

const CHECKPOINT_COLLECTION: &str = "checkpoint_rules";

#[async_trait]
impl ValidationStrategy for SelectiveStrategy {
    fn mode(&self) -> ValidationMode {
        ValidationMode::Selective
    }

    async fn validate(&self, request: &ValidationRequest) -> Result<ValidationResult> {
        if request.mode != ValidationMode::Selective {
            return Err(LatticeError::InvalidRequest(
                "selective strategy received a non-selective request".into(),
            ));
        }
        let checkpoint = request.checkpoint.ok_or_else(|| {
            LatticeError::InvalidRequest("selective validation requires a checkpoint".into())
        })?;

        let started = Instant::now();
        let (min, max) = ValidationMode::Selective.rule_range();
        let filters = QueryFilters::for_platform(&request.platform)
            .with_checkpoint(checkpoint.as_str())
            .selective();

        let mut rules = self
            .deps
            .fetch_rules(CHECKPOINT_COLLECTION, &request.content, &filters, max)
            .await?;
        rules.truncate(max);
        if rules.len() < min {
            return Err(LatticeError::ValidationUnavailable {
                collection: CHECKPOINT_COLLECTION.to_string(),
                reason: format!(
                    "only {} rules tagged for checkpoint '{}', selective validation needs at least {min}",
                    rules.len(),
                    checkpoint.as_str()
                ),
            });
        }

        build_result(ValidationMode::Selective, rules, &request.content, started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use lattice_store::{BreakerConfig, InMemoryRuleStore};
    use lattice_types::{CheckpointPhase, REQUIRED_METADATA_KEYS};

    fn deps_with(store: Arc<dyn RuleStore>) -> StrategyDeps {
        StrategyDeps::new(
            store,
            Arc::new(RuleCache::new(Duration::from_secs(300))),
            Arc::new(CircuitBreaker::new("rule_store", BreakerConfig::default())),
        )
    }

    fn seeded_deps() -> StrategyDeps {
        deps_with(Arc::new(InMemoryRuleStore::seeded()))
    }

    // A store that can be flipped into a failing state mid-test.
    struct FlakyStore {
        inner: InMemoryRuleStore,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn seeded() -> Self {
            Self {
                inner: InMemoryRuleStore::seeded(),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RuleStore for FlakyStore {
        async fn query(
            &self,
            collection: &str,
            text: &str,
            filters: &QueryFilters,
            limit: usize,
        ) -> Result<Vec<RuleDocument>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(LatticeError::StoreUnavailable {
                    store: "flaky".into(),
                    message: "injected outage".into(),
                });
            }
            self.inner.query(collection, text, filters, limit).await
        }

        async fn heartbeat(&self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn comprehensive_returns_eight_to_twelve_rules() {
        let strategy = ComprehensiveStrategy::new(seeded_deps());
        for content in ["a post about rust", "leveraging synergy to disrupt markets"] {
            let request = ValidationRequest::comprehensive(content, "linkedin");
            let result = strategy.validate(&request).await.unwrap();
            assert!(
                (8..=12).contains(&result.rules_applied.len()),
                "got {} rules",
                result.rules_applied.len()
            );
            assert!(result.all_rules_provenanced);
        }
    }

    #[tokio::test]
    async fn selective_returns_three_to_four_rules() {
        let strategy = SelectiveStrategy::new(seeded_deps());
        for phase in [
            CheckpointPhase::PreWriting,
            CheckpointPhase::MidWriting,
            CheckpointPhase::PostWriting,
        ] {
            let request = ValidationRequest::selective("planning a launch post", "linkedin", phase);
            let result = strategy.validate(&request).await.unwrap();
            assert!(
                (3..=4).contains(&result.rules_applied.len()),
                "phase {phase:?}: got {} rules",
                result.rules_applied.len()
            );
        }
    }

    #[tokio::test]
    async fn selective_without_checkpoint_is_invalid() {
        let strategy = SelectiveStrategy::new(seeded_deps());
        let mut request = ValidationRequest::comprehensive("text", "linkedin");
        request.mode = ValidationMode::Selective;
        let err = strategy.validate(&request).await.unwrap_err();
        assert!(matches!(err, LatticeError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn buzzword_content_scores_below_threshold_comprehensively() {
        let strategy = ComprehensiveStrategy::new(seeded_deps());
        let request =
            ValidationRequest::comprehensive("leveraging synergy to disrupt markets", "linkedin");
        let result = strategy.validate(&request).await.unwrap();

        assert!(!result.violations.is_empty());
        assert!(result
            .violations
            .iter()
            .any(|v| v.description.contains("synergy")));
        assert!(
            result.quality_score < 0.8,
            "expected < 0.8, got {}",
            result.quality_score
        );
    }

    #[tokio::test]
    async fn same_buzzwords_pass_selective_pre_writing() {
        let strategy = SelectiveStrategy::new(seeded_deps());
        let request = ValidationRequest::selective(
            "leveraging synergy to disrupt markets",
            "linkedin",
            CheckpointPhase::PreWriting,
        );
        let result = strategy.validate(&request).await.unwrap();
        assert!(result.violations.is_empty());
        assert_eq!(result.quality_score, 1.0);
    }

    #[tokio::test]
    async fn unavailable_store_without_cache_surfaces_validation_unavailable() {
        let store = Arc::new(FlakyStore::seeded());
        store.failing.store(true, Ordering::SeqCst);
        let strategy = ComprehensiveStrategy::new(deps_with(store));

        let request = ValidationRequest::comprehensive("text", "linkedin");
        let err = strategy.validate(&request).await.unwrap_err();
        match err {
            LatticeError::ValidationUnavailable { collection, .. } => {
                assert_eq!(collection, "editorial_style");
            }
            other => panic!("Expected ValidationUnavailable, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cache_recovers_validation_during_an_outage() {
        let store = Arc::new(FlakyStore::seeded());
        let deps = deps_with(store.clone());
        let strategy = ComprehensiveStrategy::new(deps);

        let request = ValidationRequest::comprehensive("a post about rust services", "linkedin");
        strategy.validate(&request).await.unwrap();
        let live_calls = store.calls.load(Ordering::SeqCst);

        // Store goes down; the identical request must be served from cache.
        store.failing.store(true, Ordering::SeqCst);
        let result = strategy.validate(&request).await.unwrap();
        assert!((8..=12).contains(&result.rules_applied.len()));
        assert_eq!(store.calls.load(Ordering::SeqCst), live_calls);
    }

    #[tokio::test]
    async fn open_breaker_without_cache_surfaces_validation_unavailable() {
        let store = Arc::new(FlakyStore::seeded());
        store.failing.store(true, Ordering::SeqCst);
        let deps = StrategyDeps::new(
            store.clone(),
            Arc::new(RuleCache::new(Duration::from_secs(300))),
            Arc::new(CircuitBreaker::new(
                "rule_store",
                BreakerConfig {
                    failure_threshold: 1,
                    recovery_timeout: Duration::from_secs(60),
                },
            )),
        );
        let strategy = ComprehensiveStrategy::new(deps);
        let request = ValidationRequest::comprehensive("text", "linkedin");

        // First attempt trips the breaker via a real store failure.
        strategy.validate(&request).await.unwrap_err();
        let calls_after_trip = store.calls.load(Ordering::SeqCst);

        // Second attempt is gated by the open breaker: no store call at all.
        let err = strategy.validate(&request).await.unwrap_err();
        assert!(matches!(err, LatticeError::ValidationUnavailable { .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), calls_after_trip);
    }

    #[tokio::test]
    async fn malformed_store_documents_never_reach_the_result() {
        let store = InMemoryRuleStore::new("test");
        let provenanced = |extra: &[(&str, &str)]| {
            let mut m: HashMap<String, String> = HashMap::new();
            for key in REQUIRED_METADATA_KEYS {
                m.insert(key.to_string(), "value".to_string());
            }
            for (k, v) in extra {
                m.insert((*k).to_string(), (*v).to_string());
            }
            m
        };
        for i in 0..4 {
            store.add_rule(
                "editorial_style",
                format!("es-{i}"),
                format!("editorial rule {i}"),
                provenanced(&[("platforms", "all")]),
            );
            store.add_rule(
                "platform_blog",
                format!("pb-{i}"),
                format!("platform rule {i}"),
                provenanced(&[("platforms", "all")]),
            );
        }
        for i in 0..3 {
            store.add_rule(
                "structural_rules",
                format!("st-{i}"),
                format!("structural rule {i}"),
                provenanced(&[("platforms", "all")]),
            );
        }
        // A fabricated-looking rule carrying only a platform tag: it matches
        // the query filter but has no provenance metadata.
        let mut fabricated = HashMap::new();
        fabricated.insert("platforms".to_string(), "all".to_string());
        store.add_rule("structural_rules", "st-fabricated", "hardcoded rule", fabricated);

        let strategy = ComprehensiveStrategy::new(deps_with(Arc::new(store)));
        let request = ValidationRequest::comprehensive("text long enough", "blog");
        let result = strategy.validate(&request).await.unwrap();

        assert!(result.all_rules_provenanced);
        assert!(!result
            .rules_applied
            .iter()
            .any(|r| r.id == "st-fabricated"));
    }
}
