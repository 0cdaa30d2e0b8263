//! Similarity-derived triage: PROMOTE or REJECT a piece of content from its
//! profile-fit and novelty scores.
//!
//! The decision is a pure function of the two scores; the scores themselves
//! come from two independent similarity queries. No hidden state.

use std::sync::Arc;

use serde::Serialize;

use lattice_store::{CircuitBreaker, QueryFilters, RuleStore};
use lattice_types::Result;

pub const PROFILE_FIT_THRESHOLD: f64 = 0.7;
pub const NOVELTY_THRESHOLD: f64 = 0.8;

const PROFILE_COLLECTION: &str = "audience_profiles";
const NOVELTY_COLLECTION: &str = "published_content";

/// Convert a best-match distance into a [0, 1] score. No match at all is a
/// defined 0.0, not an error.
pub fn similarity_score(best_distance: Option<f64>) -> f64 {
    match best_distance {
        Some(distance) => (1.0 - distance).clamp(0.0, 1.0),
        None => 0.0,
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TriageScores {
    pub profile_fit: f64,
    pub novelty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageDecision {
    Promote,
    Reject,
}

/// The triage decision: PROMOTE iff both thresholds are met.
pub fn decide(scores: &TriageScores) -> TriageDecision {
    if scores.profile_fit >= PROFILE_FIT_THRESHOLD && scores.novelty >= NOVELTY_THRESHOLD {
        TriageDecision::Promote
    } else {
        TriageDecision::Reject
    }
}

/// Runs the two similarity queries that feed [`decide`].
pub struct TriageEngine {
    store: Arc<dyn RuleStore>,
    breaker: Arc<CircuitBreaker>,
}

impl TriageEngine {
    pub fn new(store: Arc<dyn RuleStore>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { store, breaker }
    }

    async fn best_distance(&self, collection: &str, content: &str) -> Result<Option<f64>> {
        let filters = QueryFilters::none();
        let docs = self
            .breaker
            .call(|| self.store.query(collection, content, &filters, 1))
            .await?;
        Ok(docs.first().map(|d| d.distance))
    }

    /// Score content against the audience-profile and published-content
    /// collections and classify it.
    pub async fn triage(&self, content: &str) -> Result<(TriageScores, TriageDecision)> {
        let profile_fit =
            similarity_score(self.best_distance(PROFILE_COLLECTION, content).await?);
        let novelty = similarity_score(self.best_distance(NOVELTY_COLLECTION, content).await?);

        let scores = TriageScores {
            profile_fit,
            novelty,
        };
        let decision = decide(&scores);
        tracing::debug!(
            profile_fit,
            novelty,
            decision = ?decision,
            "Triage decision"
        );
        Ok((scores, decision))
    }
}
