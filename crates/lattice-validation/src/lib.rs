//! Dual-mode content validation for the Lattice platform.
//!
//! Two interchangeable strategies behind one trait: Comprehensive (broad,
//! multi-collection, used by fully-autonomous paths) and Selective (narrow,
//! checkpoint-tagged, used by human-checkpointed paths). Rules are sourced
//! exclusively from the rule store through the provenance-verifying cache and
//! a circuit breaker — there is no hardcoded fallback rule set.

pub mod checks;
pub mod engine;
pub mod strategy;
pub mod triage;

pub use checks::{evaluate_rule, quality_score};
pub use engine::ValidationEngine;
pub use strategy::{ComprehensiveStrategy, SelectiveStrategy, StrategyDeps, ValidationStrategy};
pub use triage::{
    decide, similarity_score, TriageDecision, TriageEngine, TriageScores, NOVELTY_THRESHOLD,
    PROFILE_FIT_THRESHOLD,
};
