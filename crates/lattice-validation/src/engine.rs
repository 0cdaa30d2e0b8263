//! The validation engine facade: builds requests and dispatches them to the
//! matching strategy.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_store::{CircuitBreaker, RuleCache, RuleStore};
use lattice_types::{
    CheckpointPhase, Result, ValidationMode, ValidationRequest, ValidationResult,
};

use crate::strategy::{
    ComprehensiveStrategy, SelectiveStrategy, StrategyDeps, ValidationStrategy,
};

/// Owns both strategies over one shared set of collaborators. Mode dispatch
/// is an exhaustive match on [`ValidationMode`].
pub struct ValidationEngine {
    comprehensive: ComprehensiveStrategy,
    selective: SelectiveStrategy,
}

impl ValidationEngine {
    pub fn new(
        store: Arc<dyn RuleStore>,
        cache: Arc<RuleCache>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let deps = StrategyDeps::new(store, cache, breaker);
        Self {
            comprehensive: ComprehensiveStrategy::new(deps.clone()),
            selective: SelectiveStrategy::new(deps),
        }
    }

    /// Dispatch a request to the strategy matching its mode.
    pub async fn validate(&self, request: &ValidationRequest) -> Result<ValidationResult> {
        match request.mode {
            ValidationMode::Comprehensive => self.comprehensive.validate(request).await,
            ValidationMode::Selective => self.selective.validate(request).await,
        }
    }

    pub async fn validate_comprehensive(
        &self,
        content: &str,
        platform: &str,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<ValidationResult> {
        let mut request = ValidationRequest::comprehensive(content, platform);
        request.context = context;
        self.validate(&request).await
    }

    pub async fn validate_selective(
        &self,
        content: &str,
        platform: &str,
        checkpoint: CheckpointPhase,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<ValidationResult> {
        let mut request = ValidationRequest::selective(content, platform, checkpoint);
        request.context = context;
        self.validate(&request).await
    }
}
