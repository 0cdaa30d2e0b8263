//! Stage clients: one specialist client per pipeline stage.
//!
//! All five clients implement the same [`StageClient`] contract and share one
//! invoke core; what differs per stage is the validation mode and checkpoint
//! phase it requests. Each client wraps its own [`CircuitBreaker`] so a
//! failing stage never poisons another stage's resilience state, and every
//! client re-verifies provenance on the result before handing it back —
//! accepting a non-provenanced rule anywhere violates the platform's core
//! invariant, so that failure is loud, never swallowed.

use std::sync::Arc;

use async_trait::async_trait;

use lattice_store::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use lattice_types::{
    LatticeError, Result, Stage, ValidationMode, ValidationRequest, ValidationResult,
};
use lattice_validation::ValidationEngine;

// ---------------------------------------------------------------------------
// StageClient trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StageClient: Send + Sync {
    /// The pipeline stage this client serves.
    fn stage(&self) -> Stage;

    /// Validate content on behalf of this stage.
    async fn invoke(&self, content: &str, platform: &str) -> Result<ValidationResult>;

    /// Point-in-time view of this client's breaker, for health reporting.
    fn breaker_snapshot(&self) -> BreakerSnapshot;
}

// ---------------------------------------------------------------------------
// Provenance re-verification
// ---------------------------------------------------------------------------

/// Re-verify `all_rules_provenanced` on a result before it leaves a stage
/// client. The result constructor already guarantees this; the stage client
/// is the last line of defense required by the platform invariant.
pub fn verify_provenanced(stage: Stage, result: &ValidationResult) -> Result<()> {
    if result.all_rules_provenanced
        && result
            .rules_applied
            .iter()
            .all(|r| r.has_complete_provenance())
    {
        return Ok(());
    }
    let offender = result
        .rules_applied
        .iter()
        .find(|r| !r.has_complete_provenance());
    let (rule_id, missing) = match offender {
        Some(rule) => (rule.id.clone(), rule.missing_metadata_keys()),
        None => ("unknown".to_string(), Vec::new()),
    };
    tracing::error!(
        stage = stage.name(),
        rule_id = %rule_id,
        "Stage client received a result with non-provenanced rules"
    );
    Err(LatticeError::ProvenanceViolation { rule_id, missing })
}

// ---------------------------------------------------------------------------
// Shared invoke core
// ---------------------------------------------------------------------------

struct StageCore {
    stage: Stage,
    engine: Arc<ValidationEngine>,
    breaker: CircuitBreaker,
}

impl StageCore {
    fn new(stage: Stage, engine: Arc<ValidationEngine>, config: BreakerConfig) -> Self {
        let breaker = CircuitBreaker::new(format!("agent_{}", stage.name()), config);
        Self {
            stage,
            engine,
            breaker,
        }
    }

    fn request(&self, content: &str, platform: &str) -> Result<ValidationRequest> {
        match (self.stage.mode(), self.stage.checkpoint_phase()) {
            (ValidationMode::Comprehensive, _) => {
                Ok(ValidationRequest::comprehensive(content, platform))
            }
            (ValidationMode::Selective, Some(phase)) => {
                Ok(ValidationRequest::selective(content, platform, phase))
            }
            (ValidationMode::Selective, None) => Err(LatticeError::InvalidRequest(format!(
                "stage '{}' is selective but has no checkpoint phase",
                self.stage.name()
            ))),
        }
    }

    async fn invoke(&self, content: &str, platform: &str) -> Result<ValidationResult> {
        let request = self.request(content, platform)?;
        let result = self.breaker.call(|| self.engine.validate(&request)).await?;
        verify_provenanced(self.stage, &result)?;
        tracing::debug!(
            stage = self.stage.name(),
            rules = result.rules_applied.len(),
            violations = result.violations.len(),
            quality = result.quality_score,
            "Stage validation complete"
        );
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// The five concrete clients
// ---------------------------------------------------------------------------

/// Gathers source material context; Selective at the pre-writing checkpoint.
pub struct ResearchClient {
    core: StageCore,
}

impl ResearchClient {
    pub fn new(engine: Arc<ValidationEngine>, config: BreakerConfig) -> Self {
        Self {
            core: StageCore::new(Stage::Research, engine, config),
        }
    }
}

#[async_trait]
impl StageClient for ResearchClient {
    fn stage(&self) -> Stage {
        Stage::Research
    }

    async fn invoke(&self, content: &str, platform: &str) -> Result<ValidationResult> {
        self.core.invoke(content, platform).await
    }

    fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.core.breaker.snapshot()
    }
}

/// Checks audience fit; Selective at the pre-writing checkpoint.
pub struct AudienceClient {
    core: StageCore,
}

impl AudienceClient {
    pub fn new(engine: Arc<ValidationEngine>, config: BreakerConfig) -> Self {
        Self {
            core: StageCore::new(Stage::Audience, engine, config),
        }
    }
}

#[async_trait]
impl StageClient for AudienceClient {
    fn stage(&self) -> Stage {
        Stage::Audience
    }

    async fn invoke(&self, content: &str, platform: &str) -> Result<ValidationResult> {
        self.core.invoke(content, platform).await
    }

    fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.core.breaker.snapshot()
    }
}

/// Validates the working draft; Selective at the mid-writing checkpoint.
pub struct WriterClient {
    core: StageCore,
}

impl WriterClient {
    pub fn new(engine: Arc<ValidationEngine>, config: BreakerConfig) -> Self {
        Self {
            core: StageCore::new(Stage::Writer, engine, config),
        }
    }
}

#[async_trait]
impl StageClient for WriterClient {
    fn stage(&self) -> Stage {
        Stage::Writer
    }

    async fn invoke(&self, content: &str, platform: &str) -> Result<ValidationResult> {
        self.core.invoke(content, platform).await
    }

    fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.core.breaker.snapshot()
    }
}

/// Full editorial pass; Comprehensive.
pub struct StyleClient {
    core: StageCore,
}

impl StyleClient {
    pub fn new(engine: Arc<ValidationEngine>, config: BreakerConfig) -> Self {
        Self {
            core: StageCore::new(Stage::Style, engine, config),
        }
    }
}

#[async_trait]
impl StageClient for StyleClient {
    fn stage(&self) -> Stage {
        Stage::Style
    }

    async fn invoke(&self, content: &str, platform: &str) -> Result<ValidationResult> {
        self.core.invoke(content, platform).await
    }

    fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.core.breaker.snapshot()
    }
}

/// Final quality gate before completion; Comprehensive.
pub struct QualityClient {
    core: StageCore,
}

impl QualityClient {
    pub fn new(engine: Arc<ValidationEngine>, config: BreakerConfig) -> Self {
        Self {
            core: StageCore::new(Stage::Quality, engine, config),
        }
    }
}

#[async_trait]
impl StageClient for QualityClient {
    fn stage(&self) -> Stage {
        Stage::Quality
    }

    async fn invoke(&self, content: &str, platform: &str) -> Result<ValidationResult> {
        self.core.invoke(content, platform).await
    }

    fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.core.breaker.snapshot()
    }
}

// ---------------------------------------------------------------------------
// StageClientSet
// ---------------------------------------------------------------------------

/// All five clients in fixed stage order, ready for the flow engine.
pub struct StageClientSet {
    clients: Vec<Arc<dyn StageClient>>,
}

impl StageClientSet {
    pub fn new(engine: Arc<ValidationEngine>, config: BreakerConfig) -> Self {
        let clients: Vec<Arc<dyn StageClient>> = vec![
            Arc::new(ResearchClient::new(engine.clone(), config.clone())),
            Arc::new(AudienceClient::new(engine.clone(), config.clone())),
            Arc::new(WriterClient::new(engine.clone(), config.clone())),
            Arc::new(StyleClient::new(engine.clone(), config.clone())),
            Arc::new(QualityClient::new(engine, config)),
        ];
        Self { clients }
    }

    pub fn client(&self, stage: Stage) -> &Arc<dyn StageClient> {
        &self.clients[stage.index()]
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.clients.iter().map(|c| c.breaker_snapshot()).collect()
    }
}
