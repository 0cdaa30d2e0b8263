//! Shared types, errors, and the provenance gate for the Lattice platform.
//!
//! This crate provides the foundational types used across all other Lattice crates:
//! - `LatticeError` — unified error taxonomy
//! - `RuleDocument` — a rule sourced from the vector-similarity store, plus the
//!   required-metadata provenance gate
//! - `ValidationRequest` / `ValidationResult` — the validation engine contract
//! - `Stage` / `FlowState` — the fixed five-stage flow vocabulary

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Unified error type for all Lattice subsystems.
#[derive(Debug, thiserror::Error)]
pub enum LatticeError {
    // === Rule store errors ===
    #[error("Rule store '{store}' unavailable: {message}")]
    StoreUnavailable { store: String, message: String },

    #[error("Request to {dependency} timed out after {timeout_ms}ms")]
    RequestTimeout { dependency: String, timeout_ms: u64 },

    // === Resilience errors ===
    #[error("Circuit breaker for '{dependency}' is open, retry in {retry_in_ms}ms")]
    CircuitOpen { dependency: String, retry_in_ms: u64 },

    // === Provenance errors ===
    #[error("Rule '{rule_id}' failed provenance verification, missing metadata: {missing:?}")]
    ProvenanceViolation { rule_id: String, missing: Vec<String> },

    // === Validation errors ===
    #[error("Validation unavailable for collection '{collection}': {reason}")]
    ValidationUnavailable { collection: String, reason: String },

    #[error("Invalid validation request: {0}")]
    InvalidRequest(String),

    // === Flow errors ===
    #[error("Flow {flow_id} aborted at stage '{stage}': critical violation of rule '{rule_id}'")]
    CriticalViolation {
        flow_id: String,
        stage: String,
        rule_id: String,
    },

    #[error("Checkpoint {checkpoint_id} rejected")]
    CheckpointRejected { checkpoint_id: String },

    #[error("Flow {flow_id} not found")]
    FlowNotFound { flow_id: String },

    #[error("Checkpoint {checkpoint_id} not found")]
    CheckpointNotFound { checkpoint_id: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl LatticeError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LatticeError::StoreUnavailable { .. } | LatticeError::RequestTimeout { .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    ///
    /// `ProvenanceViolation` is always terminal: it signals a correctness bug
    /// somewhere upstream, not a transient fault.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LatticeError::ProvenanceViolation { .. }
                | LatticeError::InvalidRequest(_)
                | LatticeError::CriticalViolation { .. }
                | LatticeError::CheckpointRejected { .. }
        )
    }
}

/// A convenience alias for `Result<T, LatticeError>`.
pub type Result<T> = std::result::Result<T, LatticeError>;

// ---------------------------------------------------------------------------
// RuleDocument — a rule sourced from the vector-similarity store
// ---------------------------------------------------------------------------

/// Metadata keys every rule must carry to prove it was sourced from the
/// similarity store rather than fabricated in-process.
pub const REQUIRED_METADATA_KEYS: [&str; 7] = [
    "category",
    "priority",
    "platforms",
    "workflows",
    "created_at",
    "updated_at",
    "source_collection",
];

/// A rule document returned by the vector-similarity store.
///
/// `distance` is the similarity distance to the query that produced this
/// document; lower means closer. The `metadata` map is the provenance record:
/// a document missing any of [`REQUIRED_METADATA_KEYS`] must never be cached
/// or applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDocument {
    pub id: String,
    pub text: String,
    pub collection: String,
    pub distance: f64,
    pub metadata: HashMap<String, String>,
}

impl RuleDocument {
    /// Required metadata keys that are absent or empty on this document.
    pub fn missing_metadata_keys(&self) -> Vec<String> {
        REQUIRED_METADATA_KEYS
            .iter()
            .filter(|key| {
                self.metadata
                    .get(**key)
                    .map_or(true, |v| v.trim().is_empty())
            })
            .map(|key| (*key).to_string())
            .collect()
    }

    /// The sole authoritative provenance gate: every required metadata key
    /// present and non-empty.
    pub fn has_complete_provenance(&self) -> bool {
        self.missing_metadata_keys().is_empty()
    }

    /// Read a metadata value, treating empty strings as absent.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Severity implied by the rule's `priority` metadata tier.
    pub fn severity(&self) -> Severity {
        match self.metadata_value("priority") {
            Some("critical") => Severity::Critical,
            Some("high") => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationMode / CheckpointPhase
// ---------------------------------------------------------------------------

/// The two validation strategy variants. A closed set: adding a mode is a
/// compile-time extension, not runtime string dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    Comprehensive,
    Selective,
}

impl ValidationMode {
    /// Inclusive bounds on how many rules a validation in this mode applies.
    pub fn rule_range(&self) -> (usize, usize) {
        match self {
            ValidationMode::Comprehensive => (8, 12),
            ValidationMode::Selective => (3, 4),
        }
    }
}

/// Pause points in the human-checkpointed workflow that Selective validation
/// narrows its rule query to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPhase {
    PreWriting,
    MidWriting,
    PostWriting,
}

impl CheckpointPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointPhase::PreWriting => "pre_writing",
            CheckpointPhase::MidWriting => "mid_writing",
            CheckpointPhase::PostWriting => "post_writing",
        }
    }
}

// ---------------------------------------------------------------------------
// Severity / Violation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Weight of a violation at this severity in the quality score.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Info => 0.5,
            Severity::Warning => 1.0,
            Severity::Critical => 2.0,
        }
    }
}

/// An exact-text substitution. The only content mutation the flow engine
/// performs; no generative rewriting happens at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFix {
    pub find: String,
    pub replace_with: String,
}

/// A single rule violation found during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
    pub description: String,
    pub suggestion: Option<String>,
    pub auto_fixable: bool,
    /// Present iff `auto_fixable`; the deterministic substitution to apply.
    pub fix: Option<TextFix>,
}

// ---------------------------------------------------------------------------
// ValidationRequest
// ---------------------------------------------------------------------------

/// A request to validate a piece of content. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub content: String,
    pub platform: String,
    pub mode: ValidationMode,
    /// Selective only: the checkpoint whose rules to query.
    pub checkpoint: Option<CheckpointPhase>,
    pub context: HashMap<String, serde_json::Value>,
}

impl ValidationRequest {
    /// Build a Comprehensive request for the fully-autonomous path.
    pub fn comprehensive(content: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            platform: platform.into(),
            mode: ValidationMode::Comprehensive,
            checkpoint: None,
            context: HashMap::new(),
        }
    }

    /// Build a Selective request narrowed to one checkpoint.
    pub fn selective(
        content: impl Into<String>,
        platform: impl Into<String>,
        checkpoint: CheckpointPhase,
    ) -> Self {
        Self {
            content: content.into(),
            platform: platform.into(),
            mode: ValidationMode::Selective,
            checkpoint: Some(checkpoint),
            context: HashMap::new(),
        }
    }

    /// Attach an opaque context entry (consumed at construction, keeping the
    /// request immutable afterwards).
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// ValidationResult — constructor is the provenance gate
// ---------------------------------------------------------------------------

/// The outcome of one validation call. Never mutated after construction.
///
/// `ValidationResult::new` is the enforcement point for the platform's core
/// invariant: a result containing any rule with incomplete metadata is
/// unrepresentable — construction fails with
/// [`LatticeError::ProvenanceViolation`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub id: String,
    pub mode: ValidationMode,
    pub rules_applied: Vec<RuleDocument>,
    pub violations: Vec<Violation>,
    pub suggestions: Vec<String>,
    pub quality_score: f64,
    pub processing_time_ms: u64,
    pub all_rules_provenanced: bool,
}

impl ValidationResult {
    /// Construct a result, rejecting any applied rule that fails the
    /// provenance gate.
    pub fn new(
        mode: ValidationMode,
        rules_applied: Vec<RuleDocument>,
        violations: Vec<Violation>,
        suggestions: Vec<String>,
        quality_score: f64,
        processing_time_ms: u64,
    ) -> Result<Self> {
        for rule in &rules_applied {
            let missing = rule.missing_metadata_keys();
            if !missing.is_empty() {
                return Err(LatticeError::ProvenanceViolation {
                    rule_id: rule.id.clone(),
                    missing,
                });
            }
        }
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode,
            rules_applied,
            violations,
            suggestions,
            quality_score: quality_score.clamp(0.0, 1.0),
            processing_time_ms,
            all_rules_provenanced: true,
        })
    }

    /// `true` if any violation carries critical severity.
    pub fn has_critical_violation(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == Severity::Critical)
    }

    /// Violations that carry a deterministic text fix.
    pub fn auto_fixes(&self) -> impl Iterator<Item = &TextFix> {
        self.violations.iter().filter_map(|v| v.fix.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Stage — the fixed five-stage pipeline vocabulary
// ---------------------------------------------------------------------------

/// The specialist stages, in their fixed execution order. There is no
/// conditional branching between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Research,
    Audience,
    Writer,
    Style,
    Quality,
}

impl Stage {
    /// Total stage order. The flow engine walks this array front to back.
    pub const ORDER: [Stage; 5] = [
        Stage::Research,
        Stage::Audience,
        Stage::Writer,
        Stage::Style,
        Stage::Quality,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Audience => "audience",
            Stage::Writer => "writer",
            Stage::Style => "style",
            Stage::Quality => "quality",
        }
    }

    /// Validation mode this stage runs under: the early, human-checkpointed
    /// stages use Selective; the final autonomous passes use Comprehensive.
    pub fn mode(&self) -> ValidationMode {
        match self {
            Stage::Research | Stage::Audience | Stage::Writer => ValidationMode::Selective,
            Stage::Style | Stage::Quality => ValidationMode::Comprehensive,
        }
    }

    /// Checkpoint phase a Selective stage queries rules for.
    pub fn checkpoint_phase(&self) -> Option<CheckpointPhase> {
        match self {
            Stage::Research | Stage::Audience => Some(CheckpointPhase::PreWriting),
            Stage::Writer => Some(CheckpointPhase::MidWriting),
            Stage::Style | Stage::Quality => None,
        }
    }

    /// Position of this stage in [`Stage::ORDER`].
    pub fn index(&self) -> usize {
        Stage::ORDER.iter().position(|s| s == self).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// FlowState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Completed | FlowState::Failed)
    }
}
