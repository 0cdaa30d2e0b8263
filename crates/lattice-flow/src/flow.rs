//! Flow execution records and the status view returned to callers.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use lattice_types::{FlowState, Stage, ValidationResult};

/// Options for a flow submission.
#[derive(Debug, Clone, Default)]
pub struct FlowOptions {
    /// Stages after which the flow pauses for human approval.
    pub checkpoint_after: HashSet<Stage>,
}

impl FlowOptions {
    pub fn with_checkpoint_after(mut self, stage: Stage) -> Self {
        self.checkpoint_after.insert(stage);
        self
    }
}

/// One stage's recorded outcome.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub result: ValidationResult,
}

/// A flow's full execution record.
///
/// Owned exclusively by the flow engine; no other component mutates it.
#[derive(Debug, Clone)]
pub struct FlowExecution {
    pub flow_id: String,
    /// The working text, mutated stage-by-stage by exact substitutions only.
    pub content: String,
    pub platform: String,
    pub state: FlowState,
    pub stage_index: usize,
    pub stage_results: Vec<StageResult>,
    pub checkpoint_after: HashSet<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl FlowExecution {
    pub fn new(
        content: impl Into<String>,
        platform: impl Into<String>,
        options: &FlowOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            flow_id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            platform: platform.into(),
            state: FlowState::Pending,
            stage_index: 0,
            stage_results: Vec::new(),
            checkpoint_after: options.checkpoint_after.clone(),
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Status view of a flow.
///
/// `sequential_execution` is always `true`: it encodes the design decision
/// that stage transitions are explicit function returns, never event-driven
/// re-entry.
#[derive(Debug, Clone, Serialize)]
pub struct FlowStatus {
    pub flow_id: String,
    pub state: FlowState,
    pub stage_index: usize,
    pub stage_results: Vec<StageResult>,
    pub content: String,
    pub error_message: Option<String>,
    pub sequential_execution: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&FlowExecution> for FlowStatus {
    fn from(flow: &FlowExecution) -> Self {
        Self {
            flow_id: flow.flow_id.clone(),
            state: flow.state,
            stage_index: flow.stage_index,
            stage_results: flow.stage_results.clone(),
            content: flow.content.clone(),
            error_message: flow.error_message.clone(),
            sequential_execution: true,
            created_at: flow.created_at,
            updated_at: flow.updated_at,
        }
    }
}
