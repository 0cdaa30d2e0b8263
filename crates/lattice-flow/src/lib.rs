//! Sequential multi-agent flow engine for the Lattice platform.
//!
//! A submitted flow walks the fixed stage order (research → audience →
//! writer → style → quality) with no conditional branching and no
//! event-driven re-entrancy: every transition is an explicit function return
//! driving the next stage. Many flows run concurrently, each on its own task;
//! within one flow, execution is strictly sequential by design.

pub mod checkpoint;
pub mod engine;
pub mod events;
pub mod flow;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use engine::{FlowEngine, FlowEngineConfig, HealthReport};
pub use events::{EventEmitter, FlowEvent};
pub use flow::{FlowExecution, FlowOptions, FlowStatus, StageResult};
