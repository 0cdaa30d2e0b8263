//! Flow event system for observability.
//!
//! Emits [`FlowEvent`]s via a [`tokio::sync::broadcast`] channel so external
//! observers (loggers, CLIs, dashboards) can follow flow progress without
//! coupling to the engine internals. Events are strictly informational: no
//! component drives execution off them.

use serde::{Deserialize, Serialize};

use lattice_types::Stage;

/// Events emitted during flow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlowEvent {
    FlowSubmitted {
        flow_id: String,
        platform: String,
    },
    StageStarted {
        flow_id: String,
        stage: Stage,
    },
    StageCompleted {
        flow_id: String,
        stage: Stage,
        quality_score: f64,
        violations: usize,
    },
    FlowPaused {
        flow_id: String,
        checkpoint_id: String,
        stage: Stage,
    },
    CheckpointResolved {
        flow_id: String,
        checkpoint_id: String,
        approved: bool,
    },
    FlowCompleted {
        flow_id: String,
        stages: usize,
    },
    FlowFailed {
        flow_id: String,
        error: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<FlowEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: FlowEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(FlowEvent::FlowSubmitted {
            flow_id: "f1".into(),
            platform: "linkedin".into(),
        });

        match rx.recv().await.unwrap() {
            FlowEvent::FlowSubmitted { flow_id, platform } => {
                assert_eq!(flow_id, "f1");
                assert_eq!(platform, "linkedin");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(FlowEvent::FlowCompleted {
            flow_id: "f1".into(),
            stages: 5,
        });

        let e1 = serde_json::to_string(&rx1.recv().await.unwrap()).unwrap();
        let e2 = serde_json::to_string(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(FlowEvent::FlowFailed {
            flow_id: "f1".into(),
            error: "boom".into(),
        });
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = FlowEvent::StageCompleted {
            flow_id: "f1".into(),
            stage: Stage::Writer,
            quality_score: 0.92,
            violations: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: FlowEvent = serde_json::from_str(&json).unwrap();
        match back {
            FlowEvent::StageCompleted {
                stage, violations, ..
            } => {
                assert_eq!(stage, Stage::Writer);
                assert_eq!(violations, 1);
            }
            other => panic!("unexpected variant after round-trip: {other:?}"),
        }
    }
}
