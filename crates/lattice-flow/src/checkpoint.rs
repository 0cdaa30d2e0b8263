//! Checkpoint records and the manager that owns them.
//!
//! A checkpoint is created when a flow reaches a configured pause point and
//! consumed when an external approval or rejection arrives. The manager owns
//! the pending set exclusively; resolution is routed through the flow engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use lattice_types::Stage;

/// A pending human-approval gate on a paused flow.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub flow_id: String,
    pub stage: Stage,
    /// The working content as it stood when the flow paused.
    pub pending_content: String,
    pub awaiting_approval: bool,
    pub created_at: DateTime<Utc>,
}

/// Owns all pending checkpoints for the process.
pub struct CheckpointManager {
    pending: tokio::sync::RwLock<HashMap<String, Checkpoint>>,
}

impl CheckpointManager {
    pub fn new() -> Self {
        Self {
            pending: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Create a checkpoint for a paused flow and return a copy of it.
    pub async fn create(&self, flow_id: &str, stage: Stage, content: &str) -> Checkpoint {
        let checkpoint = Checkpoint {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            stage,
            pending_content: content.to_string(),
            awaiting_approval: true,
            created_at: Utc::now(),
        };
        tracing::info!(
            flow = flow_id,
            checkpoint = %checkpoint.checkpoint_id,
            stage = stage.name(),
            "Checkpoint created, flow paused"
        );
        self.pending
            .write()
            .await
            .insert(checkpoint.checkpoint_id.clone(), checkpoint.clone());
        checkpoint
    }

    /// Consume a checkpoint. Returns `None` if it does not exist or was
    /// already resolved.
    pub async fn take(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.pending.write().await.remove(checkpoint_id)
    }

    /// Look at a pending checkpoint without consuming it.
    pub async fn get(&self, checkpoint_id: &str) -> Option<Checkpoint> {
        self.pending.read().await.get(checkpoint_id).cloned()
    }

    /// All pending checkpoints, most recent last.
    pub async fn pending(&self) -> Vec<Checkpoint> {
        let mut all: Vec<Checkpoint> = self.pending.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Pending checkpoints belonging to one flow.
    pub async fn pending_for_flow(&self, flow_id: &str) -> Vec<Checkpoint> {
        self.pending()
            .await
            .into_iter()
            .filter(|c| c.flow_id == flow_id)
            .collect()
    }
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_take_consumes_the_checkpoint() {
        let manager = CheckpointManager::new();
        let cp = manager.create("flow-1", Stage::Research, "content").await;
        assert!(cp.awaiting_approval);

        let taken = manager.take(&cp.checkpoint_id).await.unwrap();
        assert_eq!(taken.flow_id, "flow-1");
        assert_eq!(taken.stage, Stage::Research);
        assert_eq!(taken.pending_content, "content");

        // Second take: already consumed.
        assert!(manager.take(&cp.checkpoint_id).await.is_none());
    }

    #[tokio::test]
    async fn get_does_not_consume() {
        let manager = CheckpointManager::new();
        let cp = manager.create("flow-1", Stage::Writer, "draft").await;
        assert!(manager.get(&cp.checkpoint_id).await.is_some());
        assert!(manager.get(&cp.checkpoint_id).await.is_some());
    }

    #[tokio::test]
    async fn pending_for_flow_filters_by_flow() {
        let manager = CheckpointManager::new();
        manager.create("flow-1", Stage::Research, "a").await;
        manager.create("flow-2", Stage::Research, "b").await;
        manager.create("flow-1", Stage::Writer, "c").await;

        let for_one = manager.pending_for_flow("flow-1").await;
        assert_eq!(for_one.len(), 2);
        assert!(for_one.iter().all(|c| c.flow_id == "flow-1"));
        assert_eq!(manager.pending().await.len(), 3);
    }

    #[tokio::test]
    async fn unknown_checkpoint_take_returns_none() {
        let manager = CheckpointManager::new();
        assert!(manager.take("nope").await.is_none());
    }
}
