//! The flow engine: fixed-order sequential stage execution per flow.
//!
//! One tokio task drives one flow; the flow registry, cache, and breakers are
//! the only shared structures. A paused flow holds no task and no lock —
//! resolution spawns a fresh continuation from the recorded stage index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use lattice_agents::StageClientSet;
use lattice_store::{
    BreakerConfig, BreakerSnapshot, CacheStats, CircuitBreaker, RuleCache, RuleStore,
};
use lattice_types::{FlowState, LatticeError, Result, Severity, Stage, TextFix};
use lattice_validation::ValidationEngine;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::events::{EventEmitter, FlowEvent};
use crate::flow::{FlowExecution, FlowOptions, FlowStatus, StageResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FlowEngineConfig {
    pub cache_ttl: Duration,
    pub store_breaker: BreakerConfig,
    pub agent_breaker: BreakerConfig,
    pub event_capacity: usize,
}

impl Default for FlowEngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            store_breaker: BreakerConfig::default(),
            agent_breaker: BreakerConfig::default(),
            event_capacity: 256,
        }
    }
}

/// Health snapshot across the engine's dependencies.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub rule_store: String,
    pub cache: CacheStats,
    pub breakers: Vec<BreakerSnapshot>,
}

// ---------------------------------------------------------------------------
// FlowEngine
// ---------------------------------------------------------------------------

struct EngineInner {
    clients: StageClientSet,
    flows: tokio::sync::RwLock<HashMap<String, FlowExecution>>,
    checkpoints: CheckpointManager,
    events: EventEmitter,
    store: Arc<dyn RuleStore>,
    cache: Arc<RuleCache>,
    store_breaker: Arc<CircuitBreaker>,
    validation: Arc<ValidationEngine>,
}

/// Drives flows through the fixed stage order. Cheap to clone via its inner
/// `Arc`; all collaborators are dependency-injected at construction.
#[derive(Clone)]
pub struct FlowEngine {
    inner: Arc<EngineInner>,
}

impl FlowEngine {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self::with_config(store, FlowEngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn RuleStore>, config: FlowEngineConfig) -> Self {
        let cache = Arc::new(RuleCache::new(config.cache_ttl));
        let store_breaker = Arc::new(CircuitBreaker::new(
            "rule_store",
            config.store_breaker.clone(),
        ));
        let validation = Arc::new(ValidationEngine::new(
            store.clone(),
            cache.clone(),
            store_breaker.clone(),
        ));
        let clients = StageClientSet::new(validation.clone(), config.agent_breaker.clone());

        Self {
            inner: Arc::new(EngineInner {
                clients,
                flows: tokio::sync::RwLock::new(HashMap::new()),
                checkpoints: CheckpointManager::new(),
                events: EventEmitter::new(config.event_capacity),
                store,
                cache,
                store_breaker,
                validation,
            }),
        }
    }

    /// The validation engine this flow engine drives, for direct
    /// validate-without-a-flow calls.
    pub fn validation_engine(&self) -> Arc<ValidationEngine> {
        self.inner.validation.clone()
    }

    /// Subscribe to flow events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.inner.events.subscribe()
    }

    /// Submit content for a full pipeline run. Returns the flow id
    /// immediately; execution proceeds on its own task.
    pub async fn submit(
        &self,
        content: impl Into<String>,
        platform: impl Into<String>,
        options: FlowOptions,
    ) -> String {
        let flow = FlowExecution::new(content, platform, &options);
        let flow_id = flow.flow_id.clone();
        let platform = flow.platform.clone();

        self.inner
            .flows
            .write()
            .await
            .insert(flow_id.clone(), flow);
        self.inner.events.emit(FlowEvent::FlowSubmitted {
            flow_id: flow_id.clone(),
            platform,
        });

        let inner = self.inner.clone();
        let id = flow_id.clone();
        tokio::spawn(async move {
            run_from(inner, id, 0).await;
        });
        flow_id
    }

    /// Current status of a flow.
    pub async fn status(&self, flow_id: &str) -> Result<FlowStatus> {
        let flows = self.inner.flows.read().await;
        flows
            .get(flow_id)
            .map(FlowStatus::from)
            .ok_or_else(|| LatticeError::FlowNotFound {
                flow_id: flow_id.to_string(),
            })
    }

    /// Resolve a pending checkpoint. Approval (optionally with substituted
    /// content) resumes the flow at the next stage; rejection fails it.
    pub async fn resolve_checkpoint(
        &self,
        checkpoint_id: &str,
        approved: bool,
        modified_content: Option<String>,
    ) -> Result<()> {
        let checkpoint = self.inner.checkpoints.take(checkpoint_id).await.ok_or_else(|| {
            LatticeError::CheckpointNotFound {
                checkpoint_id: checkpoint_id.to_string(),
            }
        })?;

        let resume_index = {
            let mut flows = self.inner.flows.write().await;
            let flow = flows.get_mut(&checkpoint.flow_id).ok_or_else(|| {
                LatticeError::FlowNotFound {
                    flow_id: checkpoint.flow_id.clone(),
                }
            })?;
            if flow.state != FlowState::Paused {
                return Err(LatticeError::InvalidRequest(format!(
                    "flow {} is not paused",
                    flow.flow_id
                )));
            }

            if !approved {
                flow.state = FlowState::Failed;
                flow.error_message = Some("checkpoint rejected".to_string());
                flow.touch();
                None
            } else {
                if let Some(content) = modified_content {
                    flow.content = content;
                }
                flow.touch();
                Some(checkpoint.stage.index() + 1)
            }
        };

        self.inner.events.emit(FlowEvent::CheckpointResolved {
            flow_id: checkpoint.flow_id.clone(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
            approved,
        });

        match resume_index {
            Some(index) => {
                let inner = self.inner.clone();
                let flow_id = checkpoint.flow_id.clone();
                tokio::spawn(async move {
                    run_from(inner, flow_id, index).await;
                });
            }
            None => {
                self.inner.events.emit(FlowEvent::FlowFailed {
                    flow_id: checkpoint.flow_id.clone(),
                    error: "checkpoint rejected".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Cancel a flow, transitioning it directly to Failed regardless of how
    /// long it has been pending or paused.
    pub async fn cancel(&self, flow_id: &str) -> Result<()> {
        {
            let mut flows = self.inner.flows.write().await;
            let flow = flows
                .get_mut(flow_id)
                .ok_or_else(|| LatticeError::FlowNotFound {
                    flow_id: flow_id.to_string(),
                })?;
            if flow.state.is_terminal() {
                return Err(LatticeError::InvalidRequest(format!(
                    "flow {flow_id} already reached {:?}",
                    flow.state
                )));
            }
            flow.state = FlowState::Failed;
            flow.error_message = Some("cancelled".to_string());
            flow.touch();
        }
        self.inner.events.emit(FlowEvent::FlowFailed {
            flow_id: flow_id.to_string(),
            error: "cancelled".to_string(),
        });
        Ok(())
    }

    /// All checkpoints currently awaiting resolution.
    pub async fn pending_checkpoints(&self) -> Vec<Checkpoint> {
        self.inner.checkpoints.pending().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Drop terminal flow records older than the retention window.
    pub async fn prune_terminal(&self, retention: Duration) -> usize {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        let mut flows = self.inner.flows.write().await;
        let before = flows.len();
        flows.retain(|_, flow| !(flow.state.is_terminal() && flow.updated_at < cutoff));
        before - flows.len()
    }

    /// Health across the store, cache, and every circuit breaker.
    pub async fn health(&self) -> HealthReport {
        let rule_store = match self.inner.store.heartbeat().await {
            Ok(()) => "ok".to_string(),
            Err(err) => format!("unavailable: {err}"),
        };
        let mut breakers = vec![self.inner.store_breaker.snapshot()];
        breakers.extend(self.inner.clients.breaker_snapshots());
        HealthReport {
            rule_store,
            cache: self.inner.cache.stats().await,
            breakers,
        }
    }
}

// ---------------------------------------------------------------------------
// The sequential stage loop
// ---------------------------------------------------------------------------

/// Walk the stage order from `start_index`. Every transition is an explicit
/// return value from the stage client — no event drives re-entry, so a flow
/// can never loop back on itself.
async fn run_from(inner: Arc<EngineInner>, flow_id: String, start_index: usize) {
    {
        let mut flows = inner.flows.write().await;
        let Some(flow) = flows.get_mut(&flow_id) else {
            return;
        };
        flow.state = FlowState::Running;
        flow.touch();
    }

    for index in start_index..Stage::ORDER.len() {
        let stage = Stage::ORDER[index];

        // Snapshot the working content; the lock is released before the
        // stage client call suspends.
        let (content, platform) = {
            let mut flows = inner.flows.write().await;
            let Some(flow) = flows.get_mut(&flow_id) else {
                return;
            };
            if flow.state != FlowState::Running {
                // Cancelled between stages.
                return;
            }
            flow.stage_index = index;
            flow.touch();
            (flow.content.clone(), flow.platform.clone())
        };

        inner.events.emit(FlowEvent::StageStarted {
            flow_id: flow_id.clone(),
            stage,
        });
        tracing::info!(flow = %flow_id, stage = stage.name(), "Stage started");

        match inner.clients.client(stage).invoke(&content, &platform).await {
            Ok(result) => {
                let quality_score = result.quality_score;
                let violation_count = result.violations.len();
                let critical_rule = result
                    .violations
                    .iter()
                    .find(|v| v.severity == Severity::Critical)
                    .map(|v| v.rule_id.clone());
                let fixes: Vec<TextFix> = result.auto_fixes().cloned().collect();

                let pause_at_stage = {
                    let mut flows = inner.flows.write().await;
                    let Some(flow) = flows.get_mut(&flow_id) else {
                        return;
                    };
                    flow.stage_results.push(StageResult { stage, result });
                    flow.touch();

                    if let Some(rule_id) = critical_rule {
                        let error = format!(
                            "critical violation of rule '{rule_id}' at stage '{}'",
                            stage.name()
                        );
                        flow.state = FlowState::Failed;
                        flow.error_message = Some(error.clone());
                        drop(flows);
                        tracing::warn!(flow = %flow_id, stage = stage.name(), %error, "Flow aborted");
                        inner.events.emit(FlowEvent::FlowFailed {
                            flow_id: flow_id.clone(),
                            error,
                        });
                        return;
                    }

                    for fix in &fixes {
                        if flow.content.contains(&fix.find) {
                            flow.content = flow.content.replace(&fix.find, &fix.replace_with);
                            tracing::info!(
                                flow = %flow_id,
                                stage = stage.name(),
                                find = %fix.find,
                                replace_with = %fix.replace_with,
                                "Applied auto-fix"
                            );
                        }
                    }

                    let pause = flow.checkpoint_after.contains(&stage);
                    pause.then(|| flow.content.clone())
                };

                inner.events.emit(FlowEvent::StageCompleted {
                    flow_id: flow_id.clone(),
                    stage,
                    quality_score,
                    violations: violation_count,
                });

                if let Some(pending_content) = pause_at_stage {
                    // Create the checkpoint before flipping the state so an
                    // observer of Paused always finds its checkpoint.
                    let checkpoint = inner
                        .checkpoints
                        .create(&flow_id, stage, &pending_content)
                        .await;
                    let paused = {
                        let mut flows = inner.flows.write().await;
                        match flows.get_mut(&flow_id) {
                            Some(flow) if flow.state == FlowState::Running => {
                                flow.state = FlowState::Paused;
                                flow.touch();
                                true
                            }
                            _ => false,
                        }
                    };
                    if paused {
                        inner.events.emit(FlowEvent::FlowPaused {
                            flow_id: flow_id.clone(),
                            checkpoint_id: checkpoint.checkpoint_id,
                            stage,
                        });
                    } else {
                        // Cancelled in the gap; the checkpoint is moot.
                        inner.checkpoints.take(&checkpoint.checkpoint_id).await;
                    }
                    // The task ends here; resolution spawns a continuation.
                    return;
                }
            }
            Err(err) => {
                let error = err.to_string();
                {
                    let mut flows = inner.flows.write().await;
                    let Some(flow) = flows.get_mut(&flow_id) else {
                        return;
                    };
                    flow.state = FlowState::Failed;
                    flow.error_message = Some(error.clone());
                    flow.touch();
                }
                tracing::warn!(flow = %flow_id, stage = stage.name(), %error, "Stage failed");
                inner.events.emit(FlowEvent::FlowFailed {
                    flow_id: flow_id.clone(),
                    error,
                });
                return;
            }
        }
    }

    {
        let mut flows = inner.flows.write().await;
        if let Some(flow) = flows.get_mut(&flow_id) {
            flow.state = FlowState::Completed;
            flow.touch();
        }
    }
    tracing::info!(flow = %flow_id, "Flow completed");
    inner.events.emit(FlowEvent::FlowCompleted {
        flow_id,
        stages: Stage::ORDER.len(),
    });
}
