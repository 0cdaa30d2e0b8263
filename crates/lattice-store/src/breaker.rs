//! Circuit breaker gating calls to a failing dependency.
//!
//! Closed passes calls through and counts consecutive failures; at the
//! threshold the breaker opens and fails fast without a network attempt.
//! After the recovery timeout a single trial call is permitted (half-open);
//! its success closes the circuit, its failure re-opens it and resets the
//! failure clock. Each protected dependency owns an independent instance —
//! counters are never shared.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use lattice_types::{LatticeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// One breaker per protected dependency. All state mutation happens under the
/// internal lock; the lock is never held across an await.
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Gate a call attempt. Transitions Open → HalfOpen once the recovery
    /// timeout has elapsed; in HalfOpen only the single trial call passes.
    fn acquire(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(dependency = %self.dependency, "Circuit breaker half-open, permitting trial call");
                    Ok(())
                } else {
                    let retry_in = self.config.recovery_timeout - elapsed;
                    Err(LatticeError::CircuitOpen {
                        dependency: self.dependency.clone(),
                        retry_in_ms: retry_in.as_millis() as u64,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(LatticeError::CircuitOpen {
                        dependency: self.dependency.clone(),
                        retry_in_ms: 0,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            tracing::info!(dependency = %self.dependency, "Circuit breaker closed after successful trial");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                tracing::warn!(dependency = %self.dependency, "Trial call failed, circuit breaker re-opened");
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    tracing::warn!(
                        dependency = %self.dependency,
                        failures = inner.consecutive_failures,
                        "Failure threshold reached, circuit breaker opened"
                    );
                }
            }
        }
    }

    /// Run `f` through the breaker. Any error counts as a failure; the call
    /// is not attempted at all while the circuit is open.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test_dep",
            BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
            },
        )
    }

    async fn fail(b: &CircuitBreaker) {
        let _ = b
            .call(|| async {
                Err::<(), _>(LatticeError::StoreUnavailable {
                    store: "x".into(),
                    message: "down".into(),
                })
            })
            .await;
    }

    #[tokio::test]
    async fn starts_closed_and_passes_calls() {
        let b = breaker(3, Duration::from_secs(30));
        assert_eq!(b.state(), BreakerState::Closed);
        let out = b.call(|| async { Ok(42) }).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let b = breaker(3, Duration::from_secs(30));
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let b = breaker(3, Duration::from_secs(30));
        fail(&b).await;
        fail(&b).await;
        b.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(b.snapshot().consecutive_failures, 0);
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_calling() {
        let b = breaker(1, Duration::from_secs(30));
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        let attempts = AtomicUsize::new(0);
        let err = b
            .call(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LatticeError::CircuitOpen { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_timeout_permits_a_trial_that_closes_on_success() {
        let b = breaker(1, Duration::from_secs(10));
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;

        let out = b.call(|| async { Ok("recovered") }).await.unwrap();
        assert_eq!(out, "recovered");
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_and_resets_the_clock() {
        let b = breaker(1, Duration::from_secs(10));
        fail(&b).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        // The clock restarted at the trial failure: half the timeout is not enough.
        tokio::time::advance(Duration::from_secs(5)).await;
        let err = b.call(|| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, LatticeError::CircuitOpen { .. }));

        tokio::time::advance(Duration::from_secs(5)).await;
        b.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn breakers_do_not_share_counters() {
        let a = breaker(1, Duration::from_secs(30));
        let b = breaker(1, Duration::from_secs(30));
        fail(&a).await;
        assert_eq!(a.state(), BreakerState::Open);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_error_reports_remaining_recovery_time() {
        let b = breaker(1, Duration::from_secs(10));
        fail(&b).await;
        tokio::time::advance(Duration::from_secs(4)).await;

        let err = b.call(|| async { Ok(()) }).await.unwrap_err();
        match err {
            LatticeError::CircuitOpen { retry_in_ms, .. } => {
                assert_eq!(retry_in_ms, 6000);
            }
            other => panic!("Expected CircuitOpen, got: {other:?}"),
        }
    }
}
