//! Circuit breaker around unreliable async dependencies.
//!
//! ```text
//! Closed ──[threshold consecutive failures]──> Open
//!    ↑                                          │
//!    │                                [open duration elapsed]
//!    │                                          ↓
//!    └──────[trial succeeds]──── HalfOpen ──[trial fails]──> Open
//! ```
//!
//! Half-open admits exactly one trial call. Everyone else is rejected as if the
//! circuit were still open until the trial settles.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    open_duration: Duration,
}

impl CircuitBreakerConfig {
    /// A threshold of zero is raised to one.
    #[must_use]
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_duration,
        }
    }

    #[must_use]
    pub fn database() -> Self {
        Self::new(5, Duration::from_secs(30))
    }

    #[must_use]
    pub fn payment() -> Self {
        Self::new(3, Duration::from_secs(60))
    }

    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    #[must_use]
    pub fn open_duration(&self) -> Duration {
        self.open_duration
    }

    fn open_duration_ms(&self) -> i64 {
        i64::try_from(self.open_duration.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::database()
    }
}

/// Either the breaker refused the call or the call itself failed.
#[derive(Debug)]
pub enum BreakerError<E> {
    Open { name: String, retry_after_ms: i64 },
    Upstream(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open {
                name,
                retry_after_ms,
            } => write!(f, "circuit {name} is open, retry in {retry_after_ms}ms"),
            BreakerError::Upstream(err) => err.fmt(f),
        }
    }
}

impl<E> std::error::Error for BreakerError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Upstream(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub open_duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<i64>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<i64>,
    trial_in_flight: bool,
    // Bumped on every state transition; outcomes from an older generation are stale.
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    trial: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                trial_in_flight: false,
                generation: 0,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            open_duration_ms: self.config.open_duration_ms(),
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Run `op` unless the circuit is open.
    ///
    /// When rejected, `op` is never called. Errors from `op` come back
    /// unchanged inside [`BreakerError::Upstream`].
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] while the circuit rejects calls, or
    /// [`BreakerError::Upstream`] when `op` fails.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ticket = self
            .acquire()
            .map_err(|retry_after_ms| BreakerError::Open {
                name: self.name.clone(),
                retry_after_ms,
            })?;
        let mut call = CallGuard {
            breaker: self,
            ticket,
            settled: false,
        };
        let result = op().await;
        call.settle(result.is_ok());
        result.map_err(BreakerError::Upstream)
    }

    /// Admit a call, or return how long until the circuit may be retried.
    fn acquire(&self) -> Result<Ticket, i64> {
        let now = self.clock.now_millis();
        let open_ms = self.config.open_duration_ms();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Ticket {
                generation: inner.generation,
                trial: false,
            }),
            CircuitState::Open => {
                let elapsed = now.saturating_sub(inner.last_failure_at.unwrap_or(now));
                if elapsed < open_ms {
                    return Err(open_ms - elapsed);
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                inner.generation += 1;
                info!(breaker = %self.name, "Circuit half-open, admitting trial call");
                Ok(Ticket {
                    generation: inner.generation,
                    trial: true,
                })
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(open_ms);
                }
                inner.trial_in_flight = true;
                Ok(Ticket {
                    generation: inner.generation,
                    trial: true,
                })
            }
        }
    }

    fn record(&self, ticket: Ticket, success: bool) {
        let now = self.clock.now_millis();
        let mut inner = self.lock();

        if ticket.trial {
            inner.trial_in_flight = false;
            if inner.state != CircuitState::HalfOpen || inner.generation != ticket.generation {
                return;
            }
            inner.generation += 1;
            if success {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.last_failure_at = None;
                info!(breaker = %self.name, "Circuit closed after successful trial");
            } else {
                inner.state = CircuitState::Open;
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.last_failure_at = Some(now);
                warn!(breaker = %self.name, "Trial call failed, circuit re-opened");
            }
            return;
        }

        // Admitted while closed but finished after a transition.
        if inner.state != CircuitState::Closed || inner.generation != ticket.generation {
            return;
        }
        if success {
            inner.consecutive_failures = 0;
            return;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(now);
        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.generation += 1;
            warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                "Circuit opened"
            );
        }
    }

    fn release_trial(&self, ticket: Ticket) {
        let mut inner = self.lock();
        if inner.generation == ticket.generation {
            inner.trial_in_flight = false;
        }
    }
}

/// Settles the admitted call. Dropping it unsettled (the caller's future was
/// cancelled) frees the half-open trial slot without recording an outcome.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Ticket,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.ticket, success);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.ticket.trial {
            self.breaker.release_trial(self.ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    const START_MS: i64 = 1_700_000_000_000;

    fn breaker(threshold: u32, open_secs: u64) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START_MS));
        let breaker = CircuitBreaker::new(
            "payment",
            CircuitBreakerConfig::new(threshold, Duration::from_secs(open_secs)),
            clock.clone(),
        );
        (breaker, clock)
    }

    async fn fail(breaker: &CircuitBreaker) {
        let result = breaker
            .execute(|| async { Err::<(), _>(anyhow::anyhow!("gateway timeout")) })
            .await;
        assert!(matches!(result, Err(BreakerError::Upstream(_))));
    }

    #[tokio::test]
    async fn opens_after_threshold_and_recovers() {
        let (breaker, clock) = breaker(3, 60);
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        clock.set(START_MS + 60_000 - 1);
        let rejected = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            })
            .await;
        assert!(matches!(
            rejected,
            Err(BreakerError::Open { retry_after_ms: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        clock.set(START_MS + 60_000);
        let trial = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>("charged")
            })
            .await;
        assert!(matches!(trial, Ok("charged")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let (breaker, _) = breaker(3, 60);
        fail(&breaker).await;
        fail(&breaker).await;
        let ok = breaker.execute(|| async { Ok::<_, anyhow::Error>(()) }).await;
        assert!(ok.is_ok());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn failed_trial_reopens_with_fresh_timer() {
        let (breaker, clock) = breaker(1, 30);
        fail(&breaker).await;
        clock.set(START_MS + 30_000);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().last_failure_at, Some(START_MS + 30_000));

        clock.set(START_MS + 59_999);
        let rejected = breaker.execute(|| async { Ok::<_, anyhow::Error>(()) }).await;
        assert!(matches!(rejected, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn only_one_trial_in_flight() {
        let (breaker, clock) = breaker(1, 30);
        fail(&breaker).await;
        clock.set(START_MS + 30_000);

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial = breaker.execute(|| async move {
            let _ = wait.await;
            Ok::<_, anyhow::Error>(())
        });
        let second = async {
            tokio::task::yield_now().await;
            let result = breaker.execute(|| async { Ok::<_, anyhow::Error>(()) }).await;
            let _ = release.send(());
            result
        };
        let (trial, second) = tokio::join!(trial, second);
        assert!(trial.is_ok());
        assert!(matches!(second, Err(BreakerError::Open { .. })));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn cancelled_trial_frees_slot() {
        let (breaker, clock) = breaker(1, 30);
        fail(&breaker).await;
        clock.set(START_MS + 30_000);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.execute(|| std::future::pending::<Result<(), anyhow::Error>>()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let next = breaker.execute(|| async { Ok::<_, anyhow::Error>(()) }).await;
        assert!(next.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn stale_outcome_is_ignored() {
        let (breaker, _) = breaker(1, 30);
        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let slow = breaker.execute(|| async move {
            let _ = wait.await;
            Ok::<_, anyhow::Error>(())
        });
        let trip = async {
            tokio::task::yield_now().await;
            fail(&breaker).await;
            let _ = release.send(());
        };
        let (slow, ()) = tokio::join!(slow, trip);
        assert!(slow.is_ok());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn zero_threshold_is_raised() {
        assert_eq!(
            CircuitBreakerConfig::new(0, Duration::from_secs(1)).failure_threshold(),
            1
        );
        assert_eq!(CircuitBreakerConfig::payment().failure_threshold(), 3);
        assert_eq!(
            CircuitBreakerConfig::database().open_duration(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn snapshot_serializes_state() -> anyhow::Result<()> {
        let (breaker, _) = breaker(3, 60);
        let json = serde_json::to_value(breaker.snapshot())?;
        assert_eq!(json["name"], "payment");
        assert_eq!(json["state"], "closed");
        assert_eq!(json["failureThreshold"], 3);
        assert_eq!(json["openDurationMs"], 60_000);
        Ok(())
    }
}
