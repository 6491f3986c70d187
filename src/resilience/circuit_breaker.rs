//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls probe for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures within failure_window >= failure_threshold
//! Open → Half-Open: first call attempt after recovery_timeout
//! Half-Open → Closed: min_throughput consecutive successes
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - One breaker per backend service (not per instance)
//! - The state lock guards bookkeeping only; it is never held across the wrapped call
//! - Recent failures are a true sliding window of failure timestamps

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker tuning, immutable per breaker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Failures within the window that open a closed circuit.
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting trial calls.
    pub recovery_timeout_secs: u64,

    /// Reserved; not consulted by the state machine.
    pub half_open_timeout_secs: u64,

    /// Seconds a failure keeps counting towards `failure_threshold`.
    pub failure_window_secs: u64,

    /// Trial calls admitted while half-open, and the consecutive
    /// successes required to close again.
    pub min_throughput: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            half_open_timeout_secs: 30,
            failure_window_secs: 120,
            min_throughput: 5,
        }
    }
}

impl CircuitConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }
}

/// Call counters. Monotonic until an explicit [`CircuitBreaker::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub successful_requests: u64,
    #[serde(serialize_with = "unix_secs")]
    pub last_failure_time: Option<SystemTime>,
    #[serde(serialize_with = "unix_secs")]
    pub last_success_time: Option<SystemTime>,
}

fn unix_secs<S: Serializer>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error> {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .serialize(serializer)
}

/// What is being called through the breaker, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub endpoint: &'a str,
    pub method: &'a str,
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit is rejecting calls; the wrapped function was not invoked.
    #[error("Circuit breaker is open for service {service}{}", retry_hint(.retry_after))]
    Open {
        service: String,
        retry_after: Option<Duration>,
    },

    /// The wrapped call failed and was recorded as a circuit failure.
    #[error("Service {service} is unavailable: {source}")]
    Unavailable {
        service: String,
        #[source]
        source: E,
    },
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry in {}s)", wait.as_secs_f64().ceil() as u64),
        None => String::new(),
    }
}

impl<E> CircuitError<E> {
    pub fn service(&self) -> &str {
        match self {
            CircuitError::Open { service, .. } | CircuitError::Unavailable { service, .. } => service,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }
}

/// Point-in-time view of a breaker, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub stats: CircuitStats,
    pub half_open_count: u32,
    pub consecutive_successes: u32,
    pub config: CircuitConfig,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    stats: CircuitStats,
    last_state_change: Instant,
    /// Bumped on every transition so stale trial slots can be ignored.
    generation: u64,
    recent_failures: VecDeque<Instant>,
    half_open_count: u32,
    consecutive_successes: u32,
}

/// Per-service failure isolation state machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let name = name.into();
        metrics::record_circuit_state(&name, CircuitState::Closed);
        Self {
            name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                stats: CircuitStats::default(),
                last_state_change: Instant::now(),
                generation: 0,
                recent_failures: VecDeque::new(),
                half_open_count: 0,
                consecutive_successes: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitStats {
        self.lock().stats.clone()
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            stats: inner.stats.clone(),
            half_open_count: inner.half_open_count,
            consecutive_successes: inner.consecutive_successes,
            config: self.config.clone(),
        }
    }

    /// Run `call` under circuit protection.
    ///
    /// Fails with [`CircuitError::Open`] without invoking `call` while the
    /// circuit rejects traffic. Any error from `call` is recorded as a
    /// failure and returned wrapped in [`CircuitError::Unavailable`].
    pub async fn execute<F, Fut, T, E>(
        &self,
        context: CallContext<'_>,
        call: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let slot = self.admit::<E>()?;

        match call().await {
            Ok(value) => {
                slot.complete();
                self.on_success();
                Ok(value)
            }
            Err(error) => {
                slot.complete();
                self.on_failure(&error, context);
                Err(CircuitError::Unavailable {
                    service: self.name.clone(),
                    source: error,
                })
            }
        }
    }

    /// Force the circuit closed and zero all statistics.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed, Instant::now());
        inner.stats = CircuitStats::default();
        tracing::info!(service = %self.name, "Circuit reset to initial state");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit<E>(&self) -> Result<TrialSlot<'_>, CircuitError<E>> {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(TrialSlot::untracked(self)),
            CircuitState::Open => {
                let recovery_at = inner.last_state_change + self.config.recovery_timeout();
                if now > recovery_at {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                    tracing::info!(service = %self.name, "Circuit entering half-open state");
                    Ok(TrialSlot::untracked(self))
                } else {
                    Err(CircuitError::Open {
                        service: self.name.clone(),
                        retry_after: Some(recovery_at - now),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_count >= self.config.min_throughput {
                    return Err(CircuitError::Open {
                        service: self.name.clone(),
                        retry_after: None,
                    });
                }
                inner.half_open_count += 1;
                Ok(TrialSlot {
                    breaker: self,
                    generation: Some(inner.generation),
                })
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.stats.successful_requests += 1;
        inner.stats.total_requests += 1;
        inner.stats.last_success_time = Some(SystemTime::now());

        if inner.state == CircuitState::HalfOpen {
            inner.consecutive_successes += 1;
            let successes = inner.consecutive_successes;
            if successes >= self.config.min_throughput {
                self.transition(&mut inner, CircuitState::Closed, Instant::now());
                tracing::info!(
                    service = %self.name,
                    successes,
                    required = self.config.min_throughput,
                    "Circuit closed after successful recovery"
                );
            }
        }
    }

    fn on_failure(&self, error: &dyn fmt::Display, context: CallContext<'_>) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.stats.failed_requests += 1;
        inner.stats.total_requests += 1;
        inner.stats.last_failure_time = Some(SystemTime::now());

        inner.recent_failures.push_back(now);
        let threshold = self.config.failure_threshold.max(1) as usize;
        while inner.recent_failures.len() > threshold {
            inner.recent_failures.pop_front();
        }
        if let Some(window_start) = now.checked_sub(self.config.failure_window()) {
            while inner.recent_failures.front().is_some_and(|t| *t < window_start) {
                inner.recent_failures.pop_front();
            }
        }

        match inner.state {
            CircuitState::Closed => {
                let recent = inner.recent_failures.len();
                if recent >= threshold {
                    self.transition(&mut inner, CircuitState::Open, now);
                    tracing::warn!(
                        service = %self.name,
                        failures = recent,
                        endpoint = context.endpoint,
                        method = context.method,
                        error = %error,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open, now);
                tracing::warn!(
                    service = %self.name,
                    endpoint = context.endpoint,
                    method = context.method,
                    error = %error,
                    "Circuit reopened after failed recovery attempt"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Give back a half-open trial slot whose call never produced an outcome.
    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_count = inner.half_open_count.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        inner.state = to;
        inner.last_state_change = now;
        inner.generation += 1;
        inner.half_open_count = 0;
        inner.consecutive_successes = 0;
        if to == CircuitState::Closed {
            inner.recent_failures.clear();
        }
        metrics::record_circuit_state(&self.name, to);
    }

    #[cfg(test)]
    fn recent_failure_count(&self) -> usize {
        self.lock().recent_failures.len()
    }
}

/// Admission ticket for one call. A half-open trial whose future is dropped
/// before completing hands its slot back on drop.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    generation: Option<u64>,
}

impl<'a> TrialSlot<'a> {
    fn untracked(breaker: &'a CircuitBreaker) -> Self {
        Self { breaker, generation: None }
    }

    fn complete(mut self) {
        self.generation = None;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation.take() {
            self.breaker.release_trial(generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    const CTX: CallContext<'static> = CallContext { endpoint: "/orders", method: "GET" };

    fn breaker(threshold: u32, min_throughput: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "orders",
            CircuitConfig {
                failure_threshold: threshold,
                recovery_timeout_secs: 30,
                half_open_timeout_secs: 10,
                failure_window_secs: 60,
                min_throughput,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> CircuitError<io::Error> {
        cb.execute(CTX, || async { Err::<(), _>(io::Error::other("boom")) })
            .await
            .unwrap_err()
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, CircuitError<io::Error>> {
        cb.execute(CTX, || async { Ok::<_, io::Error>(7) }).await
    }

    async fn open(cb: &CircuitBreaker) {
        for _ in 0..cb.config().failure_threshold {
            fail(cb).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_failures() {
        let cb = breaker(3, 2);

        for i in 0..2 {
            let err = fail(&cb).await;
            assert!(!err.is_open());
            assert_eq!(cb.state(), CircuitState::Closed, "still closed after {} failures", i + 1);
        }
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().failed_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_rejects_without_calling() {
        let cb = breaker(2, 2);
        open(&cb).await;

        let calls = AtomicU32::new(0);
        let err = cb
            .execute(CTX, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, io::Error>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(err.to_string().contains("Circuit breaker is open for service orders"));
        match err {
            CircuitError::Open { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_recovery_timeout() {
        let cb = breaker(2, 2);
        open(&cb).await;

        tokio::time::advance(Duration::from_secs(31)).await;

        let observed = cb
            .execute(CTX, || async { Ok::<_, io::Error>(cb.state()) })
            .await
            .unwrap();
        assert_eq!(observed, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_after_min_throughput_successes() {
        let cb = breaker(2, 3);
        open(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.recent_failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_half_open_failure_reopens() {
        let cb = breaker(2, 3);
        open(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // The reopened circuit waits a full recovery timeout again.
        assert!(succeed(&cb).await.unwrap_err().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_budget() {
        let cb = breaker(1, 2);
        open(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        // Hold trial calls in flight so none completes.
        let (tx, rx) = tokio::sync::watch::channel(false);
        let pending = |mut rx: tokio::sync::watch::Receiver<bool>| {
            let cb = &cb;
            async move {
                cb.execute(CTX, || async move {
                    let _ = rx.wait_for(|done| *done).await;
                    Ok::<_, io::Error>(())
                })
                .await
            }
        };

        let first = pending(rx.clone());
        let second = pending(rx.clone());
        let third = pending(rx.clone());
        tokio::pin!(first, second, third);

        // Drive each far enough to pass admission.
        assert!(futures_poll_once(first.as_mut()).await.is_none());
        assert!(futures_poll_once(second.as_mut()).await.is_none());
        assert!(futures_poll_once(third.as_mut()).await.is_none());

        let err = succeed(&cb).await.unwrap_err();
        assert!(err.is_open());

        tx.send(true).unwrap();
        assert!(first.await.is_ok());
        assert!(second.await.is_ok());
        assert!(third.await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_releases_slot() {
        let cb = breaker(1, 1);
        open(&cb).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        // Transition call: enters half-open, then never completes.
        {
            let call = cb.execute(CTX, || std::future::pending::<Result<(), io::Error>>());
            tokio::pin!(call);
            assert!(futures_poll_once(call.as_mut()).await.is_none());
        }
        // Trial call consuming the only slot, dropped mid-flight.
        {
            let call = cb.execute(CTX, || std::future::pending::<Result<(), io::Error>>());
            tokio::pin!(call);
            assert!(futures_poll_once(call.as_mut()).await.is_none());
        }

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_count() {
        let cb = breaker(3, 2);
        fail(&cb).await;
        fail(&cb).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        fail(&cb).await;

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.recent_failure_count(), 1);
        assert_eq!(cb.stats().failed_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_from_any_state() {
        let cb = breaker(1, 1);
        open(&cb).await;
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats(), CircuitStats::default());

        succeed(&cb).await.unwrap();
        cb.reset();
        assert_eq!(cb.stats().total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_wraps_cause() {
        let cb = breaker(5, 1);
        let err = fail(&cb).await;

        assert_eq!(err.service(), "orders");
        assert_eq!(err.to_string(), "Service orders is unavailable: boom");
        let source = std::error::Error::source(&err).expect("cause attached");
        assert_eq!(source.to_string(), "boom");
    }

    /// Poll a future once, returning its output if it completed.
    async fn futures_poll_once<F: Future + Unpin>(fut: F) -> Option<F::Output> {
        let mut fut = fut;
        std::future::poll_fn(|cx| {
            let polled = std::pin::Pin::new(&mut fut).poll(cx);
            std::task::Poll::Ready(match polled {
                std::task::Poll::Ready(out) => Some(out),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }
}
