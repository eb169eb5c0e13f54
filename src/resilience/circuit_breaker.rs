use crate::telemetry::{noop_observer, ResilienceObserver};
use crate::{Error, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub consecutive_failures: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    pub trial_in_flight: bool,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

enum Transition {
    Opened(u32),
    HalfOpened,
    Closed,
}

struct BreakerInner {
    service: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
    observer: Arc<dyn ResilienceObserver>,
}

/// Per-service circuit breaker: closed, open, half-open.
///
/// - Consecutive failures up to `failure_threshold` open the circuit
/// - While open, calls are rejected until `reset_timeout` has elapsed
/// - The first call after that becomes the single half-open trial
/// - A successful trial closes the circuit; a failed one re-opens it and restarts the timer
///
/// Cloning yields another handle to the same breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self::with_observer(service, cfg, noop_observer())
    }

    pub fn with_observer(
        service: impl Into<String>,
        cfg: CircuitBreakerConfig,
        observer: Arc<dyn ResilienceObserver>,
    ) -> Self {
        let cfg = CircuitBreakerConfig {
            failure_threshold: cfg.failure_threshold.max(1),
            ..cfg
        };
        Self {
            inner: Arc::new(BreakerInner {
                service: service.into(),
                cfg,
                state: Mutex::new(State {
                    state: CircuitState::Closed,
                    consecutive_failures: 0,
                    opened_at: None,
                }),
                observer,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.cfg
    }

    // Every mutation below keeps the state consistent, so a poisoned guard is still valid.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask to let one call through.
    ///
    /// The returned permit must be resolved with [`BreakerPermit::success`] or
    /// [`BreakerPermit::failure`]; dropping it unresolved counts as a failure.
    pub fn try_acquire(&self) -> Result<BreakerPermit> {
        let (trial, transition) = {
            let mut st = self.lock();
            match st.state {
                CircuitState::Closed => (false, None),
                CircuitState::HalfOpen => return Err(self.open_error(None)),
                CircuitState::Open => {
                    let elapsed = st.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                    if elapsed < self.inner.cfg.reset_timeout {
                        let remaining = self.inner.cfg.reset_timeout - elapsed;
                        return Err(self.open_error(Some(remaining)));
                    }
                    st.state = CircuitState::HalfOpen;
                    (true, Some(Transition::HalfOpened))
                }
            }
        };
        self.notify(transition);
        Ok(BreakerPermit {
            breaker: self.clone(),
            trial,
            resolved: false,
        })
    }

    /// Run `op` through the breaker, reporting its outcome.
    ///
    /// `op` is not invoked at all when the circuit rejects the call.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire()?;
        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let st = self.lock();
        let open_remaining_ms = match (st.state, st.opened_at) {
            (CircuitState::Open, Some(at)) => Some(
                self.inner
                    .cfg
                    .reset_timeout
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        CircuitBreakerSnapshot {
            service: self.inner.service.clone(),
            state: st.state,
            failure_threshold: self.inner.cfg.failure_threshold,
            reset_timeout_ms: self.inner.cfg.reset_timeout.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            open_remaining_ms,
            trial_in_flight: st.state == CircuitState::HalfOpen,
        }
    }

    fn on_success(&self, trial: bool) {
        let transition = {
            let mut st = self.lock();
            if trial {
                st.state = CircuitState::Closed;
                st.consecutive_failures = 0;
                st.opened_at = None;
                Some(Transition::Closed)
            } else {
                // A late success from a call admitted before the circuit opened
                // does not close it; only the half-open trial can.
                if st.state == CircuitState::Closed {
                    st.consecutive_failures = 0;
                }
                None
            }
        };
        self.notify(transition);
    }

    fn on_failure(&self, trial: bool) {
        let transition = {
            let mut st = self.lock();
            st.consecutive_failures = st.consecutive_failures.saturating_add(1);
            if trial {
                st.state = CircuitState::Open;
                st.opened_at = Some(Instant::now());
                Some(Transition::Opened(st.consecutive_failures))
            } else if st.state == CircuitState::Closed
                && st.consecutive_failures >= self.inner.cfg.failure_threshold
            {
                st.state = CircuitState::Open;
                st.opened_at = Some(Instant::now());
                Some(Transition::Opened(st.consecutive_failures))
            } else {
                // Already open or half-open: count it, never restart the timer.
                None
            }
        };
        self.notify(transition);
    }

    fn notify(&self, transition: Option<Transition>) {
        let service = self.inner.service.as_str();
        match transition {
            Some(Transition::Opened(failures)) => {
                self.inner.observer.on_circuit_open(service, failures)
            }
            Some(Transition::HalfOpened) => self.inner.observer.on_circuit_half_open(service),
            Some(Transition::Closed) => self.inner.observer.on_circuit_close(service),
            None => {}
        }
    }

    fn open_error(&self, remaining: Option<Duration>) -> Error {
        Error::CircuitOpen {
            service: self.inner.service.clone(),
            retry_after_ms: remaining.map(|d| d.as_millis() as u64),
        }
    }
}

/// Admission for one call (or one retry sequence) through a [`CircuitBreaker`].
#[must_use = "an unresolved permit is reported as a failure when dropped"]
pub struct BreakerPermit {
    breaker: CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl BreakerPermit {
    /// Whether this permit is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_failure(self.trial);
        }
    }
}
