//! Circuit breaker for subgraph protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: subgraph assumed down, calls fail fast without being invoked
//! - Half-Open: testing if the subgraph recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout since the last failure
//! Half-Open → Closed: half_open_max_calls consecutive successes
//! Half-Open → Open: any probe fails
//! ```
//!
//! # Design Decisions
//! - One breaker per subgraph, all state behind one lock owned by `protect`
//! - The lock is never held across the protected call
//! - At most `half_open_max_calls` probes are in flight while half-open;
//!   extra callers are rejected and not counted as failures
//! - Timeouts and application errors count the same
//! - An outcome only counts in the phase that admitted the call; a probe
//!   from an earlier half-open phase cannot close or reopen a later one

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use crate::config::validation::{into_composition_error, validate_circuit_breaker};
use crate::config::CircuitBreakerConfig;
use crate::error::{GatewayError, Result};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - calls flow through
    Closed,
    /// Subgraph unhealthy - calls fail fast
    Open,
    /// Testing recovery - limited probes allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub in_flight_probes: u32,
    pub last_failure_time: Option<Instant>,
    pub last_state_change: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    in_flight_probes: u32,
    /// Bumped on every entry into half-open so stale probe guards are ignored.
    generation: u64,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe { generation: u64 },
}

/// Circuit breaker guarding a single subgraph.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker. Fails with a composition error on invalid config.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self> {
        let mut errors = Vec::new();
        validate_circuit_breaker(&config, &mut errors);
        if !errors.is_empty() {
            return Err(into_composition_error(errors));
        }
        Ok(Self::from_validated(name, config))
    }

    /// Create a breaker from configuration that was already validated.
    pub(crate) fn from_validated(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                in_flight_probes: 0,
                generation: 0,
                last_failure_time: None,
                last_state_change: Instant::now(),
            }),
        }
    }

    /// Subgraph this breaker protects.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. Open → half-open only happens inside `protect`.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock();
        BreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            in_flight_probes: inner.in_flight_probes,
            last_failure_time: inner.last_failure_time,
            last_state_change: inner.last_state_change,
        }
    }

    /// Run `op` under the breaker.
    ///
    /// Returns `CircuitOpen` without invoking `op` while the circuit is open,
    /// otherwise `op`'s own result.
    pub async fn protect<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.admit()?;
        let _probe = match admission {
            Admission::Probe { generation } => Some(ProbeGuard {
                breaker: self,
                generation,
            }),
            Admission::Normal => None,
        };

        let result = op().await;
        match &result {
            Ok(_) => self.on_success(admission),
            Err(e) => self.on_failure(admission, e),
        }
        result
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        tracing::info!(subgraph = %self.name, "Circuit breaker manually reset");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<Admission> {
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let since = inner.last_failure_time.unwrap_or(inner.last_state_change);
            let elapsed = now.saturating_duration_since(since);
            let reset_timeout = self.config.reset_timeout();
            if elapsed < reset_timeout {
                tracing::debug!(subgraph = %self.name, "Circuit breaker open - rejecting call");
                return Err(GatewayError::CircuitOpen {
                    subgraph: self.name.clone(),
                    retry_after: Some(reset_timeout - elapsed),
                });
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::HalfOpen => {
                if inner.in_flight_probes >= self.config.half_open_max_calls {
                    tracing::debug!(
                        subgraph = %self.name,
                        in_flight = inner.in_flight_probes,
                        "Circuit breaker half-open - probe limit reached"
                    );
                    return Err(GatewayError::CircuitOpen {
                        subgraph: self.name.clone(),
                        retry_after: None,
                    });
                }
                inner.in_flight_probes += 1;
                Ok(Admission::Probe {
                    generation: inner.generation,
                })
            }
            CircuitState::Open => Err(GatewayError::CircuitOpen {
                subgraph: self.name.clone(),
                retry_after: Some(self.config.reset_timeout()),
            }),
        }
    }

    /// Whether an outcome from a call admitted as `admission` still belongs
    /// to the breaker's current phase.
    fn is_current(inner: &BreakerState, admission: Admission) -> bool {
        match admission {
            Admission::Normal => inner.state == CircuitState::Closed,
            Admission::Probe { generation } => {
                inner.state == CircuitState::HalfOpen && inner.generation == generation
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.lock();
        if !Self::is_current(&inner, admission) {
            tracing::debug!(subgraph = %self.name, "Ignoring success from an earlier breaker phase");
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count != 0 {
                    inner.failure_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_max_calls {
                    self.transition(&mut inner, CircuitState::Closed);
                    tracing::info!(subgraph = %self.name, "Circuit breaker closed - subgraph recovered");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, admission: Admission, error: &GatewayError) {
        let mut inner = self.lock();
        if !Self::is_current(&inner, admission) {
            tracing::debug!(subgraph = %self.name, error = %error, "Ignoring failure from an earlier breaker phase");
            return;
        }
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                    tracing::warn!(
                        subgraph = %self.name,
                        failures = inner.failure_count,
                        error = %error,
                        "Circuit breaker opened - too many failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.last_failure_time = Some(now);
                self.transition(&mut inner, CircuitState::Open);
                tracing::warn!(
                    subgraph = %self.name,
                    error = %error,
                    "Circuit breaker reopened - probe failed"
                );
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let now = Instant::now();
        match to {
            CircuitState::Open => {
                if inner.last_failure_time.is_none() {
                    inner.last_failure_time = Some(now);
                }
                inner.success_count = 0;
                inner.in_flight_probes = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
                inner.in_flight_probes = 0;
                inner.generation += 1;
                tracing::info!(subgraph = %self.name, "Circuit breaker half-open - testing recovery");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.in_flight_probes = 0;
            }
        }
        inner.state = to;
        inner.last_state_change = now;
        metrics::record_breaker_state(&self.name, to);
    }
}

/// Releases a half-open probe slot, even when the call is cancelled.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.lock();
        if inner.state == CircuitState::HalfOpen && inner.generation == self.generation {
            inner.in_flight_probes = inner.in_flight_probes.saturating_sub(1);
        }
    }
}
