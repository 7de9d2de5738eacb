//! Circuit breaker guarding the upstream provider.
//!
//! States:
//! - Closed: calls proceed, consecutive failures are counted
//! - Open: calls fail fast until the break duration has elapsed
//! - HalfOpen: exactly one trial call is admitted; its outcome closes or reopens the circuit

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::UpstreamError;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Phase {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Consecutive-failure circuit breaker.
///
/// All transitions happen under one mutex, so concurrent callers never see a
/// half-applied state change.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    break_duration: Duration,
    phase: Mutex<Phase>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            break_duration,
            phase: Mutex::new(Phase::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Current state. An open circuit whose cooldown has elapsed reports `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        match *self.phase.lock() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Ask to send one request.
    ///
    /// Fails with [`UpstreamError::CircuitOpen`] while the circuit is open or
    /// while the half-open trial is still running.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, UpstreamError> {
        let mut phase = self.phase.lock();

        match *phase {
            Phase::Closed { .. } => Ok(BreakerPermit::new(self, false)),
            Phase::Open { until } => {
                let now = Instant::now();
                if now < until {
                    debug!(
                        remaining_ms = (until - now).as_millis() as u64,
                        "Circuit breaker open, rejecting call"
                    );
                    return Err(UpstreamError::CircuitOpen);
                }
                *phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                info!("Circuit breaker half-open, admitting trial call");
                Ok(BreakerPermit::new(self, true))
            }
            Phase::HalfOpen {
                trial_in_flight: true,
            } => Err(UpstreamError::CircuitOpen),
            Phase::HalfOpen {
                trial_in_flight: false,
            } => {
                *phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                Ok(BreakerPermit::new(self, true))
            }
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        *self.phase.lock() = Phase::Closed {
            consecutive_failures: 0,
        };
        debug!("Circuit breaker reset to closed");
    }

    fn on_success(&self) {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Closed { .. } => {
                *phase = Phase::Closed {
                    consecutive_failures: 0,
                };
            }
            Phase::HalfOpen { .. } => {
                *phase = Phase::Closed {
                    consecutive_failures: 0,
                };
                info!("Circuit breaker closed after successful trial call");
            }
            // A straggler from before the circuit opened does not close it.
            Phase::Open { .. } => {}
        }
    }

    fn on_failure(&self) {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.failure_threshold {
                    *phase = Phase::Open {
                        until: Instant::now() + self.break_duration,
                    };
                    warn!(
                        failures,
                        break_secs = self.break_duration.as_secs(),
                        "Circuit breaker opened"
                    );
                } else {
                    *phase = Phase::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            Phase::HalfOpen { .. } => {
                *phase = Phase::Open {
                    until: Instant::now() + self.break_duration,
                };
                warn!("Circuit breaker reopened after failed trial call");
            }
            Phase::Open { .. } => {}
        }
    }

    fn release_trial(&self) {
        let mut phase = self.phase.lock();
        if let Phase::HalfOpen { .. } = *phase {
            *phase = Phase::HalfOpen {
                trial_in_flight: false,
            };
        }
    }
}

/// Permission to send one request. Record the outcome with
/// [`success`](Self::success) or [`failure`](Self::failure); dropping an
/// unsettled trial permit frees the half-open slot without a state change.
#[must_use]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this permit is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// The upstream was reachable.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    /// The call failed in a way that counts against the circuit.
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}
