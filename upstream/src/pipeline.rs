//! Retry / timeout / circuit-breaker pipeline around a single upstream call.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::ResilienceConfig;
use crate::error::UpstreamError;

/// Applies retry, per-attempt timeout and circuit breaking to upstream calls.
///
/// One pipeline (and therefore one breaker) is shared by every call made
/// through the owning client.
#[derive(Debug)]
pub struct ResiliencePipeline {
    config: ResilienceConfig,
    breaker: CircuitBreaker,
}

impl ResiliencePipeline {
    /// Create a pipeline with its own circuit breaker.
    pub fn new(config: ResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(config.failure_threshold, config.break_duration);
        Self { config, breaker }
    }

    /// The circuit breaker shared by calls through this pipeline.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Wait before retry number `retry` (1-based): `2^retry` backoff units.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX);
        self.config.backoff_base.saturating_mul(factor)
    }

    /// Run `attempt` through the pipeline.
    ///
    /// Transient failures are retried with exponential backoff. An open
    /// circuit and non-transient failures end the call immediately.
    /// Cancellation is observed both while an attempt is in flight and
    /// while waiting between attempts.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut number = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(UpstreamError::Cancelled);
            }

            let permit = self.breaker.try_acquire()?;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                result = tokio::time::timeout(self.config.attempt_timeout, attempt()) => match result {
                    Ok(result) => result,
                    Err(_) => Err(UpstreamError::Timeout(self.config.attempt_timeout)),
                },
            };

            let error = match outcome {
                Ok(value) => {
                    permit.success();
                    if number > 1 {
                        debug!(operation, attempt = number, "Upstream call recovered");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    permit.failure();
                    e
                }
                Err(e) => {
                    // Reachable but unusable; not retried.
                    permit.success();
                    return Err(e);
                }
            };

            if number >= max_attempts {
                warn!(operation, attempts = number, error = %error, "Upstream call failed, retries exhausted");
                return Err(UpstreamError::RetriesExhausted {
                    attempts: number,
                    last: Box::new(error),
                });
            }

            let delay = self.backoff_delay(number);
            warn!(
                operation,
                attempt = number,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Upstream attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            number += 1;
        }
    }
}
