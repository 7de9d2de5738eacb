//! Upstream client error types.

use std::time::Duration;

use fxgate_common::GatewayError;
use thiserror::Error;

/// Errors raised while talking to the rate provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Connection, TLS or body transfer failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider answered with a non-success status.
    #[error("Upstream returned HTTP {0}")]
    Status(u16),

    /// A single attempt ran past its time budget.
    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Provider answered with a body we could not parse.
    #[error("Failed to decode upstream response: {0}")]
    Decode(String),

    /// Circuit breaker is open; no request was sent.
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// Every attempt failed with a transient error.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<UpstreamError>,
    },

    /// Caller cancelled the call.
    #[error("Upstream call cancelled")]
    Cancelled,

    /// Endpoint URL could not be built.
    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    /// Whether the failure is worth retrying and counts against the circuit breaker.
    ///
    /// HTTP 404 counts as transient, alongside 408 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Transport(_) | UpstreamError::Timeout(_) => true,
            UpstreamError::Status(status) => *status == 404 || *status == 408 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            UpstreamError::Status(status.as_u16())
        } else if e.is_decode() {
            UpstreamError::Decode(e.to_string())
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

impl From<UpstreamError> for GatewayError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Cancelled => GatewayError::Cancelled,
            other => GatewayError::upstream(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(UpstreamError::Transport("reset".into()).is_transient());
        assert!(UpstreamError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(UpstreamError::Status(404).is_transient());
        assert!(UpstreamError::Status(408).is_transient());
        assert!(UpstreamError::Status(503).is_transient());

        assert!(!UpstreamError::Status(400).is_transient());
        assert!(!UpstreamError::Status(422).is_transient());
        assert!(!UpstreamError::Decode("eof".into()).is_transient());
        assert!(!UpstreamError::CircuitOpen.is_transient());
        assert!(!UpstreamError::Cancelled.is_transient());
    }

    #[test]
    fn test_into_gateway_error() {
        assert_eq!(GatewayError::from(UpstreamError::Cancelled), GatewayError::Cancelled);

        let err = GatewayError::from(UpstreamError::CircuitOpen);
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));
        assert_eq!(err.error_code(), "UPSTREAM_UNAVAILABLE");
    }
}
