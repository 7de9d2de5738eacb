//! Error types for fxgate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifiers::CorrelationId;

/// Errors returned by gateway operations.
///
/// `Clone` so that one failed upstream fetch can be handed to every caller
/// waiting on the same cache key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Currency is not approved by the provider or is forbidden by configuration.
    #[error("The currency '{0}' is not allowed.")]
    ForbiddenCurrency(String),

    /// Target currency is missing from the fetched rate set.
    #[error("Currency '{0}' not found.")]
    CurrencyNotFound(String),

    /// Upstream could not be reached after retries, or the circuit is open.
    #[error("Upstream rate provider unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    /// Request data the gateway itself rejects.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The caller abandoned the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Unexpected internal condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create an upstream-unavailable error.
    pub fn upstream(reason: impl Into<String>) -> Self {
        GatewayError::UpstreamUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GatewayError::ForbiddenCurrency(_)
                | GatewayError::CurrencyNotFound(_)
                | GatewayError::InvalidInput(_)
        )
    }

    /// Whether repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::UpstreamUnavailable { .. })
    }

    /// Stable error code for responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::ForbiddenCurrency(_) => "FORBIDDEN_CURRENCY",
            GatewayError::CurrencyNotFound(_) => "CURRENCY_NOT_FOUND",
            GatewayError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            GatewayError::InvalidInput(_) => "INVALID_INPUT",
            GatewayError::Cancelled => "CANCELLED",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error body handed to callers at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Correlation id of the failed request (if known).
    pub trace_id: Option<String>,
}

impl ErrorResponse {
    /// Build a response for an error.
    ///
    /// Client errors always carry their message. Server-side failures only
    /// expose detail when `expose_detail` is set.
    pub fn from_error(
        error: &GatewayError,
        correlation_id: Option<&CorrelationId>,
        expose_detail: bool,
    ) -> Self {
        let message = if error.is_client_error() || expose_detail {
            error.to_string()
        } else {
            "An internal server error occurred".to_string()
        };

        Self {
            code: error.error_code().to_string(),
            message,
            trace_id: correlation_id.map(|id| id.to_string()),
        }
    }
}
