//! fxgate Upstream Client
//!
//! HTTP access to the currency rate provider, wrapped in a resiliency
//! pipeline.
//!
//! # Pipeline
//!
//! Every call runs through, from the outside in:
//!
//! - **Retry**: up to `max_attempts` attempts with `2^n` exponential backoff,
//!   on transport errors, timeouts, HTTP 5xx/408 and HTTP 404
//! - **Timeout**: each attempt is bounded on its own
//! - **Circuit breaker**: shared by all calls through one client; opens after
//!   consecutive failures and fails fast until its cooldown has elapsed
//!
//! # Example
//!
//! ```rust,ignore
//! use fxgate_upstream::{RateSource, UpstreamClient, UpstreamConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = UpstreamClient::new(UpstreamConfig::from_env())?;
//! let currencies = client.currencies(&CancellationToken::new()).await?;
//! ```

pub mod breaker;
pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod pipeline;
pub mod source;

pub use breaker::{CircuitBreaker, CircuitState};
pub use client::UpstreamClient;
pub use config::{ResilienceConfig, UpstreamConfig};
pub use correlation::{CorrelationSource, TaskCorrelation};
pub use error::UpstreamError;
pub use pipeline::ResiliencePipeline;
pub use source::RateSource;

#[cfg(any(test, feature = "test-utils"))]
pub use source::{MockCalls, MockRateSource};
