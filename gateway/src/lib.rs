//! fxgate Rate Gateway
//!
//! Currency data for client applications: approved currencies, latest rates,
//! conversions and paginated historical ranges, served from a TTL cache in
//! front of a resilient upstream client.
//!
//! # Features
//!
//! - Currency policy: provider-approved codes, plus a configured deny list for conversions
//! - Cache-aside lookups with per-dataset TTLs and single-flight misses
//! - Chronological paging of historical ranges, never mutating the cached copy
//! - Retry, timeout and circuit breaking in the upstream client
//!
//! # Example
//!
//! ```rust,ignore
//! use fxgate::{GatewayConfig, RateGateway};
//! use rust_decimal_macros::dec;
//! use tokio_util::sync::CancellationToken;
//!
//! let gateway = RateGateway::connect(GatewayConfig::from_env())?;
//! let cancel = CancellationToken::new();
//!
//! let latest = gateway.latest_rates(Some("USD"), &cancel).await?;
//! let eur = gateway.convert("USD", "EUR", dec!(250), &cancel).await?;
//! ```

pub mod cache;
pub mod config;
pub mod gateway;
pub mod pagination;
pub mod policy;

pub use cache::{CacheStats, RateCache};
pub use config::{CacheTtls, GatewayConfig, PolicyConfig};
pub use gateway::{GatewayStats, RateGateway};
pub use policy::PolicyGate;

pub use fxgate_common::{
    Conversion, CurrencyCode, GatewayError, HistoricalQuery, HistoricalRate, LatestRate,
};
pub use fxgate_upstream::{CircuitState, RateSource, UpstreamClient, UpstreamConfig};
