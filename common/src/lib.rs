//! fxgate Common Types
//!
//! Shared types used across the fxgate workspace: canonical currency codes,
//! the rate payloads returned by the upstream provider, correlation
//! identifiers and the gateway error taxonomy.

pub mod currency;
pub mod rates;
pub mod identifiers;
pub mod error;

pub use currency::*;
pub use rates::*;
pub use identifiers::*;
pub use error::*;
