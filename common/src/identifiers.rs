//! Identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Header carrying the correlation id on outbound requests.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Identifies one logical request across the gateway and the upstream calls it makes.
///
/// Ids minted locally are UUID v7 (time-ordered). Ids handed in by an outer
/// layer are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a new correlation id.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an id received from elsewhere.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can be sent as an HTTP header value.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 128
            && self.0.chars().all(|c| c.is_ascii_graphic())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}
