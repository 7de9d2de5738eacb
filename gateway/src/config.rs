//! Gateway configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use fxgate_common::CurrencyCode;
use fxgate_upstream::UpstreamConfig;

/// Currency policy applied by the gateway.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Codes rejected by conversions even when the provider lists them.
    pub forbidden_currencies: BTreeSet<CurrencyCode>,
    /// Page size for historical results.
    pub max_items_per_page: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            forbidden_currencies: BTreeSet::new(),
            max_items_per_page: 10,
        }
    }
}

impl PolicyConfig {
    /// Parse a comma-separated code list, canonicalizing each entry and
    /// skipping blanks.
    pub fn parse_forbidden(raw: &str) -> BTreeSet<CurrencyCode> {
        raw.split(',').filter_map(CurrencyCode::parse).collect()
    }

    pub fn is_forbidden(&self, code: &CurrencyCode) -> bool {
        self.forbidden_currencies.contains(code)
    }
}

/// Time-to-live per cached dataset.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub currencies: Duration,
    pub latest: Duration,
    pub historical: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            currencies: Duration::from_secs(60 * 60),
            latest: Duration::from_secs(10),
            historical: Duration::from_secs(60 * 60),
        }
    }
}

/// Configuration for the rate gateway.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Upstream client settings.
    pub upstream: UpstreamConfig,
    /// Currency policy and paging.
    pub policy: PolicyConfig,
    /// Cache lifetimes.
    pub ttls: CacheTtls,
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            upstream: UpstreamConfig::from_env(),
            ..Default::default()
        };

        if let Ok(size) = std::env::var("FXGATE_MAX_ITEMS_PER_PAGE") {
            if let Ok(size) = size.parse() {
                config.policy.max_items_per_page = size;
            }
        }

        if let Ok(codes) = std::env::var("FXGATE_FORBIDDEN_CURRENCIES") {
            config.policy.forbidden_currencies = PolicyConfig::parse_forbidden(&codes);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.policy.max_items_per_page == 0 {
            return Err("Max items per page must be positive".to_string());
        }

        if self.ttls.currencies.is_zero()
            || self.ttls.latest.is_zero()
            || self.ttls.historical.is_zero()
        {
            return Err("Cache TTLs cannot be zero".to_string());
        }

        self.upstream.validate()
    }
}
