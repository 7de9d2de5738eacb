//! Currency policy: provider-approved codes minus configured forbidden ones.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use fxgate_common::{CurrencyCode, GatewayError, Result};
use fxgate_upstream::RateSource;

use crate::cache::RateCache;
use crate::config::PolicyConfig;

/// Cache key of the approved currency list.
pub const CURRENCIES_CACHE_KEY: &str = "currencies";

/// Decides whether a currency code may be used.
pub struct PolicyGate {
    cache: RateCache,
    source: Arc<dyn RateSource>,
    config: PolicyConfig,
    currencies_ttl: Duration,
}

impl PolicyGate {
    pub fn new(
        cache: RateCache,
        source: Arc<dyn RateSource>,
        config: PolicyConfig,
        currencies_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            source,
            config,
            currencies_ttl,
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Whether the code is on the configured deny list.
    pub fn is_forbidden(&self, code: &CurrencyCode) -> bool {
        self.config.is_forbidden(code)
    }

    /// The provider's currency codes, in provider order.
    ///
    /// Cached under [`CURRENCIES_CACHE_KEY`].
    pub async fn approved_currencies(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<CurrencyCode>>> {
        let source = self.source.clone();
        self.cache
            .get_or_create(
                CURRENCIES_CACHE_KEY,
                self.currencies_ttl,
                cancel,
                move |token| async move {
                    source
                        .currencies(&token)
                        .await
                        .map(|list| list.codes())
                        .map_err(GatewayError::from)
                },
            )
            .await
    }

    /// Check a raw, caller-supplied code.
    ///
    /// Absent, empty and whitespace-only input is never approved and never
    /// reaches the cache or the provider. With `check_forbidden`, a forbidden
    /// code is rejected before the approved list is consulted.
    pub async fn is_approved(
        &self,
        currency: Option<&str>,
        check_forbidden: bool,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let Some(code) = currency.and_then(CurrencyCode::parse) else {
            debug!("Empty currency code is not approved");
            return Ok(false);
        };

        self.is_code_approved(&code, check_forbidden, cancel).await
    }

    /// Check an already canonical code.
    pub async fn is_code_approved(
        &self,
        code: &CurrencyCode,
        check_forbidden: bool,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if check_forbidden && self.is_forbidden(code) {
            debug!(currency = %code, "Currency is forbidden");
            return Ok(false);
        }

        let approved = self.approved_currencies(cancel).await?;
        Ok(approved.contains(code))
    }
}
