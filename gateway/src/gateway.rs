//! The rate gateway: policy checks, caching and paging in front of a rate source.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use fxgate_common::{
    Conversion, CurrencyCode, GatewayError, HistoricalQuery, HistoricalRate, LatestRate, Result,
    DEFAULT_BASE_CURRENCY,
};
use fxgate_upstream::{CircuitState, RateSource, UpstreamClient};

use crate::cache::{CacheStats, RateCache};
use crate::config::GatewayConfig;
use crate::pagination::paginate;
use crate::policy::PolicyGate;

/// Currency rate gateway.
///
/// Shareable across tasks behind an `Arc`; all state lives in the cache and
/// the rate source.
pub struct RateGateway {
    source: Arc<dyn RateSource>,
    cache: RateCache,
    policy: PolicyGate,
    config: GatewayConfig,
}

impl RateGateway {
    /// Create a gateway over `source` with a fresh cache.
    pub fn new(source: Arc<dyn RateSource>, config: GatewayConfig) -> Self {
        Self::with_cache(source, RateCache::new(), config)
    }

    /// Create a gateway sharing an existing cache.
    pub fn with_cache(source: Arc<dyn RateSource>, cache: RateCache, config: GatewayConfig) -> Self {
        let policy = PolicyGate::new(
            cache.clone(),
            source.clone(),
            config.policy.clone(),
            config.ttls.currencies,
        );

        Self {
            source,
            cache,
            policy,
            config,
        }
    }

    /// Create a gateway backed by an [`UpstreamClient`] built from `config.upstream`.
    pub fn connect(config: GatewayConfig) -> Result<Self> {
        let client = UpstreamClient::new(config.upstream.clone())?;
        info!(base_url = %client.base_url(), "Upstream client ready");
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    pub fn policy(&self) -> &PolicyGate {
        &self.policy
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Currency codes offered by the provider, in provider order.
    #[instrument(skip(self, cancel))]
    pub async fn list_approved_currencies(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<CurrencyCode>> {
        let codes = self.policy.approved_currencies(cancel).await?;
        Ok(codes.as_ref().clone())
    }

    /// Latest rates for `base` (EUR when absent).
    ///
    /// The base must be approved; the forbidden list does not apply here.
    #[instrument(skip(self, cancel))]
    pub async fn latest_rates(
        &self,
        base: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Arc<LatestRate>> {
        let base = base.unwrap_or(DEFAULT_BASE_CURRENCY);
        let base = self.require_approved(base, false, cancel).await?;
        self.fetch_latest(&base, cancel).await
    }

    /// Convert `amount` of `from` into `to` at the latest rate.
    pub async fn convert(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<Decimal> {
        let conversion = self.convert_detailed(from, to, amount, cancel).await?;
        Ok(conversion.amount_to)
    }

    /// Convert and return both sides of the conversion.
    ///
    /// Both codes must be approved and not forbidden, `from` checked first.
    /// Forbidden codes are rejected before anything is fetched, and
    /// converting a currency into itself returns `amount` without touching
    /// the cache or the provider.
    #[instrument(skip(self, cancel), fields(amount = %amount))]
    pub async fn convert_detailed(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<Conversion> {
        let from = self.screen(from)?;
        let to = self.screen(to)?;

        if from == to {
            debug!(currency = %from, "Same currency, no conversion needed");
            return Ok(Conversion {
                from,
                to,
                amount_from: amount,
                amount_to: amount,
            });
        }

        for code in [&from, &to] {
            if !self.policy.is_code_approved(code, true, cancel).await? {
                return Err(GatewayError::ForbiddenCurrency(code.to_string()));
            }
        }

        let latest = self.fetch_latest(&from, cancel).await?;
        let rate = latest
            .rate_for(&to)
            .ok_or_else(|| GatewayError::CurrencyNotFound(to.to_string()))?;
        let amount_to = rate
            .checked_mul(amount)
            .ok_or_else(|| GatewayError::InvalidInput("Converted amount is out of range".to_string()))?;

        info!(
            from = %from,
            to = %to,
            rate = %rate,
            amount_to = %amount_to,
            "Conversion completed"
        );

        Ok(Conversion {
            from,
            to,
            amount_from: amount,
            amount_to,
        })
    }

    /// One page of daily rates for a date range.
    ///
    /// The whole range is fetched and cached once; every call gets its own
    /// page built from the cached copy. Out-of-range pages fall back to page 1.
    #[instrument(skip(self, query, cancel), fields(
        base = %query.base,
        start = %query.start,
        end = %query.end,
        page = query.page
    ))]
    pub async fn historical_rates(
        &self,
        query: &HistoricalQuery,
        cancel: &CancellationToken,
    ) -> Result<HistoricalRate> {
        if query.end < query.start {
            return Err(GatewayError::InvalidInput(format!(
                "End date {} is before start date {}",
                query.end, query.start
            )));
        }

        let base = self.require_approved(&query.base, false, cancel).await?;
        let key = format!("historical_{}_{}_{}", base, query.start, query.end);

        let source = self.source.clone();
        let (start, end) = (query.start, query.end);
        let full = self
            .cache
            .get_or_create(
                &key,
                self.config.ttls.historical,
                cancel,
                move |token| async move {
                    source
                        .range(&base, start, end, &token)
                        .await
                        .map_err(GatewayError::from)
                },
            )
            .await?;

        let page = paginate(&full, query.page, self.config.policy.max_items_per_page);
        debug!(
            page = page.page,
            page_count = page.page_count,
            records = page.total_records(),
            "Serving historical page"
        );

        Ok(page)
    }

    /// Get gateway statistics.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            cache: self.cache.stats(),
            circuit: self.source.circuit_state(),
        }
    }

    /// Drop expired cache entries.
    pub fn cleanup(&self) {
        self.cache.evict_expired();
    }

    async fn fetch_latest(
        &self,
        base: &CurrencyCode,
        cancel: &CancellationToken,
    ) -> Result<Arc<LatestRate>> {
        let key = format!("latest_{}", base);
        let source = self.source.clone();
        let base = base.clone();

        self.cache
            .get_or_create(&key, self.config.ttls.latest, cancel, move |token| async move {
                source
                    .latest(&base, &token)
                    .await
                    .map_err(GatewayError::from)
            })
            .await
    }

    /// Canonicalize a raw code and apply the local deny list.
    fn screen(&self, raw: &str) -> Result<CurrencyCode> {
        match CurrencyCode::parse(raw) {
            Some(code) if !self.policy.is_forbidden(&code) => Ok(code),
            Some(code) => Err(GatewayError::ForbiddenCurrency(code.to_string())),
            None => Err(GatewayError::ForbiddenCurrency(raw.to_string())),
        }
    }

    async fn require_approved(
        &self,
        raw: &str,
        check_forbidden: bool,
        cancel: &CancellationToken,
    ) -> Result<CurrencyCode> {
        let Some(code) = CurrencyCode::parse(raw) else {
            return Err(GatewayError::ForbiddenCurrency(raw.to_string()));
        };

        if self
            .policy
            .is_code_approved(&code, check_forbidden, cancel)
            .await?
        {
            Ok(code)
        } else {
            Err(GatewayError::ForbiddenCurrency(code.to_string()))
        }
    }
}

/// Gateway statistics.
#[derive(Debug, Clone)]
pub struct GatewayStats {
    pub cache: CacheStats,
    /// Breaker state of the rate source, if it has one.
    pub circuit: Option<CircuitState>,
}
