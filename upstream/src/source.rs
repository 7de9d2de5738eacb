//! Rate source trait and a scriptable in-memory implementation.

use async_trait::async_trait;
use chrono::NaiveDate;
use fxgate_common::{CurrencyCode, CurrencyList, HistoricalRate, LatestRate};
use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitState;
use crate::error::UpstreamError;

/// Source of currency data, typically the upstream provider.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Source name, for logs.
    fn name(&self) -> &str;

    /// Circuit breaker state, for sources that have one.
    fn circuit_state(&self) -> Option<CircuitState> {
        None
    }

    /// The provider's `code -> name` currency listing.
    async fn currencies(&self, cancel: &CancellationToken) -> Result<CurrencyList, UpstreamError>;

    /// Latest rates for `base`.
    async fn latest(
        &self,
        base: &CurrencyCode,
        cancel: &CancellationToken,
    ) -> Result<LatestRate, UpstreamError>;

    /// Daily rates for `base` between `start` and `end`, inclusive.
    async fn range(
        &self,
        base: &CurrencyCode,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<HistoricalRate, UpstreamError>;
}

/// Number of calls a [`MockRateSource`] has served, per endpoint.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub currencies: usize,
    pub latest: usize,
    pub range: usize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockCalls {
    pub fn total(&self) -> usize {
        self.currencies + self.latest + self.range
    }
}

/// In-memory rate source for testing.
///
/// Unknown bases and ranges answer HTTP 404, like the provider does.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    name: String,
    currencies: parking_lot::Mutex<CurrencyList>,
    latest: dashmap::DashMap<CurrencyCode, LatestRate>,
    ranges: dashmap::DashMap<(CurrencyCode, NaiveDate, NaiveDate), HistoricalRate>,
    failure: parking_lot::Mutex<Option<UpstreamError>>,
    delay: parking_lot::Mutex<Option<std::time::Duration>>,
    currency_calls: std::sync::atomic::AtomicUsize,
    latest_calls: std::sync::atomic::AtomicUsize,
    range_calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    /// Create a new mock source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            currencies: parking_lot::Mutex::new(CurrencyList::default()),
            latest: dashmap::DashMap::new(),
            ranges: dashmap::DashMap::new(),
            failure: parking_lot::Mutex::new(None),
            delay: parking_lot::Mutex::new(None),
            currency_calls: Default::default(),
            latest_calls: Default::default(),
            range_calls: Default::default(),
        }
    }

    /// Set the approved currency listing. Names are the codes themselves.
    pub fn set_currencies(&self, codes: &[&str]) {
        let entries = codes
            .iter()
            .filter_map(|c| CurrencyCode::parse(c))
            .map(|code| {
                let name = code.to_string();
                (code, name)
            });
        *self.currencies.lock() = CurrencyList::new(entries);
    }

    /// Set latest rates for the rate's base currency.
    pub fn set_latest(&self, rate: LatestRate) {
        self.latest.insert(rate.base.clone(), rate);
    }

    /// Set a historical range, keyed by its base and dates.
    pub fn set_range(&self, rate: HistoricalRate) {
        let key = (rate.base.clone(), rate.start_date, rate.end_date);
        self.ranges.insert(key, rate);
    }

    /// Make every call fail with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<UpstreamError>) {
        *self.failure.lock() = error;
    }

    /// Make every call take `delay` before answering.
    pub fn set_delay(&self, delay: Option<std::time::Duration>) {
        *self.delay.lock() = delay;
    }

    /// Calls served so far.
    pub fn calls(&self) -> MockCalls {
        use std::sync::atomic::Ordering;
        MockCalls {
            currencies: self.currency_calls.load(Ordering::SeqCst),
            latest: self.latest_calls.load(Ordering::SeqCst),
            range: self.range_calls.load(Ordering::SeqCst),
        }
    }

    async fn respond(&self, cancel: &CancellationToken) -> Result<(), UpstreamError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let failure = self.failure.lock().clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn currencies(&self, cancel: &CancellationToken) -> Result<CurrencyList, UpstreamError> {
        self.currency_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.respond(cancel).await?;
        let list = self.currencies.lock().clone();
        Ok(list)
    }

    async fn latest(
        &self,
        base: &CurrencyCode,
        cancel: &CancellationToken,
    ) -> Result<LatestRate, UpstreamError> {
        self.latest_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.respond(cancel).await?;
        self.latest
            .get(base)
            .map(|r| r.clone())
            .ok_or(UpstreamError::Status(404))
    }

    async fn range(
        &self,
        base: &CurrencyCode,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<HistoricalRate, UpstreamError> {
        self.range_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.respond(cancel).await?;
        self.ranges
            .get(&(base.clone(), start, end))
            .map(|r| r.clone())
            .ok_or(UpstreamError::Status(404))
    }
}
