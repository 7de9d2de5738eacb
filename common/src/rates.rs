//! Rate payloads exchanged with the upstream provider and returned to callers.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::currency::CurrencyCode;

/// Base currency used when a caller does not name one.
pub const DEFAULT_BASE_CURRENCY: &str = "EUR";

fn default_amount() -> Decimal {
    Decimal::ONE
}

/// The upstream `code -> name` currency listing, in the order the provider sent it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CurrencyList {
    entries: Vec<(CurrencyCode, String)>,
}

impl CurrencyList {
    /// Create a listing from `(code, name)` pairs. Later duplicates are ignored.
    pub fn new(entries: impl IntoIterator<Item = (CurrencyCode, String)>) -> Self {
        let mut list = Self::default();
        for (code, name) in entries {
            list.push(code, name);
        }
        list
    }

    fn push(&mut self, code: CurrencyCode, name: String) {
        if !self.entries.iter().any(|(c, _)| *c == code) {
            self.entries.push((code, name));
        }
    }

    /// Currency codes in provider order.
    pub fn codes(&self) -> Vec<CurrencyCode> {
        self.entries.iter().map(|(code, _)| code.clone()).collect()
    }

    /// Display name for a code.
    pub fn name(&self, code: &CurrencyCode) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, name)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CurrencyCode, &str)> {
        self.entries.iter().map(|(c, n)| (c, n.as_str()))
    }
}

impl Serialize for CurrencyList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (code, name) in &self.entries {
            map.serialize_entry(code, name)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CurrencyList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = CurrencyList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of currency code to currency name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                // Visiting entries directly keeps the provider's key order.
                let mut list = CurrencyList::default();
                while let Some((code, name)) = access.next_entry::<CurrencyCode, String>()? {
                    list.push(code, name);
                }
                Ok(list)
            }
        }

        deserializer.deserialize_map(ListVisitor)
    }
}

/// Latest rates for one base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestRate {
    /// Amount of base currency the rates are quoted for.
    #[serde(default = "default_amount")]
    pub amount: Decimal,
    /// Base currency.
    pub base: CurrencyCode,
    /// Publication date of the rates.
    pub date: NaiveDate,
    /// Quote currency to rate.
    pub rates: BTreeMap<CurrencyCode, Decimal>,
}

impl LatestRate {
    /// Rate for a quote currency, if the provider published one.
    pub fn rate_for(&self, code: &CurrencyCode) -> Option<Decimal> {
        self.rates.get(code).copied()
    }
}

/// Daily rates over a date range, optionally narrowed to one page.
///
/// `rates` is keyed by [`NaiveDate`], so iteration is always chronological
/// regardless of the key order in the upstream JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRate {
    #[serde(default = "default_amount")]
    pub amount: Decimal,
    pub base: CurrencyCode,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rates: BTreeMap<NaiveDate, BTreeMap<CurrencyCode, Decimal>>,
    /// Current page (1-based). Zero on an unpaginated upstream payload.
    #[serde(default)]
    pub page: u32,
    /// Number of pages for the full range. Zero on an unpaginated upstream payload.
    #[serde(default)]
    pub page_count: u32,
}

impl HistoricalRate {
    /// Number of dated records in this payload.
    pub fn total_records(&self) -> usize {
        self.rates.len()
    }
}

/// A historical range request as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalQuery {
    /// Raw base currency; canonicalized by the gateway.
    pub base: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Requested page (1-based).
    pub page: u32,
}

impl HistoricalQuery {
    /// Create a query for the first page.
    pub fn new(base: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            base: base.into(),
            start,
            end,
            page: 1,
        }
    }

    /// Request a specific page.
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }
}

/// Result of a currency conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub amount_from: Decimal,
    pub amount_to: Decimal,
}
