//! Subcommands and their execution against a gateway.

use chrono::NaiveDate;
use clap::Subcommand;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use fxgate::{GatewayError, HistoricalQuery, RateGateway};

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List currency codes offered by the provider
    Currencies,

    /// Show the latest rates for a base currency
    Latest {
        /// Base currency (defaults to EUR)
        #[arg(short, long)]
        base: Option<String>,
    },

    /// Convert an amount between two currencies
    Convert {
        from: String,
        to: String,
        amount: Decimal,
    },

    /// Show daily rates for a date range, one page at a time
    Historical {
        /// Base currency
        #[arg(short, long, default_value = "EUR")]
        base: String,

        /// First day of the range (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day of the range (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Page to show
        #[arg(short, long, default_value = "1")]
        page: u32,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Currencies => "currencies",
            Command::Latest { .. } => "latest",
            Command::Convert { .. } => "convert",
            Command::Historical { .. } => "historical",
        }
    }

    /// Run the command and return its result as JSON.
    pub async fn run(
        &self,
        gateway: &RateGateway,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        match self {
            Command::Currencies => to_json(&gateway.list_approved_currencies(cancel).await?),
            Command::Latest { base } => {
                let latest = gateway.latest_rates(base.as_deref(), cancel).await?;
                to_json(latest.as_ref())
            }
            Command::Convert { from, to, amount } => {
                to_json(&gateway.convert_detailed(from, to, *amount, cancel).await?)
            }
            Command::Historical {
                base,
                start,
                end,
                page,
            } => {
                let query = HistoricalQuery::new(base.clone(), *start, *end).page(*page);
                to_json(&gateway.historical_rates(&query, cancel).await?)
            }
        }
    }
}

/// Process exit status for a failed command.
pub fn exit_code(error: &GatewayError) -> i32 {
    match error {
        GatewayError::Cancelled => 130,
        e if e.is_client_error() => 2,
        _ => 1,
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::Internal(format!("Failed to encode result: {}", e)))
}
