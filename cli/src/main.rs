//! fxgate CLI
//!
//! Queries currency data through the rate gateway and prints it as JSON.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fxgate::{GatewayConfig, RateGateway};
use fxgate_common::{CorrelationId, ErrorResponse};
use fxgate_upstream::correlation;

mod command;

use command::{exit_code, Command};

/// fxgate CLI
#[derive(Parser, Debug)]
#[command(name = "fxgate", version)]
#[command(about = "Currency rates through a caching, resilient gateway")]
struct Cli {
    /// Provider base URL (overrides FXGATE_API_BASE_URL)
    #[arg(long, global = true)]
    api_base_url: Option<String>,

    /// Page size for historical results (overrides FXGATE_MAX_ITEMS_PER_PAGE)
    #[arg(long, global = true)]
    max_items_per_page: Option<usize>,

    /// Correlation id sent upstream; a new one is minted when absent
    #[arg(long, global = true)]
    correlation_id: Option<String>,

    /// Include internal error detail in failure output
    #[arg(long, global = true)]
    verbose_errors: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::from_env();

        if let Some(url) = &self.api_base_url {
            config.upstream.api_base_url = url.clone();
        }

        if let Some(size) = self.max_items_per_page {
            config.policy.max_items_per_page = size;
        }

        config
    }
}

/// Logs go to stderr so stdout carries only the JSON result.
fn init_logging() {
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    // Load configuration
    let config = cli.config();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let gateway = RateGateway::connect(config)?;

    let correlation_id = cli
        .correlation_id
        .as_deref()
        .map(CorrelationId::from)
        .unwrap_or_default();

    // Ctrl+C abandons the in-flight request
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            interrupt.cancel();
        }
    });

    info!(
        command = cli.command.name(),
        correlation_id = %correlation_id,
        "Running command"
    );

    let result = correlation::scope(
        correlation_id.clone(),
        cli.command.run(&gateway, &cancel),
    )
    .await;

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, code = e.error_code(), "Command failed");
            let response = ErrorResponse::from_error(&e, Some(&correlation_id), cli.verbose_errors);
            println!("{}", serde_json::to_string_pretty(&response)?);
            std::process::exit(exit_code(&e));
        }
    }
}
