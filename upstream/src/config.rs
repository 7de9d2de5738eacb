//! Upstream client configuration.

use std::time::Duration;

/// Default provider base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.frankfurter.dev/v1/";

/// Retry, timeout and circuit-breaker settings.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Maximum attempts per call, including the first one.
    pub max_attempts: u32,
    /// Backoff unit; the wait before retry `n` is `2^n` of these.
    pub backoff_base: Duration,
    /// Bound on a single attempt.
    pub attempt_timeout: Duration,
    /// Consecutive qualifying failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call.
    pub break_duration: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff_base: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(10),
            failure_threshold: 2,
            break_duration: Duration::from_secs(60),
        }
    }
}

impl ResilienceConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Max attempts must be at least 1".to_string());
        }

        if self.attempt_timeout.is_zero() {
            return Err("Attempt timeout cannot be zero".to_string());
        }

        if self.failure_threshold == 0 {
            return Err("Circuit breaker failure threshold must be at least 1".to_string());
        }

        Ok(())
    }
}

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Provider base URL; endpoint paths are resolved against it.
    pub api_base_url: String,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Resiliency pipeline settings.
    pub resilience: ResilienceConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            user_agent: concat!("fxgate/", env!("CARGO_PKG_VERSION")).to_string(),
            resilience: ResilienceConfig::default(),
        }
    }
}

impl UpstreamConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("FXGATE_API_BASE_URL") {
            config.api_base_url = url;
        }

        if let Ok(attempts) = std::env::var("FXGATE_MAX_ATTEMPTS") {
            if let Ok(attempts) = attempts.parse() {
                config.resilience.max_attempts = attempts;
            }
        }

        if let Ok(secs) = std::env::var("FXGATE_ATTEMPT_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.resilience.attempt_timeout = Duration::from_secs(secs);
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.api_base_url.trim().is_empty() {
            return Err("API base URL cannot be empty".to_string());
        }

        self.resilience.validate()
    }
}
