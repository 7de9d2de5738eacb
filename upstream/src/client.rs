//! HTTP client for the upstream rate provider.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use fxgate_common::{
    CurrencyCode, CurrencyList, HistoricalRate, LatestRate, CORRELATION_ID_HEADER,
};

use crate::breaker::CircuitState;
use crate::config::UpstreamConfig;
use crate::correlation::{CorrelationSource, TaskCorrelation};
use crate::error::UpstreamError;
use crate::pipeline::ResiliencePipeline;
use crate::source::RateSource;

/// Client for the provider's `currencies`, `latest` and date-range endpoints.
///
/// Every call goes through the client's [`ResiliencePipeline`], so the
/// circuit breaker state is shared by all endpoints.
pub struct UpstreamClient {
    http: Client,
    base_url: Url,
    pipeline: ResiliencePipeline,
    correlation: Arc<dyn CorrelationSource>,
}

impl UpstreamClient {
    /// Create a new client.
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let base_url = normalize_base_url(&config.api_base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| UpstreamError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            pipeline: ResiliencePipeline::new(config.resilience),
            correlation: Arc::new(TaskCorrelation),
        })
    }

    /// Use a different correlation id source.
    pub fn with_correlation_source(mut self, source: Arc<dyn CorrelationSource>) -> Self {
        self.correlation = source;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: Url,
        query: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<T, UpstreamError> {
        // One id per logical call, shared by its retries.
        let correlation_id = self.correlation.correlation_id();

        self.pipeline
            .execute(operation, cancel, || {
                let request = self
                    .http
                    .get(url.clone())
                    .query(query)
                    .header(CORRELATION_ID_HEADER, correlation_id.as_str());

                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        debug!(status = status.as_u16(), "Upstream returned error status");
                        return Err(UpstreamError::Status(status.as_u16()));
                    }

                    let body = response.bytes().await?;
                    serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
                }
            })
            .await
    }
}

#[async_trait]
impl RateSource for UpstreamClient {
    fn name(&self) -> &str {
        self.base_url.as_str()
    }

    fn circuit_state(&self) -> Option<CircuitState> {
        Some(self.pipeline.circuit_state())
    }

    #[instrument(skip(self, cancel))]
    async fn currencies(&self, cancel: &CancellationToken) -> Result<CurrencyList, UpstreamError> {
        let url = self.endpoint("currencies")?;
        self.get_json("currencies", url, &[], cancel).await
    }

    #[instrument(skip(self, cancel), fields(base = %base))]
    async fn latest(
        &self,
        base: &CurrencyCode,
        cancel: &CancellationToken,
    ) -> Result<LatestRate, UpstreamError> {
        let url = self.endpoint("latest")?;
        self.get_json("latest", url, &[("base", base.as_str())], cancel)
            .await
    }

    #[instrument(skip(self, cancel), fields(base = %base, start = %start, end = %end))]
    async fn range(
        &self,
        base: &CurrencyCode,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<HistoricalRate, UpstreamError> {
        let url = self.endpoint(&format!("{}..{}", start, end))?;
        self.get_json("range", url, &[("base", base.as_str())], cancel)
            .await
    }
}

/// Parse the base URL, forcing a trailing slash so endpoint paths resolve beneath it.
fn normalize_base_url(raw: &str) -> Result<Url, UpstreamError> {
    let mut url = raw.trim().to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    Url::parse(&url).map_err(|e| UpstreamError::InvalidUrl(format!("{}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilienceConfig;
    use fxgate_common::CorrelationId;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers each connection with the next scripted `(status, body)` and records request heads.
    struct ScriptedServer {
        url: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedServer {
        async fn start(responses: Vec<(u16, &'static str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}/v1", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let script = Arc::new(Mutex::new(VecDeque::from(responses)));

            let seen = requests.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        break;
                    };
                    let mut buf = vec![0u8; 8192];
                    let mut head = Vec::new();
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    seen.lock().push(String::from_utf8_lossy(&head).to_string());

                    let (status, body) = script.lock().pop_front().unwrap_or((500, "{}"));
                    let response = format!(
                        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });

            Self { url, requests }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().clone()
        }
    }

    struct FixedCorrelation(CorrelationId);

    impl CorrelationSource for FixedCorrelation {
        fn correlation_id(&self) -> CorrelationId {
            self.0.clone()
        }
    }

    fn client(url: &str, failure_threshold: u32) -> UpstreamClient {
        let config = UpstreamConfig {
            api_base_url: url.to_string(),
            resilience: ResilienceConfig {
                max_attempts: 6,
                backoff_base: Duration::from_millis(1),
                attempt_timeout: Duration::from_secs(5),
                failure_threshold,
                break_duration: Duration::from_secs(60),
            },
            ..Default::default()
        };
        UpstreamClient::new(config).unwrap()
    }

    #[test]
    fn test_normalize_base_url() {
        let url = normalize_base_url("https://api.frankfurter.dev/v1").unwrap();
        assert_eq!(url.as_str(), "https://api.frankfurter.dev/v1/");
        assert_eq!(
            url.join("2024-01-01..2024-01-31").unwrap().as_str(),
            "https://api.frankfurter.dev/v1/2024-01-01..2024-01-31"
        );
        assert!(normalize_base_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_fetches_currencies_with_correlation_header() {
        let server = ScriptedServer::start(vec![(200, r#"{"EUR":"Euro","USD":"US Dollar"}"#)]).await;
        let client = client(&server.url, 2)
            .with_correlation_source(Arc::new(FixedCorrelation(CorrelationId::from("corr-1"))));

        let list = client.currencies(&CancellationToken::new()).await.unwrap();

        assert_eq!(list.codes(), vec![CurrencyCode::eur(), CurrencyCode::usd()]);
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let head = requests[0].to_ascii_lowercase();
        assert!(head.starts_with("get /v1/currencies http/1.1"));
        assert!(head.contains("x-correlation-id: corr-1"));
        assert!(head.contains("accept: application/json"));
    }

    #[tokio::test]
    async fn test_latest_sends_base_query() {
        let server = ScriptedServer::start(vec![(
            200,
            r#"{"amount":1.0,"base":"GBP","date":"2024-03-01","rates":{"EUR":1.17}}"#,
        )])
        .await;
        let client = client(&server.url, 2);

        let latest = client
            .latest(&CurrencyCode::gbp(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(latest.rate_for(&CurrencyCode::eur()), Some(dec!(1.17)));
        assert!(server.requests()[0].starts_with("GET /v1/latest?base=GBP "));
    }

    #[tokio::test]
    async fn test_not_found_is_retried_with_same_correlation_id() {
        let server = ScriptedServer::start(vec![
            (404, "{}"),
            (
                200,
                r#"{"amount":1.0,"base":"EUR","start_date":"2024-01-02","end_date":"2024-01-03","rates":{"2024-01-02":{"USD":1.1}}}"#,
            ),
        ])
        .await;
        let client = client(&server.url, 5);
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();

        let id = CorrelationId::from("range-call");
        let historical = crate::correlation::scope(
            id,
            client.range(&CurrencyCode::eur(), start, end, &CancellationToken::new()),
        )
        .await
        .unwrap();

        assert_eq!(historical.total_records(), 1);
        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        for head in &requests {
            assert!(head.starts_with("GET /v1/2024-01-02..2024-01-03?base=EUR "));
            assert!(head.to_ascii_lowercase().contains("x-correlation-id: range-call"));
        }
    }

    #[tokio::test]
    async fn test_breaker_opens_and_skips_network() {
        let server = ScriptedServer::start(vec![(503, "{}"), (503, "{}"), (200, "{}")]).await;
        let client = client(&server.url, 2);

        let first = client.currencies(&CancellationToken::new()).await;
        assert_eq!(first, Err(UpstreamError::CircuitOpen));
        assert_eq!(client.circuit_state(), Some(CircuitState::Open));

        let second = client
            .latest(&CurrencyCode::eur(), &CancellationToken::new())
            .await;
        assert_eq!(second, Err(UpstreamError::CircuitOpen));
        assert_eq!(server.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let server = ScriptedServer::start(vec![(400, r#"{"message":"bad"}"#)]).await;
        let client = client(&server.url, 2);

        let result = client.currencies(&CancellationToken::new()).await;

        assert_eq!(result, Err(UpstreamError::Status(400)));
        assert_eq!(server.requests().len(), 1);
        assert_eq!(client.circuit_state(), Some(CircuitState::Closed));
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let server = ScriptedServer::start(vec![(200, "not json")]).await;
        let client = client(&server.url, 2);

        let result = client.currencies(&CancellationToken::new()).await;

        assert!(matches!(result, Err(UpstreamError::Decode(_))));
        assert_eq!(server.requests().len(), 1);
    }
}
