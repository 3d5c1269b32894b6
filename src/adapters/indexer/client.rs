//! Indexer HTTP Client - Rate-limited REST Client
//!
//! Wraps reqwest with a `governor` rate limiter and bounded retries for
//! every indexer interaction. Only idempotent GETs are retried; the claim
//! POST is sent once and its failure is returned to the caller.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::IndexerConfig;
use crate::domain::trade::{DtfFees, UserTrade};
use crate::ports::trade_index::{IndexerEvent, TradeIndex};

use super::types::TradesResponse;

/// Buffer of the event broadcast channel.
const EVENT_BUFFER: usize = 256;

/// Configuration for the indexer HTTP client.
#[derive(Debug, Clone)]
pub struct IndexerClientConfig {
  /// Base URL without trailing slash.
  pub base_url: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Requests per second allowed by the limiter.
  pub requests_per_second: NonZeroU32,
  /// Maximum retries on transient GET errors.
  pub max_retries: u32,
  /// Base delay between retries (exponential backoff).
  pub retry_base_delay: Duration,
}

impl Default for IndexerClientConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3001".to_string(),
      timeout: Duration::from_secs(10),
      requests_per_second: NonZeroU32::MIN.saturating_add(9),
      max_retries: 3,
      retry_base_delay: Duration::from_millis(200),
    }
  }
}

impl From<&IndexerConfig> for IndexerClientConfig {
  fn from(config: &IndexerConfig) -> Self {
    Self {
      base_url: config.base_url.trim_end_matches('/').to_string(),
      timeout: Duration::from_secs(config.timeout_seconds),
      requests_per_second: NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
      max_retries: config.max_retries,
      ..Self::default()
    }
  }
}

/// Rate-limited HTTP client for the trade indexer.
pub struct IndexerClient {
  /// Underlying HTTP client.
  http: Client,
  /// Client configuration.
  config: IndexerClientConfig,
  /// Request rate limiter.
  limiter: DefaultDirectRateLimiter,
  /// Fan-out of stream events, fed by `IndexerEventListener`.
  events: broadcast::Sender<IndexerEvent>,
  /// Request counters.
  metrics: Option<Arc<MetricsRegistry>>,
}

impl IndexerClient {
  /// Create a new indexer client.
  pub fn new(config: IndexerClientConfig, metrics: Option<Arc<MetricsRegistry>>) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build HTTP client")?;

    let limiter = RateLimiter::direct(Quota::per_second(config.requests_per_second));
    let (events, _) = broadcast::channel(EVENT_BUFFER);

    Ok(Self {
      http,
      config,
      limiter,
      events,
      metrics,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.config.base_url
  }

  pub fn metrics(&self) -> Option<Arc<MetricsRegistry>> {
    self.metrics.clone()
  }

  /// Sender side of the event channel, for the stream listener.
  pub fn event_sender(&self) -> broadcast::Sender<IndexerEvent> {
    self.events.clone()
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url, path)
  }

  /// GET with rate limiting and retries.
  pub async fn get(&self, path: &str) -> Result<Response> {
    let request = self
      .http
      .get(self.url(path))
      .header("Cache-Control", "no-cache");
    self.execute(request, "GET", path, self.config.max_retries).await
  }

  /// POST with rate limiting, sent exactly once.
  pub async fn post(&self, path: &str) -> Result<Response> {
    let request = self.http.post(self.url(path));
    self.execute(request, "POST", path, 0).await
  }

  async fn execute(
    &self,
    request: RequestBuilder,
    method: &'static str,
    path: &str,
    max_retries: u32,
  ) -> Result<Response> {
    let mut last_error = None;

    for attempt in 0..=max_retries {
      if attempt > 0 {
        let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis(), "Retrying request");
        sleep(delay).await;
      }

      self.limiter.until_ready().await;

      let req = request.try_clone().context("Failed to clone request")?;

      match req.send().await {
        Ok(response) => match response.status() {
          status if status.is_success() => {
            self.record(method, "ok");
            return Ok(response);
          }
          StatusCode::TOO_MANY_REQUESTS => {
            warn!(path, "Rate limited by indexer, backing off");
            self.record(method, "rate_limited");
            sleep(Duration::from_secs(2)).await;
            last_error = Some(anyhow::anyhow!("Rate limited"));
          }
          status if status.is_server_error() => {
            warn!(status = %status, path, "Indexer server error");
            self.record(method, "server_error");
            last_error = Some(anyhow::anyhow!("Server error: {status}"));
          }
          status => {
            self.record(method, "client_error");
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Indexer error {status} on {method} {path}: {body}"));
          }
        },
        Err(e) => {
          warn!(error = %e, attempt, path, "Indexer request failed");
          self.record(method, "transport_error");
          last_error = Some(e.into());
        }
      }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Max retries exceeded")))
  }

  fn record(&self, method: &str, outcome: &str) {
    if let Some(metrics) = &self.metrics {
      metrics.indexer_requests.with_label_values(&[method, outcome]).inc();
    }
  }
}

#[async_trait]
impl TradeIndex for IndexerClient {
  #[instrument(skip(self))]
  async fn user_trades(&self, address: &str) -> Result<Vec<UserTrade>> {
    let response = self.get(&format!("/api/v1/trades/{address}")).await?;
    let body: TradesResponse = response
      .json()
      .await
      .context("Failed to decode trades response")?;
    Ok(body.into_trades())
  }

  #[instrument(skip(self))]
  async fn dtf_fees(&self, dtf_id: u64) -> Result<DtfFees> {
    let response = self.get(&format!("/api/v1/dtfs/{dtf_id}/fees")).await?;
    response
      .json()
      .await
      .context("Failed to decode fees response")
  }

  #[instrument(skip(self))]
  async fn record_claim(&self, address: &str, dtf_id: u64) -> Result<()> {
    self
      .post(&format!("/api/v1/trades/{address}/claim/{dtf_id}"))
      .await
      .map(|_| ())
  }

  fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
    self.events.subscribe()
  }

  /// Any non-5xx answer counts as reachable; not retried.
  async fn is_healthy(&self) -> bool {
    self
      .http
      .get(self.url("/api/v1/health"))
      .send()
      .await
      .is_ok_and(|r| !r.status().is_server_error())
  }
}
