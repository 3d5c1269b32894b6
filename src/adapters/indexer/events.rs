//! Indexer Event Stream Listener
//!
//! Holds a long-lived `GET /api/v1/events` server-sent-events connection
//! and republishes each decoded event on the indexer client's broadcast
//! channel. Reconnects with a fixed backoff until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::ports::trade_index::IndexerEvent;

use super::client::IndexerClient;
use super::types::{parse_event, SseDecoder};

/// SSE listener feeding `TradeIndex::subscribe`.
pub struct IndexerEventListener {
  http: Client,
  url: String,
  events: broadcast::Sender<IndexerEvent>,
  reconnect_delay: Duration,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl IndexerEventListener {
  /// Create a listener publishing into `client`'s event channel.
  ///
  /// Uses its own HTTP client: a request timeout would cut the stream.
  pub fn new(client: &IndexerClient, reconnect_delay: Duration) -> Result<Self> {
    let http = Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .build()
      .context("Failed to build event stream HTTP client")?;

    Ok(Self {
      http,
      url: format!("{}/api/v1/events", client.base_url()),
      events: client.event_sender(),
      reconnect_delay,
      metrics: client.metrics(),
    })
  }

  /// Run the stream with auto-reconnect until shutdown.
  #[instrument(skip_all, fields(url = %self.url))]
  pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    info!("Connecting to indexer event stream");

    loop {
      match self.connect_and_stream(&mut shutdown_rx).await {
        Ok(()) => {
          info!("Indexer event stream shut down gracefully");
          return Ok(());
        }
        Err(e) => {
          self.set_connected(false);
          warn!(
            error = %e,
            delay_secs = self.reconnect_delay.as_secs(),
            "Indexer event stream disconnected, reconnecting"
          );
          tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            () = tokio::time::sleep(self.reconnect_delay) => {},
          }
        }
      }
    }
  }

  /// Single SSE session: connect, stream until error or shutdown.
  async fn connect_and_stream(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> Result<()> {
    let response = self
      .http
      .get(&self.url)
      .header("Accept", "text/event-stream")
      .send()
      .await
      .context("Indexer event stream connection failed")?
      .error_for_status()
      .context("Indexer event stream refused")?;

    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    info!("Indexer event stream connected");
    self.set_connected(true);

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Shutdown signal in indexer event stream");
          return Ok(());
        }
        chunk = stream.next() => {
          match chunk {
            Some(Ok(bytes)) => {
              for payload in decoder.push(&bytes) {
                self.handle_payload(&payload);
              }
            }
            Some(Err(e)) => {
              return Err(anyhow::anyhow!("Indexer event stream error: {e}"));
            }
            None => {
              return Err(anyhow::anyhow!("Indexer event stream ended"));
            }
          }
        }
      }
    }
  }

  fn set_connected(&self, connected: bool) {
    if let Some(metrics) = &self.metrics {
      metrics.stream_connected.set(if connected { 1.0 } else { 0.0 });
    }
  }

  fn handle_payload(&self, payload: &str) {
    let Some(event) = parse_event(payload) else {
      debug!(payload, "Ignoring non-event payload");
      return;
    };

    debug!(?event, "Indexer event");
    // No subscribers is not an error.
    let _ = self.events.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use super::super::client::IndexerClientConfig;
  use crate::ports::trade_index::TradeIndex;

  #[tokio::test]
  async fn test_payload_is_republished() {
    let client = IndexerClient::new(IndexerClientConfig::default(), None).unwrap();
    let listener = IndexerEventListener::new(&client, Duration::from_secs(1)).unwrap();
    let mut rx = client.subscribe();

    listener.handle_payload(r#"{"type":"DTFSettled","dtfId":9}"#);
    listener.handle_payload("garbage");

    assert_eq!(rx.recv().await.unwrap(), IndexerEvent::DtfSettled { dtf_id: Some(9) });
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_run_stops_on_shutdown_while_disconnected() {
    let cfg = IndexerClientConfig {
      base_url: "http://127.0.0.1:9".to_string(),
      ..IndexerClientConfig::default()
    };
    let client = IndexerClient::new(cfg, None).unwrap();
    let listener = IndexerEventListener::new(&client, Duration::from_secs(30)).unwrap();
    let (tx, rx) = broadcast::channel(1);

    let handle = tokio::spawn(async move { listener.run(rx).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.is_ok());
  }
}
