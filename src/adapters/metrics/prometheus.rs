//! Prometheus Metrics Registry - Market and Transaction Observability
//!
//! Registers and exposes Prometheus metrics for Grafana dashboards.
//! Covers snapshot refreshes, quote traffic, transaction outcomes,
//! indexer requests, and per-market pool and price gauges.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::market::{MarketSnapshot, Side};

/// Centralized Prometheus metrics for the trader.
///
/// All metrics follow the naming convention `dtf_trader_*`; per-market
/// series carry a `dtf_id` label.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Snapshot refreshes by outcome (`ok`, `partial`, `error`, `superseded`).
    pub snapshot_refreshes: IntCounterVec,
    /// Snapshot fetch latency (milliseconds).
    pub snapshot_latency_ms: Histogram,
    /// Quotes served by side.
    pub quote_requests: IntCounterVec,
    /// Submitted transactions by kind and outcome.
    pub tx_outcomes: IntCounterVec,
    /// Indexer HTTP requests by method and outcome.
    pub indexer_requests: IntCounterVec,
    /// Current pool liquidity in USDC.
    pub pool_liquidity: GaugeVec,
    /// Current share price in USDC.
    pub share_price: GaugeVec,
    /// Event stream status (1 = connected, 0 = disconnected).
    pub stream_connected: prometheus::Gauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let snapshot_refreshes = IntCounterVec::new(
            Opts::new(
                "dtf_trader_snapshot_refreshes_total",
                "Market snapshot refreshes by outcome",
            ),
            &["outcome"],
        )?;

        let snapshot_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "dtf_trader_snapshot_latency_ms",
                "Market snapshot fetch latency in milliseconds",
            )
            .buckets(vec![25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0]),
        )?;

        let quote_requests = IntCounterVec::new(
            Opts::new("dtf_trader_quote_requests_total", "Purchase quotes served"),
            &["side"],
        )?;

        let tx_outcomes = IntCounterVec::new(
            Opts::new(
                "dtf_trader_transactions_total",
                "Submitted transactions by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;

        let indexer_requests = IntCounterVec::new(
            Opts::new(
                "dtf_trader_indexer_requests_total",
                "Indexer HTTP requests by method and outcome",
            ),
            &["method", "outcome"],
        )?;

        let pool_liquidity = GaugeVec::new(
            Opts::new(
                "dtf_trader_pool_liquidity_usdc",
                "Current market pool liquidity in USDC",
            ),
            &["dtf_id"],
        )?;

        let share_price = GaugeVec::new(
            Opts::new("dtf_trader_share_price_usdc", "Current share price in USDC"),
            &["dtf_id", "side"],
        )?;

        let stream_connected = prometheus::Gauge::new(
            "dtf_trader_event_stream_connected",
            "Indexer event stream status (1=connected, 0=disconnected)",
        )?;

        registry.register(Box::new(snapshot_refreshes.clone()))?;
        registry.register(Box::new(snapshot_latency_ms.clone()))?;
        registry.register(Box::new(quote_requests.clone()))?;
        registry.register(Box::new(tx_outcomes.clone()))?;
        registry.register(Box::new(indexer_requests.clone()))?;
        registry.register(Box::new(pool_liquidity.clone()))?;
        registry.register(Box::new(share_price.clone()))?;
        registry.register(Box::new(stream_connected.clone()))?;

        Ok(Self {
            registry,
            snapshot_refreshes,
            snapshot_latency_ms,
            quote_requests,
            tx_outcomes,
            indexer_requests,
            pool_liquidity,
            share_price,
            stream_connected,
        })
    }

    /// Update the per-market gauges from a fresh snapshot.
    pub fn observe_snapshot(&self, snapshot: &MarketSnapshot) {
        let id = snapshot.dtf_id.to_string();

        if let Some(pool) = snapshot.current_pool().and_then(|p| p.to_f64()) {
            self.pool_liquidity.with_label_values(&[&id]).set(pool);
        }
        for side in [Side::Yes, Side::No] {
            if let Some(price) = snapshot.price(side).and_then(|p| p.to_f64()) {
                let label = side.to_string();
                self.share_price.with_label_values(&[&id, &label]).set(price);
            }
        }
    }

    /// Count a transaction outcome.
    pub fn record_tx(&self, kind: &str, outcome: &str) {
        self.tx_outcomes.with_label_values(&[kind, outcome]).inc();
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.encode() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
