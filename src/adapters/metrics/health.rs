//! Health and Quote Server - Liveness, Readiness and Read-only Market API
//!
//! Exposes via axum 0.7:
//! - `/live` and `/ready` for Docker health checks
//! - `/markets` overviews of every watched market
//! - `/markets/{id}/quote?side=yes|no&shares=<input>` purchase quotes
//!
//! Readiness depends on chain and indexer connectivity. Quotes are
//! computed from the latest published snapshot and never touch the chain.
//! The route rejects a side other than yes/no and a share count that is
//! not a positive number with 400.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::domain::estimator::{PurchaseRequest, ShareCostEstimator};
use crate::domain::market::Side;
use crate::usecases::snapshot_feed::SnapshotBoard;

use super::prometheus::MetricsRegistry;

/// Shared health state polled by the readiness route.
#[derive(Debug)]
pub struct HealthState {
    /// Whether the RPC answered the last health check.
    pub chain_healthy: AtomicBool,
    /// Whether the indexer answered the last health check.
    pub indexer_healthy: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (all healthy by default).
    pub fn new() -> Self {
        Self {
            chain_healthy: AtomicBool::new(true),
            indexer_healthy: AtomicBool::new(true),
        }
    }

    pub fn set_chain(&self, healthy: bool) {
        self.chain_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn set_indexer(&self, healthy: bool) {
        self.indexer_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Check if the system is ready to serve traffic.
    pub fn is_ready(&self) -> bool {
        self.chain_healthy.load(Ordering::Relaxed) && self.indexer_healthy.load(Ordering::Relaxed)
    }
}

/// State behind every route.
#[derive(Clone)]
pub struct ApiState {
    pub health: Arc<HealthState>,
    pub board: Arc<SnapshotBoard>,
    pub estimator: ShareCostEstimator,
    pub metrics: Option<Arc<MetricsRegistry>>,
}

/// Query of the quote route.
#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    pub side: String,
    #[serde(default)]
    pub shares: String,
}

/// Axum-based health and quote HTTP server.
pub struct HealthServer {
    state: ApiState,
    /// Bind port (default 8080 from config).
    port: u16,
}

impl HealthServer {
    /// Create a new server.
    pub fn new(state: ApiState, port: u16) -> Self {
        Self { state, port }
    }

    /// All routes, for serving or testing.
    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/markets", get(Self::markets))
            .route("/markets/:id/quote", get(Self::quote))
            .with_state(state)
    }

    /// Start the server; returns on shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Self::router(self.state);

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness check: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness check: returns 200 only if chain + indexer are healthy.
    async fn readiness(State(state): State<ApiState>) -> impl IntoResponse {
        if state.health.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    async fn markets(State(state): State<ApiState>) -> impl IntoResponse {
        Json(state.board.overviews())
    }

    async fn quote(
        State(state): State<ApiState>,
        Path(dtf_id): Path<u64>,
        Query(params): Query<QuoteParams>,
    ) -> Response {
        let Ok(side) = params.side.parse::<Side>() else {
            return (StatusCode::BAD_REQUEST, "side must be yes or no").into_response();
        };
        let request = PurchaseRequest::from_input(side, &params.shares);
        if !request.is_valid() {
            return (StatusCode::BAD_REQUEST, "shares must be a positive number").into_response();
        }
        if !state.board.is_watched(dtf_id) {
            return (StatusCode::NOT_FOUND, "market not watched").into_response();
        }
        let Some(market) = state.board.latest(dtf_id) else {
            return (StatusCode::SERVICE_UNAVAILABLE, "market not loaded yet").into_response();
        };

        let quote = state.estimator.quote(&market.snapshot, &request);

        if let Some(metrics) = &state.metrics {
            let label = side.to_string();
            metrics.quote_requests.with_label_values(&[&label]).inc();
        }

        Json(quote).into_response()
    }
}
