//! DTF Trader - Entry Point
//!
//! Initializes configuration, logging, chain and indexer connections,
//! and the per-market snapshot feeds. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load `.env` and config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Connect to Sepolia, with a signer if WALLET_PRIVATE_KEY is set
//! 4. Bind and validate the DTF contracts
//! 5. Create the indexer client and spawn its event stream listener
//! 6. Spawn the market registry: one snapshot feed per watched market,
//!    plus new markets as they are created when no list is configured
//! 7. Spawn the health/quote server and the Prometheus exporter
//! 8. Spawn the health monitor and the portfolio/auto-settle loop
//! 9. Wait for SIGINT, broadcast shutdown, join tasks

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use dtf_trader::adapters::chain::{ChainProvider, ContractAddresses, DtfContracts};
use dtf_trader::adapters::indexer::{IndexerClient, IndexerClientConfig, IndexerEventListener};
use dtf_trader::adapters::metrics::{ApiState, HealthServer, HealthState, MetricsRegistry};
use dtf_trader::config::{self, AppConfig};
use dtf_trader::domain::estimator::ShareCostEstimator;
use dtf_trader::ports::chain_client::ChainReader;
use dtf_trader::ports::trade_index::{IndexerEvent, TradeIndex};
use dtf_trader::usecases::{MarketLifecycle, MarketRegistry, PortfolioTracker, SnapshotBoard};

/// Interval between chain/indexer health checks.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load .env and configuration ───────────────────────
    dotenvy::dotenv().ok();
    let config_path = std::env::var("DTF_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.app.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.app.name,
        version = env!("CARGO_PKG_VERSION"),
        chain_id = config.chain.chain_id,
        payout_rule = ?config.estimator.payout_rule,
        "Starting DTF Trader"
    );

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let metrics = if config.metrics.enabled {
        Some(Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?))
    } else {
        None
    };

    // ── 3. Connect to the chain ─────────────────────────────
    let provider = match std::env::var("WALLET_PRIVATE_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            ChainProvider::connect_with_key(&config.chain, key.trim()).await?
        }
        _ => {
            warn!("WALLET_PRIVATE_KEY not set, running read-only");
            ChainProvider::connect(&config.chain).await?
        }
    };
    let provider = Arc::new(provider);

    // ── 4. Bind DTF contracts ───────────────────────────────
    let contracts = Arc::new(
        DtfContracts::new(
            Arc::clone(&provider),
            ContractAddresses::from_config(&config.chain)?,
            Duration::from_secs(config.chain.confirmation_timeout_seconds),
        )
        .await
        .context("Failed to bind DTF contracts")?,
    );

    // ── 5. Indexer client + event stream ────────────────────
    let indexer = Arc::new(
        IndexerClient::new(IndexerClientConfig::from(&config.indexer), metrics.clone())
            .context("Failed to create indexer client")?,
    );
    let listener = IndexerEventListener::new(
        &indexer,
        Duration::from_secs(config.indexer.reconnect_seconds),
    )?;

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    let listener_shutdown = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        if let Err(e) = listener.run(listener_shutdown).await {
            error!(error = %e, "Indexer event stream task failed");
        }
    }));

    // ── 6. Snapshot feeds ───────────────────────────────────
    let market_ids = watched_markets(&config, contracts.as_ref()).await?;
    let mut registry = MarketRegistry::new(
        Arc::clone(&contracts),
        Arc::clone(&indexer),
        Duration::from_secs(config.markets.refresh_interval_seconds),
        metrics.clone(),
    )
    .follow_created(config.markets.watch.is_empty());

    for &dtf_id in &market_ids {
        registry.watch(dtf_id);
    }
    let board = registry.board();
    info!(markets = market_ids.len(), "Snapshot feeds started");

    let registry_shutdown = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        if let Err(e) = registry.run(registry_shutdown).await {
            error!(error = %e, "Market registry failed");
        }
    }));

    // ── 7. Health/quote server + metrics exporter ───────────
    let health = Arc::new(HealthState::new());
    let api_state = ApiState {
        health: Arc::clone(&health),
        board: Arc::clone(&board),
        estimator: ShareCostEstimator::with_rule(config.estimator.payout_rule),
        metrics: metrics.clone(),
    };
    let server = HealthServer::new(api_state, config.metrics.health_port);
    let server_shutdown = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        if let Err(e) = server.run(server_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    }));

    if let Some(exporter) = metrics.clone() {
        let bind_address = config.metrics.bind_address.clone();
        let metrics_shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = exporter.serve(bind_address, metrics_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        }));
    }

    // ── 8. Health monitor + portfolio loop ──────────────────
    handles.push(tokio::spawn(monitor_health(
        Arc::clone(&contracts),
        Arc::clone(&indexer),
        health,
        shutdown_tx.subscribe(),
    )));

    let account = provider
        .wallet_address()
        .map(|a| a.to_string())
        .or_else(|| config.app.watch_address.clone());

    match account {
        Some(address) => {
            let settler = (config.app.auto_settle && provider.signer().is_some()).then(|| {
                MarketLifecycle::new(Arc::clone(&contracts), Arc::clone(&contracts), Arc::clone(&indexer))
            });
            if config.app.auto_settle && settler.is_none() {
                warn!("auto_settle requires a signing wallet, disabled");
            }
            handles.push(tokio::spawn(run_portfolio(
                PortfolioTracker::new(Arc::clone(&contracts), Arc::clone(&indexer)),
                settler,
                address,
                Arc::clone(&board),
                Duration::from_secs(config.app.portfolio_interval_seconds),
                indexer.subscribe(),
                shutdown_tx.subscribe(),
            )));
        }
        None => info!("No wallet or watch_address configured, portfolio tracking disabled"),
    }

    info!("All tasks spawned, trader is running");

    // ── 9. Wait for SIGINT ──────────────────────────────────
    signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
    info!("SIGINT received, initiating graceful shutdown");

    let _ = shutdown_tx.send(());

    for handle in handles {
        if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
            warn!("Task did not stop within 10s");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Configured market ids, or every existing DTF when none are listed.
async fn watched_markets(config: &AppConfig, reader: &DtfContracts) -> Result<Vec<u64>> {
    if !config.markets.watch.is_empty() {
        return Ok(config.markets.watch.clone());
    }
    let next = reader.next_dtf_id().await.context("Failed to read DTF count")?;
    Ok((0..next).collect())
}

/// Check chain and indexer connectivity for the readiness endpoint.
async fn monitor_health(
    contracts: Arc<DtfContracts>,
    indexer: Arc<IndexerClient>,
    health: Arc<HealthState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let (chain, index) = tokio::join!(
                    ChainReader::is_healthy(contracts.as_ref()),
                    TradeIndex::is_healthy(indexer.as_ref()),
                );
                if !chain {
                    warn!("Chain RPC unhealthy");
                }
                if !index {
                    warn!("Indexer unhealthy");
                }
                health.set_chain(chain);
                health.set_indexer(index);
            }
        }
    }
}

/// Refresh the portfolio on an interval and after settlements; optionally
/// settle expired watched markets first.
async fn run_portfolio(
    tracker: PortfolioTracker<DtfContracts, IndexerClient>,
    settler: Option<MarketLifecycle<DtfContracts, DtfContracts, IndexerClient>>,
    address: String,
    board: Arc<SnapshotBoard>,
    interval: Duration,
    mut events: broadcast::Receiver<IndexerEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    info!(%address, "Portfolio tracking started");

    loop {
        let scheduled = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            event = events.recv() => match event {
                Ok(event) if event.refreshes_trades() => false,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Indexer event channel closed");
                    let _ = shutdown_rx.recv().await;
                    break;
                }
            },
            _ = ticker.tick() => true,
        };

        if scheduled {
            if let Some(settler) = &settler {
                settler.settle_expired(board.market_ids(), Utc::now()).await;
            }
        }

        match tracker.portfolio(&address).await {
            Ok(portfolio) => {
                for trade in portfolio.claimable() {
                    info!(dtf_id = trade.dtf_id, position = %trade.position, "Winnings ready to claim");
                }
            }
            Err(e) => warn!(error = %e, "Portfolio refresh failed"),
        }

        if scheduled {
            match tracker.creator_totals(&address).await {
                Ok(totals) if totals.dtf_count > 0 => info!(
                    dtf_count = totals.dtf_count,
                    fees = %totals.total_fees,
                    volume = %totals.total_volume,
                    "Creator totals"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Creator totals refresh failed"),
            }
        }
    }

    info!("Portfolio tracking stopped");
}
