//! Snapshot Feed Use Case - Producer-driven Market Refresh
//!
//! One producer task per watched market. Each refresh reads the DTF
//! record and then prices, pools, supplies and valuation concurrently,
//! composes an immutable `MarketState` and publishes it on a `watch`
//! channel. Consumers only ever read the latest published state.
//!
//! Refresh triggers:
//! 1. The configured interval
//! 2. An indexer event that invalidates the market
//!
//! An invalidation that arrives while a fetch is in flight cancels the
//! fetch and starts a new one, so a stale response is never published.
//!
//! `MarketRegistry` owns the feeds and starts new ones as markets are
//! created.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::fixed_point;
use crate::domain::market::{
  valuation_progress, DtfRecord, MarketSnapshot, MarketStatus, ShareSupply, Side,
};
use crate::ports::chain_client::ChainReader;
use crate::ports::trade_index::{IndexerEvent, TradeIndex};

/// Latest known state of one market.
#[derive(Debug, Clone)]
pub struct MarketState {
  /// On-chain record at fetch time.
  pub record: DtfRecord,
  /// Estimator input.
  pub snapshot: MarketSnapshot,
  /// Current basket valuation, raw 18-decimal USD.
  pub current_valuation: Option<u128>,
}

/// Display summary of a market.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketOverview {
  pub dtf_id: u64,
  pub name: String,
  pub status: MarketStatus,
  pub yes_price: Option<Decimal>,
  pub no_price: Option<Decimal>,
  pub pool: Option<Decimal>,
  /// Lifetime volume excluding the creation bond.
  pub volume: Option<Decimal>,
  pub target_valuation: Decimal,
  pub current_valuation: Option<Decimal>,
  /// Distance from target in percent, capped at 100.
  pub progress_pct: Option<Decimal>,
  pub fetched_at: DateTime<Utc>,
}

impl MarketState {
  pub fn overview(&self) -> MarketOverview {
    let snapshot = &self.snapshot;
    let target = self.record.target();
    let current = self
      .current_valuation
      .map(|raw| fixed_point::from_raw(raw, fixed_point::VALUATION_DECIMALS));

    MarketOverview {
      dtf_id: self.record.dtf_id,
      name: self.record.name.clone(),
      status: snapshot.status(),
      yes_price: snapshot.price(Side::Yes),
      no_price: snapshot.price(Side::No),
      pool: snapshot.current_pool(),
      volume: snapshot.pool.map(|p| p.traded_volume()),
      target_valuation: target,
      current_valuation: current,
      progress_pct: current.map(|c| valuation_progress(c, target)),
      fetched_at: snapshot.fetched_at,
    }
  }
}

/// Reads one market and composes its state.
///
/// Fails only if the DTF record itself cannot be read. Every other group
/// that fails is left `None` and logged.
#[instrument(skip(reader))]
pub async fn fetch_market_state<R: ChainReader + ?Sized>(
  reader: &R,
  dtf_id: u64,
  now: DateTime<Utc>,
) -> Result<MarketState> {
  let record = reader
    .dtf(dtf_id)
    .await
    .with_context(|| format!("Failed to read DTF {dtf_id}"))?;

  let (prices, pool, yes_supply, no_supply, valuation) = tokio::join!(
    reader.share_prices(dtf_id),
    reader.pool_info(dtf_id),
    reader.total_supply(record.share_token(Side::Yes)),
    reader.total_supply(record.share_token(Side::No)),
    reader.current_valuation(dtf_id),
  );

  let supply = match (yes_supply, no_supply) {
    (Ok(yes), Ok(no)) => Some(ShareSupply { yes, no }),
    (Err(e), _) | (_, Err(e)) => {
      warn!(dtf_id, error = %e, "Share supply read failed");
      None
    }
  };

  let snapshot = MarketSnapshot {
    dtf_id,
    prices: keep_or_warn(dtf_id, "share prices", prices),
    pool: keep_or_warn(dtf_id, "pool info", pool),
    supply,
    is_settled: record.is_settled,
    is_expired: record.is_expired(now),
    winning_side: record.winning_side(),
    fetched_at: now,
  };

  Ok(MarketState {
    current_valuation: keep_or_warn(dtf_id, "valuation", valuation),
    record,
    snapshot,
  })
}

fn keep_or_warn<T>(dtf_id: u64, what: &str, result: Result<T>) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(dtf_id, error = %e, "Failed to read {what}");
      None
    }
  }
}

/// Receiver side of a market's published state.
pub type StateReceiver = watch::Receiver<Option<Arc<MarketState>>>;

/// Producer task keeping one market's state fresh.
pub struct SnapshotFeed<R: ChainReader> {
  reader: Arc<R>,
  dtf_id: u64,
  interval: Duration,
  tx: watch::Sender<Option<Arc<MarketState>>>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<R: ChainReader> SnapshotFeed<R> {
  /// Create a feed and the receiver consumers read from.
  pub fn new(
    reader: Arc<R>,
    dtf_id: u64,
    interval: Duration,
    metrics: Option<Arc<MetricsRegistry>>,
  ) -> (Self, StateReceiver) {
    let (tx, rx) = watch::channel(None);
    let feed = Self {
      reader,
      dtf_id,
      interval,
      tx,
      metrics,
    };
    (feed, rx)
  }

  /// Refresh until shutdown.
  #[instrument(skip_all, fields(dtf_id = self.dtf_id))]
  pub async fn run(
    self,
    invalidations: broadcast::Receiver<IndexerEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
  ) -> Result<()> {
    info!(interval_ms = self.interval.as_millis(), "Snapshot feed started");

    let mut invalidations = Some(invalidations);
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => break,
        () = next_invalidation(&mut invalidations, self.dtf_id) => {
          debug!("Snapshot invalidated");
        }
        _ = ticker.tick() => {}
      }

      if !self.refresh(&mut invalidations, &mut shutdown_rx).await {
        break;
      }
    }

    info!("Snapshot feed stopped");
    Ok(())
  }

  /// Fetch and publish, restarting on invalidation. Returns `false` on shutdown.
  async fn refresh(
    &self,
    invalidations: &mut Option<broadcast::Receiver<IndexerEvent>>,
    shutdown_rx: &mut broadcast::Receiver<()>,
  ) -> bool {
    loop {
      let started = Instant::now();
      let fetch = fetch_market_state(self.reader.as_ref(), self.dtf_id, Utc::now());

      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => return false,
        () = next_invalidation(invalidations, self.dtf_id) => {
          debug!("In-flight snapshot superseded");
          self.count("superseded");
        }
        result = fetch => {
          self.publish(result, started);
          return true;
        }
      }
    }
  }

  fn publish(&self, result: Result<MarketState>, started: Instant) {
    if let Some(metrics) = &self.metrics {
      metrics
        .snapshot_latency_ms
        .observe(started.elapsed().as_secs_f64() * 1000.0);
    }

    match result {
      Ok(state) => {
        let snapshot = &state.snapshot;
        let complete = snapshot.prices.is_some() && snapshot.pool.is_some() && snapshot.supply.is_some();
        self.count(if complete { "ok" } else { "partial" });
        if let Some(metrics) = &self.metrics {
          metrics.observe_snapshot(snapshot);
        }
        self.tx.send_replace(Some(Arc::new(state)));
      }
      Err(e) => {
        // Keep serving the last good state.
        warn!(error = %e, "Snapshot refresh failed");
        self.count("error");
      }
    }
  }

  fn count(&self, outcome: &str) {
    if let Some(metrics) = &self.metrics {
      metrics.snapshot_refreshes.with_label_values(&[outcome]).inc();
    }
  }
}

/// Resolves on the next event invalidating `dtf_id`, or on lag.
///
/// Once the channel closes the receiver is dropped and this never resolves.
async fn next_invalidation(rx: &mut Option<broadcast::Receiver<IndexerEvent>>, dtf_id: u64) {
  loop {
    let Some(receiver) = rx.as_mut() else {
      return std::future::pending().await;
    };
    match receiver.recv().await {
      Ok(event) if event.invalidates(dtf_id) => return,
      Ok(_) => {}
      Err(broadcast::error::RecvError::Lagged(skipped)) => {
        debug!(skipped, "Invalidation channel lagged, refreshing");
        return;
      }
      Err(broadcast::error::RecvError::Closed) => {
        warn!("Invalidation channel closed");
        *rx = None;
      }
    }
  }
}

/// Read side of every running feed, keyed by DTF id.
///
/// Markets can be added while the service runs.
#[derive(Debug, Default)]
pub struct SnapshotBoard {
  markets: RwLock<BTreeMap<u64, StateReceiver>>,
}

impl SnapshotBoard {
  pub fn new() -> Self {
    Self::default()
  }

  /// Track a feed. Returns `false` if `dtf_id` already has one.
  pub fn insert(&self, dtf_id: u64, rx: StateReceiver) -> bool {
    let mut markets = self.markets.write();
    if markets.contains_key(&dtf_id) {
      return false;
    }
    markets.insert(dtf_id, rx);
    true
  }

  /// Latest published state; `None` if unwatched or not yet loaded.
  pub fn latest(&self, dtf_id: u64) -> Option<Arc<MarketState>> {
    self.markets.read().get(&dtf_id)?.borrow().clone()
  }

  pub fn is_watched(&self, dtf_id: u64) -> bool {
    self.markets.read().contains_key(&dtf_id)
  }

  pub fn market_ids(&self) -> Vec<u64> {
    self.markets.read().keys().copied().collect()
  }

  /// Overviews of every loaded market.
  pub fn overviews(&self) -> Vec<MarketOverview> {
    self
      .markets
      .read()
      .values()
      .filter_map(|rx| rx.borrow().clone())
      .map(|state| state.overview())
      .collect()
  }
}

/// Owns one `SnapshotFeed` task per watched market.
///
/// With `follow_created` set, every `DtfCreated` event from the indexer
/// starts a feed for the new market. An event without an id rescans
/// `0..nextDtfId`.
pub struct MarketRegistry<R: ChainReader, I: TradeIndex> {
  reader: Arc<R>,
  index: Arc<I>,
  board: Arc<SnapshotBoard>,
  interval: Duration,
  metrics: Option<Arc<MetricsRegistry>>,
  follow_created: bool,
  feeds: JoinSet<()>,
  feed_shutdown: broadcast::Sender<()>,
}

impl<R: ChainReader, I: TradeIndex> MarketRegistry<R, I> {
  pub fn new(
    reader: Arc<R>,
    index: Arc<I>,
    interval: Duration,
    metrics: Option<Arc<MetricsRegistry>>,
  ) -> Self {
    let (feed_shutdown, _) = broadcast::channel(1);
    Self {
      reader,
      index,
      board: Arc::new(SnapshotBoard::new()),
      interval,
      metrics,
      follow_created: false,
      feeds: JoinSet::new(),
      feed_shutdown,
    }
  }

  pub fn follow_created(mut self, follow: bool) -> Self {
    self.follow_created = follow;
    self
  }

  pub fn board(&self) -> Arc<SnapshotBoard> {
    Arc::clone(&self.board)
  }

  /// Start a feed for `dtf_id`. Returns `false` if one is already running.
  ///
  /// Must be called inside a tokio runtime.
  pub fn watch(&mut self, dtf_id: u64) -> bool {
    if self.board.is_watched(dtf_id) {
      return false;
    }

    let (feed, rx) = SnapshotFeed::new(
      Arc::clone(&self.reader),
      dtf_id,
      self.interval,
      self.metrics.clone(),
    );
    self.board.insert(dtf_id, rx);

    let invalidations = self.index.subscribe();
    let shutdown_rx = self.feed_shutdown.subscribe();
    self.feeds.spawn(async move {
      if let Err(e) = feed.run(invalidations, shutdown_rx).await {
        error!(dtf_id, error = %e, "Snapshot feed failed");
      }
    });
    true
  }

  /// Follow market creation until shutdown, then stop every feed.
  #[instrument(skip_all)]
  pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let mut events = self.index.subscribe();
    info!(
      markets = self.board.market_ids().len(),
      follow_created = self.follow_created,
      "Market registry started"
    );

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => break,
        event = events.recv() => match event {
          Ok(IndexerEvent::DtfCreated { dtf_id }) if self.follow_created => {
            self.register_created(dtf_id).await;
          }
          Ok(_) => {}
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "Registry event channel lagged");
            if self.follow_created {
              self.register_created(None).await;
            }
          }
          Err(broadcast::error::RecvError::Closed) => {
            warn!("Registry event channel closed");
            let _ = shutdown_rx.recv().await;
            break;
          }
        },
        Some(joined) = self.feeds.join_next() => {
          if let Err(e) = joined {
            error!(error = %e, "Snapshot feed task aborted");
          }
        }
      }
    }

    let _ = self.feed_shutdown.send(());
    while let Some(joined) = self.feeds.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "Snapshot feed task aborted");
      }
    }

    info!("Market registry stopped");
    Ok(())
  }

  async fn register_created(&mut self, dtf_id: Option<u64>) {
    let ids = match dtf_id {
      Some(id) => vec![id],
      None => match self.reader.next_dtf_id().await {
        Ok(next) => (0..next).collect(),
        Err(e) => {
          warn!(error = %e, "Failed to read DTF count after creation event");
          return;
        }
      },
    };

    for id in ids {
      if self.watch(id) {
        info!(dtf_id = id, "Watching new market");
      }
    }
  }
}
