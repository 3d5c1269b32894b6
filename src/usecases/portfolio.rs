//! Portfolio Use Case - Positions and Creator Earnings
//!
//! Aggregates the indexer's trade history into a position summary and
//! sums creator fees and volume across the DTFs a wallet created.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::domain::trade::{CreatorTotals, TradeSummary, UserTrade};
use crate::ports::chain_client::ChainReader;
use crate::ports::trade_index::TradeIndex;

/// Position summary with the trades it was built from.
#[derive(Debug, Clone)]
pub struct Portfolio {
  pub trades: Vec<UserTrade>,
  pub summary: TradeSummary,
}

impl Portfolio {
  /// Trades with winnings still to collect.
  pub fn claimable(&self) -> impl Iterator<Item = &UserTrade> {
    self.trades.iter().filter(|t| t.is_claimable())
  }
}

/// Read-only portfolio queries.
pub struct PortfolioTracker<R: ChainReader, I: TradeIndex> {
  reader: Arc<R>,
  index: Arc<I>,
}

impl<R: ChainReader, I: TradeIndex> PortfolioTracker<R, I> {
  pub fn new(reader: Arc<R>, index: Arc<I>) -> Self {
    Self { reader, index }
  }

  /// Trades and summary for `address`.
  #[instrument(skip(self))]
  pub async fn portfolio(&self, address: &str) -> Result<Portfolio> {
    let trades = self
      .index
      .user_trades(address)
      .await
      .context("Failed to load trade history")?;
    let summary = TradeSummary::from_trades(&trades);

    info!(
      trades = trades.len(),
      winning = summary.winning,
      losing = summary.losing,
      active = summary.active,
      claimable = summary.claimable,
      total_roi = %summary.total_roi,
      "Portfolio refreshed"
    );
    Ok(Portfolio { trades, summary })
  }

  /// Ids of every DTF created by `address`.
  #[instrument(skip(self))]
  pub async fn created_by(&self, address: &str) -> Result<Vec<u64>> {
    let next = self
      .reader
      .next_dtf_id()
      .await
      .context("Failed to read DTF count")?;

    let mut ids = Vec::new();
    for dtf_id in 0..next {
      match self.reader.dtf(dtf_id).await {
        Ok(record) if record.is_creator(address) => ids.push(dtf_id),
        Ok(_) => {}
        Err(e) => debug!(dtf_id, error = %e, "Skipping unreadable DTF"),
      }
    }
    Ok(ids)
  }

  /// Fee and volume totals over the DTFs `address` created.
  ///
  /// A DTF whose fees cannot be fetched counts as zero.
  #[instrument(skip(self))]
  pub async fn creator_totals(&self, address: &str) -> Result<CreatorTotals> {
    let ids = self.created_by(address).await?;

    let mut fees = Vec::with_capacity(ids.len());
    for dtf_id in ids {
      match self.index.dtf_fees(dtf_id).await {
        Ok(f) => fees.push(Some(f)),
        Err(e) => {
          warn!(dtf_id, error = %e, "Failed to fetch DTF fees");
          fees.push(None);
        }
      }
    }

    Ok(CreatorTotals::from_fees(fees))
  }
}
