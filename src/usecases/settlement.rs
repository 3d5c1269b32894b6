//! Settlement Use Case - Market Lifecycle Transactions
//!
//! Handles the transactions that close out a DTF market:
//! - `settle`: anyone may settle a market once it has expired
//! - `claim`: holders of the winning side collect their share of the pool
//! - `withdraw`: the creator recovers the locked basket tokens
//!
//! Preconditions are checked locally against a fresh on-chain read so
//! that an ineligible request never reaches the chain. A sweep helper
//! settles every expired market in a range, used by auto-settle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::trade::UserTrade;
use crate::error::{LifecycleError, TxError};
use crate::ports::chain_client::{ChainReader, ChainWriter, LockedToken, TxReceipt};
use crate::ports::trade_index::TradeIndex;

use super::purchase::tx_outcome;

/// Summary of a single settlement attempt.
#[derive(Debug, Clone)]
pub struct SettlementResult {
  /// DTF id.
  pub dtf_id: u64,
  /// Transaction hash, if one confirmed.
  pub tx_hash: Option<String>,
  /// Error message if settlement failed.
  pub error: Option<String>,
}

impl SettlementResult {
  pub fn success(&self) -> bool {
    self.tx_hash.is_some()
  }
}

/// A confirmed creator withdrawal.
#[derive(Debug, Clone)]
pub struct Withdrawal {
  pub receipt: TxReceipt,
  /// Basket as read just before submitting. Empty if the read failed.
  pub tokens: Vec<LockedToken>,
}

/// Aggregated report from a settlement sweep.
#[derive(Debug, Clone)]
pub struct SettlementReport {
  /// Individual settlement results, one per eligible market.
  pub results: Vec<SettlementResult>,
  /// Markets inspected.
  pub markets_checked: usize,
  /// Number of markets successfully settled.
  pub markets_settled: usize,
  /// Number of markets that failed settlement.
  pub markets_failed: usize,
  /// Timestamp of the sweep.
  pub timestamp: DateTime<Utc>,
}

/// Settle, claim and withdraw for one wallet.
pub struct MarketLifecycle<R: ChainReader, W: ChainWriter, I: TradeIndex> {
  reader: Arc<R>,
  writer: Arc<W>,
  index: Arc<I>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<R: ChainReader, W: ChainWriter, I: TradeIndex> MarketLifecycle<R, W, I> {
  pub fn new(reader: Arc<R>, writer: Arc<W>, index: Arc<I>) -> Self {
    Self {
      reader,
      writer,
      index,
      metrics: None,
    }
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Settle an expired, unsettled market.
  #[instrument(skip(self))]
  pub async fn settle(&self, dtf_id: u64, now: DateTime<Utc>) -> Result<TxReceipt, LifecycleError> {
    let record = self.reader.dtf(dtf_id).await?;
    if !record.can_settle(now) {
      return Err(LifecycleError::NotSettleable { dtf_id });
    }

    let receipt = self.submit("settle", self.writer.settle(dtf_id).await)?;
    info!(dtf_id, tx_hash = %receipt.tx_hash, "DTF settled");
    Ok(receipt)
  }

  /// Claim winnings for a settled trade, then notify the indexer.
  ///
  /// The indexer notification is sent once; its failure is logged and
  /// does not fail the claim.
  #[instrument(skip_all, fields(dtf_id = trade.dtf_id))]
  pub async fn claim(&self, trade: &UserTrade) -> Result<TxReceipt, LifecycleError> {
    let dtf_id = trade.dtf_id;
    if !trade.is_claimable() {
      return Err(LifecycleError::NotClaimable { dtf_id });
    }

    let receipt = self.submit("claim", self.writer.claim_winnings(dtf_id).await)?;
    info!(dtf_id, tx_hash = %receipt.tx_hash, "Winnings claimed");

    let address = self.writer.wallet_address();
    if let Err(e) = self.index.record_claim(&address, dtf_id).await {
      warn!(dtf_id, error = %e, "Failed to record claim with indexer");
    }

    Ok(receipt)
  }

  /// Withdraw the locked basket tokens. Creator only.
  #[instrument(skip(self))]
  pub async fn withdraw(&self, dtf_id: u64) -> Result<Withdrawal, LifecycleError> {
    let record = self.reader.dtf(dtf_id).await?;
    if !record.is_creator(&self.writer.wallet_address()) {
      return Err(LifecycleError::NotCreator { dtf_id });
    }

    let tokens = self.reader.locked_tokens(dtf_id).await.unwrap_or_else(|e| {
      warn!(dtf_id, error = %e, "Failed to read locked basket");
      Vec::new()
    });

    let receipt = self.submit("withdraw", self.writer.withdraw_tokens(dtf_id).await)?;
    info!(
      dtf_id,
      tx_hash = %receipt.tx_hash,
      tokens = tokens.len(),
      "Locked tokens withdrawn"
    );
    Ok(Withdrawal { receipt, tokens })
  }

  /// Settle every market in `ids` that is eligible at `now`.
  ///
  /// Markets are settled one at a time; a failure on one market is
  /// recorded and the sweep continues.
  pub async fn settle_expired(
    &self,
    ids: impl IntoIterator<Item = u64>,
    now: DateTime<Utc>,
  ) -> SettlementReport {
    let mut results = Vec::new();
    let mut markets_checked = 0;

    for dtf_id in ids {
      markets_checked += 1;

      let record = match self.reader.dtf(dtf_id).await {
        Ok(record) => record,
        Err(e) => {
          warn!(dtf_id, error = %e, "Failed to read DTF during sweep");
          continue;
        }
      };
      if !record.can_settle(now) {
        continue;
      }

      let result = match self.submit("settle", self.writer.settle(dtf_id).await) {
        Ok(receipt) => {
          info!(dtf_id, tx_hash = %receipt.tx_hash, "DTF settled");
          SettlementResult {
            dtf_id,
            tx_hash: Some(receipt.tx_hash),
            error: None,
          }
        }
        Err(e) => {
          error!(dtf_id, error = %e, "Settlement failed");
          SettlementResult {
            dtf_id,
            tx_hash: None,
            error: Some(e.to_string()),
          }
        }
      };
      results.push(result);
    }

    let markets_settled = results.iter().filter(|r| r.success()).count();
    let report = SettlementReport {
      markets_checked,
      markets_settled,
      markets_failed: results.len() - markets_settled,
      results,
      timestamp: now,
    };

    info!(
      checked = report.markets_checked,
      settled = report.markets_settled,
      failed = report.markets_failed,
      "Settlement sweep complete"
    );
    report
  }

  fn submit(&self, kind: &str, result: Result<TxReceipt, TxError>) -> Result<TxReceipt, TxError> {
    if let Some(metrics) = &self.metrics {
      metrics.record_tx(kind, tx_outcome(&result));
    }
    result
  }
}
