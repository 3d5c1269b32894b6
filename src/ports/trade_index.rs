//! Trade Index Port - Indexer Backend Interface
//!
//! The indexer records every trade the market contract emits and serves
//! per-user history, per-DTF fee aggregates and a live event stream.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::trade::{DtfFees, UserTrade};

/// Event pushed by the indexer's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexerEvent {
  /// A market settled. `None` when the payload did not name the DTF.
  DtfSettled { dtf_id: Option<u64> },
  /// Shares were bought on a market.
  SharesPurchased { dtf_id: Option<u64> },
  /// A new DTF was created.
  DtfCreated { dtf_id: Option<u64> },
  /// Any other event type, by name.
  Other(String),
}

impl IndexerEvent {
  /// Whether this event makes a cached snapshot of `dtf_id` stale.
  pub fn invalidates(&self, dtf_id: u64) -> bool {
    match self {
      Self::DtfSettled { dtf_id: target } | Self::SharesPurchased { dtf_id: target } => {
        target.is_none_or(|id| id == dtf_id)
      }
      Self::DtfCreated { .. } | Self::Other(_) => false,
    }
  }

  /// Whether the user's trade history should be refetched.
  pub const fn refreshes_trades(&self) -> bool {
    matches!(self, Self::DtfSettled { .. })
  }
}

/// Trait for the trade-indexing backend.
#[async_trait]
pub trait TradeIndex: Send + Sync + 'static {
  /// All trades of `address`.
  async fn user_trades(&self, address: &str) -> anyhow::Result<Vec<UserTrade>>;

  /// Fee and volume aggregates for one DTF.
  async fn dtf_fees(&self, dtf_id: u64) -> anyhow::Result<DtfFees>;

  /// Marks the user's position on `dtf_id` as claimed. Not retried.
  async fn record_claim(&self, address: &str, dtf_id: u64) -> anyhow::Result<()>;

  /// Subscribe to the live event stream.
  fn subscribe(&self) -> broadcast::Receiver<IndexerEvent>;

  /// Check if the indexer is reachable.
  async fn is_healthy(&self) -> bool;
}
