//! Purchase Use Case - Quote, Approve, Buy
//!
//! Drives a share purchase against a published market snapshot:
//! 1. Quote the purchase with the estimator
//! 2. Evaluate the spend gate against the live USDC allowance
//! 3. Approve exactly the required amount if the gate is closed
//! 4. Submit a single `buyShares` transaction
//!
//! Nothing here retries a transaction. Each failure is returned to the
//! caller as a distinct `PurchaseError`.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::allowance::{required_allowance, SpendGate};
use crate::domain::estimator::{PurchaseQuote, PurchaseRequest, ShareCostEstimator};
use crate::domain::fixed_point;
use crate::domain::market::MarketSnapshot;
use crate::error::{PurchaseError, TxError};
use crate::ports::chain_client::{ChainReader, ChainWriter, TxReceipt};

/// Purchase orchestration for one wallet.
pub struct PurchaseFlow<R: ChainReader, W: ChainWriter> {
  reader: Arc<R>,
  writer: Arc<W>,
  estimator: ShareCostEstimator,
  /// USDC token address.
  usdc: String,
  /// DTFMarket address, the spender of every approval.
  market: String,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<R: ChainReader, W: ChainWriter> PurchaseFlow<R, W> {
  pub fn new(
    reader: Arc<R>,
    writer: Arc<W>,
    estimator: ShareCostEstimator,
    usdc: impl Into<String>,
    market: impl Into<String>,
  ) -> Self {
    Self {
      reader,
      writer,
      estimator,
      usdc: usdc.into(),
      market: market.into(),
      metrics: None,
    }
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Price the purchase. Pure.
  pub fn quote(&self, snapshot: &MarketSnapshot, request: &PurchaseRequest) -> PurchaseQuote {
    self.estimator.quote(snapshot, request)
  }

  /// Current gate for `quote`, from a fresh allowance read.
  #[instrument(skip_all, fields(dtf_id = quote.dtf_id))]
  pub async fn spend_gate(&self, quote: &PurchaseQuote) -> Result<SpendGate, PurchaseError> {
    let owner = self.writer.wallet_address();
    let allowance = self
      .reader
      .allowance(&self.usdc, &owner, &self.market)
      .await?;
    Ok(SpendGate::evaluate(allowance, quote.cost))
  }

  /// Approve the market to pull exactly the quoted cost, then re-read the gate.
  #[instrument(skip_all, fields(dtf_id = quote.dtf_id, cost = %quote.cost))]
  pub async fn approve(&self, quote: &PurchaseQuote) -> Result<SpendGate, PurchaseError> {
    let amount = required_allowance(quote.cost)
      .filter(|units| *units > 0)
      .ok_or(PurchaseError::InvalidQuantity)?;

    let result = self.writer.approve(&self.usdc, &self.market, amount).await;
    self.record("approve", &result);
    let receipt = result?;
    info!(tx_hash = %receipt.tx_hash, amount, "USDC approval confirmed");

    self.spend_gate(quote).await
  }

  /// Buy the quoted shares with one transaction.
  ///
  /// Refuses locally when the quantity is invalid, the market is not
  /// open, or the allowance does not cover the cost.
  #[instrument(skip_all, fields(dtf_id = snapshot.dtf_id, side = %request.side, quantity = %request.quantity))]
  pub async fn buy(
    &self,
    snapshot: &MarketSnapshot,
    request: &PurchaseRequest,
  ) -> Result<TxReceipt, PurchaseError> {
    if !request.is_valid() {
      return Err(PurchaseError::InvalidQuantity);
    }
    if !snapshot.is_tradeable() {
      return Err(PurchaseError::MarketClosed {
        dtf_id: snapshot.dtf_id,
      });
    }

    let quote = self.quote(snapshot, request);
    if !self.spend_gate(&quote).await?.is_ready() {
      return Err(PurchaseError::NeedsApproval);
    }

    let shares_raw = fixed_point::share_units(request.quantity)
      .filter(|units| *units > 0)
      .ok_or(PurchaseError::InvalidQuantity)?;

    let result = self
      .writer
      .buy_shares(snapshot.dtf_id, request.side, shares_raw)
      .await;
    self.record("buy", &result);

    match result {
      Ok(receipt) => {
        info!(tx_hash = %receipt.tx_hash, cost = %quote.cost, "Shares purchased");
        Ok(receipt)
      }
      Err(e) => {
        warn!(error = %e, "Share purchase failed");
        Err(e.into())
      }
    }
  }

  fn record<T>(&self, kind: &str, result: &Result<T, TxError>) {
    if let Some(metrics) = &self.metrics {
      metrics.record_tx(kind, tx_outcome(result));
    }
  }
}

/// Metric label for a transaction result.
pub fn tx_outcome<T>(result: &Result<T, TxError>) -> &'static str {
  result.as_ref().err().map_or("confirmed", TxError::label)
}
