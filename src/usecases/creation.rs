//! Creation Use Case - New DTF Markets
//!
//! Validates a draft against the creator's balances and the oracle's
//! valuation of the proposed basket, approves whatever the market
//! contract cannot yet pull (the 50 USDC bond and each basket token),
//! then submits `createDTF`.
//!
//! Approvals are sent one at a time and each is awaited before the next.
//! Progress is published on a `watch` channel as `CreationStage`s;
//! `Pending` carries the hash once `createDTF` has been sent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::creation::{
  CreateDtfParams, CreationStage, DraftContext, DtfDraft, DEFAULT_TOKEN_DECIMALS,
};
use crate::domain::fees::CREATION_BOND_RAW;
use crate::domain::fixed_point;
use crate::error::{CreationError, TxError};
use crate::ports::chain_client::{ChainReader, ChainWriter, TxReceipt};

use super::purchase::tx_outcome;

/// Confirmed transactions of a successful creation.
#[derive(Debug, Clone)]
pub struct CreationOutcome {
  /// Approvals sent, in order.
  pub approvals: Vec<TxReceipt>,
  /// The `createDTF` transaction.
  pub receipt: TxReceipt,
}

/// Allowance the market needs on one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowanceNeed {
  pub token: String,
  pub required: u128,
  pub current: u128,
}

impl AllowanceNeed {
  pub fn is_short(&self) -> bool {
    self.current < self.required
  }
}

/// DTF creation for one wallet.
pub struct DtfCreator<R: ChainReader, W: ChainWriter> {
  reader: Arc<R>,
  writer: Arc<W>,
  /// DTFMarket address, spender of all approvals.
  market: String,
  usdc: String,
  /// Lowercase token address -> decimals.
  decimals: HashMap<String, u32>,
  progress: watch::Sender<CreationStage>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<R: ChainReader, W: ChainWriter> DtfCreator<R, W> {
  pub fn new(
    reader: Arc<R>,
    writer: Arc<W>,
    market: impl Into<String>,
    usdc: impl Into<String>,
    decimals: HashMap<String, u32>,
  ) -> Self {
    let (progress, _) = watch::channel(CreationStage::Checking);
    Self {
      reader,
      writer,
      market: market.into(),
      usdc: usdc.into(),
      decimals,
      progress,
      metrics: None,
    }
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Follow the stages of the current creation.
  pub fn progress(&self) -> watch::Receiver<CreationStage> {
    self.progress.subscribe()
  }

  /// Balances and basket valuation needed to validate `draft`.
  ///
  /// A failed valuation read leaves the valuation unknown and the target
  /// check is skipped.
  pub async fn context(&self, draft: &DtfDraft, params: &CreateDtfParams) -> Result<DraftContext, CreationError> {
    let owner = self.writer.wallet_address();
    let mut balances = HashMap::new();

    for token in draft.filled_tokens() {
      let key = token.address.to_ascii_lowercase();
      if balances.contains_key(&key) {
        continue;
      }
      let raw = self.reader.balance_of(&token.address, &owner).await?;
      balances.insert(key.clone(), fixed_point::from_raw(raw, self.decimals_of(&key)));
    }

    let current_valuation = if params.tokens.is_empty() {
      None
    } else {
      match self.reader.basket_valuation(&params.tokens, &params.amounts).await {
        Ok(raw) => Some(fixed_point::from_raw(raw, fixed_point::VALUATION_DECIMALS)),
        Err(e) => {
          warn!(error = %e, "Basket valuation unavailable, skipping target check");
          None
        }
      }
    };

    Ok(DraftContext {
      balances,
      current_valuation,
    })
  }

  /// Allowances the market needs: the bond in USDC plus every basket amount.
  pub async fn allowance_needs(&self, params: &CreateDtfParams) -> Result<Vec<AllowanceNeed>, CreationError> {
    let owner = self.writer.wallet_address();

    let mut required: Vec<(String, u128)> = vec![(self.usdc.clone(), CREATION_BOND_RAW)];
    for (token, amount) in params.tokens.iter().zip(&params.amounts) {
      match required.iter_mut().find(|(t, _)| t.eq_ignore_ascii_case(token)) {
        Some((_, total)) => *total = total.saturating_add(*amount),
        None => required.push((token.clone(), *amount)),
      }
    }

    let mut needs = Vec::with_capacity(required.len());
    for (token, required) in required {
      let current = self.reader.allowance(&token, &owner, &self.market).await?;
      needs.push(AllowanceNeed {
        token,
        required,
        current,
      });
    }
    Ok(needs)
  }

  /// Validate, approve and create.
  #[instrument(skip_all, fields(name = %draft.name))]
  pub async fn create(&self, draft: &DtfDraft, now: DateTime<Utc>) -> Result<CreationOutcome, CreationError> {
    let result = self.run(draft, now).await;
    match &result {
      Ok(outcome) => {
        self.progress.send_replace(CreationStage::Complete);
        info!(tx_hash = %outcome.receipt.tx_hash, "DTF created");
      }
      Err(e) => {
        self.progress.send_replace(CreationStage::Error);
        warn!(error = %e, "DTF creation failed");
      }
    }
    result
  }

  async fn run(&self, draft: &DtfDraft, now: DateTime<Utc>) -> Result<CreationOutcome, CreationError> {
    self.progress.send_replace(CreationStage::Checking);

    let params = draft
      .to_params(&self.decimals)
      .ok_or(CreationError::Unrepresentable)?;

    let ctx = self.context(draft, &params).await?;
    let issues = draft.validate(&ctx, now);
    if !issues.is_empty() {
      return Err(CreationError::Invalid(issues));
    }

    let short: Vec<AllowanceNeed> = self
      .allowance_needs(&params)
      .await?
      .into_iter()
      .filter(AllowanceNeed::is_short)
      .collect();

    let mut approvals = Vec::with_capacity(short.len());
    if !short.is_empty() {
      self.progress.send_replace(CreationStage::Approving);
      for need in &short {
        let result = self
          .writer
          .approve(&need.token, &self.market, need.required)
          .await;
        self.record("approve", &result);
        let receipt = result?;
        info!(token = %need.token, amount = need.required, tx_hash = %receipt.tx_hash, "Approval confirmed");
        approvals.push(receipt);
      }
    }

    self.progress.send_replace(CreationStage::Creating);
    info!(tokens = params.tokens.len(), expiry = params.expiry, "Submitting createDTF");

    let submitted = self.writer.submit_create_dtf(&params).await;
    if submitted.is_err() {
      self.record("create", &submitted);
    }
    let tx_hash = submitted?;
    self.progress.send_replace(CreationStage::Pending {
      tx_hash: tx_hash.clone(),
    });

    let result = self.writer.await_receipt(&tx_hash).await;
    self.record("create", &result);

    Ok(CreationOutcome {
      approvals,
      receipt: result?,
    })
  }

  fn decimals_of(&self, lowercase_address: &str) -> u32 {
    self
      .decimals
      .get(lowercase_address)
      .copied()
      .unwrap_or(DEFAULT_TOKEN_DECIMALS)
  }

  fn record<T>(&self, kind: &str, result: &Result<T, TxError>) {
    if let Some(metrics) = &self.metrics {
      metrics.record_tx(kind, tx_outcome(result));
    }
  }
}
