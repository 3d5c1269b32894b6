//! Chain Client Port - DTFMarket and ERC-20 Interface
//!
//! Read and write traits for the DTF market contract, the basket price
//! oracle and the ERC-20 tokens around them. Addresses cross this
//! boundary as 0x-prefixed hex strings and amounts as raw on-chain
//! integers; the adapter owns all ABI types.

use async_trait::async_trait;

use crate::domain::creation::CreateDtfParams;
use crate::domain::market::{DtfRecord, PoolInfo, SharePrices, Side};
use crate::error::TxError;

/// A token and amount locked in a DTF basket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedToken {
  /// ERC-20 address.
  pub token: String,
  /// Amount in the token's own base units.
  pub amount_raw: u128,
}

/// Confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
  /// Transaction hash, 0x-prefixed.
  pub tx_hash: String,
  /// Block the transaction was included in.
  pub block_number: Option<u64>,
  /// Gas consumed.
  pub gas_used: u128,
}

/// Read-only chain access.
#[async_trait]
pub trait ChainReader: Send + Sync + 'static {
  /// Id the next created DTF will receive; existing ids are `0..next`.
  async fn next_dtf_id(&self) -> anyhow::Result<u64>;

  /// Full on-chain record of a DTF.
  async fn dtf(&self, dtf_id: u64) -> anyhow::Result<DtfRecord>;

  /// Current YES/NO share prices.
  async fn share_prices(&self, dtf_id: u64) -> anyhow::Result<SharePrices>;

  /// Pool balances and lifetime volume.
  async fn pool_info(&self, dtf_id: u64) -> anyhow::Result<PoolInfo>;

  /// Current basket valuation, raw 18-decimal USD.
  async fn current_valuation(&self, dtf_id: u64) -> anyhow::Result<u128>;

  /// Tokens locked in a basket.
  async fn locked_tokens(&self, dtf_id: u64) -> anyhow::Result<Vec<LockedToken>>;

  /// Oracle valuation of an arbitrary basket, raw 18-decimal USD.
  async fn basket_valuation(&self, tokens: &[String], amounts: &[u128]) -> anyhow::Result<u128>;

  /// ERC-20 total supply.
  async fn total_supply(&self, token: &str) -> anyhow::Result<u128>;

  /// ERC-20 balance.
  async fn balance_of(&self, token: &str, owner: &str) -> anyhow::Result<u128>;

  /// ERC-20 allowance granted by `owner` to `spender`.
  async fn allowance(&self, token: &str, owner: &str, spender: &str) -> anyhow::Result<u128>;

  /// Check if the RPC connection is healthy.
  async fn is_healthy(&self) -> bool;
}

/// Transaction submission with the user's wallet.
///
/// Every call submits exactly one transaction. Implementations must
/// never retry. All calls wait for the receipt except
/// `submit_create_dtf`, which returns the hash so the pending creation
/// can be shown before `await_receipt` confirms it.
#[async_trait]
pub trait ChainWriter: Send + Sync + 'static {
  /// Address of the signing wallet.
  fn wallet_address(&self) -> String;

  /// ERC-20 `approve(spender, amount)`.
  async fn approve(&self, token: &str, spender: &str, amount_raw: u128) -> Result<TxReceipt, TxError>;

  /// `buyShares(dtfId, isYes, amount)` with an 18-decimal share amount.
  async fn buy_shares(&self, dtf_id: u64, side: Side, shares_raw: u128) -> Result<TxReceipt, TxError>;

  /// `settleDTF(dtfId)`.
  async fn settle(&self, dtf_id: u64) -> Result<TxReceipt, TxError>;

  /// `claimWinnings(dtfId)`.
  async fn claim_winnings(&self, dtf_id: u64) -> Result<TxReceipt, TxError>;

  /// `withdrawTokens(dtfId)`, creator only.
  async fn withdraw_tokens(&self, dtf_id: u64) -> Result<TxReceipt, TxError>;

  /// Sends `createDTF(...)` and returns the transaction hash.
  async fn submit_create_dtf(&self, params: &CreateDtfParams) -> Result<String, TxError>;

  /// Waits for a submitted transaction to confirm or revert.
  async fn await_receipt(&self, tx_hash: &str) -> Result<TxReceipt, TxError>;
}
