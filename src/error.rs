//! Typed errors for the user-facing trading flows.
//!
//! Adapters and wiring use `anyhow`; these enums are what the purchase,
//! lifecycle and creation use cases return so callers can tell a revert
//! from a refusal from a transport failure.

use thiserror::Error;

use crate::domain::creation::DraftIssue;

/// Outcome of a single submitted transaction. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("transaction {tx_hash} not confirmed in time")]
    Timeout { tx_hash: String },

    #[error("invalid transaction request: {0}")]
    InvalidRequest(String),
}

impl TxError {
    /// Short label for metrics.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::Reverted { .. } => "reverted",
            Self::Network(_) => "network",
            Self::Timeout { .. } => "timeout",
            Self::InvalidRequest(_) => "invalid",
        }
    }
}

#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("quantity must be a positive number")]
    InvalidQuantity,

    #[error("market {dtf_id} is not open for trading")]
    MarketClosed { dtf_id: u64 },

    #[error("USDC allowance does not cover the purchase")]
    NeedsApproval,

    #[error(transparent)]
    Transaction(#[from] TxError),

    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("market {dtf_id} cannot be settled yet")]
    NotSettleable { dtf_id: u64 },

    #[error("nothing to claim on market {dtf_id}")]
    NotClaimable { dtf_id: u64 },

    #[error("only the creator of market {dtf_id} can withdraw its tokens")]
    NotCreator { dtf_id: u64 },

    #[error(transparent)]
    Transaction(#[from] TxError),

    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum CreationError {
    #[error("invalid draft: {}", join_issues(.0))]
    Invalid(Vec<DraftIssue>),

    #[error("draft amounts do not fit on-chain integers")]
    Unrepresentable,

    #[error(transparent)]
    Transaction(#[from] TxError),

    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}

fn join_issues(issues: &[DraftIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
