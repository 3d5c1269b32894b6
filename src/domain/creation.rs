//! DTF creation drafts and their validation rules.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::fixed_point;

/// Minimum lead time between creation and expiry.
pub const MIN_EXPIRY_LEAD_SECS: i64 = 5 * 60;

/// Minimum relative distance between the target and current valuation.
pub const MIN_TARGET_DISTANCE: Decimal = dec!(0.05);

/// Minimum number of tokens in a basket.
pub const MIN_BASKET_TOKENS: usize = 2;

/// One basket constituent as entered by the creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftToken {
    /// ERC-20 address, 0x-prefixed hex. Empty when not selected yet.
    pub address: String,
    /// Whole-token amount.
    pub amount: Decimal,
}

impl DraftToken {
    pub fn is_filled(&self) -> bool {
        !self.address.trim().is_empty() && self.amount > Decimal::ZERO
    }
}

/// A DTF the user is about to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtfDraft {
    pub name: String,
    pub tokens: Vec<DraftToken>,
    pub expiry: DateTime<Utc>,
    /// Target basket valuation in USD.
    pub target_valuation: Decimal,
    pub is_target_higher: bool,
}

/// Chain state a draft is validated against.
#[derive(Debug, Clone, Default)]
pub struct DraftContext {
    /// Creator's whole-token balances keyed by lowercase address.
    pub balances: HashMap<String, Decimal>,
    /// Current USD valuation of the drafted basket, if it could be priced.
    pub current_valuation: Option<Decimal>,
}

impl DraftContext {
    pub fn balance_of(&self, address: &str) -> Option<Decimal> {
        self.balances.get(&address.to_ascii_lowercase()).copied()
    }
}

/// A single reason a draft cannot be submitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftIssue {
    #[error("at least 2 tokens must be selected, found {found}")]
    TooFewTokens { found: usize },

    #[error("insufficient balance for token #{index} ({address}): {available} available")]
    InsufficientBalance {
        index: usize,
        address: String,
        available: Decimal,
    },

    #[error("expiry must be at least 5 minutes from now (earliest {earliest})")]
    ExpiryTooSoon { earliest: DateTime<Utc> },

    #[error("target must be at least ${bound:.2}")]
    TargetTooLow { bound: Decimal },

    #[error("target must be at most ${bound:.2}")]
    TargetTooHigh { bound: Decimal },
}

impl DtfDraft {
    pub fn filled_tokens(&self) -> impl Iterator<Item = &DraftToken> {
        self.tokens.iter().filter(|t| t.is_filled())
    }

    /// Collects every issue with the draft; empty means valid.
    ///
    /// Balance and valuation checks are skipped when the context lacks
    /// the corresponding data.
    pub fn validate(&self, ctx: &DraftContext, now: DateTime<Utc>) -> Vec<DraftIssue> {
        let mut issues = Vec::new();

        let found = self.filled_tokens().count();
        if found < MIN_BASKET_TOKENS {
            issues.push(DraftIssue::TooFewTokens { found });
        }

        for (index, token) in self.tokens.iter().enumerate() {
            if !token.is_filled() {
                continue;
            }
            if let Some(available) = ctx.balance_of(&token.address) {
                if token.amount > available {
                    issues.push(DraftIssue::InsufficientBalance {
                        index,
                        address: token.address.clone(),
                        available,
                    });
                }
            }
        }

        let earliest = now + Duration::seconds(MIN_EXPIRY_LEAD_SECS);
        if self.expiry < earliest {
            issues.push(DraftIssue::ExpiryTooSoon { earliest });
        }

        if let Some(current) = ctx.current_valuation.filter(|v| *v > Decimal::ZERO) {
            let min_change = current * MIN_TARGET_DISTANCE;
            if self.is_target_higher {
                let bound = current + min_change;
                if self.target_valuation <= bound {
                    issues.push(DraftIssue::TargetTooLow { bound });
                }
            } else {
                let bound = current - min_change;
                if self.target_valuation >= bound {
                    issues.push(DraftIssue::TargetTooHigh { bound });
                }
            }
        }

        issues
    }

    /// Converts the draft into raw contract arguments.
    ///
    /// `decimals` maps a lowercase token address to its ERC-20 decimals;
    /// unknown tokens default to 18. Returns `None` if any amount does
    /// not fit the chain's integer range.
    pub fn to_params(&self, decimals: &HashMap<String, u32>) -> Option<CreateDtfParams> {
        let mut tokens = Vec::new();
        let mut amounts = Vec::new();

        for token in self.filled_tokens() {
            let places = decimals
                .get(&token.address.to_ascii_lowercase())
                .copied()
                .unwrap_or(DEFAULT_TOKEN_DECIMALS);
            amounts.push(fixed_point::to_raw(token.amount, places, RoundingStrategy::ToZero)?);
            tokens.push(token.address.clone());
        }

        Some(CreateDtfParams {
            name: self.name.clone(),
            tokens,
            amounts,
            expiry: u64::try_from(self.expiry.timestamp()).ok()?,
            target_valuation: fixed_point::to_raw(
                self.target_valuation,
                fixed_point::VALUATION_DECIMALS,
                RoundingStrategy::ToZero,
            )?,
            is_target_higher: self.is_target_higher,
        })
    }
}

/// Decimals assumed for tokens missing from the registry.
pub const DEFAULT_TOKEN_DECIMALS: u32 = 18;

/// Raw arguments of `createDTF`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDtfParams {
    pub name: String,
    pub tokens: Vec<String>,
    pub amounts: Vec<u128>,
    /// Unix seconds.
    pub expiry: u64,
    /// Raw 18-decimal USD.
    pub target_valuation: u128,
    pub is_target_higher: bool,
}

/// Progress of a creation flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStage {
    Checking,
    Approving,
    Creating,
    /// `createDTF` is in the mempool, waiting for its receipt.
    Pending { tx_hash: String },
    Complete,
    Error,
}

impl std::fmt::Display for CreationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Checking => "checking",
            Self::Approving => "approving",
            Self::Creating => "creating",
            Self::Pending { .. } => "pending",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}
