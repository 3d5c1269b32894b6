//! Market model: sides, on-chain DTF records and immutable market snapshots.
//!
//! A `MarketSnapshot` is the single input to every estimator function.
//! It is built by the snapshot feed from independent chain reads and is
//! replaced wholesale on refresh, never mutated in place.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::fees::CREATION_BOND_USDC;
use super::fixed_point;

// ────────────────────────────────────────────
// Side
// ────────────────────────────────────────────

/// Outcome side of a DTF market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Pays out if the basket reaches its target valuation.
    Yes,
    /// Pays out if it does not.
    No,
}

impl Side {
    pub const fn is_yes(self) -> bool {
        matches!(self, Self::Yes)
    }

    pub const fn from_yes_won(yes_won: bool) -> Self {
        if yes_won { Self::Yes } else { Self::No }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" => Ok(Self::Yes),
            "no" | "false" => Ok(Self::No),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

// ────────────────────────────────────────────
// Snapshot data groups (raw on-chain integers)
// ────────────────────────────────────────────

/// Current per-share prices, raw 6-decimal USDC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharePrices {
    pub yes: u128,
    pub no: u128,
}

impl SharePrices {
    pub const fn raw(&self, side: Side) -> u128 {
        match side {
            Side::Yes => self.yes,
            Side::No => self.no,
        }
    }

    /// Price of one share of `side` in USDC.
    pub fn price(&self, side: Side) -> Decimal {
        fixed_point::usdc(self.raw(side))
    }
}

/// Pool balances and lifetime volume, raw 6-decimal USDC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_yes: u128,
    pub pool_no: u128,
    /// Includes the creator's bond.
    pub total_volume: u128,
}

impl PoolInfo {
    /// Combined YES + NO pool in USDC.
    pub fn current_pool(&self) -> Decimal {
        fixed_point::usdc(self.pool_yes.saturating_add(self.pool_no))
    }

    /// Volume excluding the creation bond, floored at zero.
    pub fn traded_volume(&self) -> Decimal {
        let volume = fixed_point::usdc(self.total_volume) - CREATION_BOND_USDC;
        volume.max(Decimal::ZERO)
    }
}

/// Outstanding share supply per side, raw 18-decimal counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShareSupply {
    pub yes: u128,
    pub no: u128,
}

impl ShareSupply {
    pub fn shares(&self, side: Side) -> Decimal {
        let raw = match side {
            Side::Yes => self.yes,
            Side::No => self.no,
        };
        fixed_point::shares(raw)
    }
}

// ────────────────────────────────────────────
// Lifecycle
// ────────────────────────────────────────────

/// Lifecycle state of a DTF market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Active,
    Expired,
    Settled,
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
            Self::Settled => write!(f, "settled"),
        }
    }
}

/// On-chain DTF record as returned by `dtfs(id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtfRecord {
    pub dtf_id: u64,
    /// Creator address, 0x-prefixed hex.
    pub creator: String,
    pub name: String,
    /// Expiry as unix seconds.
    pub expiry: i64,
    /// Target basket valuation, raw 18-decimal USD.
    pub target_valuation: u128,
    pub is_target_higher: bool,
    pub is_settled: bool,
    pub yes_won: bool,
    pub yes_token: String,
    pub no_token: String,
}

impl DtfRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry < now.timestamp()
    }

    pub fn status(&self, now: DateTime<Utc>) -> MarketStatus {
        if self.is_settled {
            MarketStatus::Settled
        } else if self.is_expired(now) {
            MarketStatus::Expired
        } else {
            MarketStatus::Active
        }
    }

    /// Settlement is open to anyone once expiry has passed.
    pub fn can_settle(&self, now: DateTime<Utc>) -> bool {
        self.is_expired(now) && !self.is_settled
    }

    pub const fn winning_side(&self) -> Option<Side> {
        if self.is_settled {
            Some(Side::from_yes_won(self.yes_won))
        } else {
            None
        }
    }

    pub fn is_creator(&self, address: &str) -> bool {
        self.creator.eq_ignore_ascii_case(address)
    }

    pub fn share_token(&self, side: Side) -> &str {
        match side {
            Side::Yes => &self.yes_token,
            Side::No => &self.no_token,
        }
    }

    pub fn target(&self) -> Decimal {
        fixed_point::from_raw(self.target_valuation, fixed_point::VALUATION_DECIMALS)
    }
}

// ────────────────────────────────────────────
// Snapshot
// ────────────────────────────────────────────

/// Immutable view of one market at a point in time.
///
/// Each data group is independently optional; `None` means the read
/// has not succeeded yet and estimator functions treat it as neutral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub dtf_id: u64,
    pub prices: Option<SharePrices>,
    pub pool: Option<PoolInfo>,
    pub supply: Option<ShareSupply>,
    pub is_settled: bool,
    pub is_expired: bool,
    pub winning_side: Option<Side>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Snapshot with nothing loaded yet.
    pub fn empty(dtf_id: u64, fetched_at: DateTime<Utc>) -> Self {
        Self {
            dtf_id,
            prices: None,
            pool: None,
            supply: None,
            is_settled: false,
            is_expired: false,
            winning_side: None,
            fetched_at,
        }
    }

    pub fn price(&self, side: Side) -> Option<Decimal> {
        self.prices.map(|p| p.price(side))
    }

    pub fn current_pool(&self) -> Option<Decimal> {
        self.pool.map(|p| p.current_pool())
    }

    pub fn existing_shares(&self, side: Side) -> Option<Decimal> {
        self.supply.map(|s| s.shares(side))
    }

    pub const fn status(&self) -> MarketStatus {
        if self.is_settled {
            MarketStatus::Settled
        } else if self.is_expired {
            MarketStatus::Expired
        } else {
            MarketStatus::Active
        }
    }

    pub const fn is_tradeable(&self) -> bool {
        matches!(self.status(), MarketStatus::Active)
    }
}

/// Distance of the current basket valuation from its target, in percent, capped at 100.
///
/// A ratio too large to represent is past the cap and reads as 100.
pub fn valuation_progress(current: Decimal, target: Decimal) -> Decimal {
    if target.is_zero() {
        return Decimal::ZERO;
    }
    current
        .checked_div(target)
        .and_then(|ratio| ratio.checked_sub(Decimal::ONE))
        .and_then(|delta| delta.abs().checked_mul(Decimal::ONE_HUNDRED))
        .map_or(Decimal::ONE_HUNDRED, |distance| distance.min(Decimal::ONE_HUNDRED))
}
