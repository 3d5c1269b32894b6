//! Share cost estimator.
//!
//! Given an immutable `MarketSnapshot` and a side/quantity, computes what
//! a purchase costs, what the protocol fee is, what the position would
//! pay out if the side wins, and how far the purchase moves the pool.
//!
//! Every function here is total: invalid quantities and snapshot data
//! that has not loaded yet produce zero rather than an error, because the
//! estimator runs on every keystroke of the quantity input. Results too
//! large for `Decimal` saturate at `Decimal::MAX`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::fees::FeeCalculator;
use super::fixed_point;
use super::market::{MarketSnapshot, Side};

/// Price impact above which a quote is flagged (percent of pool).
pub const HIGH_IMPACT_THRESHOLD_PCT: Decimal = dec!(5);

/// How a winning position's payout is estimated.
///
/// The two rules are never blended; exactly one is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutRule {
    /// Winners split the combined pool pro rata to shares held.
    #[default]
    ProRataPool,
    /// Each winning share redeems for exactly 1 USDC.
    FlatPerShare,
}

/// A side and quantity the user intends to buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub side: Side,
    /// Share count, possibly fractional. Zero when the input was not a positive number.
    pub quantity: Decimal,
}

impl PurchaseRequest {
    pub fn new(side: Side, quantity: Decimal) -> Self {
        Self {
            side,
            quantity: quantity.max(Decimal::ZERO),
        }
    }

    /// Builds a request from raw text input.
    pub fn from_input(side: Side, input: &str) -> Self {
        Self {
            side,
            quantity: fixed_point::parse_quantity(input),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.quantity > Decimal::ZERO
    }
}

/// Every figure shown to the user before a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseQuote {
    pub dtf_id: u64,
    pub side: Side,
    pub quantity: Decimal,
    pub cost: Decimal,
    pub fee: Decimal,
    pub potential_payout: Decimal,
    pub estimated_profit: Decimal,
    pub price_impact_pct: Decimal,
    pub high_impact: bool,
    pub payout_rule: PayoutRule,
}

/// The single authoritative share cost estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShareCostEstimator {
    fees: FeeCalculator,
    payout_rule: PayoutRule,
}

impl ShareCostEstimator {
    pub const fn new(fees: FeeCalculator, payout_rule: PayoutRule) -> Self {
        Self { fees, payout_rule }
    }

    pub const fn with_rule(payout_rule: PayoutRule) -> Self {
        Self {
            fees: FeeCalculator::protocol(),
            payout_rule,
        }
    }

    pub const fn payout_rule(&self) -> PayoutRule {
        self.payout_rule
    }

    pub const fn fees(&self) -> &FeeCalculator {
        &self.fees
    }

    /// Base cost in USDC: `quantity × price(side)`.
    pub fn compute_cost(&self, snapshot: &MarketSnapshot, side: Side, quantity: Decimal) -> Decimal {
        if quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        snapshot
            .price(side)
            .map_or(Decimal::ZERO, |price| quantity.saturating_mul(price))
    }

    /// Protocol fee on a base cost.
    pub fn compute_fee(&self, base_cost: Decimal) -> Decimal {
        self.fees.fee(base_cost)
    }

    /// What the position pays if `side` wins, under the configured rule.
    pub fn compute_potential_payout(
        &self,
        snapshot: &MarketSnapshot,
        side: Side,
        quantity: Decimal,
    ) -> Decimal {
        if quantity <= Decimal::ZERO || snapshot.prices.is_none() {
            return Decimal::ZERO;
        }

        match self.payout_rule {
            PayoutRule::FlatPerShare => quantity,
            PayoutRule::ProRataPool => self.pro_rata_payout(snapshot, side, quantity),
        }
    }

    fn pro_rata_payout(&self, snapshot: &MarketSnapshot, side: Side, quantity: Decimal) -> Decimal {
        let (Some(existing), Some(current_pool)) =
            (snapshot.existing_shares(side), snapshot.current_pool())
        else {
            return Decimal::ZERO;
        };

        let cost = self.compute_cost(snapshot, side, quantity);
        let pool_after = current_pool.saturating_add(self.fees.net_of_fee(cost));

        if existing.is_zero() {
            return pool_after;
        }

        let total_shares = existing.saturating_add(quantity);

        // Multiply before dividing to keep exact results for whole-number inputs;
        // the share fraction is at most 1, so dividing first cannot overflow.
        match quantity.checked_mul(pool_after) {
            Some(numerator) => numerator.checked_div(total_shares),
            None => quantity
                .checked_div(total_shares)
                .map(|fraction| fraction.saturating_mul(pool_after)),
        }
        .unwrap_or(Decimal::ZERO)
    }

    /// `payout − cost`, positive or negative.
    pub fn compute_estimated_profit(
        &self,
        snapshot: &MarketSnapshot,
        side: Side,
        quantity: Decimal,
    ) -> Decimal {
        self.compute_potential_payout(snapshot, side, quantity)
            .saturating_sub(self.compute_cost(snapshot, side, quantity))
    }

    /// Cost as a percentage of the current pool. Display only.
    pub fn compute_price_impact(
        &self,
        snapshot: &MarketSnapshot,
        side: Side,
        quantity: Decimal,
    ) -> Decimal {
        let Some(current_pool) = snapshot.current_pool() else {
            return Decimal::ZERO;
        };
        if current_pool <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        // The pool is positive here, so a failed division means the ratio overflowed.
        let cost = self.compute_cost(snapshot, side, quantity);
        cost.checked_div(current_pool)
            .map_or(Decimal::MAX, |ratio| ratio.saturating_mul(Decimal::ONE_HUNDRED))
    }

    /// All purchase figures at once.
    pub fn quote(&self, snapshot: &MarketSnapshot, request: &PurchaseRequest) -> PurchaseQuote {
        let PurchaseRequest { side, quantity } = *request;
        let cost = self.compute_cost(snapshot, side, quantity);
        let potential_payout = self.compute_potential_payout(snapshot, side, quantity);
        let price_impact_pct = self.compute_price_impact(snapshot, side, quantity);

        PurchaseQuote {
            dtf_id: snapshot.dtf_id,
            side,
            quantity,
            cost,
            fee: self.compute_fee(cost),
            potential_payout,
            estimated_profit: potential_payout.saturating_sub(cost),
            price_impact_pct,
            high_impact: price_impact_pct > HIGH_IMPACT_THRESHOLD_PCT,
            payout_rule: self.payout_rule,
        }
    }
}
