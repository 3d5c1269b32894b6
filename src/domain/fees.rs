//! DTF protocol fee model.
//!
//! The market contract charges a flat fee on every share purchase and
//! keeps the rest in the outcome pool. The rate here mirrors the contract
//! for display and payout estimation; the contract is authoritative.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Purchase fee charged by the DTF market contract (2.5%).
pub const PROTOCOL_FEE_RATE: Decimal = dec!(0.025);

/// Bond a creator locks when opening a DTF, raw 6-decimal USDC.
pub const CREATION_BOND_RAW: u128 = 50_000_000;

/// Same bond in USDC.
pub const CREATION_BOND_USDC: Decimal = dec!(50);

/// Fee calculator for share purchases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeCalculator {
    fee_rate: Decimal,
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::protocol()
    }
}

impl FeeCalculator {
    /// Creates a calculator with a custom rate (tests, forks of the contract).
    pub const fn new(fee_rate: Decimal) -> Self {
        Self { fee_rate }
    }

    /// Calculator using the deployed contract's rate.
    pub const fn protocol() -> Self {
        Self {
            fee_rate: PROTOCOL_FEE_RATE,
        }
    }

    pub const fn rate(&self) -> Decimal {
        self.fee_rate
    }

    /// Fee on a purchase of `base_cost` USDC.
    ///
    /// Non-positive costs carry no fee.
    pub fn fee(&self, base_cost: Decimal) -> Decimal {
        if base_cost <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        base_cost.saturating_mul(self.fee_rate)
    }

    /// Portion of `base_cost` that reaches the outcome pool.
    pub fn net_of_fee(&self, base_cost: Decimal) -> Decimal {
        if base_cost <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        base_cost.saturating_mul(Decimal::ONE - self.fee_rate)
    }
}
