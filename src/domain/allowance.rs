//! Spend gate: whether the current USDC allowance covers a purchase.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::fixed_point;

/// Whether the market contract may pull enough USDC for the purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendGate {
    NeedsApproval,
    Ready,
}

impl SpendGate {
    /// Evaluates the gate for `cost` USDC against a raw 6-decimal allowance.
    ///
    /// A zero cost is never `Ready`: there is nothing to buy.
    pub fn evaluate(allowance_raw: u128, cost: Decimal) -> Self {
        match required_allowance(cost) {
            Some(required) if required > 0 && allowance_raw >= required => Self::Ready,
            _ => Self::NeedsApproval,
        }
    }

    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Raw USDC units an approval must grant to cover `cost`, rounded up.
pub fn required_allowance(cost: Decimal) -> Option<u128> {
    fixed_point::usdc_units_ceil(cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_allowance_below_cost_needs_approval() {
        assert_eq!(SpendGate::evaluate(40_000_000, dec!(50)), SpendGate::NeedsApproval);
    }

    #[test]
    fn test_allowance_above_cost_is_ready() {
        assert_eq!(SpendGate::evaluate(60_000_000, dec!(50)), SpendGate::Ready);
    }

    #[test]
    fn test_exact_allowance_is_ready() {
        assert!(SpendGate::evaluate(50_000_000, dec!(50)).is_ready());
    }

    #[test]
    fn test_sub_unit_cost_rounds_up() {
        // 0.0000015 USDC needs 2 raw units
        assert_eq!(required_allowance(dec!(0.0000015)), Some(2));
        assert_eq!(SpendGate::evaluate(1, dec!(0.0000015)), SpendGate::NeedsApproval);
        assert_eq!(SpendGate::evaluate(2, dec!(0.0000015)), SpendGate::Ready);
    }

    #[test]
    fn test_zero_cost_never_ready() {
        assert_eq!(SpendGate::evaluate(u128::MAX, Decimal::ZERO), SpendGate::NeedsApproval);
        assert_eq!(SpendGate::evaluate(u128::MAX, dec!(-1)), SpendGate::NeedsApproval);
    }
}
