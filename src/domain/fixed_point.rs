//! Fixed-point codec for on-chain amounts.
//!
//! USDC amounts travel as integers scaled by 10^6, share balances and
//! valuations as integers scaled by 10^18. Everything entering the
//! domain is converted to `Decimal` here so that no estimator path ever
//! goes through `f64`.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

/// USDC token decimals.
pub const USDC_DECIMALS: u32 = 6;

/// YES/NO share token decimals.
pub const SHARE_DECIMALS: u32 = 18;

/// Basket valuation decimals (oracle output and target valuation).
pub const VALUATION_DECIMALS: u32 = 18;

/// Largest scale a `Decimal` can carry.
const MAX_SCALE: u32 = 28;

/// Converts a raw on-chain integer with `decimals` places into a `Decimal`.
///
/// Mantissas wider than 96 bits drop their least significant digits
/// instead of failing, so huge share supplies lose sub-unit precision
/// only.
pub fn from_raw(raw: u128, decimals: u32) -> Decimal {
    let mut mantissa = raw;
    let mut scale = decimals;

    while scale > MAX_SCALE {
        mantissa /= 10;
        scale -= 1;
    }

    loop {
        let fitted = i128::try_from(mantissa)
            .ok()
            .and_then(|m| Decimal::try_from_i128_with_scale(m, scale).ok());

        match fitted {
            Some(value) => return value,
            None if scale > 0 => {
                mantissa /= 10;
                scale -= 1;
            }
            None => return Decimal::MAX,
        }
    }
}

/// Converts a non-negative `Decimal` into raw on-chain units.
///
/// Returns `None` for negative amounts or values that overflow `u128`.
pub fn to_raw(amount: Decimal, decimals: u32, strategy: RoundingStrategy) -> Option<u128> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return None;
    }
    // Rounded to `decimals` places the scale never exceeds `decimals`,
    // so the mantissa only needs widening, never dividing.
    let rounded = amount.round_dp_with_strategy(decimals, strategy);
    let mantissa = u128::try_from(rounded.mantissa()).ok()?;
    let shift = decimals.checked_sub(rounded.scale())?;
    mantissa.checked_mul(10u128.checked_pow(shift)?)
}

/// Raw 6-decimal USDC → dollars.
pub fn usdc(raw: u128) -> Decimal {
    from_raw(raw, USDC_DECIMALS)
}

/// Raw 18-decimal share count → shares.
pub fn shares(raw: u128) -> Decimal {
    from_raw(raw, SHARE_DECIMALS)
}

/// Dollars → raw USDC, rounded up so an approval always covers the cost.
pub fn usdc_units_ceil(amount: Decimal) -> Option<u128> {
    to_raw(amount, USDC_DECIMALS, RoundingStrategy::AwayFromZero)
}

/// Shares → raw 18-decimal units, truncating excess precision.
pub fn share_units(amount: Decimal) -> Option<u128> {
    to_raw(amount, SHARE_DECIMALS, RoundingStrategy::ToZero)
}

/// Parses a user-typed quantity the way a numeric input field reads it.
///
/// Empty, partial, non-numeric, zero and negative input all read as
/// zero: the estimator is called on every keystroke and must never fail.
pub fn parse_quantity(input: &str) -> Decimal {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Decimal::ZERO;
    }

    let parsed = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .unwrap_or(Decimal::ZERO);

    if parsed.is_sign_positive() {
        parsed
    } else {
        Decimal::ZERO
    }
}
