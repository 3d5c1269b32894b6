//! Trade history as reported by the indexer, and portfolio aggregates.
//!
//! The indexer renders some numeric fields as display strings (`roi` is
//! `"+$5.00"` / `"-$3.50"`); they are kept verbatim and parsed only when
//! aggregated.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use super::market::Side;

/// Settlement status of the market a trade belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Settled,
    /// Anything the indexer reports that is not `Settled`.
    #[serde(other)]
    Active,
}

/// Market outcome embedded in each trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeOutcome {
    #[serde(default)]
    pub yes_won: bool,
}

/// One of the user's positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTrade {
    pub dtf_id: u64,
    #[serde(default)]
    pub dtf_name: String,
    pub position: Side,
    #[serde(default, deserialize_with = "string_or_number")]
    pub shares: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub average_entry_price: String,
    #[serde(default)]
    pub roi: String,
    pub status: TradeStatus,
    #[serde(default)]
    pub claimed: bool,
    #[serde(default)]
    pub dtf: TradeOutcome,
}

impl UserTrade {
    pub fn is_settled(&self) -> bool {
        self.status == TradeStatus::Settled
    }

    pub fn is_winning(&self) -> bool {
        self.is_settled() && self.position == Side::from_yes_won(self.dtf.yes_won)
    }

    pub fn is_losing(&self) -> bool {
        self.is_settled() && !self.is_winning()
    }

    /// Settled on the winning side and not yet claimed.
    pub fn is_claimable(&self) -> bool {
        self.is_winning() && !self.claimed
    }

    pub fn roi_value(&self) -> Decimal {
        parse_roi(&self.roi)
    }
}

/// Parses a display ROI such as `"+$5.00"` into a signed decimal.
///
/// Everything except digits, `-` and `.` is discarded, then the longest
/// numeric prefix is read. Unparsable input is zero.
pub fn parse_roi(display: &str) -> Decimal {
    let kept: String = display
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect();

    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in kept.char_indices() {
        match c {
            '-' if i == 0 => {}
            '.' if !seen_dot => seen_dot = true,
            c if c.is_ascii_digit() => {}
            _ => break,
        }
        end = i + 1;
    }

    kept[..end]
        .trim_end_matches('.')
        .parse::<Decimal>()
        .unwrap_or(Decimal::ZERO)
}

/// Counts and ROI across a user's trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TradeSummary {
    pub winning: usize,
    pub losing: usize,
    pub active: usize,
    pub claimable: usize,
    /// Sum of ROI over settled trades only.
    pub total_roi: Decimal,
}

impl TradeSummary {
    pub fn from_trades(trades: &[UserTrade]) -> Self {
        trades.iter().fold(Self::default(), |mut acc, trade| {
            if trade.is_settled() {
                if trade.is_winning() {
                    acc.winning += 1;
                } else {
                    acc.losing += 1;
                }
                if trade.is_claimable() {
                    acc.claimable += 1;
                }
                acc.total_roi += trade.roi_value();
            } else {
                acc.active += 1;
            }
            acc
        })
    }
}

/// Fee and volume aggregates for one DTF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtfFees {
    #[serde(default)]
    pub creator_fees: Decimal,
    #[serde(default)]
    pub total_volume: Decimal,
}

/// Totals over all DTFs a creator opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreatorTotals {
    pub dtf_count: usize,
    pub total_fees: Decimal,
    pub total_volume: Decimal,
}

impl CreatorTotals {
    /// Folds per-DTF results; a failed fetch (`None`) counts as zero.
    pub fn from_fees<I>(fees: I) -> Self
    where
        I: IntoIterator<Item = Option<DtfFees>>,
    {
        fees.into_iter().fold(Self::default(), |mut acc, entry| {
            let entry = entry.unwrap_or_default();
            acc.dtf_count += 1;
            acc.total_fees += entry.creator_fees;
            acc.total_volume += entry.total_volume;
            acc
        })
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
        Null(()),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
        Raw::Null(()) => String::new(),
    })
}
