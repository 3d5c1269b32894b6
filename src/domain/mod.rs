//! Domain layer - share pricing, market model and trading rules.
//!
//! Pure and synchronous: no I/O, no async, no chain types. Raw on-chain
//! integers enter through `fixed_point` and all arithmetic is `Decimal`.

pub mod allowance;
pub mod creation;
pub mod estimator;
pub mod fees;
pub mod fixed_point;
pub mod market;
pub mod trade;

pub use allowance::SpendGate;
pub use creation::{CreateDtfParams, CreationStage, DraftContext, DraftIssue, DraftToken, DtfDraft};
pub use estimator::{PayoutRule, PurchaseQuote, PurchaseRequest, ShareCostEstimator};
pub use fees::FeeCalculator;
pub use market::{
    DtfRecord, MarketSnapshot, MarketStatus, PoolInfo, SharePrices, ShareSupply, Side,
};
pub use trade::{CreatorTotals, DtfFees, TradeStatus, TradeSummary, UserTrade};
