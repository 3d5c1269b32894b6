//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the trader's workflows. Each use case is a self-contained
//! business operation.
//!
//! Use cases:
//! - `SnapshotFeed`: Per-market producer publishing immutable snapshots
//! - `MarketRegistry`: Starts feeds, including for newly created markets
//! - `PurchaseFlow`: Quote, spend gate, approval and share purchase
//! - `MarketLifecycle`: Settle, claim and withdraw
//! - `DtfCreator`: Draft validation, approvals and market creation
//! - `PortfolioTracker`: Position summary and creator earnings

pub mod creation;
pub mod portfolio;
pub mod purchase;
pub mod settlement;
pub mod snapshot_feed;

pub use creation::{CreationOutcome, DtfCreator};
pub use portfolio::{Portfolio, PortfolioTracker};
pub use purchase::PurchaseFlow;
pub use settlement::{MarketLifecycle, SettlementReport, Withdrawal};
pub use snapshot_feed::{MarketOverview, MarketRegistry, MarketState, SnapshotBoard, SnapshotFeed};
