//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `ChainReader` / `ChainWriter`: DTFMarket contract and ERC-20 access
//! - `TradeIndex`: trade history, fee aggregates and events from the indexer

pub mod chain_client;
pub mod trade_index;

pub use chain_client::{ChainReader, ChainWriter, LockedToken, TxReceipt};
pub use trade_index::{IndexerEvent, TradeIndex};
