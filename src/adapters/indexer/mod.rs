//! Indexer Adapters - Trade History and Event Stream
//!
//! REST client for the trade-indexing backend (trade history, fee
//! aggregates, claim notifications) and the SSE listener that turns its
//! event stream into `IndexerEvent`s.

pub mod client;
pub mod events;
pub mod types;

pub use client::{IndexerClient, IndexerClientConfig};
pub use events::IndexerEventListener;
