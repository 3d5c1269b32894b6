//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (blockchain RPC, HTTP, server-sent events).
//! Each sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `chain`: DTFMarket, price oracle and ERC-20 access via alloy-rs
//! - `indexer`: Trade indexer REST client and event stream
//! - `metrics`: Prometheus metrics export, health checks and quotes

pub mod chain;
pub mod indexer;
pub mod metrics;
