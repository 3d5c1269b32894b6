//! Chain Adapters - Sepolia Interaction Layer
//!
//! Provides on-chain access via alloy-rs 0.9 for:
//! - RPC provider management with chain id validation
//! - DTFMarket reads and writes (prices, pools, buy, settle, claim, create)
//! - Basket valuation through the price oracle
//! - ERC-20 balances, supplies, allowances and approvals

pub mod abi;
pub mod contracts;
pub mod provider;

pub use contracts::{ContractAddresses, DtfContracts};
pub use provider::ChainProvider;
