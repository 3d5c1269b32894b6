//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. The signing key
//! never lives here: it is read from `WALLET_PRIVATE_KEY` (optionally via
//! a `.env` file). Contract and token addresses are always externalized
//! here - nothing is hardcoded in the adapters.

pub mod loader;

use std::collections::HashMap;

use serde::Deserialize;

use crate::domain::creation::DEFAULT_TOKEN_DECIMALS;
use crate::domain::estimator::PayoutRule;

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and behaviour.
  pub app: AppSection,
  /// Chain connection and contract addresses.
  pub chain: ChainConfig,
  /// Known ERC-20 tokens (basket constituents and USDC).
  #[serde(default)]
  pub tokens: Vec<TokenConfig>,
  /// Trade indexer backend.
  pub indexer: IndexerConfig,
  /// Share cost estimator settings.
  #[serde(default)]
  pub estimator: EstimatorConfig,
  /// Market snapshot refresh.
  #[serde(default)]
  pub markets: MarketsConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

impl AppConfig {
  /// Token decimals keyed by lowercase address, for draft conversion.
  pub fn token_decimals(&self) -> HashMap<String, u32> {
    self
      .tokens
      .iter()
      .map(|t| (t.address.to_ascii_lowercase(), t.decimals))
      .collect()
  }

  /// Decimals of a token, defaulting to 18 for unknown addresses.
  pub fn decimals_of(&self, address: &str) -> u32 {
    self
      .tokens
      .iter()
      .find(|t| t.address.eq_ignore_ascii_case(address))
      .map_or(DEFAULT_TOKEN_DECIMALS, |t| t.decimals)
  }
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Address whose portfolio is tracked when no signing key is present.
  #[serde(default)]
  pub watch_address: Option<String>,
  /// Settle expired watched markets automatically (needs a signing key).
  #[serde(default)]
  pub auto_settle: bool,
  /// Interval between portfolio refreshes (seconds).
  #[serde(default = "default_portfolio_interval")]
  pub portfolio_interval_seconds: u64,
}

/// Chain connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
  /// JSON-RPC endpoint.
  pub rpc_url: String,
  /// Expected chain id (Sepolia = 11155111).
  #[serde(default = "default_chain_id")]
  pub chain_id: u64,
  /// DTFMarket contract.
  pub market_address: String,
  /// DTFPriceOracle contract.
  pub price_oracle_address: String,
  /// USDC token (payment and creation bond).
  pub usdc_address: String,
  /// How long to wait for a receipt before reporting a timeout (seconds).
  #[serde(default = "default_confirmation_timeout")]
  pub confirmation_timeout_seconds: u64,
}

/// A known ERC-20 token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
  /// Ticker symbol.
  pub symbol: String,
  /// Contract address.
  pub address: String,
  /// ERC-20 decimals.
  #[serde(default = "default_token_decimals")]
  pub decimals: u32,
}

/// Indexer backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
  /// Base URL, e.g. `http://localhost:3001`.
  pub base_url: String,
  /// Request timeout in seconds.
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
  /// Maximum requests per second.
  #[serde(default = "default_requests_per_second")]
  pub requests_per_second: u32,
  /// Retries for GET requests (POSTs are never retried).
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Delay before reconnecting a dropped event stream (seconds).
  #[serde(default = "default_reconnect")]
  pub reconnect_seconds: u64,
}

/// Share cost estimator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EstimatorConfig {
  /// Payout estimation rule.
  #[serde(default)]
  pub payout_rule: PayoutRule,
}

/// Market snapshot refresh configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketsConfig {
  /// DTF ids to keep fresh. Empty means every existing DTF.
  #[serde(default)]
  pub watch: Vec<u64>,
  /// Snapshot refresh interval (seconds).
  #[serde(default = "default_refresh_interval")]
  pub refresh_interval_seconds: u64,
}

impl Default for MarketsConfig {
  fn default() -> Self {
    Self {
      watch: Vec::new(),
      refresh_interval_seconds: default_refresh_interval(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health and quote endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_portfolio_interval() -> u64 {
  30
}

fn default_chain_id() -> u64 {
  11_155_111
}

fn default_confirmation_timeout() -> u64 {
  120
}

fn default_token_decimals() -> u32 {
  DEFAULT_TOKEN_DECIMALS
}

fn default_timeout() -> u64 {
  10
}

fn default_requests_per_second() -> u32 {
  10
}

fn default_max_retries() -> u32 {
  3
}

fn default_reconnect() -> u64 {
  5
}

fn default_refresh_interval() -> u64 {
  3
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
