//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    chain_id = config.chain.chain_id,
    tokens = config.tokens.len(),
    watched_markets = config.markets.watch.len(),
    payout_rule = ?config.estimator.payout_rule,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Whether `value` looks like a 0x-prefixed 20-byte hex address.
pub fn is_hex_address(value: &str) -> bool {
  value
    .strip_prefix("0x")
    .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(!config.app.name.is_empty(), "app.name must not be empty");

  if let Some(addr) = &config.app.watch_address {
    anyhow::ensure!(is_hex_address(addr), "app.watch_address is not an address: {addr}");
  }
  anyhow::ensure!(
    config.app.portfolio_interval_seconds > 0,
    "app.portfolio_interval_seconds must be positive"
  );

  // Chain validation
  anyhow::ensure!(!config.chain.rpc_url.is_empty(), "chain.rpc_url must not be empty");
  for (field, addr) in [
    ("market_address", &config.chain.market_address),
    ("price_oracle_address", &config.chain.price_oracle_address),
    ("usdc_address", &config.chain.usdc_address),
  ] {
    anyhow::ensure!(is_hex_address(addr), "chain.{field} is not an address: {addr}");
  }
  anyhow::ensure!(
    config.chain.confirmation_timeout_seconds > 0,
    "chain.confirmation_timeout_seconds must be positive"
  );

  // Token validation
  for (i, token) in config.tokens.iter().enumerate() {
    anyhow::ensure!(
      is_hex_address(&token.address),
      "Token {} ({}) has invalid address {}",
      i,
      token.symbol,
      token.address
    );
    anyhow::ensure!(
      token.decimals <= 28,
      "Token {} ({}) decimals must be at most 28, got {}",
      i,
      token.symbol,
      token.decimals
    );
  }
  if let Some(usdc) = config
    .tokens
    .iter()
    .find(|t| t.address.eq_ignore_ascii_case(&config.chain.usdc_address))
  {
    anyhow::ensure!(usdc.decimals == 6, "USDC token must have 6 decimals, got {}", usdc.decimals);
  }

  // Indexer validation
  anyhow::ensure!(
    config.indexer.base_url.starts_with("http://") || config.indexer.base_url.starts_with("https://"),
    "indexer.base_url must be an http(s) URL, got {}",
    config.indexer.base_url
  );
  anyhow::ensure!(
    config.indexer.requests_per_second > 0,
    "indexer.requests_per_second must be positive"
  );
  anyhow::ensure!(config.indexer.timeout_seconds > 0, "indexer.timeout_seconds must be positive");

  // Markets validation
  anyhow::ensure!(
    config.markets.refresh_interval_seconds > 0,
    "markets.refresh_interval_seconds must be positive"
  );

  Ok(())
}
