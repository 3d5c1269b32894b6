//! Sepolia RPC Provider - alloy-rs 0.9 Connection Management
//!
//! Validates RPC connectivity and chain id at startup and exposes a
//! shared read provider. When a private key is supplied, a second
//! provider with the recommended fillers and a local signer is built
//! for transaction submission.
//!
//! Both providers are stored as type-erased `dyn Provider` because the
//! builder's filler stack is a deeply nested generic type.

use std::str::FromStr;
use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::config::ChainConfig;

/// Signing half of the provider, present only with a private key.
struct Signer {
    address: Address,
    provider: Arc<dyn Provider<Http<Client>> + Send + Sync>,
}

/// Shared chain connection for all chain adapters.
pub struct ChainProvider {
    reader: Arc<dyn Provider<Http<Client>> + Send + Sync>,
    signer: Option<Signer>,
}

impl ChainProvider {
    /// Connect read-only and validate the chain id.
    #[instrument(skip_all, fields(chain_id = config.chain_id))]
    pub async fn connect(config: &ChainConfig) -> Result<Self> {
        let url = config.rpc_url.parse().context("Invalid RPC URL")?;
        let reader: Arc<dyn Provider<Http<Client>> + Send + Sync> = Arc::new(ProviderBuilder::new().on_http(url));

        let chain_id = reader
            .get_chain_id()
            .await
            .context("Failed to query chain ID")?;

        anyhow::ensure!(
            chain_id == config.chain_id,
            "Expected chain_id={}, RPC reports {chain_id}",
            config.chain_id
        );

        info!(chain_id, "Connected to RPC");

        Ok(Self {
            reader,
            signer: None,
        })
    }

    /// Connect with a local signer for transaction submission.
    ///
    /// The key is consumed here and never stored or logged.
    #[instrument(skip_all, fields(chain_id = config.chain_id))]
    pub async fn connect_with_key(config: &ChainConfig, private_key: &str) -> Result<Self> {
        let mut provider = Self::connect(config).await?;

        let signer = PrivateKeySigner::from_str(private_key.trim().trim_start_matches("0x"))
            .context("Invalid WALLET_PRIVATE_KEY")?;
        let address = signer.address();

        let url = config.rpc_url.parse().context("Invalid RPC URL")?;
        let signing = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(signer))
            .on_http(url);

        info!(wallet = %address, "Signing wallet loaded");

        provider.signer = Some(Signer {
            address,
            provider: Arc::new(signing),
        });
        Ok(provider)
    }

    /// Shared read provider.
    pub fn reader(&self) -> Arc<dyn Provider<Http<Client>> + Send + Sync> {
        Arc::clone(&self.reader)
    }

    /// Signing provider, if a key was configured.
    pub fn signer(&self) -> Option<Arc<dyn Provider<Http<Client>> + Send + Sync>> {
        self.signer.as_ref().map(|s| Arc::clone(&s.provider))
    }

    /// Address of the signing wallet, if any.
    pub fn wallet_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address)
    }

    /// Check if the RPC connection is healthy via a lightweight call.
    pub async fn is_healthy(&self) -> bool {
        self.reader.get_block_number().await.is_ok()
    }
}
