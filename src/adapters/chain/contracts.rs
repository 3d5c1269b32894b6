//! DTF Contract Interactions
//!
//! Implements the `ChainReader` and `ChainWriter` ports against the
//! DTFMarket contract, the basket price oracle and ERC-20 tokens.
//! Contract addresses come from `config.toml` and are validated
//! on-chain at startup.
//!
//! Writes submit exactly one transaction and poll for its receipt with a
//! bounded timeout. Nothing is resubmitted on failure.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::config::ChainConfig;
use crate::domain::creation::CreateDtfParams;
use crate::domain::market::{DtfRecord, PoolInfo, SharePrices, Side};
use crate::error::TxError;
use crate::ports::chain_client::{ChainReader, ChainWriter, LockedToken, TxReceipt};

use super::abi::{IDTFMarket, IDTFPriceOracle, IERC20};
use super::provider::ChainProvider;

/// Interval between receipt lookups while a transaction is pending.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Addresses of the contracts this client talks to.
#[derive(Debug, Clone, Copy)]
pub struct ContractAddresses {
    pub market: Address,
    pub price_oracle: Address,
    pub usdc: Address,
}

impl ContractAddresses {
    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        Ok(Self {
            market: parse_address(&config.market_address).context("chain.market_address")?,
            price_oracle: parse_address(&config.price_oracle_address)
                .context("chain.price_oracle_address")?,
            usdc: parse_address(&config.usdc_address).context("chain.usdc_address")?,
        })
    }
}

/// alloy-backed client for the DTF contracts.
pub struct DtfContracts {
    provider: Arc<ChainProvider>,
    addresses: ContractAddresses,
    confirmation_timeout: Duration,
}

impl DtfContracts {
    /// Create and validate contract bindings.
    ///
    /// Each configured address must have deployed code.
    #[instrument(skip_all)]
    pub async fn new(
        provider: Arc<ChainProvider>,
        addresses: ContractAddresses,
        confirmation_timeout: Duration,
    ) -> Result<Self> {
        let inner = provider.reader();

        for (name, addr) in [
            ("DTFMarket", addresses.market),
            ("DTFPriceOracle", addresses.price_oracle),
            ("USDC", addresses.usdc),
        ] {
            let code = inner
                .get_code_at(addr)
                .await
                .with_context(|| format!("Failed to query code for {name}"))?;

            if code.is_empty() {
                bail!("Contract {name} at {addr} has no deployed code, check config.toml");
            }

            info!(contract = name, address = %addr, "Validated on-chain");
        }

        Ok(Self {
            provider,
            addresses,
            confirmation_timeout,
        })
    }

    pub const fn addresses(&self) -> &ContractAddresses {
        &self.addresses
    }

    async fn view<C: SolCall + Send + Sync>(&self, to: Address, call: C) -> Result<C::Return> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(Bytes::from(call.abi_encode()).into());

        let output = self
            .provider
            .reader()
            .call(&tx)
            .await
            .with_context(|| format!("eth_call {} failed", C::SIGNATURE))?;

        C::abi_decode_returns(&output, true)
            .with_context(|| format!("Failed to decode {} output", C::SIGNATURE))
    }

    /// Send one transaction and return its hash without waiting.
    async fn send<C: SolCall + Send + Sync>(&self, to: Address, call: C) -> Result<String, TxError> {
        let signer = self
            .provider
            .signer()
            .ok_or_else(|| TxError::Rejected("no signing wallet configured".to_string()))?;

        let tx = TransactionRequest::default()
            .to(to)
            .input(Bytes::from(call.abi_encode()).into());

        let pending = signer
            .send_transaction(tx)
            .await
            .map_err(|e| classify_submit_error(&e.to_string()))?;

        let tx_hash = pending.tx_hash().to_string();
        info!(%tx_hash, call = C::SIGNATURE, "Transaction submitted");
        Ok(tx_hash)
    }

    async fn submit<C: SolCall + Send + Sync>(&self, to: Address, call: C) -> Result<TxReceipt, TxError> {
        let tx_hash = self.send(to, call).await?;
        self.wait_for_receipt(&tx_hash).await
    }

    /// Poll for the receipt of `tx_hash` until the confirmation timeout.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, TxError> {
        let hash = tx_hash
            .parse::<TxHash>()
            .map_err(|e| TxError::InvalidRequest(format!("bad transaction hash {tx_hash}: {e}")))?;
        let reader = self.provider.reader();

        let poll = async {
            let mut ticker = tokio::time::interval(RECEIPT_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                match reader.get_transaction_receipt(hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {}
                    Err(e) => return Err(TxError::Network(e.to_string())),
                }
            }
        };

        let receipt = tokio::time::timeout(self.confirmation_timeout, poll)
            .await
            .map_err(|_| TxError::Timeout {
                tx_hash: tx_hash.to_string(),
            })??;

        if !receipt.status() {
            warn!(%tx_hash, "Transaction reverted");
            return Err(TxError::Reverted {
                tx_hash: tx_hash.to_string(),
            });
        }

        info!(%tx_hash, block = ?receipt.block_number, "Transaction confirmed");

        Ok(TxReceipt {
            tx_hash: tx_hash.to_string(),
            block_number: receipt.block_number,
            gas_used: u128::from(receipt.gas_used),
        })
    }
}

#[async_trait]
impl ChainReader for DtfContracts {
    #[instrument(skip(self))]
    async fn next_dtf_id(&self) -> Result<u64> {
        let out = self.view(self.addresses.market, IDTFMarket::nextDtfIdCall {}).await?;
        u64::try_from(out._0).ok().context("nextDtfId exceeds u64")
    }

    #[instrument(skip(self))]
    async fn dtf(&self, dtf_id: u64) -> Result<DtfRecord> {
        let out = self
            .view(
                self.addresses.market,
                IDTFMarket::dtfsCall {
                    dtfId: U256::from(dtf_id),
                },
            )
            .await?;

        Ok(DtfRecord {
            dtf_id,
            creator: out._0.to_string(),
            name: out._1,
            expiry: i64::try_from(out._2).unwrap_or(i64::MAX),
            target_valuation: to_u128(out._3),
            is_target_higher: out._4,
            is_settled: out._5,
            yes_won: out._6,
            yes_token: out._7.to_string(),
            no_token: out._8.to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn share_prices(&self, dtf_id: u64) -> Result<SharePrices> {
        let out = self
            .view(
                self.addresses.market,
                IDTFMarket::getSharePricesCall {
                    dtfId: U256::from(dtf_id),
                },
            )
            .await?;

        Ok(SharePrices {
            yes: to_u128(out.yesPrice),
            no: to_u128(out.noPrice),
        })
    }

    #[instrument(skip(self))]
    async fn pool_info(&self, dtf_id: u64) -> Result<PoolInfo> {
        let out = self
            .view(
                self.addresses.market,
                IDTFMarket::getDTFPoolInfoCall {
                    dtfId: U256::from(dtf_id),
                },
            )
            .await?;

        Ok(PoolInfo {
            pool_yes: to_u128(out.poolYes),
            pool_no: to_u128(out.poolNo),
            total_volume: to_u128(out.totalVolume),
        })
    }

    #[instrument(skip(self))]
    async fn current_valuation(&self, dtf_id: u64) -> Result<u128> {
        let out = self
            .view(
                self.addresses.market,
                IDTFMarket::getCurrentValuationCall {
                    dtfId: U256::from(dtf_id),
                },
            )
            .await?;
        Ok(to_u128(out.valuation))
    }

    #[instrument(skip(self))]
    async fn locked_tokens(&self, dtf_id: u64) -> Result<Vec<LockedToken>> {
        let out = self
            .view(
                self.addresses.market,
                IDTFMarket::getDTFLockedTokensCall {
                    dtfId: U256::from(dtf_id),
                },
            )
            .await?;

        if out.tokens.len() != out.amounts.len() {
            bail!(
                "getDTFLockedTokens returned {} tokens but {} amounts",
                out.tokens.len(),
                out.amounts.len()
            );
        }

        Ok(out
            .tokens
            .into_iter()
            .zip(out.amounts)
            .map(|(token, amount)| LockedToken {
                token: token.to_string(),
                amount_raw: to_u128(amount),
            })
            .collect())
    }

    #[instrument(skip(self, amounts), fields(tokens = tokens.len()))]
    async fn basket_valuation(&self, tokens: &[String], amounts: &[u128]) -> Result<u128> {
        let tokens = tokens
            .iter()
            .map(|t| parse_address(t))
            .collect::<Result<Vec<_>>>()?;
        let amounts = amounts.iter().map(|a| U256::from(*a)).collect();

        let out = self
            .view(
                self.addresses.price_oracle,
                IDTFPriceOracle::calculateValuationCall { tokens, amounts },
            )
            .await?;
        Ok(to_u128(out.valuation))
    }

    #[instrument(skip(self))]
    async fn total_supply(&self, token: &str) -> Result<u128> {
        let out = self.view(parse_address(token)?, IERC20::totalSupplyCall {}).await?;
        Ok(to_u128(out._0))
    }

    #[instrument(skip(self))]
    async fn balance_of(&self, token: &str, owner: &str) -> Result<u128> {
        let out = self
            .view(
                parse_address(token)?,
                IERC20::balanceOfCall {
                    account: parse_address(owner)?,
                },
            )
            .await?;
        Ok(to_u128(out._0))
    }

    #[instrument(skip(self))]
    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> Result<u128> {
        let out = self
            .view(
                parse_address(token)?,
                IERC20::allowanceCall {
                    owner: parse_address(owner)?,
                    spender: parse_address(spender)?,
                },
            )
            .await?;
        Ok(to_u128(out._0))
    }

    async fn is_healthy(&self) -> bool {
        self.provider.is_healthy().await
    }
}

#[async_trait]
impl ChainWriter for DtfContracts {
    fn wallet_address(&self) -> String {
        self.provider
            .wallet_address()
            .map(|a| a.to_string())
            .unwrap_or_default()
    }

    #[instrument(skip(self))]
    async fn approve(&self, token: &str, spender: &str, amount_raw: u128) -> Result<TxReceipt, TxError> {
        let token = parse_address(token).map_err(|e| TxError::InvalidRequest(e.to_string()))?;
        let spender = parse_address(spender).map_err(|e| TxError::InvalidRequest(e.to_string()))?;
        self.submit(
            token,
            IERC20::approveCall {
                spender,
                amount: U256::from(amount_raw),
            },
        )
        .await
    }

    #[instrument(skip(self, side), fields(side = %side))]
    async fn buy_shares(&self, dtf_id: u64, side: Side, shares_raw: u128) -> Result<TxReceipt, TxError> {
        self.submit(
            self.addresses.market,
            IDTFMarket::buySharesCall {
                dtfId: U256::from(dtf_id),
                isYes: side.is_yes(),
                amount: U256::from(shares_raw),
            },
        )
        .await
    }

    #[instrument(skip(self))]
    async fn settle(&self, dtf_id: u64) -> Result<TxReceipt, TxError> {
        self.submit(
            self.addresses.market,
            IDTFMarket::settleDTFCall {
                dtfId: U256::from(dtf_id),
            },
        )
        .await
    }

    #[instrument(skip(self))]
    async fn claim_winnings(&self, dtf_id: u64) -> Result<TxReceipt, TxError> {
        self.submit(
            self.addresses.market,
            IDTFMarket::claimWinningsCall {
                dtfId: U256::from(dtf_id),
            },
        )
        .await
    }

    #[instrument(skip(self))]
    async fn withdraw_tokens(&self, dtf_id: u64) -> Result<TxReceipt, TxError> {
        self.submit(
            self.addresses.market,
            IDTFMarket::withdrawTokensCall {
                dtfId: U256::from(dtf_id),
            },
        )
        .await
    }

    #[instrument(skip(self, params), fields(name = %params.name, tokens = params.tokens.len()))]
    async fn submit_create_dtf(&self, params: &CreateDtfParams) -> Result<String, TxError> {
        let tokens = params
            .tokens
            .iter()
            .map(|t| parse_address(t))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| TxError::InvalidRequest(e.to_string()))?;

        self.send(
            self.addresses.market,
            IDTFMarket::createDTFCall {
                name: params.name.clone(),
                tokens,
                amounts: params.amounts.iter().map(|a| U256::from(*a)).collect(),
                expiryTime: U256::from(params.expiry),
                targetValuation: U256::from(params.target_valuation),
                isTargetHigher: params.is_target_higher,
            },
        )
        .await
    }

    #[instrument(skip(self))]
    async fn await_receipt(&self, tx_hash: &str) -> Result<TxReceipt, TxError> {
        self.wait_for_receipt(tx_hash).await
    }
}

fn parse_address(value: &str) -> Result<Address> {
    value
        .parse::<Address>()
        .with_context(|| format!("Invalid address: {value}"))
}

/// Saturating U256 → u128; no realistic pool or price exceeds 128 bits.
fn to_u128(value: U256) -> u128 {
    value.try_into().unwrap_or(u128::MAX)
}

/// Maps a submission failure to a user-facing error.
///
/// Wallet and node refusals (bad nonce, insufficient funds, a revert
/// caught during gas estimation) are `Rejected`; anything else is a
/// transport problem.
fn classify_submit_error(message: &str) -> TxError {
    let lower = message.to_ascii_lowercase();
    let refused = [
        "rejected",
        "denied",
        "insufficient funds",
        "execution reverted",
        "nonce",
        "underpriced",
    ]
    .iter()
    .any(|needle| lower.contains(needle));

    if refused {
        TxError::Rejected(message.to_string())
    } else {
        TxError::Network(message.to_string())
    }
}
