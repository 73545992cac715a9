//! Chain RPC access through an ethers `Provider`.
//!
//! Supplies the network-side signals the keeper needs: fee level (gas
//! price), mempool contention (transactions in the pending block), and
//! per-address sequence numbers (pending transaction count).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::{Address, BlockId, BlockNumber, U256};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::engine::identity::SequenceSource;
use crate::market::MarketSignals;

const WEI_PER_GWEI: f64 = 1_000_000_000.0;

/// Read-only RPC client. Every call is bounded by `timeout`.
pub struct ChainRpc<P = Http> {
    provider: Provider<P>,
    timeout: Duration,
}

impl ChainRpc<Http> {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let provider = Provider::<Http>::try_from(url)
            .with_context(|| format!("Invalid RPC url {url}"))?;
        Ok(Self::with_provider(provider, timeout))
    }
}

impl<P: JsonRpcClient> ChainRpc<P> {
    pub fn with_provider(provider: Provider<P>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn bounded<T, F>(&self, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let value = tokio::time::timeout(self.timeout, call)
            .await
            .with_context(|| format!("{what} timed out"))?
            .with_context(|| format!("{what} failed"))?;
        debug!(call = what, "RPC call ok");
        Ok(value)
    }
}

fn to_u64(value: U256, what: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(anyhow!("{what} {value} exceeds u64"));
    }
    Ok(value.as_u64())
}

fn to_gwei(wei: U256) -> Result<f64> {
    if wei > U256::from(u128::MAX) {
        return Err(anyhow!("gas price {wei} out of range"));
    }
    Ok(wei.as_u128() as f64 / WEI_PER_GWEI)
}

#[async_trait]
impl<P: JsonRpcClient + 'static> MarketSignals for ChainRpc<P> {
    async fn fee_level(&self) -> Result<f64> {
        let price = self.bounded("gas price", self.provider.get_gas_price()).await?;
        to_gwei(price)
    }

    async fn contention(&self) -> Result<u64> {
        // Nodes without a pending block answer null
        let block = self
            .bounded("pending block", self.provider.get_block(BlockNumber::Pending))
            .await?;
        Ok(block.map(|b| b.transactions.len() as u64).unwrap_or(0))
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> SequenceSource for ChainRpc<P> {
    async fn current_sequence(&self, address: &str) -> Result<u64> {
        let account: Address = address
            .parse()
            .map_err(|e| anyhow!("invalid address {address}: {e}"))?;
        let count = self
            .bounded(
                "transaction count",
                self.provider
                    .get_transaction_count(account, Some(BlockId::Number(BlockNumber::Pending))),
            )
            .await?;
        to_u64(count, "transaction count")
    }
}
