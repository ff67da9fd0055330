//! Chain provider with multi-RPC support and automatic failover

use super::ChainData;
use crate::bundle::{BlockHeader, Operation};
use crate::config::ChainConfig;
use crate::error::{RescueError, RescueResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Chain id reported by the first reachable provider
    chain_id: u64,
}

impl ChainProvider {
    /// Create a new chain provider
    pub async fn new(config: &ChainConfig) -> RescueResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RescueError::ChainConnection(
                "No valid RPC providers".to_string(),
            ));
        }

        let mut chain_id = None;
        for provider in &http_providers {
            match provider.get_chainid().await {
                Ok(id) => {
                    chain_id = Some(id.as_u64());
                    break;
                }
                Err(e) => warn!("Failed to query chain id: {}", e),
            }
        }
        let chain_id = chain_id.ok_or_else(|| {
            RescueError::ChainConnection("No provider answered eth_chainId".to_string())
        })?;

        if let Some(expected) = config.expected_chain_id {
            if expected != chain_id {
                return Err(RescueError::Config(format!(
                    "RPC serves chain {} but chain {} was expected",
                    chain_id, expected
                )));
            }
        }

        Ok(Self {
            http_providers,
            current_provider: AtomicUsize::new(0),
            chain_id,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    fn request(operation: &Operation, from: Address) -> TypedTransaction {
        TransactionRequest::new()
            .from(from)
            .to(operation.target)
            .data(operation.calldata.clone())
            .value(operation.value)
            .into()
    }
}

#[async_trait]
impl ChainData for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn latest_block(&self) -> RescueResult<BlockHeader> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block(BlockNumber::Latest).await {
                Ok(Some(block)) => {
                    let number = block.number.ok_or_else(|| {
                        RescueError::ChainConnection("Latest block has no number".to_string())
                    })?;
                    return Ok(BlockHeader {
                        number: number.as_u64(),
                        // pre-London blocks carry no base fee
                        base_fee_per_gas: block.base_fee_per_gas.unwrap_or_default(),
                        timestamp: block.timestamp.as_u64(),
                    });
                }
                Ok(None) => {
                    warn!("Chain {} returned no latest block", self.chain_id);
                    self.failover();
                }
                Err(e) => {
                    warn!("Failed to get latest block from chain {}: {}", self.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(RescueError::ChainConnection(
            "All providers failed to return the latest block".to_string(),
        ))
    }

    async fn estimate_gas(&self, operation: &Operation, from: Address) -> RescueResult<U256> {
        // a revert here is a plan problem, not a provider problem, so no failover
        self.http()
            .estimate_gas(&Self::request(operation, from), None)
            .await
            .map_err(|e| RescueError::ChainConnection(e.to_string()))
    }

    async fn call(&self, operation: &Operation, from: Address) -> RescueResult<Vec<u8>> {
        self.http()
            .call(&Self::request(operation, from), None)
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|e| RescueError::ChainConnection(e.to_string()))
    }

    async fn transaction_count(&self, address: Address, block: Option<u64>) -> RescueResult<u64> {
        let block = block.map(|number| BlockId::Number(BlockNumber::Number(number.into())));

        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_count(address, block).await {
                Ok(count) => return Ok(count.as_u64()),
                Err(e) => {
                    warn!("Failed to get nonce of {:?}: {}", address, e);
                    self.failover();
                }
            }
        }

        Err(RescueError::ChainConnection(format!(
            "All providers failed to return the nonce of {:?}",
            address
        )))
    }

    async fn block_transactions(&self, number: u64) -> RescueResult<Option<Vec<H256>>> {
        self.http()
            .get_block(number)
            .await
            .map(|block| block.map(|b| b.transactions))
            .map_err(|e| RescueError::ChainConnection(e.to_string()))
    }
}
