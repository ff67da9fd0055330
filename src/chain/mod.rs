//! Chain module - read access to the chain and the block event stream
//!
//! This module provides:
//! - The `ChainData` seam the rescue core reads chain state through
//! - An ethers-rs JSON-RPC provider with failover across RPC endpoints
//! - A block listener feeding new headers into a channel

pub mod listener;
pub mod provider;

pub use listener::BlockListener;
pub use provider::ChainProvider;

use crate::bundle::{BlockHeader, Operation};
use crate::error::RescueResult;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};

/// Chain state queries needed to build, price and resolve a bundle
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainData: Send + Sync {
    /// Chain id transactions are signed for
    fn chain_id(&self) -> u64;

    /// Latest block number, base fee and timestamp
    async fn latest_block(&self) -> RescueResult<BlockHeader>;

    /// Gas needed to execute `operation` sent from `from`
    async fn estimate_gas(&self, operation: &Operation, from: Address) -> RescueResult<U256>;

    /// Read-only call of `operation`, returning the raw return data
    async fn call(&self, operation: &Operation, from: Address) -> RescueResult<Vec<u8>>;

    /// Transaction count of `address`, at `block` or latest
    async fn transaction_count(&self, address: Address, block: Option<u64>) -> RescueResult<u64>;

    /// Transaction hashes of block `number`, `None` if not mined yet
    async fn block_transactions(&self, number: u64) -> RescueResult<Option<Vec<H256>>>;
}
