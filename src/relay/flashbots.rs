//! Flashbots-compatible relay transport
//!
//! Simulation and submission go through `eth_callBundle` / `eth_sendBundle`,
//! authenticated with a dedicated relay key that never signs bundle
//! transactions. Resolution is derived from the chain: once the target block
//! exists the bundle either landed in it, lost a nonce race, or simply missed.

use super::{BundleRelay, PendingResolution, Resolution};
use crate::bundle::{SignedBundle, SimulationResult};
use crate::chain::{ChainData, ChainProvider};
use crate::config::RelayConfig;
use crate::error::{RescueError, RescueResult};
use crate::tx::load_wallet;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;
use ethers_flashbots::{BundleRequest, FlashbotsMiddleware};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub struct FlashbotsRelay {
    middleware: FlashbotsMiddleware<Provider<Http>, LocalWallet>,
    chain: Arc<dyn ChainData>,
    poll_interval: Duration,
}

impl FlashbotsRelay {
    pub fn new(
        provider: &ChainProvider,
        chain: Arc<dyn ChainData>,
        config: &RelayConfig,
    ) -> RescueResult<Self> {
        let relay_signer = load_wallet(&config.signing_key_env)?;
        let relay_url = Url::parse(&config.url)
            .map_err(|e| RescueError::Config(format!("Invalid relay url {}: {}", config.url, e)))?;

        info!(
            "Relay {} authenticated as {:?}",
            relay_url,
            relay_signer.address()
        );

        Ok(Self {
            middleware: FlashbotsMiddleware::new(provider.http().clone(), relay_url, relay_signer),
            chain,
            poll_interval: Duration::from_millis(config.resolution_poll_ms),
        })
    }

    fn request(bundle: &SignedBundle) -> BundleRequest {
        bundle
            .raw_transactions()
            .into_iter()
            .fold(BundleRequest::new(), |request, raw| request.push_transaction(raw))
    }
}

#[async_trait]
impl BundleRelay for FlashbotsRelay {
    async fn simulate(
        &self,
        bundle: &SignedBundle,
        state_block: u64,
    ) -> RescueResult<SimulationResult> {
        let request = Self::request(bundle)
            .set_block(U64::from(state_block + 1))
            .set_simulation_block(U64::from(state_block))
            .set_simulation_timestamp(chrono::Utc::now().timestamp() as u64);

        let simulated = self
            .middleware
            .simulate_bundle(&request)
            .await
            .map_err(|e| RescueError::SimulationTransport(e.to_string()))?;

        Ok(SimulationResult {
            per_slot_gas_used: simulated.transactions.iter().map(|tx| tx.gas_used).collect(),
            per_slot_error: simulated
                .transactions
                .iter()
                .map(|tx| {
                    tx.error.clone().or_else(|| {
                        tx.revert
                            .as_ref()
                            .map(|reason| format!("execution reverted: {}", reason))
                    })
                })
                .collect(),
            coinbase_diff: simulated.coinbase_diff,
        })
    }

    async fn submit(
        &self,
        bundle: &SignedBundle,
        target_block: u64,
    ) -> RescueResult<PendingResolution> {
        let request = Self::request(bundle).set_block(U64::from(target_block));

        self.middleware
            .send_bundle(&request)
            .await
            .map_err(|e| RescueError::SubmissionTransport(e.to_string()))?;
        debug!("Bundle accepted by relay for block {}", target_block);

        Ok(PendingResolution::new(resolve_submission(
            self.chain.clone(),
            target_block,
            bundle.hashes(),
            bundle.first_nonces(),
            self.poll_interval,
        )))
    }
}

/// Settle a submission once `target_block` has been mined.
///
/// Included when every bundle transaction is in the block; nonce-too-high
/// when any sender's nonce at that block has moved past the first nonce the
/// bundle uses for it; otherwise the block simply passed.
pub async fn resolve_submission(
    chain: Arc<dyn ChainData>,
    target_block: u64,
    hashes: Vec<H256>,
    first_nonces: BTreeMap<Address, u64>,
    poll_interval: Duration,
) -> RescueResult<Resolution> {
    let included = loop {
        match chain.block_transactions(target_block).await? {
            Some(transactions) => break transactions,
            None => tokio::time::sleep(poll_interval).await,
        }
    };

    if hashes.iter().all(|hash| included.contains(hash)) {
        return Ok(Resolution::BundleIncluded);
    }

    for (account, first_nonce) in first_nonces {
        let nonce = chain
            .transaction_count(account, Some(target_block))
            .await?;
        if nonce > first_nonce {
            warn!(
                "Nonce of {:?} is {} at block {}, bundle expected {}",
                account, nonce, target_block, first_nonce
            );
            return Ok(Resolution::AccountNonceTooHigh);
        }
    }

    Ok(Resolution::BlockPassedWithoutInclusion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainData;
    use mockall::predicate::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hashes() -> Vec<H256> {
        vec![H256::from_low_u64_be(1), H256::from_low_u64_be(2)]
    }

    fn nonces() -> BTreeMap<Address, u64> {
        BTreeMap::from([
            (Address::from_low_u64_be(0xa), 5),
            (Address::from_low_u64_be(0xb), 9),
        ])
    }

    #[tokio::test]
    async fn test_included_when_all_hashes_in_block() {
        let mut chain = MockChainData::new();
        chain
            .expect_block_transactions()
            .with(eq(102))
            .returning(|_| {
                Ok(Some(vec![
                    H256::from_low_u64_be(7),
                    H256::from_low_u64_be(1),
                    H256::from_low_u64_be(2),
                ]))
            });
        chain.expect_transaction_count().never();

        let resolution =
            resolve_submission(Arc::new(chain), 102, hashes(), nonces(), Duration::ZERO).await;
        assert_eq!(resolution.unwrap(), Resolution::BundleIncluded);
    }

    #[tokio::test]
    async fn test_waits_for_target_block() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut chain = MockChainData::new();
        chain.expect_block_transactions().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(None)
            } else {
                Ok(Some(vec![H256::from_low_u64_be(1), H256::from_low_u64_be(2)]))
            }
        });

        let resolution =
            resolve_submission(Arc::new(chain), 102, hashes(), nonces(), Duration::from_millis(1))
                .await;
        assert_eq!(resolution.unwrap(), Resolution::BundleIncluded);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_nonce_too_high_when_account_moved() {
        let mut chain = MockChainData::new();
        chain
            .expect_block_transactions()
            .returning(|_| Ok(Some(vec![H256::from_low_u64_be(1)])));
        chain
            .expect_transaction_count()
            .with(always(), eq(Some(102)))
            .returning(|account, _| {
                if account == Address::from_low_u64_be(0xb) {
                    Ok(10)
                } else {
                    Ok(5)
                }
            });

        let resolution =
            resolve_submission(Arc::new(chain), 102, hashes(), nonces(), Duration::ZERO).await;
        assert_eq!(resolution.unwrap(), Resolution::AccountNonceTooHigh);
    }

    #[tokio::test]
    async fn test_block_passed_when_nonces_unchanged() {
        let mut chain = MockChainData::new();
        chain
            .expect_block_transactions()
            .returning(|_| Ok(Some(Vec::new())));
        chain
            .expect_transaction_count()
            .returning(|account, _| Ok(if account == Address::from_low_u64_be(0xa) { 5 } else { 9 }));

        let resolution =
            resolve_submission(Arc::new(chain), 102, hashes(), nonces(), Duration::ZERO).await;
        assert_eq!(resolution.unwrap(), Resolution::BlockPassedWithoutInclusion);
    }

    #[tokio::test]
    async fn test_chain_error_propagates() {
        let mut chain = MockChainData::new();
        chain
            .expect_block_transactions()
            .returning(|_| Err(RescueError::ChainConnection("connection reset".to_string())));

        let err = resolve_submission(Arc::new(chain), 102, hashes(), nonces(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, RescueError::ChainConnection(_)));
    }
}
