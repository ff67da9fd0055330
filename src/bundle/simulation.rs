//! Simulation gate: no bundle is submitted unless every slot simulates cleanly

use super::SignedBundle;
use crate::error::{RescueError, RescueResult};
use crate::relay::BundleRelay;

use ethers::types::U256;
use tracing::{debug, warn};

/// Outcome of a bundle dry-run, one entry per slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationResult {
    pub per_slot_gas_used: Vec<U256>,
    pub per_slot_error: Vec<Option<String>>,
    pub coinbase_diff: U256,
}

impl SimulationResult {
    pub fn total_gas_used(&self) -> U256 {
        self.per_slot_gas_used
            .iter()
            .fold(U256::zero(), |acc, gas| acc.saturating_add(*gas))
    }

    /// Realized price paid to the block producer per unit of gas. Advisory.
    pub fn effective_gas_price(&self) -> U256 {
        let gas_used = self.total_gas_used();
        if gas_used.is_zero() {
            U256::zero()
        } else {
            self.coinbase_diff / gas_used
        }
    }

    /// First slot reporting an error, if any
    pub fn first_failure(&self) -> Option<(usize, &str)> {
        self.per_slot_error
            .iter()
            .enumerate()
            .find_map(|(index, error)| error.as_deref().map(|cause| (index, cause)))
    }
}

/// Dry-runs a signed bundle and refuses any bundle with a failing slot
pub struct SimulationGate<'a> {
    relay: &'a dyn BundleRelay,
}

impl<'a> SimulationGate<'a> {
    pub fn new(relay: &'a dyn BundleRelay) -> Self {
        Self { relay }
    }

    /// Simulate on top of `state_block`.
    ///
    /// Fails with `SimulationRejected` if any slot errors, and with
    /// `SimulationTransport` if the relay could not simulate at all.
    pub async fn check(
        &self,
        bundle: &SignedBundle,
        state_block: u64,
    ) -> RescueResult<SimulationResult> {
        let result = self.relay.simulate(bundle, state_block).await?;

        if let Some((index, cause)) = result.first_failure() {
            return Err(RescueError::SimulationRejected {
                index,
                cause: cause.to_string(),
            });
        }

        // a limit below simulated usage can revert on-chain even after a clean simulation
        for (index, (tx, gas_used)) in bundle
            .transactions()
            .iter()
            .zip(&result.per_slot_gas_used)
            .enumerate()
        {
            if *gas_used > tx.gas_limit {
                warn!(
                    "Slot {} ({}) used {} gas in simulation but its limit is {}",
                    index, tx.label, gas_used, tx.gas_limit
                );
            }
        }

        debug!(
            "Simulation at block {} used {} gas, effective price {} wei",
            state_block,
            result.total_gas_used(),
            result.effective_gas_price()
        );

        Ok(result)
    }
}
