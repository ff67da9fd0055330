//! Deterministic bundle assembly

use super::{Bundle, BundleSlot, Operation, SignerIdentity, TRANSFER_GAS_LIMIT};
use crate::error::{RescueError, RescueResult};

use ethers::types::U256;

/// Orders the funding transfer and the rescue operations into bundle slots
pub struct BundleAssembler;

impl BundleAssembler {
    /// Build the slot sequence: funding first (sponsor), then each operation
    /// in caller order (origin), all at `gas_price`.
    ///
    /// Pure: the same inputs always give the same bundle.
    pub fn assemble(
        funding: Operation,
        operations: &[Operation],
        estimates: &[U256],
        gas_price: U256,
    ) -> RescueResult<Bundle> {
        if operations.is_empty() {
            return Err(RescueError::InvalidPlan(
                "a bundle needs at least one operation".to_string(),
            ));
        }
        if operations.len() != estimates.len() {
            return Err(RescueError::InvalidPlan(format!(
                "{} operations but {} gas estimates",
                operations.len(),
                estimates.len()
            )));
        }

        let funding_value = funding.value;
        let mut slots = Vec::with_capacity(operations.len() + 1);
        slots.push(BundleSlot {
            operation: funding,
            signer: SignerIdentity::Sponsor,
            gas_price,
            gas_limit: U256::from(TRANSFER_GAS_LIMIT),
        });

        slots.extend(
            operations
                .iter()
                .zip(estimates)
                .map(|(operation, gas_limit)| BundleSlot {
                    operation: operation.clone(),
                    signer: SignerIdentity::Origin,
                    gas_price,
                    gas_limit: *gas_limit,
                }),
        );

        Ok(Bundle::new(slots, gas_price, funding_value))
    }
}
