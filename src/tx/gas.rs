//! Gas estimation and per-block gas pricing

use crate::bundle::{BlockHeader, Operation};
use crate::chain::ChainData;
use crate::error::{RescueError, RescueResult};

use ethers::types::{Address, U256};
use futures::future::join_all;
use tracing::debug;

/// Estimates every operation of a plan up front
pub struct GasBudgeter<'a> {
    chain: &'a dyn ChainData,
}

impl<'a> GasBudgeter<'a> {
    pub fn new(chain: &'a dyn ChainData) -> Self {
        Self { chain }
    }

    /// Estimate gas for each operation sent from `origin`, in operation order.
    ///
    /// An operation declaring any other sender is rejected with
    /// `InvalidPlan`: the bundle can only sign its slots with the origin key.
    /// Estimates run concurrently. Any single failure fails the batch; the
    /// lowest failing index is reported.
    pub async fn estimate(
        &self,
        operations: &[Operation],
        origin: Address,
    ) -> RescueResult<Vec<U256>> {
        if let Some((index, operation)) = operations
            .iter()
            .enumerate()
            .find(|(_, operation)| operation.from.is_some_and(|from| from != origin))
        {
            return Err(RescueError::InvalidPlan(format!(
                "Operation {} ({}) declares sender {:?} but the bundle signs as {:?}",
                index, operation.label, operation.from, origin
            )));
        }

        let estimates = join_all(
            operations
                .iter()
                .map(|operation| self.chain.estimate_gas(operation, origin)),
        )
        .await;

        estimates
            .into_iter()
            .enumerate()
            .map(|(index, estimate)| {
                let gas = estimate.map_err(|e| RescueError::EstimationFailed {
                    index,
                    cause: e.to_string(),
                })?;
                debug!(
                    "Estimated {} gas for operation {} ({})",
                    gas, index, operations[index].label
                );
                Ok(gas)
            })
            .collect()
    }

    /// Sum of all estimates
    pub fn total(estimates: &[U256]) -> RescueResult<U256> {
        estimates.iter().try_fold(U256::zero(), |acc, gas| {
            acc.checked_add(*gas).ok_or(RescueError::FundingOverflow)
        })
    }
}

/// Uniform gas price: current base fee plus a fixed priority fee
#[derive(Debug, Clone, Copy)]
pub struct GasPricer {
    priority_fee: U256,
}

impl GasPricer {
    pub fn new(priority_fee: U256) -> Self {
        Self { priority_fee }
    }

    pub fn from_gwei(priority_fee_gwei: u64) -> Self {
        Self::new(U256::from(priority_fee_gwei) * U256::exp10(9))
    }

    pub fn priority_fee(&self) -> U256 {
        self.priority_fee
    }

    /// Gas price for bundles built on top of `header`
    pub fn price_for(&self, header: &BlockHeader) -> RescueResult<U256> {
        header
            .base_fee_per_gas
            .checked_add(self.priority_fee)
            .ok_or(RescueError::FundingOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainData;
    use mockall::predicate::*;

    fn op(target: u64) -> Operation {
        Operation::call(
            Address::from_low_u64_be(target),
            vec![0xa9, 0x05, 0x9c, 0xbb],
            format!("call {target}"),
        )
    }

    #[tokio::test]
    async fn test_estimates_from_origin_keep_operation_order() {
        let origin = Address::from_low_u64_be(0xfeed);
        let mut chain = MockChainData::new();
        chain
            .expect_estimate_gas()
            .with(always(), eq(origin))
            .times(3)
            .returning(|operation, _| Ok(U256::from(operation.target.to_low_u64_be() * 1_000)));

        let ops = vec![op(3), op(1), op(2)];
        let estimates = GasBudgeter::new(&chain).estimate(&ops, origin).await.unwrap();

        assert_eq!(
            estimates,
            vec![U256::from(3_000), U256::from(1_000), U256::from(2_000)]
        );
    }

    #[tokio::test]
    async fn test_foreign_sender_rejected_before_estimating() {
        let origin = Address::from_low_u64_be(0xfeed);
        let mut chain = MockChainData::new();
        chain.expect_estimate_gas().never();

        let mut operation = op(1);
        operation.from = Some(Address::from_low_u64_be(0xbeef));
        let err = GasBudgeter::new(&chain)
            .estimate(&[op(2), operation], origin)
            .await
            .unwrap_err();
        assert!(matches!(err, RescueError::InvalidPlan(ref msg) if msg.contains("Operation 1")));
    }

    #[tokio::test]
    async fn test_origin_as_declared_sender_is_accepted() {
        let origin = Address::from_low_u64_be(0xfeed);
        let mut chain = MockChainData::new();
        chain
            .expect_estimate_gas()
            .with(always(), eq(origin))
            .times(1)
            .returning(|_, _| Ok(U256::from(50_000)));

        let mut operation = op(1);
        operation.from = Some(origin);
        let estimates = GasBudgeter::new(&chain)
            .estimate(&[operation], origin)
            .await
            .unwrap();
        assert_eq!(estimates, vec![U256::from(50_000)]);
    }

    #[tokio::test]
    async fn test_single_failure_fails_batch() {
        let mut chain = MockChainData::new();
        chain.expect_estimate_gas().returning(|operation, _| {
            if operation.target == Address::from_low_u64_be(2) {
                Err(RescueError::ChainConnection("execution reverted".to_string()))
            } else {
                Ok(U256::from(21_000))
            }
        });

        let ops = vec![op(1), op(2), op(3)];
        let err = GasBudgeter::new(&chain)
            .estimate(&ops, Address::zero())
            .await
            .unwrap_err();

        match err {
            RescueError::EstimationFailed { index, cause } => {
                assert_eq!(index, 1);
                assert!(cause.contains("execution reverted"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_total_is_checked() {
        let total = GasBudgeter::total(&[U256::from(21_000), U256::from(65_000)]).unwrap();
        assert_eq!(total, U256::from(86_000));

        assert!(matches!(
            GasBudgeter::total(&[U256::MAX, U256::one()]),
            Err(RescueError::FundingOverflow)
        ));
    }

    #[test]
    fn test_price_is_base_fee_plus_priority_fee() {
        let pricer = GasPricer::from_gwei(31);
        assert_eq!(pricer.priority_fee(), U256::from(31_000_000_000u64));

        let header = BlockHeader {
            number: 100,
            base_fee_per_gas: U256::from(12_000_000_000u64),
            timestamp: 0,
        };
        assert_eq!(
            pricer.price_for(&header).unwrap(),
            U256::from(43_000_000_000u64)
        );
    }
}
