//! Sponsor funding for the origin account's gas

use crate::bundle::Operation;
use crate::error::{RescueError, RescueResult};
use crate::tx::GasBudgeter;

use ethers::types::{Address, U256};

/// Derives the value the sponsor must send so the origin can pay for its
/// operations at a given gas price
pub struct FundingCalculator {
    origin: Address,
}

impl FundingCalculator {
    pub fn new(origin: Address) -> Self {
        Self { origin }
    }

    /// Funding transfer and its value, `sum(estimates) * gas_price`.
    ///
    /// Must be called again whenever the gas price changes.
    pub fn compute(&self, estimates: &[U256], gas_price: U256) -> RescueResult<(Operation, U256)> {
        let total_gas = GasBudgeter::total(estimates)?;
        let value = total_gas
            .checked_mul(gas_price)
            .ok_or(RescueError::FundingOverflow)?;

        Ok((
            Operation::transfer(self.origin, value, "sponsor funding"),
            value,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funding_covers_all_estimates() {
        let origin = Address::from_low_u64_be(7);
        let (operation, value) = FundingCalculator::new(origin)
            .compute(
                &[U256::from(60_000), U256::from(45_000), U256::from(51_000)],
                U256::from(40_000_000_000u64),
            )
            .unwrap();

        assert_eq!(value, U256::from(156_000u64) * U256::from(40_000_000_000u64));
        assert_eq!(operation.target, origin);
        assert_eq!(operation.value, value);
        assert!(operation.calldata.is_empty());
    }

    #[test]
    fn test_beyond_u64_is_exact() {
        // 2^40 gas at 2^40 wei overflows u64 but not U256
        let gas = U256::from(1u64 << 40);
        let price = U256::from(1u64 << 40);
        let (_, value) = FundingCalculator::new(Address::zero())
            .compute(&[gas], price)
            .unwrap();

        assert_eq!(value, U256::one() << 80);
        assert!(value > U256::from(u64::MAX));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let result = FundingCalculator::new(Address::zero())
            .compute(&[U256::MAX >> 1, U256::from(2)], U256::from(4));
        assert!(matches!(result, Err(RescueError::FundingOverflow)));
    }

    #[test]
    fn test_reprice_changes_value() {
        let calculator = FundingCalculator::new(Address::zero());
        let estimates = [U256::from(100_000)];
        let (_, low) = calculator.compute(&estimates, U256::from(10)).unwrap();
        let (_, high) = calculator.compute(&estimates, U256::from(12)).unwrap();
        assert_eq!(low, U256::from(1_000_000));
        assert_eq!(high, U256::from(1_200_000));
    }
}
