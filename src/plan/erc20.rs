//! Sweep the origin's full ERC-20 balances to the recipient
//!
//! Balances are read before the bundle runs. Tokens that earlier steps in the
//! same bundle move into the origin are declared as `incoming` and added.

use super::{from_origin, parse_decimal, PlanContext, PlanProvider};
use crate::bundle::{Operation, OperationSet};
use crate::config::SweepToken;
use crate::error::{RescueError, RescueResult};

use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::contract::abigen;
use ethers::types::{Address, U256};
use tracing::{debug, warn};

abigen!(
    Erc20Token,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);

pub struct Erc20Sweep {
    /// Token and the amount the bundle delivers to the origin before the sweep
    tokens: Vec<(Address, U256)>,
}

impl Erc20Sweep {
    pub fn from_config(tokens: &[SweepToken]) -> RescueResult<Self> {
        let tokens = tokens
            .iter()
            .map(|entry| {
                let incoming = match entry.incoming() {
                    Some(amount) => parse_decimal(amount, "incoming amount")?,
                    None => U256::zero(),
                };
                Ok((entry.token(), incoming))
            })
            .collect::<RescueResult<Vec<_>>>()?;
        Ok(Self { tokens })
    }
}

#[async_trait]
impl PlanProvider for Erc20Sweep {
    fn name(&self) -> &'static str {
        "erc20_sweep"
    }

    async fn produce_plan(&self, context: &PlanContext) -> RescueResult<OperationSet> {
        let mut operations = Vec::new();

        for &(token, incoming) in &self.tokens {
            let query = Operation::call(
                token,
                BalanceOfCall {
                    account: context.origin,
                }
                .encode(),
                "balanceOf",
            );
            let returned = context.chain.call(&query, context.origin).await?;
            let BalanceOfReturn(balance) = BalanceOfReturn::decode(returned).map_err(|e| {
                RescueError::InvalidPlan(format!("Bad balanceOf response from {:?}: {}", token, e))
            })?;

            let amount = balance.checked_add(incoming).ok_or_else(|| {
                RescueError::InvalidPlan(format!("Sweep amount of {:?} overflows", token))
            })?;
            if amount.is_zero() {
                warn!("Origin holds no balance of {:?}, skipping", token);
                continue;
            }
            debug!(%balance, %incoming, "Sweeping {} of {:?}", amount, token);

            let transfer = TransferCall {
                to: context.recipient,
                amount,
            };
            operations.push(Operation::call(
                token,
                transfer.encode(),
                format!("transfer {} of {:?}", amount, token),
            ));
        }

        Ok(from_origin(context, operations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainData;
    use crate::plan::tests::{context, ORIGIN, RECIPIENT};

    fn balances(funded: Address, amount: u64) -> MockChainData {
        let mut chain = MockChainData::new();
        chain.expect_call().returning(move |operation, from| {
            assert_eq!(from, Address::from_low_u64_be(ORIGIN));
            let query = BalanceOfCall::decode(&operation.calldata).unwrap();
            assert_eq!(query.account, Address::from_low_u64_be(ORIGIN));
            let balance = if operation.target == funded {
                U256::from(amount)
            } else {
                U256::zero()
            };
            Ok(balance.encode())
        });
        chain
    }

    #[tokio::test]
    async fn test_sweeps_nonzero_balances() {
        let funded = Address::from_low_u64_be(0x21);
        let empty = Address::from_low_u64_be(0x22);

        let set = Erc20Sweep::from_config(&[SweepToken::Token(empty), SweepToken::Token(funded)])
            .unwrap()
            .produce_plan(&context(balances(funded, 1_000_000)))
            .await
            .unwrap();

        assert_eq!(set.len(), 1);
        let operation = &set.operations()[0];
        assert_eq!(operation.target, funded);
        assert!(operation.value.is_zero());

        let transfer = TransferCall::decode(&operation.calldata).unwrap();
        assert_eq!(transfer.to, Address::from_low_u64_be(RECIPIENT));
        assert_eq!(transfer.amount, U256::from(1_000_000u64));
    }

    #[tokio::test]
    async fn test_incoming_amount_added_to_balance() {
        let funded = Address::from_low_u64_be(0x21);
        let unfunded = Address::from_low_u64_be(0x22);

        let set = Erc20Sweep::from_config(&[
            SweepToken::WithIncoming {
                token: funded,
                incoming: "500".to_string(),
            },
            SweepToken::WithIncoming {
                token: unfunded,
                incoming: "2500".to_string(),
            },
        ])
        .unwrap()
        .produce_plan(&context(balances(funded, 1_000)))
        .await
        .unwrap();

        let amounts: Vec<_> = set
            .operations()
            .iter()
            .map(|operation| TransferCall::decode(&operation.calldata).unwrap().amount)
            .collect();
        assert_eq!(amounts, vec![U256::from(1_500), U256::from(2_500)]);
        assert_eq!(set.operations()[1].target, unfunded);
    }

    #[tokio::test]
    async fn test_nothing_to_sweep_is_empty() {
        let set = Erc20Sweep::from_config(&[SweepToken::Token(Address::from_low_u64_be(0x22))])
            .unwrap()
            .produce_plan(&context(balances(Address::from_low_u64_be(0x21), 1)))
            .await
            .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_invalid_incoming_rejected() {
        let err = Erc20Sweep::from_config(&[SweepToken::WithIncoming {
            token: Address::zero(),
            incoming: "lots".to_string(),
        }])
        .err()
        .unwrap();
        assert!(matches!(err, RescueError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn test_call_failure_propagates() {
        let mut chain = MockChainData::new();
        chain
            .expect_call()
            .returning(|_, _| Err(RescueError::ChainConnection("timeout".to_string())));

        let err = Erc20Sweep::from_config(&[SweepToken::Token(Address::from_low_u64_be(0x21))])
            .unwrap()
            .produce_plan(&context(chain))
            .await
            .unwrap_err();
        assert!(matches!(err, RescueError::ChainConnection(_)));
    }
}
