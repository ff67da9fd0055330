//! Transfer listed ERC-721 token ids to the recipient

use super::{from_origin, parse_decimal, PlanContext, PlanProvider};
use crate::bundle::{Operation, OperationSet};
use crate::config::NftHolding;
use crate::error::RescueResult;

use async_trait::async_trait;
use ethers::abi::AbiEncode;
use ethers::contract::abigen;
use ethers::types::{Address, U256};

abigen!(
    Erc721Token,
    r#"[
        function safeTransferFrom(address from, address to, uint256 id) external
    ]"#
);

pub struct Erc721Sweep {
    holdings: Vec<(Address, U256)>,
}

impl Erc721Sweep {
    pub fn from_config(tokens: &[NftHolding]) -> RescueResult<Self> {
        let mut holdings = Vec::new();
        for holding in tokens {
            for id in &holding.ids {
                holdings.push((holding.token, parse_decimal(id, "token id")?));
            }
        }
        Ok(Self { holdings })
    }
}

#[async_trait]
impl PlanProvider for Erc721Sweep {
    fn name(&self) -> &'static str {
        "erc721_sweep"
    }

    async fn produce_plan(&self, context: &PlanContext) -> RescueResult<OperationSet> {
        let operations = self
            .holdings
            .iter()
            .map(|&(token, id)| {
                let transfer = SafeTransferFromCall {
                    from: context.origin,
                    to: context.recipient,
                    id,
                };
                Operation::call(token, transfer.encode(), format!("transfer #{} of {:?}", id, token))
            })
            .collect();

        Ok(from_origin(context, operations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainData;
    use crate::error::RescueError;
    use crate::plan::tests::{context, ORIGIN, RECIPIENT};
    use ethers::abi::AbiDecode;

    #[tokio::test]
    async fn test_one_transfer_per_id() {
        let token = Address::from_low_u64_be(0x40);
        let plan = Erc721Sweep::from_config(&[NftHolding {
            token,
            ids: vec!["652".to_string(), "7".to_string()],
        }])
        .unwrap();

        let set = plan.produce_plan(&context(MockChainData::new())).await.unwrap();
        assert_eq!(set.len(), 2);

        let first = SafeTransferFromCall::decode(&set.operations()[0].calldata).unwrap();
        assert_eq!(first.from, Address::from_low_u64_be(ORIGIN));
        assert_eq!(first.to, Address::from_low_u64_be(RECIPIENT));
        assert_eq!(first.id, U256::from(652));
        assert_eq!(set.operations()[1].target, token);
    }

    #[test]
    fn test_invalid_id_rejected() {
        let err = Erc721Sweep::from_config(&[NftHolding {
            token: Address::zero(),
            ids: vec!["abc".to_string()],
        }])
        .err()
        .unwrap();
        assert!(matches!(err, RescueError::InvalidPlan(_)));
    }
}
