//! Explicit contract calls listed in configuration

use super::{from_origin, parse_decimal, PlanContext, PlanProvider};
use crate::bundle::{Operation, OperationSet};
use crate::config::CallConfig;
use crate::error::RescueResult;

use async_trait::async_trait;
use ethers::types::U256;

pub struct CallPlan {
    operations: Vec<Operation>,
}

impl CallPlan {
    pub fn from_config(calls: &[CallConfig]) -> RescueResult<Self> {
        let operations = calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                let value = match &call.value {
                    Some(value) => parse_decimal(value, "call value")?,
                    None => U256::zero(),
                };
                let label = call
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("call {}", index));
                Ok(Operation::call(call.target, call.calldata.clone(), label).with_value(value))
            })
            .collect::<RescueResult<Vec<_>>>()?;

        Ok(Self { operations })
    }
}

#[async_trait]
impl PlanProvider for CallPlan {
    fn name(&self) -> &'static str {
        "calls"
    }

    async fn produce_plan(&self, context: &PlanContext) -> RescueResult<OperationSet> {
        Ok(from_origin(context, self.operations.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainData;
    use crate::error::RescueError;
    use crate::plan::tests::context;
    use ethers::types::{Address, Bytes};

    fn call(value: Option<&str>, label: Option<&str>) -> CallConfig {
        CallConfig {
            target: Address::from_low_u64_be(0x51),
            calldata: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
            value: value.map(str::to_string),
            label: label.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_calls_pass_through() {
        let plan = CallPlan::from_config(&[
            call(None, Some("withdraw")),
            call(Some("1000000000000000000"), None),
        ])
        .unwrap();

        let set = plan.produce_plan(&context(MockChainData::new())).await.unwrap();
        let operations = set.operations();
        assert_eq!(operations.len(), 2);
        assert_eq!(operations[0].label, "withdraw");
        assert_eq!(operations[0].value, U256::zero());
        assert_eq!(operations[1].label, "call 1");
        assert_eq!(operations[1].value, U256::exp10(18));
        assert_eq!(operations[1].calldata, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_bad_value_rejected() {
        let err = CallPlan::from_config(&[call(Some("1.5"), None)]).err().unwrap();
        assert!(matches!(err, RescueError::InvalidPlan(_)));
    }
}
