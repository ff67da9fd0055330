//! Plan module - turns the `[plan]` configuration into an operation set
//!
//! Each configured step is a `PlanProvider`. Steps run in configuration
//! order and their operations are concatenated, so a withdrawal listed
//! before a sweep executes before it in the bundle.

mod calls;
mod erc20;
mod erc721;

pub use calls::CallPlan;
pub use erc20::Erc20Sweep;
pub use erc721::Erc721Sweep;

use crate::bundle::{Operation, OperationSet};
use crate::chain::ChainData;
use crate::config::{PlanConfig, PlanStep};
use crate::error::{RescueError, RescueResult};

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::info;

/// What a plan provider may read while producing operations
#[derive(Clone)]
pub struct PlanContext {
    /// Account that executes every operation
    pub origin: Address,
    /// Where rescued assets are sent
    pub recipient: Address,
    pub chain: Arc<dyn ChainData>,
}

#[async_trait]
pub trait PlanProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn produce_plan(&self, context: &PlanContext) -> RescueResult<OperationSet>;
}

/// Ordered composition of plan steps
pub struct CompositePlan {
    steps: Vec<Box<dyn PlanProvider>>,
}

impl CompositePlan {
    pub fn new(steps: Vec<Box<dyn PlanProvider>>) -> Self {
        Self { steps }
    }

    pub fn from_config(config: &PlanConfig) -> RescueResult<Self> {
        let steps = config
            .steps
            .iter()
            .map(|step| -> RescueResult<Box<dyn PlanProvider>> {
                Ok(match step {
                    PlanStep::Calls { calls } => Box::new(CallPlan::from_config(calls)?),
                    PlanStep::Erc20Sweep { tokens } => Box::new(Erc20Sweep::from_config(tokens)?),
                    PlanStep::Erc721Sweep { tokens } => Box::new(Erc721Sweep::from_config(tokens)?),
                })
            })
            .collect::<RescueResult<Vec<_>>>()?;

        Ok(Self::new(steps))
    }
}

#[async_trait]
impl PlanProvider for CompositePlan {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn produce_plan(&self, context: &PlanContext) -> RescueResult<OperationSet> {
        let mut operations = Vec::new();

        for step in &self.steps {
            let produced = step.produce_plan(context).await?;
            info!("Plan step {} produced {} operations", step.name(), produced.len());
            operations.extend(produced.operations().iter().cloned());
        }

        if operations.is_empty() {
            return Err(RescueError::InvalidPlan(
                "Plan produced no operations".to_string(),
            ));
        }

        Ok(OperationSet::new(context.origin, operations))
    }
}

/// Parse a decimal amount or token id from configuration
pub(crate) fn parse_decimal(value: &str, what: &str) -> RescueResult<U256> {
    U256::from_dec_str(value.trim())
        .map_err(|e| RescueError::InvalidPlan(format!("Invalid {} {:?}: {}", what, value, e)))
}

/// Operations sent from the origin
fn from_origin(context: &PlanContext, operations: Vec<Operation>) -> OperationSet {
    OperationSet::new(context.origin, operations)
}
