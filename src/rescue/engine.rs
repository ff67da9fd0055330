//! Rescue engine: setup, pre-flight simulation and the submission loop

use crate::bundle::{BlockHeader, LoopOutcome, SignerIdentity, SimulationGate, SubmissionLoop};
use crate::chain::{BlockListener, ChainData, ChainProvider};
use crate::config::{ChainConfig, RescueConfig, Settings};
use crate::error::{RescueError, RescueResult};
use crate::plan::{CompositePlan, PlanContext, PlanProvider};
use crate::relay::{BundleRelay, FlashbotsRelay};
use crate::report;
use crate::tx::{BundleSigner, GasBudgeter, LocalBundleSigner};

use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Owns every collaborator of one rescue run
pub struct RescueEngine {
    config: RescueConfig,
    chain_config: ChainConfig,
    chain: Arc<dyn ChainData>,
    signer: Arc<dyn BundleSigner>,
    relay: Arc<dyn BundleRelay>,
    plan: Box<dyn PlanProvider>,
    recipient: Address,
}

impl RescueEngine {
    /// Connect to the chain and relay and load both keys
    pub async fn from_settings(settings: &Settings) -> RescueResult<Self> {
        let provider = Arc::new(ChainProvider::new(&settings.chain).await?);
        let chain: Arc<dyn ChainData> = provider.clone();
        info!("Connected to chain {}", chain.chain_id());

        let signer = LocalBundleSigner::from_env(
            &settings.wallet.sponsor_key_env,
            &settings.wallet.origin_key_env,
            chain.chain_id(),
        )?;
        let relay = FlashbotsRelay::new(&provider, chain.clone(), &settings.relay)?;
        let plan = CompositePlan::from_config(&settings.plan)?;

        Ok(Self::from_parts(
            settings.rescue.clone(),
            settings.chain.clone(),
            chain,
            Arc::new(signer),
            Arc::new(relay),
            Box::new(plan),
            settings.plan.recipient,
        ))
    }

    pub fn from_parts(
        config: RescueConfig,
        chain_config: ChainConfig,
        chain: Arc<dyn ChainData>,
        signer: Arc<dyn BundleSigner>,
        relay: Arc<dyn BundleRelay>,
        plan: Box<dyn PlanProvider>,
        recipient: Address,
    ) -> Self {
        Self {
            config,
            chain_config,
            chain,
            signer,
            relay,
            plan,
            recipient,
        }
    }

    /// Listener feeding new block headers into `block_tx`
    pub fn block_listener(&self, block_tx: mpsc::Sender<BlockHeader>) -> BlockListener {
        BlockListener::new(
            self.chain.clone(),
            self.chain_config.ws_url.clone(),
            Duration::from_millis(self.chain_config.poll_interval_ms),
            block_tx,
        )
    }

    /// Run setup, then drive the submission loop from `blocks`
    pub async fn execute(&self, blocks: &mut mpsc::Receiver<BlockHeader>) -> LoopOutcome {
        let mut submission = match self.setup().await {
            Ok(submission) => submission,
            Err(e) => {
                error!("Setup failed: {}", e);
                return LoopOutcome::Failed(e);
            }
        };

        submission.run(blocks).await
    }

    async fn setup(&self) -> RescueResult<SubmissionLoop> {
        let origin = self.signer.address(SignerIdentity::Origin);
        let sponsor = self.signer.address(SignerIdentity::Sponsor);

        let context = PlanContext {
            origin,
            recipient: self.recipient,
            chain: self.chain.clone(),
        };
        let operations = self.plan.produce_plan(&context).await?;
        if operations.is_empty() {
            return Err(RescueError::InvalidPlan(
                "Rescue plan has no operations".to_string(),
            ));
        }
        info!("Rescue plan has {} operations", operations.len());

        let estimates = GasBudgeter::new(self.chain.as_ref())
            .estimate(operations.operations(), origin)
            .await?;
        let total_gas = GasBudgeter::total(&estimates)?;

        let header = self.chain.latest_block().await?;
        let mut submission = SubmissionLoop::new(
            self.config.clone(),
            self.chain.clone(),
            self.signer.clone(),
            self.relay.clone(),
            operations,
            estimates,
        );

        let prepared = submission.prepare(&header).await?;
        report::print_transactions(&prepared.signed);

        let simulation = SimulationGate::new(self.relay.as_ref())
            .check(&prepared.signed, header.number)
            .await?;
        report::print_summary(origin, sponsor, &prepared.signed, &simulation, total_gas);

        Ok(submission)
    }
}
