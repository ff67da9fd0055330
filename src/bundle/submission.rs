//! Block-driven submission loop
//!
//! Every new block re-prices, re-simulates and submits the bundle for
//! `block + offset`, while earlier attempts wait on their own target blocks,
//! until one of them lands or an unrecoverable nonce conflict shows up. The
//! loop returns its outcome; it never exits the process.

use super::{
    BlockHeader, Bundle, BundleAssembler, OperationSet, SignedBundle, SignerIdentity,
    SimulationGate,
};
use crate::chain::ChainData;
use crate::config::RescueConfig;
use crate::error::{RescueError, RescueResult};
use crate::relay::{BundleRelay, PendingResolution, Resolution};
use crate::report::format_gwei;
use crate::tx::{BundleSigner, FundingCalculator, GasPricer, NonceBook};

use ethers::types::U256;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One submission for one target block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionAttempt {
    pub target_block: u64,
    pub submitted_at_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingInclusion(SubmissionAttempt),
    Included(SubmissionAttempt),
    NonceInvalid(SubmissionAttempt),
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Included(_) | LoopState::NonceInvalid(_))
    }
}

/// How the loop ended
#[derive(Debug)]
pub enum LoopOutcome {
    Included { target_block: u64 },
    Failed(RescueError),
    /// The configured block bound ran out without a terminal resolution
    Exhausted { blocks: u64 },
    BlockStreamClosed,
}

impl LoopOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            LoopOutcome::Included { .. } => 0,
            _ => 1,
        }
    }
}

/// Progress of one in-flight attempt
enum AttemptEvent {
    Submitted(SubmissionAttempt, RescueResult<PendingResolution>),
    Resolved(SubmissionAttempt, RescueResult<Resolution>),
}

enum LoopEvent {
    Attempt(AttemptEvent),
    Block(Option<BlockHeader>),
}

type InFlight = FuturesUnordered<BoxFuture<'static, AttemptEvent>>;

/// A bundle priced for one gas price, with its signed form
#[derive(Debug, Clone)]
pub struct PreparedBundle {
    pub bundle: Bundle,
    pub signed: SignedBundle,
}

pub struct SubmissionLoop {
    config: RescueConfig,
    chain: Arc<dyn ChainData>,
    signer: Arc<dyn BundleSigner>,
    relay: Arc<dyn BundleRelay>,
    operations: OperationSet,
    estimates: Vec<U256>,
    pricer: GasPricer,
    state: LoopState,
    current: Option<PreparedBundle>,
}

impl SubmissionLoop {
    pub fn new(
        config: RescueConfig,
        chain: Arc<dyn ChainData>,
        signer: Arc<dyn BundleSigner>,
        relay: Arc<dyn BundleRelay>,
        operations: OperationSet,
        estimates: Vec<U256>,
    ) -> Self {
        let pricer = GasPricer::from_gwei(config.priority_fee_gwei);
        Self {
            config,
            chain,
            signer,
            relay,
            operations,
            estimates,
            pricer,
            state: LoopState::Idle,
            current: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Bundle priced for `header`, rebuilt and re-signed only when the gas
    /// price differs from the current one
    pub async fn prepare(&mut self, header: &BlockHeader) -> RescueResult<PreparedBundle> {
        let gas_price = self.pricer.price_for(header)?;

        if let Some(current) = self
            .current
            .as_ref()
            .filter(|current| current.bundle.gas_price() == gas_price)
        {
            return Ok(current.clone());
        }

        let origin = self.operations.origin();
        let (funding, funding_value) =
            FundingCalculator::new(origin).compute(&self.estimates, gas_price)?;
        let bundle = BundleAssembler::assemble(
            funding,
            self.operations.operations(),
            &self.estimates,
            gas_price,
        )?;

        let accounts = [
            self.signer.address(SignerIdentity::Sponsor),
            self.signer.address(SignerIdentity::Origin),
        ];
        let nonces = NonceBook::fetch(self.chain.as_ref(), &accounts).await?;
        let signed = self.signer.sign(&bundle, &nonces).await?;

        debug!(
            "Built bundle at {} gwei, funding {} wei",
            format_gwei(gas_price),
            funding_value
        );

        let prepared = PreparedBundle { bundle, signed };
        self.current = Some(prepared.clone());
        Ok(prepared)
    }

    /// Drive submissions from the block stream until a terminal outcome.
    ///
    /// Every block starts a fresh attempt for `block + offset`. Earlier
    /// attempts stay in flight until their target block settles them, so a
    /// late inclusion still ends the run with success.
    pub async fn run(&mut self, blocks: &mut mpsc::Receiver<BlockHeader>) -> LoopOutcome {
        let mut processed = 0u64;
        let mut stream_open = true;
        let mut in_flight = InFlight::new();

        loop {
            let bounded = self.config.max_blocks > 0 && processed >= self.config.max_blocks;
            let accepting = stream_open && !bounded;

            if !accepting && in_flight.is_empty() {
                if bounded {
                    warn!("No inclusion after {} blocks, giving up", processed);
                    return LoopOutcome::Exhausted { blocks: processed };
                }
                return LoopOutcome::BlockStreamClosed;
            }

            let event = tokio::select! {
                biased;
                Some(event) = in_flight.next(), if !in_flight.is_empty() => LoopEvent::Attempt(event),
                header = blocks.recv(), if accepting => LoopEvent::Block(header),
            };

            match event {
                LoopEvent::Attempt(event) => {
                    if let Some(outcome) = self.settle(event, &mut in_flight) {
                        return outcome;
                    }
                }
                LoopEvent::Block(Some(header)) => {
                    processed += 1;
                    match self.start_attempt(&header).await {
                        Ok(Some(attempt)) => in_flight.push(attempt),
                        Ok(None) => {}
                        Err(e) => {
                            error!("Aborting at block {}: {}", header.number, e);
                            return LoopOutcome::Failed(e);
                        }
                    }
                }
                LoopEvent::Block(None) => {
                    if !in_flight.is_empty() {
                        info!(
                            "Block stream closed, waiting on {} outstanding attempts",
                            in_flight.len()
                        );
                    }
                    stream_open = false;
                }
            }
        }
    }

    /// Price, sign and simulate for `header`, then hand back the submission
    /// future. `None` when the block is skipped after a retryable error.
    async fn start_attempt(
        &mut self,
        header: &BlockHeader,
    ) -> RescueResult<Option<BoxFuture<'static, AttemptEvent>>> {
        let prepared = match self.prepare_and_check(header).await {
            Ok(prepared) => prepared,
            Err(e) if e.is_retryable() => {
                warn!("Skipping block {}: {}", header.number, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let attempt = SubmissionAttempt {
            target_block: header.number + self.config.block_offset,
            submitted_at_block: header.number,
        };
        info!(
            "Current block: {}, target block: {}, gas price: {} gwei",
            header.number,
            attempt.target_block,
            format_gwei(prepared.signed.gas_price())
        );

        let relay = self.relay.clone();
        let signed = prepared.signed;
        Ok(Some(
            async move {
                let submitted = relay.submit(&signed, attempt.target_block).await;
                AttemptEvent::Submitted(attempt, submitted)
            }
            .boxed(),
        ))
    }

    /// Apply a finished submission or resolution. Returns the outcome once
    /// the run is over.
    fn settle(&mut self, event: AttemptEvent, in_flight: &mut InFlight) -> Option<LoopOutcome> {
        match event {
            AttemptEvent::Submitted(attempt, Ok(pending)) => {
                debug!("Relay accepted bundle for block {}", attempt.target_block);
                let newer_pending = matches!(
                    self.state,
                    LoopState::AwaitingInclusion(current) if current.target_block > attempt.target_block
                );
                if !newer_pending {
                    self.state = LoopState::AwaitingInclusion(attempt);
                }
                in_flight.push(
                    async move { AttemptEvent::Resolved(attempt, pending.wait().await) }.boxed(),
                );
                None
            }
            AttemptEvent::Submitted(attempt, Err(e)) => {
                warn!("Submission for block {} failed: {}", attempt.target_block, e);
                None
            }
            AttemptEvent::Resolved(attempt, Ok(Resolution::BundleIncluded)) => {
                info!("Bundle included in block {}", attempt.target_block);
                self.state = LoopState::Included(attempt);
                Some(LoopOutcome::Included {
                    target_block: attempt.target_block,
                })
            }
            AttemptEvent::Resolved(attempt, Ok(Resolution::BlockPassedWithoutInclusion)) => {
                info!("Not included in block {}", attempt.target_block);
                None
            }
            AttemptEvent::Resolved(attempt, Ok(Resolution::AccountNonceTooHigh)) => {
                let target_block = attempt.target_block;
                error!("Account nonce too high for block {}, bailing", target_block);
                self.state = LoopState::NonceInvalid(attempt);
                Some(LoopOutcome::Failed(RescueError::NonceInvalid { target_block }))
            }
            AttemptEvent::Resolved(_, Ok(Resolution::Unrecognized(other))) => {
                error!("Relay returned an unknown resolution: {}", other);
                Some(LoopOutcome::Failed(RescueError::UnrecognizedResolution(other)))
            }
            AttemptEvent::Resolved(attempt, Err(e)) => {
                warn!(
                    "Could not resolve submission for block {}: {}",
                    attempt.target_block, e
                );
                None
            }
        }
    }

    async fn prepare_and_check(&mut self, header: &BlockHeader) -> RescueResult<PreparedBundle> {
        let prepared = self.prepare(header).await?;
        let simulation = SimulationGate::new(self.relay.as_ref())
            .check(&prepared.signed, header.number)
            .await?;
        debug!(
            "Simulated effective gas price at block {}: {} gwei",
            header.number,
            format_gwei(simulation.effective_gas_price())
        );
        Ok(prepared)
    }
}
