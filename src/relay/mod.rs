//! Private relay transport: bundle simulation, submission and resolution

pub mod flashbots;

pub use flashbots::FlashbotsRelay;

use crate::bundle::{SignedBundle, SimulationResult};
use crate::error::RescueResult;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;

/// What happened to a bundle submitted for a target block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    BundleIncluded,
    BlockPassedWithoutInclusion,
    AccountNonceTooHigh,
    /// Anything the transport could not map onto the three outcomes above
    Unrecognized(String),
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::BundleIncluded => write!(f, "bundle included"),
            Resolution::BlockPassedWithoutInclusion => write!(f, "block passed without inclusion"),
            Resolution::AccountNonceTooHigh => write!(f, "account nonce too high"),
            Resolution::Unrecognized(other) => write!(f, "unrecognized ({})", other),
        }
    }
}

/// Handle to the outcome of one submission
pub struct PendingResolution {
    inner: BoxFuture<'static, RescueResult<Resolution>>,
}

impl PendingResolution {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = RescueResult<Resolution>> + Send + 'static,
    {
        Self {
            inner: future.boxed(),
        }
    }

    /// Already-known outcome
    pub fn ready(resolution: Resolution) -> Self {
        Self::new(futures::future::ready(Ok(resolution)))
    }

    /// Wait until the target block settles the submission
    pub async fn wait(self) -> RescueResult<Resolution> {
        self.inner.await
    }
}

impl fmt::Debug for PendingResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResolution").finish_non_exhaustive()
    }
}

/// Relay the bundle is simulated on and submitted to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BundleRelay: Send + Sync {
    /// Dry-run the bundle on top of `state_block`
    async fn simulate(
        &self,
        bundle: &SignedBundle,
        state_block: u64,
    ) -> RescueResult<SimulationResult>;

    /// Submit the bundle for inclusion in exactly `target_block`
    async fn submit(
        &self,
        bundle: &SignedBundle,
        target_block: u64,
    ) -> RescueResult<PendingResolution>;
}
