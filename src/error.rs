//! Error types for the bundle rescue engine

use thiserror::Error;

/// Main error type for the rescue engine
#[derive(Error, Debug)]
pub enum RescueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain connection error: {0}")]
    ChainConnection(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Invalid rescue plan: {0}")]
    InvalidPlan(String),

    #[error("Gas estimation failed for operation {index}: {cause}")]
    EstimationFailed { index: usize, cause: String },

    #[error("Funding value overflows 256 bits")]
    FundingOverflow,

    #[error("Simulation rejected bundle at slot {index}: {cause}")]
    SimulationRejected { index: usize, cause: String },

    #[error("Simulation transport error: {0}")]
    SimulationTransport(String),

    #[error("Submission transport error: {0}")]
    SubmissionTransport(String),

    #[error("Account nonce moved past the bundle while targeting block {target_block}")]
    NonceInvalid { target_block: u64 },

    #[error("Unrecognized bundle resolution: {0}")]
    UnrecognizedResolution(String),
}

impl RescueError {
    /// Check if error is retryable on the next block
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RescueError::ChainConnection(_)
                | RescueError::SubmissionTransport(_)
                | RescueError::SimulationTransport(_)
        )
    }
}

/// Result type for rescue operations
pub type RescueResult<T> = Result<T, RescueError>;
