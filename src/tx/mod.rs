//! Transaction preparation: gas budgeting, sponsor funding and signing

mod funding;
mod gas;
mod signer;

pub use funding::FundingCalculator;
pub use gas::{GasBudgeter, GasPricer};
pub use signer::{load_wallet, BundleSigner, LocalBundleSigner, NonceBook};

#[cfg(test)]
pub use signer::MockBundleSigner;
#[cfg(test)]
pub(crate) use signer::tests as signer_tests;
