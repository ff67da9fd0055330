//! Operator-facing summaries of the prepared bundle

use crate::bundle::{SignedBundle, SimulationResult};

use ethers::types::{Address, U256};
use ethers::utils::format_units;
use tracing::info;

/// Render a wei amount in gwei
pub fn format_gwei(wei: U256) -> String {
    format_units(wei, "gwei").unwrap_or_else(|_| format!("{} wei", wei))
}

/// Log every transaction of a signed bundle
pub fn print_transactions(bundle: &SignedBundle) {
    for (index, tx) in bundle.transactions().iter().enumerate() {
        info!(
            slot = index,
            signer = %tx.signer,
            from = ?tx.from,
            to = ?tx.to,
            nonce = tx.nonce,
            gas_limit = %tx.gas_limit,
            hash = ?tx.hash,
            "{}",
            tx.label
        );
    }
}

/// Log the one-off summary shown before the submission loop starts
pub fn print_summary(
    origin: Address,
    sponsor: Address,
    bundle: &SignedBundle,
    simulation: &SimulationResult,
    total_gas: U256,
) {
    info!("Origin account: {:?}", origin);
    info!("Sponsor account: {:?}", sponsor);
    info!(
        "Simulated gas price: {} gwei",
        format_gwei(simulation.effective_gas_price())
    );
    info!("Gas price: {} gwei", format_gwei(bundle.gas_price()));
    info!("Gas used: {}", total_gas);
}
