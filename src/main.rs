//! Bundle Rescue - sponsored private-bundle submission
//!
//! Moves assets out of an account that holds no ETH (or whose key is
//! compromised) by submitting a bundle whose first transaction, signed by a
//! separate sponsor key, funds exactly the gas the rest of the bundle needs.

use anyhow::Result;
use std::process::ExitCode;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod bundle;
mod chain;
mod config;
mod error;
mod plan;
mod relay;
mod report;
mod rescue;
mod tx;

use bundle::LoopOutcome;
use config::Settings;
use rescue::RescueEngine;

/// Exit code when interrupted by Ctrl+C or SIGTERM
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    init_logging();

    info!("Starting Bundle Rescue v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<u8> {
    let settings = Settings::load()?;
    info!(
        "Loaded configuration with {} plan steps, targeting block +{}",
        settings.plan.steps.len(),
        settings.rescue.block_offset
    );

    let engine = RescueEngine::from_settings(&settings).await?;

    // Start block listener
    let (block_tx, mut block_rx) = mpsc::channel(16);
    let listener = engine.block_listener(block_tx);
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.listen().await {
            error!("Block listener error: {}", e);
        }
    });

    let code = tokio::select! {
        outcome = engine.execute(&mut block_rx) => {
            report_outcome(&outcome);
            outcome.exit_code()
        }
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, abandoning rescue");
            INTERRUPTED
        }
    };

    listener_handle.abort();

    info!("Bundle Rescue stopped");
    Ok(code)
}

fn report_outcome(outcome: &LoopOutcome) {
    match outcome {
        LoopOutcome::Included { target_block } => {
            info!("Bundle included in block {}", target_block)
        }
        LoopOutcome::Failed(e) => error!("Rescue failed: {}", e),
        LoopOutcome::Exhausted { blocks } => {
            error!("Bundle not included after {} blocks", blocks)
        }
        LoopOutcome::BlockStreamClosed => error!("Block stream closed before inclusion"),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bundle_rescue=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
