//! Rescue module - wires the plan, chain, signer and relay into one run
//!
//! Setup builds and dry-runs the bundle once against the latest block and
//! aborts on any failure; the submission loop then takes over.

pub mod engine;

pub use engine::RescueEngine;
