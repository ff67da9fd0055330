//! Bundle module - turns an ordered operation set into a funded, signed bundle
//!
//! This module provides:
//! - Operation and bundle slot types
//! - Deterministic bundle assembly with a sponsor-funded first slot
//! - Simulation gating before any submission
//! - The block-driven submission loop

pub mod assembler;
pub mod simulation;
pub mod submission;

pub use assembler::BundleAssembler;
pub use simulation::{SimulationGate, SimulationResult};
pub use submission::{LoopOutcome, LoopState, SubmissionAttempt, SubmissionLoop};

use ethers::types::{Address, Bytes, H256, U256};
use std::collections::BTreeMap;
use std::fmt;

/// Gas limit of a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// A single on-chain call the rescue needs to make
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub target: Address,
    pub calldata: Bytes,
    pub value: U256,
    /// Declared sender. Must be the origin when set, since every
    /// non-funding slot is signed by the origin key.
    pub from: Option<Address>,
    /// Price hint carried from the plan. Never used for pricing.
    pub declared_price: Option<U256>,
    pub label: String,
}

impl Operation {
    pub fn call(target: Address, calldata: impl Into<Bytes>, label: impl Into<String>) -> Self {
        Self {
            target,
            calldata: calldata.into(),
            value: U256::zero(),
            from: None,
            declared_price: None,
            label: label.into(),
        }
    }

    pub fn transfer(to: Address, value: U256, label: impl Into<String>) -> Self {
        Self {
            target: to,
            calldata: Bytes::default(),
            value,
            from: None,
            declared_price: None,
            label: label.into(),
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Ordered operations executed by one origin account
#[derive(Debug, Clone, Default)]
pub struct OperationSet {
    origin: Address,
    operations: Vec<Operation>,
}

impl OperationSet {
    pub fn new(origin: Address, operations: Vec<Operation>) -> Self {
        Self { origin, operations }
    }

    pub fn origin(&self) -> Address {
        self.origin
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Key a bundle slot is signed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignerIdentity {
    /// Pays for gas by funding the origin in slot 0
    Sponsor,
    /// Owns the assets and executes the rescue operations
    Origin,
}

impl fmt::Display for SignerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerIdentity::Sponsor => write!(f, "sponsor"),
            SignerIdentity::Origin => write!(f, "origin"),
        }
    }
}

/// One priced, gas-limited, not yet signed bundle entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSlot {
    pub operation: Operation,
    pub signer: SignerIdentity,
    pub gas_price: U256,
    pub gas_limit: U256,
}

/// Ordered unsigned slots sharing one gas price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    slots: Vec<BundleSlot>,
    gas_price: U256,
    funding_value: U256,
}

impl Bundle {
    pub(crate) fn new(slots: Vec<BundleSlot>, gas_price: U256, funding_value: U256) -> Self {
        Self {
            slots,
            gas_price,
            funding_value,
        }
    }

    pub fn slots(&self) -> &[BundleSlot] {
        &self.slots
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn funding_value(&self) -> U256 {
        self.funding_value
    }

    /// Sum of every slot's gas limit, funding slot included
    pub fn total_gas_limit(&self) -> U256 {
        self.slots
            .iter()
            .fold(U256::zero(), |acc, slot| acc.saturating_add(slot.gas_limit))
    }
}

/// A signed bundle transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub signer: SignerIdentity,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub gas_limit: U256,
    pub hash: H256,
    pub raw: Bytes,
    pub label: String,
}

/// Signed form of a [`Bundle`], ready for the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBundle {
    transactions: Vec<SignedTransaction>,
    gas_price: U256,
}

impl SignedBundle {
    pub fn new(transactions: Vec<SignedTransaction>, gas_price: U256) -> Self {
        Self {
            transactions,
            gas_price,
        }
    }

    pub fn transactions(&self) -> &[SignedTransaction] {
        &self.transactions
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn raw_transactions(&self) -> Vec<Bytes> {
        self.transactions.iter().map(|tx| tx.raw.clone()).collect()
    }

    pub fn hashes(&self) -> Vec<H256> {
        self.transactions.iter().map(|tx| tx.hash).collect()
    }

    /// Lowest nonce this bundle consumes for each sending account
    pub fn first_nonces(&self) -> BTreeMap<Address, u64> {
        let mut first = BTreeMap::new();
        for tx in &self.transactions {
            first
                .entry(tx.from)
                .and_modify(|nonce: &mut u64| *nonce = (*nonce).min(tx.nonce))
                .or_insert(tx.nonce);
        }
        first
    }
}

/// Latest block as seen by the submission loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub base_fee_per_gas: U256,
    pub timestamp: u64,
}
