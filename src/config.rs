//! Configuration management for the rescue engine
//!
//! Loads configuration from a TOML file with environment variable substitution.
//! Private keys never live in the file; the file only names the variables
//! holding them.

use anyhow::{Context, Result};
use ethers::types::{Address, Bytes};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub rescue: RescueConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    pub plan: PlanConfig,
}

/// Submission loop tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RescueConfig {
    /// Blocks ahead of the latest observed block to target
    #[serde(default = "default_block_offset")]
    pub block_offset: u64,
    /// Priority fee added to the base fee, in gwei
    #[serde(default = "default_priority_fee_gwei")]
    pub priority_fee_gwei: u64,
    /// Block iterations before giving up, 0 for no bound
    #[serde(default = "default_max_blocks")]
    pub max_blocks: u64,
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            block_offset: default_block_offset(),
            priority_fee_gwei: default_priority_fee_gwei(),
            max_blocks: default_max_blocks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    pub ws_url: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub expected_chain_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub url: String,
    #[serde(default = "default_relay_key_env")]
    pub signing_key_env: String,
    #[serde(default = "default_poll_interval_ms")]
    pub resolution_poll_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            signing_key_env: default_relay_key_env(),
            resolution_poll_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_sponsor_key_env")]
    pub sponsor_key_env: String,
    #[serde(default = "default_origin_key_env")]
    pub origin_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            sponsor_key_env: default_sponsor_key_env(),
            origin_key_env: default_origin_key_env(),
        }
    }
}

/// Which operations to bundle, in execution order
#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    pub recipient: Address,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    /// Explicit contract calls, e.g. withdrawals that must precede transfers
    Calls { calls: Vec<CallConfig> },
    /// Transfer the origin's full balance of each token to the recipient
    Erc20Sweep { tokens: Vec<SweepToken> },
    /// Transfer listed token ids to the recipient
    Erc721Sweep { tokens: Vec<NftHolding> },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CallConfig {
    pub target: Address,
    pub calldata: Bytes,
    /// Decimal wei
    pub value: Option<String>,
    pub label: Option<String>,
}

/// A token to sweep: a bare address, or a table adding the amount earlier
/// bundle steps move into the origin before the sweep runs
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SweepToken {
    Token(Address),
    WithIncoming {
        token: Address,
        /// Decimal token units
        incoming: String,
    },
}

impl SweepToken {
    pub fn token(&self) -> Address {
        match self {
            SweepToken::Token(token) | SweepToken::WithIncoming { token, .. } => *token,
        }
    }

    pub fn incoming(&self) -> Option<&str> {
        match self {
            SweepToken::Token(_) => None,
            SweepToken::WithIncoming { incoming, .. } => Some(incoming),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NftHolding {
    pub token: Address,
    /// Decimal token ids
    pub ids: Vec<String>,
}

fn default_block_offset() -> u64 {
    2
}

fn default_priority_fee_gwei() -> u64 {
    31
}

fn default_max_blocks() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_relay_url() -> String {
    "https://relay.flashbots.net".to_string()
}

fn default_relay_key_env() -> String {
    "FLASHBOTS_RELAY_SIGNING_KEY".to_string()
}

fn default_sponsor_key_env() -> String {
    "PRIVATE_KEY_SPONSOR".to_string()
}

fn default_origin_key_env() -> String {
    "PRIVATE_KEY_EXECUTOR".to_string()
}

impl Settings {
    /// Load settings from the file named by `RESCUE_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("RESCUE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.rescue.block_offset == 0 {
            anyhow::bail!("rescue.block_offset must be at least 1");
        }

        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("chain.rpc_urls must list at least one RPC endpoint");
        }

        url::Url::parse(&self.relay.url)
            .with_context(|| format!("Invalid relay url: {}", self.relay.url))?;

        if self.plan.steps.is_empty() {
            anyhow::bail!("plan.steps must contain at least one step");
        }

        for (index, step) in self.plan.steps.iter().enumerate() {
            let empty = match step {
                PlanStep::Calls { calls } => calls.is_empty(),
                PlanStep::Erc20Sweep { tokens } => tokens.is_empty(),
                PlanStep::Erc721Sweep { tokens } => tokens.iter().all(|t| t.ids.is_empty()),
            };
            if empty {
                anyhow::bail!("plan step {} has nothing to do", index);
            }
        }

        if self.rescue.max_blocks == 0 {
            tracing::warn!("rescue.max_blocks is 0 - the loop will run until a terminal outcome");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}.
///
/// Every referenced variable must be set.
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).with_context(|| {
            format!("Configuration references ${{{}}} but it is not set", var_name)
        })?;
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}
