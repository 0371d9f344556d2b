//! Agent configuration.
//!
//! Loaded from a JSON file (every field optional) and then overridden from `IMA_BLS_*`
//! environment variables.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SigningError};
use crate::logging::LogConfig;

pub const ENV_PREFIX: &str = "IMA_BLS_";

/// Executables implementing the BLS file contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityPaths {
    pub glue: Option<PathBuf>,
    pub hash_g1: Option<PathBuf>,
    /// Without it shares are rejected and aggregates go unverified.
    pub verify: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatherConfig {
    pub poll_period_ms: u64,
    pub max_steps: usize,
    /// Outer ceiling raced against the poll loop.
    pub wall_clock_ms: u64,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: 100,
            max_steps: 1800,
            wall_clock_ms: 120_000,
        }
    }
}

impl GatherConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn wall_clock(&self) -> Duration {
        Duration::from_millis(self.wall_clock_ms)
    }
}

/// Access to the remote key custodian holding this node's key share.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodianAccount {
    pub url: Option<String>,
    pub key_share_name: Option<String>,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl CustodianAccount {
    pub fn has_url(&self) -> bool {
        self.url.as_deref().map_or(false, |url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSide {
    pub name: String,
    pub chain_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainProperties {
    pub main_net: ChainSide,
    pub s_chain: ChainSide,
}

impl Default for ChainProperties {
    fn default() -> Self {
        Self {
            main_net: ChainSide {
                name: "Mainnet".to_string(),
                chain_id: String::new(),
            },
            s_chain: ChainSide::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Gather threshold signatures at all. When off, rounds complete without an aggregate.
    pub sign_messages: bool,
    pub capabilities: CapabilityPaths,
    /// Parent of the per-invocation scratch directories.
    pub scratch_dir: PathBuf,
    pub gather: GatherConfig,
    /// Fail rounds that could not verify their aggregate instead of reporting them as skipped.
    pub require_aggregate_verification: bool,
    /// Count shares as verified when there is no verify tool. Off, such shares are errors.
    pub accept_unverified_shares: bool,
    /// Promote successful round logs too, not just failed ones.
    pub expose_round_details: bool,
    /// Log rounds straight to the global subscriber instead of buffering.
    pub direct_round_log: bool,
    /// Address peers at their IMA agent port instead of their node RPC port.
    pub cross_ima_mode: bool,
    /// Position of this node in the network list.
    pub this_node_index: usize,
    pub chains: ChainProperties,
    pub s_chain_account: CustodianAccount,
    /// Used when the s-chain account has no custodian URL.
    pub main_net_account: CustodianAccount,
    pub rpc_timeout_ms: u64,
    pub network_info_path: Option<PathBuf>,
    pub topology_path: Option<PathBuf>,
    pub listen_address: String,
    pub listen_port: u16,
    pub log: LogConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sign_messages: false,
            capabilities: CapabilityPaths::default(),
            scratch_dir: PathBuf::from("/tmp/ima-bls-glue"),
            gather: GatherConfig::default(),
            require_aggregate_verification: false,
            accept_unverified_shares: false,
            expose_round_details: false,
            direct_round_log: false,
            cross_ima_mode: false,
            this_node_index: 0,
            chains: ChainProperties::default(),
            s_chain_account: CustodianAccount::default(),
            main_net_account: CustodianAccount::default(),
            rpc_timeout_ms: 30_000,
            network_info_path: None,
            topology_path: None,
            listen_address: "127.0.0.1".to_string(),
            listen_port: 10010,
            log: LogConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SigningError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        serde_json::from_str(&raw)
            .map_err(|err| SigningError::Config(format!("bad config {}: {}", path.display(), err)))
    }

    /// `IMA_BLS_CONFIG` names an optional base file; other `IMA_BLS_*` variables override it.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var(format!("{}CONFIG", ENV_PREFIX)) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| env::var(format!("{}{}", ENV_PREFIX, key)).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, keyed by the variable name without prefix.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        if let Some(v) = lookup("SIGN_MESSAGES") {
            self.sign_messages = parse_bool(&v);
        }
        if let Some(p) = path("GLUE_PATH") {
            self.capabilities.glue = Some(p);
        }
        if let Some(p) = path("HASH_G1_PATH") {
            self.capabilities.hash_g1 = Some(p);
        }
        if let Some(p) = path("VERIFY_PATH") {
            self.capabilities.verify = Some(p);
        }
        if let Some(p) = path("SCRATCH_DIR") {
            self.scratch_dir = p;
        }
        if let Some(v) = lookup("POLL_PERIOD_MS") {
            self.gather.poll_period_ms = parse_number("POLL_PERIOD_MS", &v)?;
        }
        if let Some(v) = lookup("MAX_STEPS") {
            self.gather.max_steps = parse_number("MAX_STEPS", &v)?;
        }
        if let Some(v) = lookup("WALL_CLOCK_MS") {
            self.gather.wall_clock_ms = parse_number("WALL_CLOCK_MS", &v)?;
        }
        if let Some(v) = lookup("REQUIRE_VERIFICATION") {
            self.require_aggregate_verification = parse_bool(&v);
        }
        if let Some(v) = lookup("ACCEPT_UNVERIFIED_SHARES") {
            self.accept_unverified_shares = parse_bool(&v);
        }
        if let Some(v) = lookup("EXPOSE_DETAILS") {
            self.expose_round_details = parse_bool(&v);
        }
        if let Some(v) = lookup("CROSS_IMA_MODE") {
            self.cross_ima_mode = parse_bool(&v);
        }
        if let Some(v) = lookup("NODE_INDEX") {
            self.this_node_index = parse_number("NODE_INDEX", &v)?;
        }
        if let Some(v) = lookup("SGX_URL") {
            self.s_chain_account.url = Some(v);
        }
        if let Some(v) = lookup("BLS_KEY_NAME") {
            self.s_chain_account.key_share_name = Some(v);
        }
        if let Some(p) = path("SSL_CERT") {
            self.s_chain_account.tls_cert_path = Some(p);
        }
        if let Some(p) = path("SSL_KEY") {
            self.s_chain_account.tls_key_path = Some(p);
        }
        if let Some(p) = path("NETWORK_INFO") {
            self.network_info_path = Some(p);
        }
        if let Some(p) = path("TOPOLOGY") {
            self.topology_path = Some(p);
        }
        if let Some(v) = lookup("LISTEN_PORT") {
            self.listen_port = parse_number("LISTEN_PORT", &v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log.level = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.gather.poll_period_ms == 0 || self.gather.max_steps == 0 {
            return Err(SigningError::Config(
                "gathering needs a non-zero poll period and step count".to_string(),
            ));
        }
        if self.gather.wall_clock_ms == 0 {
            return Err(SigningError::Config(
                "gathering wall clock limit must be non-zero".to_string(),
            ));
        }
        if self.capabilities.glue.is_some() && self.capabilities.hash_g1.is_none() {
            return Err(SigningError::Config(
                "BLS glue is configured without a hash-to-curve tool".to_string(),
            ));
        }
        Ok(())
    }

    /// Signing is on and there is a glue tool to aggregate with.
    pub fn signing_enabled(&self) -> bool {
        self.sign_messages && self.capabilities.glue.is_some()
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SigningError::Config(format!("{}{} is not a number: {}", ENV_PREFIX, key, value)))
}
