//! Runtime configuration.
//!
//! `RuntimeConfig` is loaded from a TOML document or from environment
//! variables. Every field has a default, so an empty TOML file or an empty
//! environment yields a usable configuration.
//!
//! ```toml
//! flush_threshold = 5
//! flush_failure = "requeue"
//! debug = true
//! generation_log_dir = "logs"
//!
//! [model]
//! name = "deepseek-chat"
//!
//! [identity]
//! network = "base-sepolia"
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{PalError, PalResult};

/// Hard per-attempt timeout for one model call.
pub const MODEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of model-call attempts per step.
pub const MAX_MODEL_ATTEMPTS: u32 = 3;

/// Delay between consecutive steps of one agent.
pub const STEP_PACING: Duration = Duration::from_millis(250);

/// Seed used for credential derivation when none is configured.
pub const DEFAULT_AGENT_SEED: &str = "default-agent-seed-change-in-production";

const DEVNET_MODEL_URL: &str = "https://devnet.aimo.network/api/v1";
const PRODUCTION_MODEL_URL: &str = "https://api.aimo.network/v1";

/// What the storage manager does with a batch whose upload failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushFailurePolicy {
    /// The batch is lost. The buffer was already cleared before the upload.
    #[default]
    Drop,
    /// The batch is put back at the front of the buffer for the next flush.
    Requeue,
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Buffered decision-log entries that trigger an automatic flush.
    pub flush_threshold: usize,
    pub flush_failure: FlushFailurePolicy,
    /// Enables debug-level logging when `RUST_LOG` is not set.
    pub debug: bool,
    /// Seed for deterministic per-agent credential derivation.
    pub agent_seed: String,
    /// Messages of history read per step; 0 reads the full history.
    pub history_limit: usize,
    /// Directory for per-agent generation logs. `None` disables them.
    pub generation_log_dir: Option<PathBuf>,
    pub model: ModelConfig,
    pub identity: IdentityConfig,
    pub storage: StorageConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 1,
            flush_failure: FlushFailurePolicy::Drop,
            debug: false,
            agent_seed: DEFAULT_AGENT_SEED.to_string(),
            history_limit: 0,
            generation_log_dir: None,
            model: ModelConfig::default(),
            identity: IdentityConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// OpenAI-compatible model endpoint settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub name: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEVNET_MODEL_URL.to_string(),
            api_key: None,
            name: "deepseek-chat".to_string(),
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name)
            .finish()
    }
}

/// Remote identity service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Game contract address written into identity metadata.
    pub game_contract_address: String,
    pub network: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            game_contract_address: "0x0000000000000000000000000000000000000000".to_string(),
            network: "base-sepolia".to_string(),
        }
    }
}

/// Content-addressed storage endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub indexer_rpc: String,
    pub evm_rpc: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            indexer_rpc: "https://indexer-storage-testnet-standard.0g.ai".to_string(),
            evm_rpc: "https://evmrpc-testnet.0g.ai/".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `PalError::Config` if the TOML is malformed or a value fails
    /// validation.
    pub fn from_toml_str(s: &str) -> PalResult<Self> {
        let config: RuntimeConfig = toml::from_str(s).map_err(|e| PalError::Config {
            reason: format!("failed to parse runtime TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse the TOML file at `path`.
    pub fn from_file(path: &Path) -> PalResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| PalError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Build a configuration from process environment variables.
    pub fn from_env() -> PalResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// `from_env` delegates here; tests pass a map-backed closure.
    pub fn from_lookup<F>(lookup: F) -> PalResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RuntimeConfig::default();

        if let Some(v) = lookup("AGENT_LOG_FLUSH_THRESHOLD") {
            config.flush_threshold = parse_number("AGENT_LOG_FLUSH_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("AGENT_LOG_FLUSH_FAILURE") {
            config.flush_failure = match v.trim().to_lowercase().as_str() {
                "drop" => FlushFailurePolicy::Drop,
                "requeue" => FlushFailurePolicy::Requeue,
                other => {
                    return Err(PalError::Config {
                        reason: format!("AGENT_LOG_FLUSH_FAILURE must be 'drop' or 'requeue', got '{other}'"),
                    })
                }
            };
        }
        config.debug = is_true(lookup("PAL_DEBUG")) || is_true(lookup("CHAOSCHAIN_DEBUG"));
        if let Some(v) = lookup("AGENT_SEED") {
            config.agent_seed = v;
        }
        if let Some(v) = lookup("AGENT_HISTORY_LIMIT") {
            config.history_limit = parse_number("AGENT_HISTORY_LIMIT", &v)?;
        }
        if let Some(v) = lookup("AGENT_GENERATION_LOG_DIR").filter(|v| !v.trim().is_empty()) {
            config.generation_log_dir = Some(PathBuf::from(v));
        }

        config.model.base_url = match lookup("AIMO_BASE_URL") {
            Some(url) => url,
            None if is_true(lookup("AIMO_USE_PRODUCTION")) => PRODUCTION_MODEL_URL.to_string(),
            None => DEVNET_MODEL_URL.to_string(),
        };
        config.model.api_key = lookup("AIMO_API_KEY").filter(|k| !k.is_empty());
        if let Some(v) = lookup("AGENT_MODEL") {
            config.model.name = v;
        }

        if let Some(v) = lookup("AGENT_NFT_ADDRESS") {
            config.identity.game_contract_address = v;
        }
        if let Some(v) = lookup("AGENT_NETWORK") {
            config.identity.network = v;
        }
        if let Some(v) = lookup("ZG_INDEXER_RPC") {
            config.storage.indexer_rpc = v;
        }
        if let Some(v) = lookup("ZG_EVM_RPC") {
            config.storage.evm_rpc = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> PalResult<()> {
        if self.flush_threshold == 0 {
            return Err(PalError::Config {
                reason: "flush_threshold must be at least 1".to_string(),
            });
        }
        if self.model.base_url.trim().is_empty() {
            return Err(PalError::Config {
                reason: "model.base_url must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> PalResult<usize> {
    value.trim().parse::<usize>().map_err(|e| PalError::Config {
        reason: format!("{key} must be a non-negative integer, got '{value}': {e}"),
    })
}

fn is_true(value: Option<String>) -> bool {
    value.map(|v| v.trim().eq_ignore_ascii_case("true")).unwrap_or(false)
}
