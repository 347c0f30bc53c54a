//! Configuration Management Module
//!
//! This module handles loading and validating configuration for the asset verifier service.
//! Configuration includes the chain endpoints, the verifier account and the engine's stream
//! and queue settings.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::VerifierError;

/// Environment variable holding an alternative configuration file path.
pub const CONFIG_PATH_ENV: &str = "ASSET_VERIFIER_CONFIG_PATH";

/// Prefix of environment overrides, e.g. `ASSET_VERIFIER__VERIFIER__ADDRESS`.
pub const ENV_PREFIX: &str = "ASSET_VERIFIER";

const DEFAULT_CONFIG_PATH: &str = "config/verifier.toml";

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Chain connection details
    pub chain: ChainConfig,
    /// Verifier account and engine settings
    pub verifier: VerifierConfig,
}

/// Connection details for the Provenance node and the classification contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// REST gateway used for contract queries, transactions and accounts
    pub rest_url: String,
    /// Tendermint RPC endpoint used for the block stream
    pub rpc_url: String,
    /// Bech32 address of the asset classification contract
    pub contract_address: String,
    /// Only dispatch wasm events emitted by `contract_address`
    #[serde(default = "default_true")]
    pub filter_contract_events: bool,
    /// Timeout for every HTTP request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Verifier-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Bech32 address of the verifier account events must target
    pub address: String,
    /// What to do when the block stream ends
    #[serde(default)]
    pub stream_restart_mode: StreamRestartMode,
    /// Polling interval for new blocks once the stream has caught up, in milliseconds
    #[serde(default = "default_block_poll_interval_ms")]
    pub block_poll_interval_ms: u64,
    #[serde(default = "default_verification_queue_capacity")]
    pub verification_queue_capacity: usize,
    #[serde(default = "default_notification_queue_capacity")]
    pub notification_queue_capacity: usize,
    /// Cancel the engine when the failure notification processor itself fails
    #[serde(default)]
    pub halt_on_failure_callback_error: bool,
}

/// Behavior of the engine when the block stream completes or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StreamRestartMode {
    /// Reconnect from the last tracked height after `restart_delay_ms`
    On {
        #[serde(default = "default_restart_delay_ms")]
        restart_delay_ms: u64,
    },
    /// Stop after the stream ends
    Off,
}

impl Default for StreamRestartMode {
    fn default() -> Self {
        StreamRestartMode::On {
            restart_delay_ms: default_restart_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_restart_delay_ms() -> u64 {
    5_000
}

fn default_block_poll_interval_ms() -> u64 {
    1_000
}

fn default_verification_queue_capacity() -> usize {
    64
}

fn default_notification_queue_capacity() -> usize {
    256
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Loads configuration from `config/verifier.toml`, or from the file named by
    /// `ASSET_VERIFIER_CONFIG_PATH`, with environment overrides applied on top.
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - The file is missing, malformed or invalid
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(config_path)
    }

    /// Loads configuration from the given TOML file with environment overrides applied on top.
    pub fn load_from(config_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            // Configuration file doesn't exist - user needs to copy template
            return Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/verifier.template.toml config/verifier.toml\n\
                Then edit config/verifier.toml with your actual values.",
                config_path.display()
            ));
        }

        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from(config_path).format(::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values a running verifier cannot do without.
    pub fn validate(&self) -> Result<(), VerifierError> {
        if self.verifier.address.trim().is_empty() {
            return Err(VerifierError::InvalidConfig(
                "verifier.address must not be empty".to_string(),
            ));
        }
        if self.chain.contract_address.trim().is_empty() {
            return Err(VerifierError::InvalidConfig(
                "chain.contract_address must not be empty".to_string(),
            ));
        }
        if self.verifier.verification_queue_capacity == 0 {
            return Err(VerifierError::InvalidConfig(
                "verifier.verification_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.verifier.notification_queue_capacity == 0 {
            return Err(VerifierError::InvalidConfig(
                "verifier.notification_queue_capacity must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [("chain.rest_url", &self.chain.rest_url), ("chain.rpc_url", &self.chain.rpc_url)] {
            Url::parse(value)
                .map_err(|e| VerifierError::InvalidConfig(format!("{} is not a valid URL ({}): {}", name, value, e)))?;
        }
        Ok(())
    }

    /// Creates a default configuration with placeholder values.
    ///
    /// Points at a local node. The verifier and contract addresses must be replaced before
    /// the configuration passes `validate()`.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self {
            chain: ChainConfig {
                name: "localnet".to_string(),
                rest_url: "http://127.0.0.1:1317".to_string(),
                rpc_url: "http://127.0.0.1:26657".to_string(),
                contract_address: String::new(),
                filter_contract_events: true,
                request_timeout_ms: default_request_timeout_ms(),
            },
            verifier: VerifierConfig {
                address: String::new(),
                stream_restart_mode: StreamRestartMode::default(),
                block_poll_interval_ms: default_block_poll_interval_ms(),
                verification_queue_capacity: default_verification_queue_capacity(),
                notification_queue_capacity: default_notification_queue_capacity(),
                halt_on_failure_callback_error: false,
            },
        }
    }
}
