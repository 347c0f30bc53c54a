//! Unit tests for configuration management
//!
//! These tests verify configuration defaults, file loading and validation.

use std::path::PathBuf;

use asset_verifier::client::VerifierClientConfig;
use asset_verifier::config::{Config, StreamRestartMode};
use asset_verifier::error::VerifierError;

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{CONTRACT_ADDRESS, VERIFIER_ADDRESS};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Configuration that passes validation.
fn valid_config() -> Config {
    let mut config = Config::default();
    config.verifier.address = VERIFIER_ADDRESS.to_string();
    config.chain.contract_address = CONTRACT_ADDRESS.to_string();
    config
}

/// Writes `contents` to a uniquely named TOML file in the temp directory.
fn write_config_file(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("asset-verifier-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).expect("Failed to write config file");
    path
}

// ============================================================================
// TESTS
// ============================================================================

/// Test that default configuration has the expected values
/// Why: Defaults point at a local node and restart the stream after five seconds
#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.chain.name, "localnet");
    assert_eq!(config.chain.rest_url, "http://127.0.0.1:1317");
    assert_eq!(config.chain.rpc_url, "http://127.0.0.1:26657");
    assert!(config.chain.filter_contract_events);
    assert_eq!(config.chain.request_timeout_ms, 10_000);
    assert_eq!(
        config.verifier.stream_restart_mode,
        StreamRestartMode::On { restart_delay_ms: 5_000 }
    );
    assert_eq!(config.verifier.block_poll_interval_ms, 1_000);
    assert_eq!(config.verifier.verification_queue_capacity, 64);
    assert_eq!(config.verifier.notification_queue_capacity, 256);
    assert!(!config.verifier.halt_on_failure_callback_error);
}

/// Test that the placeholder addresses of the default configuration fail validation
/// Why: A verifier must never start without knowing which account it acts for
#[test]
fn test_default_config_requires_addresses() {
    assert!(matches!(
        Config::default().validate(),
        Err(VerifierError::InvalidConfig(message)) if message.contains("verifier.address")
    ));

    let mut config = Config::default();
    config.verifier.address = VERIFIER_ADDRESS.to_string();
    assert!(matches!(
        config.validate(),
        Err(VerifierError::InvalidConfig(message)) if message.contains("chain.contract_address")
    ));

    tokio_test::assert_ok!(valid_config().validate());
}

/// Test that invalid URLs and zero queue capacities are rejected
/// Why: Both would only fail once the engine is already running
#[test]
fn test_validation_rejects_bad_values() {
    let mut config = valid_config();
    config.chain.rpc_url = "not a url".to_string();
    assert!(matches!(
        config.validate(),
        Err(VerifierError::InvalidConfig(message)) if message.contains("chain.rpc_url")
    ));

    let mut config = valid_config();
    config.verifier.verification_queue_capacity = 0;
    assert!(config.validate().is_err());

    let mut config = valid_config();
    config.verifier.notification_queue_capacity = 0;
    assert!(config.validate().is_err());
}

/// Test that a configuration file is loaded with defaults for omitted values
/// Why: Deployments only need to set the values they care about
#[test]
fn test_load_from_file() {
    let path = write_config_file(&format!(
        r#"
[chain]
name = "pio-testnet-1"
rest_url = "http://node:1317"
rpc_url = "http://node:26657"
contract_address = "{}"

[verifier]
address = "{}"

[verifier.stream_restart_mode]
mode = "off"
"#,
        CONTRACT_ADDRESS, VERIFIER_ADDRESS
    ));

    let config = Config::load_from(&path).expect("config should load");
    std::fs::remove_file(&path).ok();

    assert_eq!(config.chain.name, "pio-testnet-1");
    assert_eq!(config.chain.rest_url, "http://node:1317");
    assert_eq!(config.verifier.address, VERIFIER_ADDRESS);
    assert_eq!(config.verifier.stream_restart_mode, StreamRestartMode::Off);
    assert!(config.chain.filter_contract_events);
    assert_eq!(config.verifier.verification_queue_capacity, 64);
}

/// Test that a configuration survives a TOML round trip through the loader
/// Why: The binary prints the effective configuration in the same format it loads
#[test]
fn test_serialized_config_loads() {
    let mut config = valid_config();
    config.verifier.stream_restart_mode = StreamRestartMode::On { restart_delay_ms: 250 };
    config.verifier.halt_on_failure_callback_error = true;
    let path = write_config_file(&toml::to_string_pretty(&config).expect("config should serialize"));

    let loaded = Config::load_from(&path).expect("config should load");
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, config);
}

/// Test that an invalid file is rejected by validation after loading
/// Why: Loading must not hand out a configuration the engine cannot run with
#[test]
fn test_load_from_rejects_invalid_file() {
    let path = write_config_file(
        r#"
[chain]
name = "pio-testnet-1"
rest_url = "http://node:1317"
rpc_url = "http://node:26657"
contract_address = "tp1contract"

[verifier]
address = ""
"#,
    );

    let result = Config::load_from(&path);
    std::fs::remove_file(&path).ok();

    assert!(result.is_err());
}

/// Test that a missing configuration file is an error pointing at the template
/// Why: First-time users need to know which file to copy
#[test]
fn test_load_from_missing_file() {
    let path = std::env::temp_dir().join("asset-verifier-does-not-exist.toml");

    let error = tokio_test::assert_err!(Config::load_from(&path));

    assert!(error.to_string().contains("verifier.template.toml"));
}

/// Test that the engine settings are derived from the configuration
/// Why: Contract filtering is only applied when enabled
#[test]
fn test_client_config_from_config() {
    let mut config = valid_config();
    let client_config = VerifierClientConfig::from_config(&config);
    assert_eq!(client_config.verifier_address, VERIFIER_ADDRESS);
    assert_eq!(client_config.contract_address.as_deref(), Some(CONTRACT_ADDRESS));
    assert_eq!(client_config.stream_restart_mode, config.verifier.stream_restart_mode);

    config.chain.filter_contract_events = false;
    assert_eq!(VerifierClientConfig::from_config(&config).contract_address, None);
}
