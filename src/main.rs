//! Asset Verifier Service
//!
//! Runs the verification engine against a Provenance node until interrupted.
//!
//! ## Overview
//!
//! The service:
//! 1. Streams blocks from the node's Tendermint RPC endpoint
//! 2. Picks out asset classification events addressed to the configured verifier
//! 3. Fetches each onboarded asset from the requestor's access route and verifies it
//! 4. Reports the verification result back to the contract
//!
//! Signing is not part of this service; verifications are logged by a dry-run executor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use asset_verifier::chain::{DryRunExecutor, RestChainQuerier, RpcBlockFeed};
use asset_verifier::config::{Config, CONFIG_PATH_ENV};
use asset_verifier::notification::{NotificationKind, NotificationProcessors, VerifierNotification};
use asset_verifier::{RouteFetchProcessor, VerifierClient, VerifierClientConfig};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point that initializes and runs the verifier engine.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file and environment
/// 3. Builds the chain collaborators and the verification processor
/// 4. Starts the engine, optionally replaying a transaction
/// 5. Runs until ctrl-c, then stops the engine
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging for debugging and monitoring
    tracing_subscriber::fmt::init();

    info!("Starting Asset Verifier Service");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    // Check for help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Asset Verifier Service");
        println!();
        println!("Usage: asset-verifier [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>        Use custom config file path");
        println!("  --from-height <n>      Start the block stream at height n");
        println!("  --replay <hash>        Replay a transaction through the verifier after startup");
        println!("  --print-config         Print the effective configuration as TOML and exit");
        println!("  --help, -h             Show this help message");
        println!();
        println!("Environment variables:");
        println!("  {}    Path to config file", CONFIG_PATH_ENV);
        println!("  ASSET_VERIFIER__<SECTION>__<KEY>    Override a single config value");
        return Ok(());
    }

    let config = match arg_value(&args, "--config") {
        Some(path) => {
            info!("Using custom config: {}", path);
            Config::load_from(path)?
        }
        None => Config::load()?,
    };
    info!("Configuration loaded successfully for chain {}", config.chain.name);

    if args.iter().any(|arg| arg == "--print-config") {
        println!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    let from_height = arg_value(&args, "--from-height")
        .map(|height| height.parse::<u64>().context("--from-height must be a block height"))
        .transpose()?;
    let replay_hash = arg_value(&args, "--replay");

    // Initialize all service components
    let timeout = Duration::from_millis(config.chain.request_timeout_ms);
    let querier = Arc::new(RestChainQuerier::new(
        &config.chain.rest_url,
        &config.chain.contract_address,
        timeout,
    )?);
    let feed = Arc::new(RpcBlockFeed::new(
        &config.chain.rpc_url,
        Duration::from_millis(config.verifier.block_poll_interval_ms),
        timeout,
    )?);
    let processor = RouteFetchProcessor::new(timeout)?;

    let client = VerifierClient::new(
        VerifierClientConfig::from_config(&config),
        querier,
        Arc::new(DryRunExecutor::new()),
        feed,
        processor,
    )
    .with_notification_processors(logging_processors()?);

    info!("All components initialized successfully");

    client.start_verifying(from_height).await?;
    if let Some(hash) = replay_hash {
        match client.manual_verify_hash(&hash).await {
            Ok(count) => info!("Replayed {} events from tx {}", count, hash),
            Err(e) => error!("Failed to replay tx {}: {}", hash, e),
        }
    }

    // Run the service (this blocks until shutdown)
    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    client.stop_verifying().await?;

    Ok(())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Logs the outcome notifications operators care about.
fn logging_processors() -> Result<NotificationProcessors> {
    let processors = NotificationProcessors::builder()
        .add_processor(NotificationKind::VerifyAssetSendSucceeded, |notification| async move {
            if let VerifierNotification::VerifyAssetSendSucceeded {
                scope_attribute,
                verification,
                txhash,
                ..
            } = notification
            {
                info!(
                    "Verification sent for scope {} (success = {}) in tx {}",
                    scope_attribute.scope_address, verification.success, txhash
                );
            }
            Ok(())
        })?
        .add_processor(NotificationKind::VerifyAssetSendFailed, |notification| async move {
            if let VerifierNotification::VerifyAssetSendFailed {
                scope_attribute,
                response_code,
                raw_log,
                ..
            } = notification
            {
                warn!(
                    "Verification for scope {} rejected with code {}: {}",
                    scope_attribute.scope_address, response_code, raw_log
                );
            }
            Ok(())
        })?
        .add_processor(NotificationKind::StreamExceptionOccurred, |notification| async move {
            if let VerifierNotification::StreamExceptionOccurred { error } = notification {
                warn!("Block stream error: {:#}", error);
            }
            Ok(())
        })?
        .add_processor(NotificationKind::StreamExited, |notification| async move {
            if let VerifierNotification::StreamExited { exit_height } = notification {
                warn!("Block stream exited at height {:?}", exit_height);
            }
            Ok(())
        })?
        .add_processor(NotificationKind::EventProcessorFailed, |notification| async move {
            if let VerifierNotification::EventProcessorFailed {
                failed_event_name,
                error,
            } = notification
            {
                error!("Notification processor for [{}] failed: {:#}", failed_event_name, error);
            }
            Ok(())
        })?
        .build();
    Ok(processors)
}
