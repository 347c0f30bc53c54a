//! Dry-run executor
//!
//! Stands in for a signing executor when the service runs without keys. The message that would
//! have been broadcast is logged and reported as accepted.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::ChainExecutor;
use crate::model::{BaseAccount, BroadcastTxResponse, VerifyAssetExecute};

#[derive(Debug, Clone, Default)]
pub struct DryRunExecutor;

impl DryRunExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChainExecutor for DryRunExecutor {
    async fn verify_asset(&self, execute: &VerifyAssetExecute, account: &BaseAccount) -> Result<BroadcastTxResponse> {
        info!(
            "Dry run: verify_asset from {} (account {}, sequence {}): {}",
            account.address,
            account.account_number,
            account.sequence,
            execute.to_msg()
        );
        Ok(BroadcastTxResponse {
            txhash: String::new(),
            code: 0,
            raw_log: "dry run: transaction not broadcast".to_string(),
        })
    }
}
