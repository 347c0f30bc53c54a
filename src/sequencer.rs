//! Account Sequencer
//!
//! Tracks the verifier account's sequence number locally so that consecutive verification
//! transactions can be signed without waiting for each one to be committed. The counter is
//! advanced optimistically on every use and re-read from chain whenever a submission goes wrong.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::chain::ChainQuerier;
use crate::model::BaseAccount;

/// Locally tracked signing state of the verifier account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedAccount {
    pub address: String,
    pub account_number: u64,
    /// Account as last read from chain
    pub base_account: BaseAccount,
    sequence_number: u64,
}

impl SequencedAccount {
    fn from_base_account(base_account: BaseAccount) -> Self {
        Self {
            address: base_account.address.clone(),
            account_number: base_account.account_number,
            sequence_number: base_account.sequence,
            base_account,
        }
    }

    /// Sequence number the next transaction will be signed with.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    fn get_and_increment(&mut self) -> BaseAccount {
        let account = BaseAccount {
            address: self.address.clone(),
            account_number: self.account_number,
            sequence: self.sequence_number,
        };
        self.sequence_number += 1;
        account
    }
}

/// Owner of the verifier's `SequencedAccount`. Not shared: lives inside the sender task.
pub struct AccountSequencer {
    querier: Arc<dyn ChainQuerier>,
    address: String,
    account: Option<SequencedAccount>,
}

impl AccountSequencer {
    /// Creates an empty sequencer. The account is looked up on first use.
    pub fn new(querier: Arc<dyn ChainQuerier>, address: impl Into<String>) -> Self {
        Self {
            querier,
            address: address.into(),
            account: None,
        }
    }

    /// Returns the account to sign the next transaction with and advances the local counter.
    pub async fn next_account(&mut self) -> Result<BaseAccount> {
        if self.account.is_none() {
            self.account = Some(self.lookup().await?);
        }
        match self.account.as_mut() {
            Some(account) => Ok(account.get_and_increment()),
            None => anyhow::bail!("Account {} is not tracked", self.address),
        }
    }

    /// Replaces the local state with the account as currently stored on chain.
    ///
    /// On failure the local state is dropped, so the next use retries the lookup.
    pub async fn reset(&mut self) -> Result<()> {
        self.account = None;
        let account = self.lookup().await?;
        info!(
            "Reset sequence number for {} to {}",
            account.address,
            account.sequence_number()
        );
        self.account = Some(account);
        Ok(())
    }

    /// The tracked account, if it has been looked up.
    pub fn account(&self) -> Option<&SequencedAccount> {
        self.account.as_ref()
    }

    async fn lookup(&self) -> Result<SequencedAccount> {
        let base_account = self
            .querier
            .get_base_account(&self.address)
            .await
            .with_context(|| format!("Failed to fetch account {} for sequencing", self.address))?;
        debug!(
            "Fetched account {} with sequence {}",
            base_account.address, base_account.sequence
        );
        Ok(SequencedAccount::from_base_account(base_account))
    }
}
