//! Verification Sender
//!
//! Sole consumer of the verification queue. Each queued decision is turned into a
//! `verify_asset` execution signed with the next locally tracked sequence number. Messages are
//! submitted strictly one at a time so the sequence numbers stay gap free.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::chain::ChainExecutor;
use crate::handler::VerificationMessage;
use crate::model::VerifyAssetExecute;
use crate::notification::{panic_message, VerifierNotification};
use crate::sequencer::AccountSequencer;

pub struct VerificationSender {
    executor: Arc<dyn ChainExecutor>,
    sequencer: AccountSequencer,
    notification_sender: mpsc::Sender<VerifierNotification>,
}

impl VerificationSender {
    pub fn new(
        executor: Arc<dyn ChainExecutor>,
        sequencer: AccountSequencer,
        notification_sender: mpsc::Sender<VerifierNotification>,
    ) -> Self {
        Self {
            executor,
            sequencer,
            notification_sender,
        }
    }

    /// The sequencer this sender signs with.
    pub fn sequencer(&self) -> &AccountSequencer {
        &self.sequencer
    }

    /// Submits one verification and reports the outcome.
    ///
    /// Never fails: submission errors are reported as notifications and the local sequence is
    /// re-read from chain so the next message signs with a valid number. A panic while
    /// submitting is reported as `VerifyEventChannelThrewException` and handled the same way.
    pub async fn send_verification(&mut self, message: VerificationMessage) {
        let submitted = AssertUnwindSafe(self.submit(&message)).catch_unwind().await;
        if let Err(panic) = submitted {
            let reason = panic_message(panic.as_ref());
            error!(
                "{} Verification channel panicked while submitting: {}",
                message.failure_message_prefix, reason
            );
            self.notify(VerifierNotification::VerifyEventChannelThrewException {
                error: Arc::new(anyhow::anyhow!(
                    "Verification submission panicked: {}",
                    reason
                )),
            })
            .await;
            self.resync_sequence(&message).await;
        }
    }

    async fn submit(&mut self, message: &VerificationMessage) {
        let execute = VerifyAssetExecute::with_scope_address(
            message.scope_attribute.scope_address.clone(),
            &message.verification,
        );
        let result = match self.sequencer.next_account().await {
            Ok(account) => {
                debug!(
                    "Submitting verification for scope {} with sequence {}",
                    execute.scope_address, account.sequence
                );
                self.executor.verify_asset(&execute, &account).await
            }
            Err(error) => Err(error),
        };

        match result {
            Err(error) => {
                warn!(
                    "{} Sending verification to smart contract failed: {:#}",
                    message.failure_message_prefix, error
                );
                self.notify(VerifierNotification::VerifyAssetSendThrewException {
                    event: message.event.clone(),
                    scope_attribute: message.scope_attribute.clone(),
                    verification: message.verification.clone(),
                    message: format!(
                        "{} Sending verification to smart contract failed",
                        message.failure_message_prefix
                    ),
                    error: Arc::new(error),
                })
                .await;
                self.resync_sequence(message).await;
            }
            Ok(response) if response.is_success() => {
                info!(
                    "Verification for scope {} submitted in tx {}",
                    execute.scope_address, response.txhash
                );
                self.notify(VerifierNotification::VerifyAssetSendSucceeded {
                    event: message.event.clone(),
                    scope_attribute: message.scope_attribute.clone(),
                    verification: message.verification.clone(),
                    txhash: response.txhash,
                })
                .await;
            }
            Ok(response) => {
                warn!(
                    "{} Sending verification resulted in status code [{}] and had message: {}",
                    message.failure_message_prefix, response.code, response.raw_log
                );
                self.notify(VerifierNotification::VerifyAssetSendFailed {
                    event: message.event.clone(),
                    scope_attribute: message.scope_attribute.clone(),
                    verification: message.verification.clone(),
                    response_code: response.code,
                    raw_log: response.raw_log,
                })
                .await;
                // A rejected broadcast does not consume the sequence number
                self.resync_sequence(message).await;
            }
        }
    }

    async fn resync_sequence(&mut self, message: &VerificationMessage) {
        if let Err(error) = self.sequencer.reset().await {
            warn!(
                "{} Failed to reset account data after transaction: {:#}",
                message.failure_message_prefix, error
            );
            self.notify(VerifierNotification::VerifyAssetSendSyncSequenceNumberFailed {
                event: message.event.clone(),
                scope_attribute: message.scope_attribute.clone(),
                verification: message.verification.clone(),
                message: format!(
                    "{} Failed to reset account data after transaction. This may require an app restart",
                    message.failure_message_prefix
                ),
                error: Arc::new(error),
            })
            .await;
        }
    }

    async fn notify(&self, notification: VerifierNotification) {
        if self.notification_sender.send(notification).await.is_err() {
            debug!("Notification queue closed, dropping notification");
        }
    }

    /// Drains the verification queue until it closes or the run is cancelled.
    pub(crate) async fn run(
        mut self,
        mut receiver: mpsc::Receiver<VerificationMessage>,
        mut token: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                reason = token.cancelled() => {
                    debug!("Verification sender stopping: {}", reason);
                    return;
                }
                message = receiver.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            };
            tokio::select! {
                reason = token.cancelled() => {
                    debug!("Verification sender stopping mid-submission: {}", reason);
                    return;
                }
                _ = self.send_verification(message) => {}
            }
        }
    }
}
