//! Event Handlers
//!
//! A handler owns the reaction to one contract event kind. Handlers report everything they do
//! through the notification queue and, when a verification must be submitted, place a
//! `VerificationMessage` on the verification queue. They never talk to the chain executor.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::chain::ChainQuerier;
use crate::event::{AssetClassificationEvent, ContractEvent};
use crate::model::{AssetScopeAttribute, AssetVerification};
use crate::notification::VerifierNotification;
use crate::processor::VerificationProcessor;

pub mod onboard;
pub mod verify;

pub use onboard::OnboardEventHandler;
pub use verify::VerifyAssetEventHandler;

/// Reaction to a single contract event kind.
#[async_trait]
pub trait EventHandler<P: VerificationProcessor>: Send + Sync {
    /// The contract event this handler is registered for.
    fn event_type(&self) -> ContractEvent;

    /// Processes one event, reporting the outcome through the parameters' queues.
    async fn handle_event(&self, parameters: EventHandlerParameters<P>);
}

/// A verification decision waiting to be submitted to the contract.
#[derive(Debug, Clone)]
pub struct VerificationMessage {
    /// Prepended to any failure reported while submitting
    pub failure_message_prefix: String,
    pub event: AssetClassificationEvent,
    pub scope_attribute: AssetScopeAttribute,
    pub verification: AssetVerification,
}

/// Everything a handler needs to process one event.
pub struct EventHandlerParameters<P: VerificationProcessor> {
    pub event: AssetClassificationEvent,
    pub querier: Arc<dyn ChainQuerier>,
    /// Address of the account this verifier signs with
    pub verifier_address: String,
    pub processor: Arc<P>,
    pub verification_sender: mpsc::Sender<VerificationMessage>,
    pub notification_sender: mpsc::Sender<VerifierNotification>,
}

impl<P: VerificationProcessor> EventHandlerParameters<P> {
    /// Queues a notification. Dropped if the sink has already shut down.
    pub async fn notify(&self, notification: VerifierNotification) {
        if self.notification_sender.send(notification).await.is_err() {
            debug!("Notification queue closed, dropping notification");
        }
    }

    /// Queues a verification for submission. Dropped if the sender has already shut down.
    pub async fn enqueue_verification(&self, message: VerificationMessage) {
        if self.verification_sender.send(message).await.is_err() {
            debug!("Verification queue closed, dropping verification");
        }
    }
}

/// Log text attached to the scope lookup steps shared by the default handlers.
pub(crate) struct ScopeLookupMessages<'a> {
    pub missing_scope_address: &'a str,
    pub missing_scope_attribute: &'a str,
}

/// Runs the checks shared by the default handlers: the event must target this verifier, name a
/// scope, and that scope must carry a scope attribute.
///
/// Emits the matching ignore notification and returns `None` when any check fails.
pub(crate) async fn resolve_scope_attribute<P: VerificationProcessor>(
    parameters: &EventHandlerParameters<P>,
    event_type: ContractEvent,
    message_prefix: &str,
    messages: ScopeLookupMessages<'_>,
) -> Option<AssetScopeAttribute> {
    let event = &parameters.event;
    let Some(event_verifier_address) = event.verifier_address.as_ref() else {
        parameters
            .notify(VerifierNotification::no_verifier_address(event.clone(), event_type))
            .await;
        return None;
    };
    if *event_verifier_address != parameters.verifier_address {
        parameters
            .notify(VerifierNotification::different_verifier_address(
                event.clone(),
                event_type,
                event_verifier_address.clone(),
                parameters.verifier_address.clone(),
            ))
            .await;
        return None;
    }
    let Some(scope_address) = event.scope_address.as_deref() else {
        parameters
            .notify(VerifierNotification::EventIgnoredMissingScopeAddress {
                event: event.clone(),
                event_type,
                message: format!("{} {}", message_prefix, messages.missing_scope_address),
            })
            .await;
        return None;
    };
    match parameters.querier.query_asset_scope_attribute(scope_address).await {
        Ok(scope_attribute) => Some(scope_attribute),
        Err(error) => {
            parameters
                .notify(VerifierNotification::EventIgnoredMissingScopeAttribute {
                    event: event.clone(),
                    event_type,
                    message: format!("{} {}", message_prefix, messages.missing_scope_attribute),
                    error: Arc::new(error),
                })
                .await;
            None
        }
    }
}
