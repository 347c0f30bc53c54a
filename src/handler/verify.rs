//! Default handler for `verify_asset` events
//!
//! Confirms that a verification sent by this verifier moved the scope out of pending.

use async_trait::async_trait;

use super::{resolve_scope_attribute, EventHandler, EventHandlerParameters, ScopeLookupMessages};
use crate::event::ContractEvent;
use crate::model::AssetOnboardingStatus;
use crate::notification::VerifierNotification;
use crate::processor::VerificationProcessor;

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyAssetEventHandler;

#[async_trait]
impl<P: VerificationProcessor> EventHandler<P> for VerifyAssetEventHandler {
    fn event_type(&self) -> ContractEvent {
        ContractEvent::VerifyAsset
    }

    async fn handle_event(&self, parameters: EventHandlerParameters<P>) {
        let event = &parameters.event;
        let message_prefix = format!(
            "[VERIFY_ASSET | Tx: {} | Asset: {}]:",
            event.tx_hash(),
            event.scope_address.as_deref().unwrap_or("null")
        );
        let messages = ScopeLookupMessages {
            missing_scope_address: "Expected the verify asset event to include a scope address, but it was missing",
            missing_scope_attribute: "Intercepted verification did not point to a scope with a scope attribute",
        };
        let Some(scope_attribute) =
            resolve_scope_attribute(&parameters, ContractEvent::VerifyAsset, &message_prefix, messages).await
        else {
            return;
        };

        let notification = if scope_attribute.onboarding_status == AssetOnboardingStatus::Pending {
            VerifierNotification::VerifyEventFailedOnboardingStatusStillPending {
                event: event.clone(),
                scope_attribute,
                message: format!(
                    "{} Verification did not successfully move onboarding status from pending",
                    message_prefix
                ),
            }
        } else {
            VerifierNotification::VerifyEventSuccessful {
                event: event.clone(),
                scope_attribute,
            }
        };
        parameters.notify(notification).await;
    }
}
