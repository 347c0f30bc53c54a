//! Default handler for `onboard_asset` events
//!
//! Fetches the asset through the verification processor, lets it decide, and queues the
//! decision for submission.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use super::{resolve_scope_attribute, EventHandler, EventHandlerParameters, ScopeLookupMessages, VerificationMessage};
use crate::event::ContractEvent;
use crate::model::AssetOnboardingStatus;
use crate::notification::{panic_message, VerifierNotification};
use crate::processor::VerificationProcessor;

#[derive(Debug, Clone, Copy, Default)]
pub struct OnboardEventHandler;

#[async_trait]
impl<P: VerificationProcessor> EventHandler<P> for OnboardEventHandler {
    fn event_type(&self) -> ContractEvent {
        ContractEvent::OnboardAsset
    }

    async fn handle_event(&self, parameters: EventHandlerParameters<P>) {
        let event = &parameters.event;
        let message_prefix = format!(
            "[ONBOARD_ASSET | Tx: {} | Asset: {}]:",
            event.tx_hash(),
            event.scope_address.as_deref().unwrap_or("null")
        );
        let messages = ScopeLookupMessages {
            missing_scope_address: "Expected the onboard asset event to include a scope address, but it was missing",
            missing_scope_attribute: "Intercepted onboard asset did not point to a scope with a scope attribute",
        };
        let Some(scope_attribute) =
            resolve_scope_attribute(&parameters, ContractEvent::OnboardAsset, &message_prefix, messages).await
        else {
            return;
        };

        if scope_attribute.onboarding_status != AssetOnboardingStatus::Pending {
            let latest = scope_attribute.latest_verification_result.as_ref();
            let message = format!(
                "{} Scope attribute indicates an onboarding status of [{}], which is not actionable. Has verification: [Verified = {} | Message = {}]",
                message_prefix,
                scope_attribute.onboarding_status,
                latest.map_or("null".to_string(), |result| result.success.to_string()),
                latest.map_or("null", |result| result.message.as_str()),
            );
            parameters
                .notify(VerifierNotification::OnboardEventIgnoredPreviouslyProcessed {
                    event: event.clone(),
                    scope_attribute,
                    message,
                })
                .await;
            return;
        }

        let access_routes = scope_attribute.requestor_access_routes();
        let retrieval = parameters
            .processor
            .retrieve_asset(event, &scope_attribute, &access_routes);
        let asset = match guard_processor_call(retrieval, "Asset retrieval", &message_prefix).await {
            Ok(asset) => asset,
            Err(error) => {
                parameters
                    .notify(VerifierNotification::OnboardEventFailedToRetrieveAsset {
                        event: event.clone(),
                        scope_attribute,
                        error: Arc::new(error),
                    })
                    .await;
                return;
            }
        };

        let verification_call = parameters.processor.verify_asset(event, &scope_attribute, asset);
        let verification = match guard_processor_call(verification_call, "Asset verification", &message_prefix).await {
            Ok(verification) => verification,
            Err(error) => {
                parameters
                    .notify(VerifierNotification::OnboardEventFailedToVerifyAsset {
                        event: event.clone(),
                        scope_attribute,
                        error: Arc::new(error),
                    })
                    .await;
                return;
            }
        };

        debug!(
            "{} Queueing verification with success = {}",
            message_prefix, verification.success
        );
        parameters
            .notify(VerifierNotification::OnboardEventPreVerifySend {
                event: event.clone(),
                scope_attribute: scope_attribute.clone(),
                verification: verification.clone(),
            })
            .await;
        parameters
            .enqueue_verification(VerificationMessage {
                failure_message_prefix: message_prefix,
                event: event.clone(),
                scope_attribute,
                verification,
            })
            .await;
    }
}

/// Awaits a processor call, turning a panic into an error.
async fn guard_processor_call<T>(
    call: impl Future<Output = anyhow::Result<T>>,
    operation: &str,
    message_prefix: &str,
) -> anyhow::Result<T> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!("{} {} panicked: {}", message_prefix, operation, reason);
            Err(anyhow::anyhow!("{} panicked: {}", operation, reason))
        }
    }
}
