//! Event Delegator
//!
//! Registry that routes each classified event to the single handler registered for its
//! contract event kind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::VerifierError;
use crate::event::ContractEvent;
use crate::handler::{EventHandler, EventHandlerParameters, OnboardEventHandler, VerifyAssetEventHandler};
use crate::notification::VerifierNotification;
use crate::processor::VerificationProcessor;

/// Maps contract event kinds to their handlers. At most one handler per kind.
pub struct EventDelegator<P: VerificationProcessor> {
    handlers: BTreeMap<ContractEvent, Arc<dyn EventHandler<P>>>,
}

impl<P: VerificationProcessor> EventDelegator<P> {
    /// An empty builder.
    pub fn builder() -> EventDelegatorBuilder<P> {
        EventDelegatorBuilder {
            handlers: BTreeMap::new(),
        }
    }

    /// A builder with the onboarding and verify-confirmation handlers already registered.
    pub fn default_builder() -> EventDelegatorBuilder<P> {
        let mut handlers: BTreeMap<ContractEvent, Arc<dyn EventHandler<P>>> = BTreeMap::new();
        handlers.insert(ContractEvent::OnboardAsset, Arc::new(OnboardEventHandler));
        handlers.insert(ContractEvent::VerifyAsset, Arc::new(VerifyAssetEventHandler));
        EventDelegatorBuilder { handlers }
    }

    /// All contract event kinds with a registered handler.
    pub fn handled_event_types(&self) -> Vec<ContractEvent> {
        self.handlers.keys().copied().collect()
    }

    /// Hands the event to its handler, or reports it as unhandled.
    pub async fn delegate_event(&self, parameters: EventHandlerParameters<P>) {
        let Some(event_type) = parameters.event.event_type else {
            let notification = VerifierNotification::unknown_wasm_event(parameters.event.clone());
            parameters.notify(notification).await;
            return;
        };
        match self.handlers.get(&event_type) {
            Some(handler) => {
                debug!("Delegating [{}] event from tx {}", event_type, parameters.event.tx_hash());
                handler.handle_event(parameters).await;
            }
            None => {
                let notification = VerifierNotification::unhandled_event_type(parameters.event.clone(), event_type);
                parameters.notify(notification).await;
            }
        }
    }
}

impl<P: VerificationProcessor> Default for EventDelegator<P> {
    fn default() -> Self {
        Self::default_builder().build()
    }
}

impl<P: VerificationProcessor> fmt::Debug for EventDelegator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDelegator")
            .field("handled_event_types", &self.handled_event_types())
            .finish()
    }
}

pub struct EventDelegatorBuilder<P: VerificationProcessor> {
    handlers: BTreeMap<ContractEvent, Arc<dyn EventHandler<P>>>,
}

impl<P: VerificationProcessor> EventDelegatorBuilder<P> {
    /// Registers a handler for its event kind.
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - Handler registered
    /// * `Err(VerifierError::DuplicateEventHandler)` - A handler for the kind already exists
    pub fn register_handler<H>(mut self, handler: H) -> Result<Self, VerifierError>
    where
        H: EventHandler<P> + 'static,
    {
        let event_type = handler.event_type();
        if self.handlers.contains_key(&event_type) {
            return Err(VerifierError::DuplicateEventHandler(event_type));
        }
        self.handlers.insert(event_type, Arc::new(handler));
        Ok(self)
    }

    pub fn build(self) -> EventDelegator<P> {
        EventDelegator {
            handlers: self.handlers,
        }
    }
}
