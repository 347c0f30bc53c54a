//! Lifecycle Notifications
//!
//! Everything the verifier does is reported as a `VerifierNotification`. Notifications are
//! queued by the producer, handlers and the verification sender, and drained by a single
//! `NotificationSink` that routes each one to the processor registered for its key.
//!
//! Processor failures never reach the engine. A failing processor is reported to the
//! reserved `EventProcessorFailed` processor instead; if that one fails too, the failure is
//! logged and, only when configured to halt, the engine is cancelled.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::cancel::{Cancellation, CancellationToken};
use crate::error::VerifierError;
use crate::event::{AssetClassificationEvent, ContractEvent};
use crate::model::{AssetScopeAttribute, AssetVerification, BlockData};

/// Errors carried by notifications. Shared so that observers receive the original error.
pub type SharedError = Arc<anyhow::Error>;

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// A lifecycle notification emitted by the verifier.
#[derive(Debug, Clone)]
pub enum VerifierNotification {
    /// The block stream produced an error
    StreamExceptionOccurred { error: SharedError },
    /// The block stream ended, with the error that ended it if any
    StreamCompleted { error: Option<SharedError> },
    /// A block was received from the stream
    NewBlockReceived { block: BlockData },
    /// The stream is reconnecting from the given height
    StreamRestarted { restart_height: Option<u64> },
    /// The stream stopped and will not restart on its own
    StreamExited { exit_height: Option<u64> },
    /// The tracked block height moved forward
    NewBlockHeightReceived { new_height: u64 },
    /// A wasm event that is not part of the contract's vocabulary
    EventIgnoredUnknownWasmEvent {
        event: AssetClassificationEvent,
        message: String,
    },
    /// A contract event for which no handler is registered
    EventIgnoredUnhandledEventType {
        event: AssetClassificationEvent,
        event_type: ContractEvent,
        message: String,
    },
    EventIgnoredNoVerifierAddress {
        event: AssetClassificationEvent,
        event_type: ContractEvent,
        message: String,
    },
    EventIgnoredDifferentVerifierAddress {
        event: AssetClassificationEvent,
        event_type: ContractEvent,
        event_verifier_address: String,
        registered_verifier_address: String,
        message: String,
    },
    EventIgnoredMissingScopeAddress {
        event: AssetClassificationEvent,
        event_type: ContractEvent,
        message: String,
    },
    EventIgnoredMissingScopeAttribute {
        event: AssetClassificationEvent,
        event_type: ContractEvent,
        message: String,
        error: SharedError,
    },
    OnboardEventIgnoredPreviouslyProcessed {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
        message: String,
    },
    OnboardEventFailedToRetrieveAsset {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
        error: SharedError,
    },
    OnboardEventFailedToVerifyAsset {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
        error: SharedError,
    },
    /// Emitted right before a verification is queued for submission
    OnboardEventPreVerifySend {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
        verification: AssetVerification,
    },
    VerifyEventFailedOnboardingStatusStillPending {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
        message: String,
    },
    VerifyEventSuccessful {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
    },
    VerifyAssetSendThrewException {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
        verification: AssetVerification,
        message: String,
        error: SharedError,
    },
    /// Submitting a queued verification panicked; the sender keeps draining the queue
    VerifyEventChannelThrewException { error: SharedError },
    /// Re-reading the account sequence from chain failed after a send failure
    VerifyAssetSendSyncSequenceNumberFailed {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
        verification: AssetVerification,
        message: String,
        error: SharedError,
    },
    VerifyAssetSendSucceeded {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
        verification: AssetVerification,
        txhash: String,
    },
    /// The chain rejected the verification transaction
    VerifyAssetSendFailed {
        event: AssetClassificationEvent,
        scope_attribute: AssetScopeAttribute,
        verification: AssetVerification,
        response_code: u32,
        raw_log: String,
    },
    /// A registered processor failed while handling another notification
    EventProcessorFailed {
        failed_event_name: String,
        error: SharedError,
    },
    /// User-defined notification, routed by name
    Custom {
        event_name: String,
        event_body: serde_json::Value,
    },
}

impl VerifierNotification {
    pub fn unknown_wasm_event(event: AssetClassificationEvent) -> Self {
        VerifierNotification::EventIgnoredUnknownWasmEvent {
            event,
            message: "Unknown wasm event encountered".to_string(),
        }
    }

    pub fn unhandled_event_type(event: AssetClassificationEvent, event_type: ContractEvent) -> Self {
        VerifierNotification::EventIgnoredUnhandledEventType {
            message: format!(
                "Event type is not handled by the verifier. Tx hash: [{}], event type: [{}]",
                event.tx_hash(),
                event_type
            ),
            event,
            event_type,
        }
    }

    pub fn no_verifier_address(event: AssetClassificationEvent, event_type: ContractEvent) -> Self {
        VerifierNotification::EventIgnoredNoVerifierAddress {
            event,
            event_type,
            message: "Event does not contain a verifier address".to_string(),
        }
    }

    pub fn different_verifier_address(
        event: AssetClassificationEvent,
        event_type: ContractEvent,
        event_verifier_address: String,
        registered_verifier_address: String,
    ) -> Self {
        VerifierNotification::EventIgnoredDifferentVerifierAddress {
            message: format!(
                "Event is for a different verifier [{}] than the registered verifier account [{}]",
                event_verifier_address, registered_verifier_address
            ),
            event,
            event_type,
            event_verifier_address,
            registered_verifier_address,
        }
    }

    pub fn custom(event_name: impl Into<String>, event_body: serde_json::Value) -> Self {
        VerifierNotification::Custom {
            event_name: event_name.into(),
            event_body,
        }
    }

    /// The registration key this notification is routed by.
    pub fn key(&self) -> NotificationKey {
        use VerifierNotification as N;
        let kind = match self {
            N::StreamExceptionOccurred { .. } => NotificationKind::StreamExceptionOccurred,
            N::StreamCompleted { .. } => NotificationKind::StreamCompleted,
            N::NewBlockReceived { .. } => NotificationKind::NewBlockReceived,
            N::StreamRestarted { .. } => NotificationKind::StreamRestarted,
            N::StreamExited { .. } => NotificationKind::StreamExited,
            N::NewBlockHeightReceived { .. } => NotificationKind::NewBlockHeightReceived,
            N::EventIgnoredUnknownWasmEvent { .. } => NotificationKind::EventIgnoredUnknownWasmEvent,
            N::EventIgnoredUnhandledEventType { .. } => NotificationKind::EventIgnoredUnhandledEventType,
            N::EventIgnoredNoVerifierAddress { .. } => NotificationKind::EventIgnoredNoVerifierAddress,
            N::EventIgnoredDifferentVerifierAddress { .. } => {
                NotificationKind::EventIgnoredDifferentVerifierAddress
            }
            N::EventIgnoredMissingScopeAddress { .. } => NotificationKind::EventIgnoredMissingScopeAddress,
            N::EventIgnoredMissingScopeAttribute { .. } => {
                NotificationKind::EventIgnoredMissingScopeAttribute
            }
            N::OnboardEventIgnoredPreviouslyProcessed { .. } => {
                NotificationKind::OnboardEventIgnoredPreviouslyProcessed
            }
            N::OnboardEventFailedToRetrieveAsset { .. } => {
                NotificationKind::OnboardEventFailedToRetrieveAsset
            }
            N::OnboardEventFailedToVerifyAsset { .. } => NotificationKind::OnboardEventFailedToVerifyAsset,
            N::OnboardEventPreVerifySend { .. } => NotificationKind::OnboardEventPreVerifySend,
            N::VerifyEventFailedOnboardingStatusStillPending { .. } => {
                NotificationKind::VerifyEventFailedOnboardingStatusStillPending
            }
            N::VerifyEventSuccessful { .. } => NotificationKind::VerifyEventSuccessful,
            N::VerifyAssetSendThrewException { .. } => NotificationKind::VerifyAssetSendThrewException,
            N::VerifyEventChannelThrewException { .. } => NotificationKind::VerifyEventChannelThrewException,
            N::VerifyAssetSendSyncSequenceNumberFailed { .. } => {
                NotificationKind::VerifyAssetSendSyncSequenceNumberFailed
            }
            N::VerifyAssetSendSucceeded { .. } => NotificationKind::VerifyAssetSendSucceeded,
            N::VerifyAssetSendFailed { .. } => NotificationKind::VerifyAssetSendFailed,
            N::EventProcessorFailed { .. } => NotificationKind::EventProcessorFailed,
            N::Custom { event_name, .. } => return NotificationKey::Custom(event_name.clone()),
        };
        NotificationKey::Builtin(kind)
    }
}

/// Payload-free discriminant of every built-in notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    StreamExceptionOccurred,
    StreamCompleted,
    NewBlockReceived,
    StreamRestarted,
    StreamExited,
    NewBlockHeightReceived,
    EventIgnoredUnknownWasmEvent,
    EventIgnoredUnhandledEventType,
    EventIgnoredNoVerifierAddress,
    EventIgnoredDifferentVerifierAddress,
    EventIgnoredMissingScopeAddress,
    EventIgnoredMissingScopeAttribute,
    OnboardEventIgnoredPreviouslyProcessed,
    OnboardEventFailedToRetrieveAsset,
    OnboardEventFailedToVerifyAsset,
    OnboardEventPreVerifySend,
    VerifyEventFailedOnboardingStatusStillPending,
    VerifyEventSuccessful,
    VerifyAssetSendThrewException,
    VerifyEventChannelThrewException,
    VerifyAssetSendSyncSequenceNumberFailed,
    VerifyAssetSendSucceeded,
    VerifyAssetSendFailed,
    EventProcessorFailed,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 24] = [
        NotificationKind::StreamExceptionOccurred,
        NotificationKind::StreamCompleted,
        NotificationKind::NewBlockReceived,
        NotificationKind::StreamRestarted,
        NotificationKind::StreamExited,
        NotificationKind::NewBlockHeightReceived,
        NotificationKind::EventIgnoredUnknownWasmEvent,
        NotificationKind::EventIgnoredUnhandledEventType,
        NotificationKind::EventIgnoredNoVerifierAddress,
        NotificationKind::EventIgnoredDifferentVerifierAddress,
        NotificationKind::EventIgnoredMissingScopeAddress,
        NotificationKind::EventIgnoredMissingScopeAttribute,
        NotificationKind::OnboardEventIgnoredPreviouslyProcessed,
        NotificationKind::OnboardEventFailedToRetrieveAsset,
        NotificationKind::OnboardEventFailedToVerifyAsset,
        NotificationKind::OnboardEventPreVerifySend,
        NotificationKind::VerifyEventFailedOnboardingStatusStillPending,
        NotificationKind::VerifyEventSuccessful,
        NotificationKind::VerifyAssetSendThrewException,
        NotificationKind::VerifyEventChannelThrewException,
        NotificationKind::VerifyAssetSendSyncSequenceNumberFailed,
        NotificationKind::VerifyAssetSendSucceeded,
        NotificationKind::VerifyAssetSendFailed,
        NotificationKind::EventProcessorFailed,
    ];
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Key under which a notification processor is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationKey {
    Builtin(NotificationKind),
    Custom(String),
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKey::Builtin(kind) => kind.fmt(f),
            NotificationKey::Custom(name) => f.write_str(name),
        }
    }
}

impl From<NotificationKind> for NotificationKey {
    fn from(kind: NotificationKind) -> Self {
        NotificationKey::Builtin(kind)
    }
}

// ============================================================================
// PROCESSOR REGISTRATION
// ============================================================================

/// A caller-supplied notification processor.
pub type NotificationProcessor =
    Arc<dyn Fn(VerifierNotification) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// The set of registered notification processors, at most one per key.
#[derive(Clone, Default)]
pub struct NotificationProcessors {
    processors: HashMap<NotificationKey, NotificationProcessor>,
}

impl NotificationProcessors {
    pub fn builder() -> NotificationProcessorsBuilder {
        NotificationProcessorsBuilder::default()
    }

    pub fn get(&self, key: &NotificationKey) -> Option<&NotificationProcessor> {
        self.processors.get(key)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl fmt::Debug for NotificationProcessors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.processors.keys()).finish()
    }
}

#[derive(Default)]
pub struct NotificationProcessorsBuilder {
    processors: HashMap<NotificationKey, NotificationProcessor>,
}

impl NotificationProcessorsBuilder {
    /// Registers a processor for a built-in notification kind.
    pub fn add_processor<F, Fut>(self, kind: NotificationKind, processor: F) -> Result<Self, VerifierError>
    where
        F: Fn(VerifierNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.insert(NotificationKey::Builtin(kind), processor)
    }

    /// Registers a processor for a custom notification emitted under `event_name`.
    pub fn add_custom_processor<F, Fut>(
        self,
        event_name: impl Into<String>,
        processor: F,
    ) -> Result<Self, VerifierError>
    where
        F: Fn(VerifierNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.insert(NotificationKey::Custom(event_name.into()), processor)
    }

    fn insert<F, Fut>(mut self, key: NotificationKey, processor: F) -> Result<Self, VerifierError>
    where
        F: Fn(VerifierNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.processors.contains_key(&key) {
            return Err(VerifierError::DuplicateNotificationProcessor(key));
        }
        let processor: NotificationProcessor = Arc::new(move |notification| processor(notification).boxed());
        self.processors.insert(key, processor);
        Ok(self)
    }

    pub fn build(self) -> NotificationProcessors {
        NotificationProcessors {
            processors: self.processors,
        }
    }
}

// ============================================================================
// NOTIFICATION SINK
// ============================================================================

/// The only case in which the sink gives up: the reserved failure processor itself failed.
#[derive(Debug)]
pub struct FailureProcessorError {
    pub failed_event_name: String,
    pub error: anyhow::Error,
}

/// Sequential consumer of the notification queue.
pub struct NotificationSink {
    processors: NotificationProcessors,
    halt_on_failure_processor_error: bool,
}

impl NotificationSink {
    pub fn new(processors: NotificationProcessors, halt_on_failure_processor_error: bool) -> Self {
        Self {
            processors,
            halt_on_failure_processor_error,
        }
    }

    /// Routes a single notification to its processor.
    ///
    /// Returns an error only when the reserved failure processor fails.
    pub async fn process(&self, notification: VerifierNotification) -> Result<(), FailureProcessorError> {
        let key = notification.key();
        let Some(processor) = self.processors.get(&key) else {
            return Ok(());
        };
        let error = match run_processor(processor, notification).await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };
        warn!("Notification processor for [{}] failed: {:#}", key, error);

        let failure_key = NotificationKey::Builtin(NotificationKind::EventProcessorFailed);
        let Some(failure_processor) = self.processors.get(&failure_key) else {
            return Ok(());
        };
        let failure = VerifierNotification::EventProcessorFailed {
            failed_event_name: key.to_string(),
            error: Arc::new(error),
        };
        run_processor(failure_processor, failure)
            .await
            .map_err(|error| FailureProcessorError {
                failed_event_name: key.to_string(),
                error,
            })
    }

    /// Drains the queue until it closes or the run is cancelled.
    pub(crate) async fn run(
        self,
        mut receiver: mpsc::Receiver<VerifierNotification>,
        mut token: CancellationToken,
        cancellation: Cancellation,
    ) {
        loop {
            let notification = tokio::select! {
                reason = token.cancelled() => {
                    debug!("Notification sink stopping: {}", reason);
                    return;
                }
                notification = receiver.recv() => match notification {
                    Some(notification) => notification,
                    None => return,
                },
            };
            if let Err(failure) = self.process(notification).await {
                error!(
                    "Internal failure processor threw an error while handling a failure of [{}]: {:#}",
                    failure.failed_event_name, failure.error
                );
                if self.halt_on_failure_processor_error {
                    cancellation.cancel("Internal failure processor is misconfigured and threw an error");
                    return;
                }
            }
        }
    }
}

/// Runs a processor, converting a panic into an error.
async fn run_processor(
    processor: &NotificationProcessor,
    notification: VerifierNotification,
) -> anyhow::Result<()> {
    match AssertUnwindSafe(processor(notification)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!(
            "Notification processor panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}

/// Extracts the message of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
