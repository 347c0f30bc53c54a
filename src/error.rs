//! Error types for the verifier engine
//!
//! Collaborator and processor boundaries report failures with `anyhow::Error`. The variants
//! here cover engine lifecycle misuse and registration mistakes that callers can match on.

use thiserror::Error;

use crate::event::ContractEvent;
use crate::notification::NotificationKey;

/// Errors surfaced by the verifier engine and its registration builders.
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("Cannot start the verifier. It is already running")]
    AlreadyRunning,

    #[error("Cannot stop the verifier. It is not running")]
    NotRunning,

    #[error("Attempted to register more than a single handler for type [{0}]")]
    DuplicateEventHandler(ContractEvent),

    #[error("A notification processor for [{0}] has already been added")]
    DuplicateNotificationProcessor(NotificationKey),

    #[error("Failed to fetch transaction [{0}]: {1:#}")]
    TransactionLookup(String, anyhow::Error),

    #[error("Verifier task failed to shut down cleanly: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
