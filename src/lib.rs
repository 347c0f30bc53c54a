//! Asset Verifier Library
//!
//! Client-side verification agent for the asset classification smart contract. The engine
//! watches the chain for onboarding events that target a registered verifier, fetches and
//! verifies each asset through a pluggable processor, and submits the decision back to the
//! contract.

mod cancel;

pub mod chain;
pub mod client;
pub mod config;
pub mod delegator;
pub mod error;
pub mod event;
pub mod handler;
pub mod model;
pub mod notification;
pub mod processor;
pub mod sender;
pub mod sequencer;

// Re-export commonly used types
pub use chain::{BlockFeed, BlockStream, ChainExecutor, ChainQuerier};
pub use client::{VerifierClient, VerifierClientConfig};
pub use config::{ChainConfig, Config, StreamRestartMode, VerifierConfig};
pub use delegator::{EventDelegator, EventDelegatorBuilder};
pub use error::VerifierError;
pub use event::{AssetClassificationEvent, AttributeEncoding, ContractEvent, ContractKey, RawChainEvent};
pub use handler::{EventHandler, EventHandlerParameters, VerificationMessage};
pub use notification::{
    NotificationKey, NotificationKind, NotificationProcessors, NotificationSink, VerifierNotification,
};
pub use processor::{RouteFetchProcessor, VerificationProcessor};
