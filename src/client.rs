//! Verifier Engine
//!
//! `VerifierClient` ties the block feed, the event delegator, the verification sender and the
//! notification sink together. Each run spawns three tasks:
//!
//! 1. The producer, which consumes the block stream, classifies events and dispatches them to
//!    handlers inline so block order is preserved
//! 2. The verification sender, the sole consumer of the verification queue
//! 3. The notification sink, the sole consumer of the notification queue
//!
//! All three share one cancellation signal. Stopping publishes a reason and waits for every
//! task to finish, so two producers never run at the same time.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::{Cancellation, CancellationToken};
use crate::chain::{BlockFeed, BlockStream, ChainExecutor, ChainQuerier};
use crate::config::{Config, StreamRestartMode};
use crate::delegator::EventDelegator;
use crate::error::VerifierError;
use crate::event::AssetClassificationEvent;
use crate::handler::{EventHandlerParameters, VerificationMessage};
use crate::notification::{NotificationProcessors, NotificationSink, SharedError, VerifierNotification};
use crate::processor::VerificationProcessor;
use crate::sender::VerificationSender;
use crate::sequencer::AccountSequencer;

const MANUAL_STOP_REASON: &str = "Manual verification cancellation requested";

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Settings of a single `VerifierClient`.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierClientConfig {
    /// Events must name this address as their verifier to be processed
    pub verifier_address: String,
    /// When set, wasm events emitted by any other contract are discarded
    pub contract_address: Option<String>,
    pub stream_restart_mode: StreamRestartMode,
    pub verification_queue_capacity: usize,
    pub notification_queue_capacity: usize,
    pub halt_on_failure_callback_error: bool,
}

impl VerifierClientConfig {
    pub fn new(verifier_address: impl Into<String>) -> Self {
        let defaults = Config::default().verifier;
        Self {
            verifier_address: verifier_address.into(),
            contract_address: None,
            stream_restart_mode: defaults.stream_restart_mode,
            verification_queue_capacity: defaults.verification_queue_capacity,
            notification_queue_capacity: defaults.notification_queue_capacity,
            halt_on_failure_callback_error: defaults.halt_on_failure_callback_error,
        }
    }

    /// Engine settings from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            verifier_address: config.verifier.address.clone(),
            contract_address: config
                .chain
                .filter_contract_events
                .then(|| config.chain.contract_address.clone()),
            stream_restart_mode: config.verifier.stream_restart_mode,
            verification_queue_capacity: config.verifier.verification_queue_capacity,
            notification_queue_capacity: config.verifier.notification_queue_capacity,
            halt_on_failure_callback_error: config.verifier.halt_on_failure_callback_error,
        }
    }
}

// ============================================================================
// EVENT DISPATCH
// ============================================================================

/// Upfront filtering and delegation of classified events for one run.
struct EventDispatcher<P: VerificationProcessor> {
    verifier_address: String,
    contract_address: Option<String>,
    querier: Arc<dyn ChainQuerier>,
    processor: Arc<P>,
    delegator: Arc<EventDelegator<P>>,
    verification_sender: mpsc::Sender<VerificationMessage>,
    notification_sender: mpsc::Sender<VerifierNotification>,
}

impl<P: VerificationProcessor> EventDispatcher<P> {
    async fn notify(&self, notification: VerifierNotification) {
        if self.notification_sender.send(notification).await.is_err() {
            debug!("Notification queue closed, dropping notification");
        }
    }

    async fn handle_event(&self, event: AssetClassificationEvent) {
        if let Some(contract_address) = self.contract_address.as_deref() {
            if !event.is_from_contract(contract_address) {
                debug!(
                    "Skipping wasm event from contract {:?} in tx {}",
                    event.contract_address(),
                    event.tx_hash()
                );
                return;
            }
        }
        // Most wasm events on chain belong to other contracts
        let Some(event_type) = event.event_type else {
            self.notify(VerifierNotification::unknown_wasm_event(event)).await;
            return;
        };
        if event.verifier_address.is_none() {
            self.notify(VerifierNotification::no_verifier_address(event, event_type))
                .await;
            return;
        }
        let parameters = EventHandlerParameters {
            event,
            querier: Arc::clone(&self.querier),
            verifier_address: self.verifier_address.clone(),
            processor: Arc::clone(&self.processor),
            verification_sender: self.verification_sender.clone(),
            notification_sender: self.notification_sender.clone(),
        };
        self.delegator.delegate_event(parameters).await;
    }
}

// ============================================================================
// BLOCK STREAM PRODUCER
// ============================================================================

struct BlockProducer<P: VerificationProcessor> {
    feed: Arc<dyn BlockFeed>,
    dispatcher: Arc<EventDispatcher<P>>,
    stream_restart_mode: StreamRestartMode,
}

impl<P: VerificationProcessor> BlockProducer<P> {
    async fn run(self, from_height: Option<u64>, mut token: CancellationToken) {
        tokio::select! {
            reason = token.cancelled() => {
                info!("Block stream cancelled: {}", reason);
                if let Err(e) = self.feed.shutdown().await {
                    warn!("Failed to shut down block feed after cancellation: {:#}", e);
                }
            }
            _ = self.verify_loop(from_height) => {}
        }
    }

    async fn verify_loop(&self, from_height: Option<u64>) {
        let mut starting_height = from_height;
        loop {
            let current_height = match self.feed.current_height().await {
                Ok(height) => height,
                Err(e) => {
                    warn!("Failed to read the current block height: {:#}", e);
                    None
                }
            };
            let mut latest_height = starting_height
                .filter(|start| *start > 0 && current_height.map_or(true, |current| current >= *start));
            info!("Starting block stream from height {:?}", latest_height);

            let stream_error = match self.feed.open(latest_height).await {
                Ok(stream) => self.consume(stream, &mut latest_height).await,
                Err(e) => Some(Arc::new(e)),
            };
            if let Some(error) = &stream_error {
                warn!("Block stream failed: {:#}", error);
                self.dispatcher
                    .notify(VerifierNotification::StreamExceptionOccurred {
                        error: Arc::clone(error),
                    })
                    .await;
            }
            self.dispatcher
                .notify(VerifierNotification::StreamCompleted { error: stream_error })
                .await;

            if let Err(e) = self.feed.shutdown().await {
                // Never open a second feed while the first may still be alive
                warn!("Block feed failed to shut down, exiting the stream: {:#}", e);
                self.dispatcher
                    .notify(VerifierNotification::StreamExceptionOccurred { error: Arc::new(e) })
                    .await;
                return;
            }

            match self.stream_restart_mode {
                StreamRestartMode::On { restart_delay_ms } => {
                    if restart_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(restart_delay_ms)).await;
                    }
                    info!("Restarting block stream from height {:?}", latest_height);
                    self.dispatcher
                        .notify(VerifierNotification::StreamRestarted {
                            restart_height: latest_height,
                        })
                        .await;
                    starting_height = latest_height;
                }
                StreamRestartMode::Off => {
                    info!("Block stream exited at height {:?}", latest_height);
                    self.dispatcher
                        .notify(VerifierNotification::StreamExited {
                            exit_height: latest_height,
                        })
                        .await;
                    return;
                }
            }
        }
    }

    /// Drains the stream, returning the error that ended it, if any.
    async fn consume(&self, mut stream: BlockStream, latest_height: &mut Option<u64>) -> Option<SharedError> {
        while let Some(block) = stream.next().await {
            let block = match block {
                Ok(block) => block,
                Err(e) => return Some(Arc::new(e)),
            };
            debug!("Received block {} with {} txs", block.height, block.txs.len());
            let events = AssetClassificationEvent::from_block_data(&block);
            let height = block.height;
            self.dispatcher
                .notify(VerifierNotification::NewBlockReceived { block })
                .await;
            *latest_height = self.track_block_height(*latest_height, height).await;
            for event in events {
                self.dispatcher.handle_event(event).await;
            }
        }
        None
    }

    async fn track_block_height(&self, latest_height: Option<u64>, new_height: u64) -> Option<u64> {
        match latest_height {
            Some(latest) if latest >= new_height => Some(latest),
            _ => {
                self.dispatcher
                    .notify(VerifierNotification::NewBlockHeightReceived { new_height })
                    .await;
                Some(new_height)
            }
        }
    }
}

// ============================================================================
// VERIFIER CLIENT
// ============================================================================

struct RunningVerifier<P: VerificationProcessor> {
    cancellation: Cancellation,
    dispatcher: Arc<EventDispatcher<P>>,
    producer: JoinHandle<()>,
    sender: JoinHandle<()>,
    sink: JoinHandle<()>,
}

impl<P: VerificationProcessor> RunningVerifier<P> {
    async fn shutdown(self, reason: &str) -> Result<(), VerifierError> {
        self.cancellation.cancel(reason);
        let results = [self.producer.await, self.sender.await, self.sink.await];
        for result in results {
            result?;
        }
        Ok(())
    }
}

/// The verification engine.
pub struct VerifierClient<P: VerificationProcessor> {
    config: VerifierClientConfig,
    querier: Arc<dyn ChainQuerier>,
    executor: Arc<dyn ChainExecutor>,
    feed: Arc<dyn BlockFeed>,
    processor: Arc<P>,
    delegator: Arc<EventDelegator<P>>,
    notification_processors: NotificationProcessors,
    running: Mutex<Option<RunningVerifier<P>>>,
}

impl<P: VerificationProcessor> VerifierClient<P> {
    /// Creates a stopped engine with the default event handlers and no notification processors.
    pub fn new(
        config: VerifierClientConfig,
        querier: Arc<dyn ChainQuerier>,
        executor: Arc<dyn ChainExecutor>,
        feed: Arc<dyn BlockFeed>,
        processor: P,
    ) -> Self {
        Self {
            config,
            querier,
            executor,
            feed,
            processor: Arc::new(processor),
            delegator: Arc::new(EventDelegator::default()),
            notification_processors: NotificationProcessors::default(),
            running: Mutex::new(None),
        }
    }

    /// Replaces the event delegator. Takes effect on the next start.
    pub fn with_event_delegator(mut self, delegator: EventDelegator<P>) -> Self {
        self.delegator = Arc::new(delegator);
        self
    }

    /// Replaces the notification processors. Takes effect on the next start.
    pub fn with_notification_processors(mut self, processors: NotificationProcessors) -> Self {
        self.notification_processors = processors;
        self
    }

    pub fn config(&self) -> &VerifierClientConfig {
        &self.config
    }

    /// Whether a block stream is currently being consumed.
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map_or(false, |run| !run.producer.is_finished())
    }

    /// Starts consuming blocks.
    ///
    /// # Arguments
    ///
    /// * `from_height` - First block to process. Ignored when zero or beyond the chain's current
    ///   height, in which case the stream starts at the latest block
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The engine's tasks are running
    /// * `Err(VerifierError::AlreadyRunning)` - A block stream is already being consumed
    pub async fn start_verifying(&self, from_height: Option<u64>) -> Result<(), VerifierError> {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            if !previous.producer.is_finished() {
                *running = Some(previous);
                return Err(VerifierError::AlreadyRunning);
            }
            // The previous stream exited on its own; release its consumers before reusing the slot
            previous.shutdown("Verifier restarted after stream exit").await?;
        }
        *running = Some(self.spawn_run(from_height));
        info!(
            "Verifier started for {} from height {:?}",
            self.config.verifier_address, from_height
        );
        Ok(())
    }

    /// Stops the engine and waits for all of its tasks to finish.
    ///
    /// Verifications still queued are dropped. The account sequence is re-read from chain on
    /// the next start.
    pub async fn stop_verifying(&self) -> Result<(), VerifierError> {
        let mut running = self.running.lock().await;
        let Some(run) = running.take() else {
            return Err(VerifierError::NotRunning);
        };
        run.shutdown(MANUAL_STOP_REASON).await?;
        info!("Verifier stopped");
        Ok(())
    }

    /// Stops the running engine and starts it again from the given height.
    pub async fn restart_verifier(&self, from_height: Option<u64>) -> Result<(), VerifierError> {
        self.stop_verifying().await?;
        self.start_verifying(from_height).await
    }

    /// Replays a single transaction through the same dispatch path as streamed blocks.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of wasm events found in the transaction and dispatched
    /// * `Err(VerifierError::NotRunning)` - The engine has no consumers to deliver to
    /// * `Err(VerifierError::TransactionLookup)` - The transaction could not be fetched
    pub async fn manual_verify_hash(&self, tx_hash: &str) -> Result<usize, VerifierError> {
        let dispatcher = match self.running.lock().await.as_ref() {
            Some(run) => Arc::clone(&run.dispatcher),
            None => return Err(VerifierError::NotRunning),
        };
        let tx = self
            .querier
            .get_tx(tx_hash)
            .await
            .map_err(|e| VerifierError::TransactionLookup(tx_hash.to_string(), e))?;
        let events = AssetClassificationEvent::from_tx_response(&tx);
        let count = events.len();
        info!("Manually verifying {} wasm events from tx {}", count, tx_hash);
        for event in events {
            dispatcher.handle_event(event).await;
        }
        Ok(count)
    }

    fn spawn_run(&self, from_height: Option<u64>) -> RunningVerifier<P> {
        let cancellation = Cancellation::new();
        let (verification_sender, verification_receiver) =
            mpsc::channel(self.config.verification_queue_capacity.max(1));
        let (notification_sender, notification_receiver) =
            mpsc::channel(self.config.notification_queue_capacity.max(1));

        let dispatcher = Arc::new(EventDispatcher {
            verifier_address: self.config.verifier_address.clone(),
            contract_address: self.config.contract_address.clone(),
            querier: Arc::clone(&self.querier),
            processor: Arc::clone(&self.processor),
            delegator: Arc::clone(&self.delegator),
            verification_sender,
            notification_sender: notification_sender.clone(),
        });

        let sink = NotificationSink::new(
            self.notification_processors.clone(),
            self.config.halt_on_failure_callback_error,
        );
        let sink = tokio::spawn(sink.run(notification_receiver, cancellation.token(), cancellation.clone()));

        let sender = VerificationSender::new(
            Arc::clone(&self.executor),
            AccountSequencer::new(Arc::clone(&self.querier), self.config.verifier_address.clone()),
            notification_sender,
        );
        let sender = tokio::spawn(sender.run(verification_receiver, cancellation.token()));

        let producer = BlockProducer {
            feed: Arc::clone(&self.feed),
            dispatcher: Arc::clone(&dispatcher),
            stream_restart_mode: self.config.stream_restart_mode,
        };
        let producer = tokio::spawn(producer.run(from_height, cancellation.token()));

        RunningVerifier {
            cancellation,
            dispatcher,
            producer,
            sender,
            sink,
        }
    }
}
