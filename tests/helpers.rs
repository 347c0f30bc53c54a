//! Shared test helpers
//!
//! The module is organized into several categories:
//! - **Constants**: Addresses and hashes shared across tests
//! - **Default Model Creators**: Scope attributes, events and blocks
//! - **Mock Collaborators**: In-memory querier, executor, block feed and processor
//! - **Notification Capture**: Processors that record every notification they receive

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use tokio::sync::mpsc;

use asset_verifier::chain::{BlockFeed, BlockStream, ChainExecutor, ChainQuerier};
use asset_verifier::event::{AssetClassificationEvent, AttributeEncoding, RawChainEvent};
use asset_verifier::handler::{EventHandlerParameters, VerificationMessage};
use asset_verifier::model::{
    AccessRoute, AssetOnboardingStatus, AssetScopeAttribute, AssetVerification, AssetVerificationResult,
    BaseAccount, BlockData, BlockTx, BroadcastTxResponse, EventAttribute, TxEvent, TxResponse,
    VerifyAssetExecute,
};
use asset_verifier::notification::{NotificationKind, NotificationProcessors, VerifierNotification};
use asset_verifier::processor::VerificationProcessor;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Verifier account the engine is registered as
pub const VERIFIER_ADDRESS: &str = "tp1verifier0000000000000000000000000000000";

/// Some other verifier's account
pub const OTHER_VERIFIER_ADDRESS: &str = "tp1otherverifier000000000000000000000000000";

/// Requestor that onboarded the test scope
pub const REQUESTOR_ADDRESS: &str = "tp1requestor000000000000000000000000000000";

/// Asset classification contract address
pub const CONTRACT_ADDRESS: &str = "tp1contract0000000000000000000000000000000";

pub const SCOPE_ADDRESS: &str = "scope1qzge0zaztu65tx5x5llv5xc9ztsqxlkwel";

pub const ASSET_UUID: &str = "7a6c5c2a-3b4e-4f5a-9e1c-2d3b4a5c6d7e";

pub const TX_HASH: &str = "5F0D4C1E7A3B2D9C8E6F1A0B3C4D5E6F7A8B9C0D1E2F3A4B5C6D7E8F9A0B1C2D";

/// Route the requestor registered for the asset
pub const REQUESTOR_ROUTE: &str = "https://gateway.example/asset";

/// Starting sequence number of the verifier account on the mock chain
pub const INITIAL_SEQUENCE: u64 = 7;

pub const ACCOUNT_NUMBER: u64 = 42;

// ============================================================================
// DEFAULT MODEL CREATORS
// ============================================================================

/// Scope attribute for `SCOPE_ADDRESS`, assigned to `VERIFIER_ADDRESS`, in the given status.
pub fn create_scope_attribute(status: AssetOnboardingStatus) -> AssetScopeAttribute {
    serde_json::from_value(json!({
        "asset_uuid": ASSET_UUID,
        "scope_address": SCOPE_ADDRESS,
        "asset_type": "heloc",
        "requestor_address": REQUESTOR_ADDRESS,
        "verifier_address": VERIFIER_ADDRESS,
        "onboarding_status": status,
        "latest_verifier_detail": null,
        "latest_verification_result": null,
        "access_definitions": [
            {
                "owner_address": REQUESTOR_ADDRESS,
                "access_routes": [{ "route": REQUESTOR_ROUTE, "name": "gateway" }],
                "definition_type": "requestor"
            }
        ]
    }))
    .expect("scope attribute fixture should deserialize")
}

/// Scope attribute that has already been verified with the given result.
pub fn create_verified_scope_attribute(success: bool, message: &str) -> AssetScopeAttribute {
    let mut scope_attribute = create_scope_attribute(if success {
        AssetOnboardingStatus::Approved
    } else {
        AssetOnboardingStatus::Denied
    });
    scope_attribute.latest_verification_result = Some(AssetVerificationResult {
        message: message.to_string(),
        success,
    });
    scope_attribute
}

/// Plain-text wasm attributes for a contract event.
pub fn contract_attributes(
    event_type: Option<&str>,
    verifier_address: Option<&str>,
    scope_address: Option<&str>,
) -> Vec<EventAttribute> {
    let mut attributes = vec![EventAttribute::new("_contract_address", CONTRACT_ADDRESS)];
    if let Some(event_type) = event_type {
        attributes.push(EventAttribute::new("asset_event_type", event_type));
    }
    attributes.push(EventAttribute::new("asset_type", "heloc"));
    if let Some(verifier_address) = verifier_address {
        attributes.push(EventAttribute::new("asset_verifier_address", verifier_address));
    }
    if let Some(scope_address) = scope_address {
        attributes.push(EventAttribute::new("asset_scope_address", scope_address));
    }
    attributes
}

/// Base64-encodes both halves of every attribute, as the block stream delivers them.
pub fn encode_attributes(attributes: &[EventAttribute]) -> Vec<EventAttribute> {
    attributes
        .iter()
        .map(|attribute| EventAttribute {
            key: attribute.key.as_ref().map(|key| general_purpose::STANDARD.encode(key)),
            value: attribute.value.as_ref().map(|value| general_purpose::STANDARD.encode(value)),
        })
        .collect()
}

/// Classified event built from plain attributes.
pub fn create_event(
    event_type: Option<&str>,
    verifier_address: Option<&str>,
    scope_address: Option<&str>,
) -> AssetClassificationEvent {
    AssetClassificationEvent::new(
        RawChainEvent {
            block_height: 100,
            block_time: None,
            tx_hash: TX_HASH.to_string(),
            event_type: "wasm".to_string(),
            attributes: contract_attributes(event_type, verifier_address, scope_address),
        },
        AttributeEncoding::Plain,
    )
}

/// An onboard event addressed to this verifier for `SCOPE_ADDRESS`.
pub fn create_onboard_event() -> AssetClassificationEvent {
    create_event(Some("onboard_asset"), Some(VERIFIER_ADDRESS), Some(SCOPE_ADDRESS))
}

/// Wasm tx event with base64 attributes, as found in streamed block results.
pub fn create_encoded_wasm_event(attributes: &[EventAttribute]) -> TxEvent {
    TxEvent {
        event_type: "wasm".to_string(),
        attributes: encode_attributes(attributes),
    }
}

/// Block containing a single transaction with the given events.
pub fn create_block(height: u64, events: Vec<TxEvent>) -> BlockData {
    BlockData {
        height,
        time: None,
        txs: vec![BlockTx {
            txhash: format!("TX{}", height),
            events,
        }],
    }
}

/// Block without transactions.
pub fn create_empty_block(height: u64) -> BlockData {
    BlockData {
        height,
        time: None,
        txs: Vec::new(),
    }
}

/// Block carrying one onboard event for `SCOPE_ADDRESS` addressed to this verifier.
pub fn create_onboard_block(height: u64) -> BlockData {
    let attributes = contract_attributes(Some("onboard_asset"), Some(VERIFIER_ADDRESS), Some(SCOPE_ADDRESS));
    create_block(height, vec![create_encoded_wasm_event(&attributes)])
}

/// A queued verification for `SCOPE_ADDRESS`.
pub fn create_verification_message(success: bool) -> VerificationMessage {
    VerificationMessage {
        failure_message_prefix: "[ONBOARD_ASSET | Tx: TEST | Asset: TEST]:".to_string(),
        event: create_onboard_event(),
        scope_attribute: create_scope_attribute(AssetOnboardingStatus::Pending),
        verification: AssetVerification::new(success, "checked by test"),
    }
}

// ============================================================================
// MOCK QUERIER
// ============================================================================

/// In-memory chain with a single verifier account.
#[derive(Default)]
pub struct MockQuerier {
    pub scope_attributes: Mutex<HashMap<String, AssetScopeAttribute>>,
    pub transactions: Mutex<HashMap<String, TxResponse>>,
    /// Sequence the chain reports for the verifier account
    pub chain_sequence: Mutex<u64>,
    /// Number of upcoming account lookups that fail
    pub failing_account_lookups: Mutex<usize>,
    pub account_lookups: Mutex<usize>,
    pub scope_queries: Mutex<Vec<String>>,
}

impl MockQuerier {
    pub fn new() -> Self {
        let querier = Self::default();
        *querier.chain_sequence.lock().unwrap() = INITIAL_SEQUENCE;
        querier
    }

    pub fn with_scope_attribute(self, scope_attribute: AssetScopeAttribute) -> Self {
        self.scope_attributes
            .lock()
            .unwrap()
            .insert(scope_attribute.scope_address.clone(), scope_attribute);
        self
    }

    pub fn with_transaction(self, tx: TxResponse) -> Self {
        self.transactions.lock().unwrap().insert(tx.txhash.clone(), tx);
        self
    }

    pub fn set_chain_sequence(&self, sequence: u64) {
        *self.chain_sequence.lock().unwrap() = sequence;
    }

    pub fn fail_next_account_lookups(&self, count: usize) {
        *self.failing_account_lookups.lock().unwrap() = count;
    }

    pub fn account_lookup_count(&self) -> usize {
        *self.account_lookups.lock().unwrap()
    }
}

#[async_trait]
impl ChainQuerier for MockQuerier {
    async fn query_asset_scope_attribute(&self, scope_address: &str) -> anyhow::Result<AssetScopeAttribute> {
        self.scope_queries.lock().unwrap().push(scope_address.to_string());
        self.scope_attributes
            .lock()
            .unwrap()
            .get(scope_address)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No scope attribute for scope [{}]", scope_address))
    }

    async fn get_tx(&self, tx_hash: &str) -> anyhow::Result<TxResponse> {
        self.transactions
            .lock()
            .unwrap()
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("tx {} not found", tx_hash))
    }

    async fn get_base_account(&self, address: &str) -> anyhow::Result<BaseAccount> {
        *self.account_lookups.lock().unwrap() += 1;
        let mut failing = self.failing_account_lookups.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            anyhow::bail!("account service unavailable");
        }
        Ok(BaseAccount {
            address: address.to_string(),
            account_number: ACCOUNT_NUMBER,
            sequence: *self.chain_sequence.lock().unwrap(),
        })
    }
}

// ============================================================================
// MOCK EXECUTOR
// ============================================================================

/// Outcome the mock executor produces for one submission.
#[derive(Debug, Clone)]
pub enum ScriptedBroadcast {
    Accepted,
    Rejected { code: u32, raw_log: String },
    Failed(String),
    Panic(String),
}

/// Records every submission; answers from a script, then accepts everything.
#[derive(Default)]
pub struct MockExecutor {
    pub script: Mutex<VecDeque<ScriptedBroadcast>>,
    pub submissions: Mutex<Vec<(VerifyAssetExecute, BaseAccount)>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<ScriptedBroadcast>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn submitted_sequences(&self) -> Vec<u64> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, account)| account.sequence)
            .collect()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainExecutor for MockExecutor {
    async fn verify_asset(
        &self,
        execute: &VerifyAssetExecute,
        account: &BaseAccount,
    ) -> anyhow::Result<BroadcastTxResponse> {
        self.submissions
            .lock()
            .unwrap()
            .push((execute.clone(), account.clone()));
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedBroadcast::Accepted);
        match outcome {
            ScriptedBroadcast::Accepted => Ok(BroadcastTxResponse {
                txhash: format!("HASH{}", account.sequence),
                code: 0,
                raw_log: String::new(),
            }),
            ScriptedBroadcast::Rejected { code, raw_log } => Ok(BroadcastTxResponse {
                txhash: format!("HASH{}", account.sequence),
                code,
                raw_log,
            }),
            ScriptedBroadcast::Failed(message) => Err(anyhow::anyhow!(message)),
            ScriptedBroadcast::Panic(message) => panic!("{}", message),
        }
    }
}

// ============================================================================
// MOCK BLOCK FEED
// ============================================================================

/// Item of a scripted block stream.
#[derive(Debug, Clone)]
pub enum FeedItem {
    Block(BlockData),
    Error(String),
}

/// Block feed that replays one scripted stream per `open` call.
///
/// Once the scripts are exhausted, opened streams never yield, so a running engine stays put
/// until it is stopped.
#[derive(Default)]
pub struct MockFeed {
    pub current_height: Mutex<Option<u64>>,
    pub scripts: Mutex<VecDeque<Vec<FeedItem>>>,
    pub opened_from: Mutex<Vec<Option<u64>>>,
    pub shutdowns: Mutex<usize>,
    pub fail_shutdown: Mutex<bool>,
}

impl MockFeed {
    pub fn new(current_height: Option<u64>, scripts: Vec<Vec<FeedItem>>) -> Self {
        Self {
            current_height: Mutex::new(current_height),
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    pub fn opened_from(&self) -> Vec<Option<u64>> {
        self.opened_from.lock().unwrap().clone()
    }

    pub fn shutdown_count(&self) -> usize {
        *self.shutdowns.lock().unwrap()
    }
}

#[async_trait]
impl BlockFeed for MockFeed {
    async fn current_height(&self) -> anyhow::Result<Option<u64>> {
        Ok(*self.current_height.lock().unwrap())
    }

    async fn open(&self, from_height: Option<u64>) -> anyhow::Result<BlockStream> {
        self.opened_from.lock().unwrap().push(from_height);
        let stream: BlockStream = match self.scripts.lock().unwrap().pop_front() {
            Some(items) => Box::pin(futures::stream::iter(items.into_iter().map(|item| match item {
                FeedItem::Block(block) => Ok(block),
                FeedItem::Error(message) => Err(anyhow::anyhow!(message)),
            }))),
            None => Box::pin(futures::stream::pending::<anyhow::Result<BlockData>>()),
        };
        Ok(stream)
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        *self.shutdowns.lock().unwrap() += 1;
        if *self.fail_shutdown.lock().unwrap() {
            anyhow::bail!("feed refused to shut down");
        }
        Ok(())
    }
}

// ============================================================================
// MOCK PROCESSOR
// ============================================================================

/// Processor returning a fixed asset and decision, or scripted failures.
pub struct MockProcessor {
    pub retrieve_error: Option<String>,
    pub verify_error: Option<String>,
    pub retrieve_panic: Option<String>,
    pub verify_panic: Option<String>,
    pub success: bool,
    pub received_routes: Mutex<Vec<Vec<AccessRoute>>>,
}

impl MockProcessor {
    pub fn approving() -> Self {
        Self {
            retrieve_error: None,
            verify_error: None,
            retrieve_panic: None,
            verify_panic: None,
            success: true,
            received_routes: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_retrieval(message: &str) -> Self {
        Self {
            retrieve_error: Some(message.to_string()),
            ..Self::approving()
        }
    }

    pub fn failing_verification(message: &str) -> Self {
        Self {
            verify_error: Some(message.to_string()),
            ..Self::approving()
        }
    }

    pub fn panicking_retrieval(message: &str) -> Self {
        Self {
            retrieve_panic: Some(message.to_string()),
            ..Self::approving()
        }
    }

    pub fn panicking_verification(message: &str) -> Self {
        Self {
            verify_panic: Some(message.to_string()),
            ..Self::approving()
        }
    }
}

#[async_trait]
impl VerificationProcessor for MockProcessor {
    type Asset = String;

    async fn retrieve_asset(
        &self,
        _event: &AssetClassificationEvent,
        scope_attribute: &AssetScopeAttribute,
        access_routes: &[AccessRoute],
    ) -> anyhow::Result<String> {
        self.received_routes.lock().unwrap().push(access_routes.to_vec());
        if let Some(message) = &self.retrieve_panic {
            panic!("{}", message);
        }
        match &self.retrieve_error {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(format!("asset-bytes-for-{}", scope_attribute.asset_uuid)),
        }
    }

    async fn verify_asset(
        &self,
        _event: &AssetClassificationEvent,
        _scope_attribute: &AssetScopeAttribute,
        asset: String,
    ) -> anyhow::Result<AssetVerification> {
        if let Some(message) = &self.verify_panic {
            panic!("{}", message);
        }
        match &self.verify_error {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(AssetVerification::new(self.success, format!("checked {}", asset))),
        }
    }
}

// ============================================================================
// HANDLER PARAMETERS
// ============================================================================

/// Receiving ends of the queues handed to a handler under test.
pub struct HandlerQueues {
    pub verifications: mpsc::Receiver<VerificationMessage>,
    pub notifications: mpsc::Receiver<VerifierNotification>,
}

impl HandlerQueues {
    /// Everything queued so far, without waiting.
    pub fn drain_notifications(&mut self) -> Vec<VerifierNotification> {
        let mut notifications = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            notifications.push(notification);
        }
        notifications
    }

    pub fn drain_verifications(&mut self) -> Vec<VerificationMessage> {
        let mut verifications = Vec::new();
        while let Ok(verification) = self.verifications.try_recv() {
            verifications.push(verification);
        }
        verifications
    }
}

pub fn create_handler_parameters(
    event: AssetClassificationEvent,
    querier: Arc<MockQuerier>,
    processor: Arc<MockProcessor>,
) -> (EventHandlerParameters<MockProcessor>, HandlerQueues) {
    let (verification_sender, verifications) = mpsc::channel(16);
    let (notification_sender, notifications) = mpsc::channel(16);
    let parameters = EventHandlerParameters {
        event,
        querier,
        verifier_address: VERIFIER_ADDRESS.to_string(),
        processor,
        verification_sender,
        notification_sender,
    };
    (
        parameters,
        HandlerQueues {
            verifications,
            notifications,
        },
    )
}

// ============================================================================
// NOTIFICATION CAPTURE
// ============================================================================

/// Notifications recorded by `recording_processors`, in delivery order.
pub type RecordedNotifications = Arc<Mutex<Vec<VerifierNotification>>>;

/// Registers a recording processor for every built-in notification kind.
pub fn recording_processors() -> (NotificationProcessors, RecordedNotifications) {
    let recorded: RecordedNotifications = Arc::new(Mutex::new(Vec::new()));
    let mut builder = NotificationProcessors::builder();
    for kind in NotificationKind::ALL {
        let recorded = Arc::clone(&recorded);
        builder = builder
            .add_processor(kind, move |notification| {
                let recorded = Arc::clone(&recorded);
                async move {
                    recorded.lock().unwrap().push(notification);
                    Ok(())
                }
            })
            .expect("each kind is registered once");
    }
    (builder.build(), recorded)
}

/// Kinds of the recorded notifications, in delivery order.
pub fn recorded_kinds(recorded: &RecordedNotifications) -> Vec<NotificationKind> {
    recorded
        .lock()
        .unwrap()
        .iter()
        .filter_map(|notification| match notification.key() {
            asset_verifier::notification::NotificationKey::Builtin(kind) => Some(kind),
            asset_verifier::notification::NotificationKey::Custom(_) => None,
        })
        .collect()
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until<F>(description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for: {}", description);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
