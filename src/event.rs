//! Contract Event Model
//!
//! Turns raw transaction events into typed asset classification events. The chain emits a
//! large number of events that have nothing to do with the contract, so every field here is
//! optional and classification never fails: an attribute that cannot be decoded is simply
//! absent.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};

use crate::model::{BlockData, EventAttribute, TxResponse};

/// Event type emitted by all cosmwasm contract executions.
pub const WASM_EVENT_TYPE: &str = "wasm";

/// Attribute added by the wasm module to identify the emitting contract.
pub const CONTRACT_ADDRESS_KEY: &str = "_contract_address";

// ============================================================================
// CONTRACT VOCABULARY
// ============================================================================

/// Every event type emitted by the asset classification smart contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContractEvent {
    AddAssetDefinition,
    AddAssetVerifier,
    BindContractAlias,
    DeleteAssetDefinition,
    InstantiateContract,
    MigrateContract,
    OnboardAsset,
    ToggleAssetDefinition,
    UpdateAccessRoutes,
    UpdateAssetDefinition,
    UpdateAssetVerifier,
    VerifyAsset,
}

impl ContractEvent {
    pub const ALL: [ContractEvent; 12] = [
        ContractEvent::AddAssetDefinition,
        ContractEvent::AddAssetVerifier,
        ContractEvent::BindContractAlias,
        ContractEvent::DeleteAssetDefinition,
        ContractEvent::InstantiateContract,
        ContractEvent::MigrateContract,
        ContractEvent::OnboardAsset,
        ContractEvent::ToggleAssetDefinition,
        ContractEvent::UpdateAccessRoutes,
        ContractEvent::UpdateAssetDefinition,
        ContractEvent::UpdateAssetVerifier,
        ContractEvent::VerifyAsset,
    ];

    /// The value the contract writes into the `asset_event_type` attribute.
    pub fn contract_name(&self) -> &'static str {
        match self {
            ContractEvent::AddAssetDefinition => "add_asset_definition",
            ContractEvent::AddAssetVerifier => "add_asset_verifier",
            ContractEvent::BindContractAlias => "bind_contract_alias",
            ContractEvent::DeleteAssetDefinition => "delete_asset_definition",
            ContractEvent::InstantiateContract => "instantiate_contract",
            ContractEvent::MigrateContract => "migrate_contract",
            ContractEvent::OnboardAsset => "onboard_asset",
            ContractEvent::ToggleAssetDefinition => "toggle_asset_definition",
            ContractEvent::UpdateAccessRoutes => "update_access_routes",
            ContractEvent::UpdateAssetDefinition => "update_asset_definition",
            ContractEvent::UpdateAssetVerifier => "update_asset_verifier",
            ContractEvent::VerifyAsset => "verify_asset",
        }
    }
}

impl fmt::Display for ContractEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.contract_name())
    }
}

impl FromStr for ContractEvent {
    type Err = anyhow::Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ContractEvent::ALL
            .into_iter()
            .find(|event| event.contract_name() == name)
            .ok_or_else(|| anyhow::anyhow!("Unknown ContractEvent variant [{}]", name))
    }
}

/// Attribute keys the contract attaches to its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKey {
    EventType,
    AssetType,
    ScopeAddress,
    VerifierAddress,
    ScopeOwnerAddress,
    NewValue,
    AdditionalMetadata,
}

impl ContractKey {
    pub fn event_name(&self) -> &'static str {
        match self {
            ContractKey::EventType => "asset_event_type",
            ContractKey::AssetType => "asset_type",
            ContractKey::ScopeAddress => "asset_scope_address",
            ContractKey::VerifierAddress => "asset_verifier_address",
            ContractKey::ScopeOwnerAddress => "asset_scope_owner_address",
            ContractKey::NewValue => "asset_new_value",
            ContractKey::AdditionalMetadata => "asset_additional_metadata",
        }
    }
}

// ============================================================================
// RAW EVENTS
// ============================================================================

/// How attribute keys and values arrive from a source.
///
/// Block results streamed from the node carry base64 attributes, while transactions fetched
/// through the REST gateway carry plain strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeEncoding {
    Base64,
    Plain,
}

/// A single transaction event as emitted by the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChainEvent {
    pub block_height: u64,
    pub block_time: Option<DateTime<Utc>>,
    pub tx_hash: String,
    pub event_type: String,
    pub attributes: Vec<EventAttribute>,
}

// ============================================================================
// CLASSIFIED EVENTS
// ============================================================================

/// A raw chain event resolved against the asset classification contract's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetClassificationEvent {
    pub source_event: RawChainEvent,
    pub input_values_encoded: bool,
    pub event_type: Option<ContractEvent>,
    pub asset_type: Option<String>,
    pub scope_address: Option<String>,
    pub verifier_address: Option<String>,
    pub scope_owner_address: Option<String>,
    pub new_value: Option<String>,
    pub additional_metadata: Option<String>,
    contract_address: Option<String>,
}

impl AssetClassificationEvent {
    pub fn new(source_event: RawChainEvent, encoding: AttributeEncoding) -> Self {
        let attributes = attribute_map(&source_event.attributes, encoding);
        let lookup = |key: ContractKey| attributes.get(key.event_name()).cloned();

        Self {
            event_type: lookup(ContractKey::EventType).and_then(|name| name.parse().ok()),
            asset_type: lookup(ContractKey::AssetType),
            scope_address: lookup(ContractKey::ScopeAddress),
            verifier_address: lookup(ContractKey::VerifierAddress),
            scope_owner_address: lookup(ContractKey::ScopeOwnerAddress),
            new_value: lookup(ContractKey::NewValue),
            additional_metadata: lookup(ContractKey::AdditionalMetadata),
            contract_address: attributes.get(CONTRACT_ADDRESS_KEY).cloned(),
            input_values_encoded: encoding == AttributeEncoding::Base64,
            source_event,
        }
    }

    /// Classifies all wasm events in a streamed block.
    pub fn from_block_data(block: &BlockData) -> Vec<AssetClassificationEvent> {
        block
            .txs
            .iter()
            .flat_map(|tx| {
                tx.events
                    .iter()
                    .filter(|event| event.event_type == WASM_EVENT_TYPE)
                    .map(move |event| RawChainEvent {
                        block_height: block.height,
                        block_time: block.time,
                        tx_hash: tx.txhash.clone(),
                        event_type: event.event_type.clone(),
                        attributes: event.attributes.clone(),
                    })
            })
            .map(|raw| AssetClassificationEvent::new(raw, AttributeEncoding::Base64))
            .collect()
    }

    /// Classifies all wasm events in a transaction fetched by hash.
    pub fn from_tx_response(tx: &TxResponse) -> Vec<AssetClassificationEvent> {
        tx.events
            .iter()
            .filter(|event| event.event_type == WASM_EVENT_TYPE)
            .map(|event| RawChainEvent {
                block_height: tx.height,
                block_time: tx.timestamp,
                tx_hash: tx.txhash.clone(),
                event_type: event.event_type.clone(),
                attributes: event.attributes.clone(),
            })
            .map(|raw| AssetClassificationEvent::new(raw, AttributeEncoding::Plain))
            .collect()
    }

    /// Address of the contract that emitted this event, when the wasm module recorded it.
    pub fn contract_address(&self) -> Option<&str> {
        self.contract_address.as_deref()
    }

    /// Whether this event may have come from the given contract.
    ///
    /// Events without a recorded contract address are kept.
    pub fn is_from_contract(&self, contract_address: &str) -> bool {
        self.contract_address
            .as_deref()
            .map_or(true, |address| address == contract_address)
    }

    pub fn tx_hash(&self) -> &str {
        &self.source_event.tx_hash
    }
}

impl fmt::Display for AssetClassificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AssetClassificationEvent[eventType={:?}, assetType={:?}, scopeAddress={:?}, verifierAddress={:?}, scopeOwnerAddress={:?}, newValue={:?}]",
            self.event_type,
            self.asset_type,
            self.scope_address,
            self.verifier_address,
            self.scope_owner_address,
            self.new_value,
        )
    }
}

/// Builds the lowercase-keyed attribute lookup. Later duplicates overwrite earlier ones.
fn attribute_map(attributes: &[EventAttribute], encoding: AttributeEncoding) -> HashMap<String, String> {
    attributes
        .iter()
        .filter_map(|attribute| {
            let key = decode_value(attribute.key.as_deref()?, encoding)?;
            let value = decode_value(attribute.value.as_deref()?, encoding)?;
            Some((key.to_lowercase(), value))
        })
        .collect()
}

fn decode_value(value: &str, encoding: AttributeEncoding) -> Option<String> {
    match encoding {
        AttributeEncoding::Plain => Some(value.to_string()),
        AttributeEncoding::Base64 => general_purpose::STANDARD
            .decode(value)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok()),
    }
}
