//! Domain model for the asset classification contract
//!
//! Contract responses use snake_case JSON, so every contract-facing structure derives serde
//! with the default field naming. Chain-level structures (accounts, transactions, blocks)
//! are plain values produced by the `chain` collaborators.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

// ============================================================================
// CONTRACT STATE
// ============================================================================

/// Onboarding status of an asset scope attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetOnboardingStatus {
    /// The asset has been onboarded, but not yet verified
    Pending,
    /// The asset has been rejected by its chosen verifier
    Denied,
    /// The asset is fully verified and classified as the chosen type
    Approved,
}

impl fmt::Display for AssetOnboardingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetOnboardingStatus::Pending => "PENDING",
            AssetOnboardingStatus::Denied => "DENIED",
            AssetOnboardingStatus::Approved => "APPROVED",
        };
        f.write_str(name)
    }
}

/// Which party registered an access definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDefinitionType {
    /// The address that onboarded the scope
    Requestor,
    /// The address the requestor chose for verification
    Verifier,
}

/// A location where the underlying asset data can be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRoute {
    pub route: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl AccessRoute {
    pub fn new(route: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            route: route.into(),
            name: name.map(str::to_string),
        }
    }
}

/// Access routes registered by a single owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDefinition {
    pub owner_address: String,
    #[serde(default)]
    pub access_routes: Vec<AccessRoute>,
    pub definition_type: AccessDefinitionType,
}

/// Result recorded by the contract once a verifier has made a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetVerificationResult {
    pub message: String,
    pub success: bool,
}

/// Fee split recipient for a verifier's onboarding cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDestination {
    pub address: String,
    pub fee_amount: String,
}

/// Verifier configuration captured when the asset was onboarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierDetail {
    pub address: String,
    pub onboarding_cost: String,
    pub onboarding_denom: String,
    #[serde(default)]
    pub fee_destinations: Vec<FeeDestination>,
    #[serde(default)]
    pub entity_detail: Option<serde_json::Value>,
}

/// The contract's classification record for a single scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetScopeAttribute {
    pub asset_uuid: Uuid,
    pub scope_address: String,
    pub asset_type: String,
    pub requestor_address: String,
    pub verifier_address: String,
    pub onboarding_status: AssetOnboardingStatus,
    #[serde(default)]
    pub latest_verifier_detail: Option<VerifierDetail>,
    #[serde(default)]
    pub latest_verification_result: Option<AssetVerificationResult>,
    #[serde(default)]
    pub access_definitions: Vec<AccessDefinition>,
}

impl AssetScopeAttribute {
    /// Access routes registered by the requestor.
    ///
    /// Returns an empty list when the requestor registered no definition, or when more than
    /// one requestor definition exists and the target is ambiguous.
    pub fn requestor_access_routes(&self) -> Vec<AccessRoute> {
        let mut requestor_definitions = self
            .access_definitions
            .iter()
            .filter(|definition| definition.definition_type == AccessDefinitionType::Requestor);
        match (requestor_definitions.next(), requestor_definitions.next()) {
            (Some(definition), None) => definition.access_routes.clone(),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// VERIFICATION
// ============================================================================

/// Decision rendered by a verification processor for a retrieved asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetVerification {
    pub message: String,
    pub success: bool,
    /// Replacement access routes for the verifier, if the processor wants to publish any
    #[serde(default)]
    pub access_routes: Option<Vec<AccessRoute>>,
}

impl AssetVerification {
    pub fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success,
            access_routes: None,
        }
    }

    pub fn with_access_routes(mut self, access_routes: Vec<AccessRoute>) -> Self {
        self.access_routes = Some(access_routes);
        self
    }
}

/// The `verify_asset` execute message sent to the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyAssetExecute {
    pub scope_address: String,
    pub success: bool,
    pub message: Option<String>,
    pub access_routes: Option<Vec<AccessRoute>>,
}

impl VerifyAssetExecute {
    pub fn with_scope_address(scope_address: impl Into<String>, verification: &AssetVerification) -> Self {
        Self {
            scope_address: scope_address.into(),
            success: verification.success,
            message: Some(verification.message.clone()),
            access_routes: verification.access_routes.clone(),
        }
    }

    /// JSON body of the contract execute message.
    ///
    /// The identifier must serialize `type` before `value`; the contract anchors on it.
    pub fn to_msg(&self) -> serde_json::Value {
        json!({
            "verify_asset": {
                "identifier": {
                    "type": "scope_address",
                    "value": self.scope_address,
                },
                "success": self.success,
                "message": self.message,
                "access_routes": self.access_routes,
            }
        })
    }
}

// ============================================================================
// CHAIN STRUCTURES
// ============================================================================

/// Auth module account data needed to sign a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseAccount {
    pub address: String,
    pub account_number: u64,
    pub sequence: u64,
}

/// Result of broadcasting a transaction in sync mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastTxResponse {
    pub txhash: String,
    pub code: u32,
    pub raw_log: String,
}

impl BroadcastTxResponse {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// One key/value pair of a transaction event. Either half may be missing on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventAttribute {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl EventAttribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }
}

/// A typed event emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

/// A transaction fetched by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResponse {
    pub height: u64,
    pub txhash: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub code: u32,
    pub events: Vec<TxEvent>,
}

/// Events of a single transaction included in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTx {
    pub txhash: String,
    pub events: Vec<TxEvent>,
}

/// One block delivered by the block feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub height: u64,
    pub time: Option<DateTime<Utc>>,
    pub txs: Vec<BlockTx>,
}
