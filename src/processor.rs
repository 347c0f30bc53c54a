//! Verification Processors
//!
//! A verification processor owns the business decision: it fetches the asset behind a scope
//! and decides whether it really is what the requestor claimed. The engine only supplies the
//! event, the scope attribute and the requestor's access routes.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::event::AssetClassificationEvent;
use crate::model::{AccessRoute, AssetScopeAttribute, AssetVerification};

/// Pluggable retrieval and verification of onboarded assets.
#[async_trait]
pub trait VerificationProcessor: Send + Sync + 'static {
    /// The retrieved asset, handed back to `verify_asset`.
    type Asset: Send;

    /// Fetches the asset using the requestor's access routes.
    async fn retrieve_asset(
        &self,
        event: &AssetClassificationEvent,
        scope_attribute: &AssetScopeAttribute,
        access_routes: &[AccessRoute],
    ) -> Result<Self::Asset>;

    /// Decides whether the retrieved asset is valid for its declared type.
    async fn verify_asset(
        &self,
        event: &AssetClassificationEvent,
        scope_attribute: &AssetScopeAttribute,
        asset: Self::Asset,
    ) -> Result<AssetVerification>;
}

// ============================================================================
// ROUTE FETCH PROCESSOR
// ============================================================================

/// Reference processor that downloads the asset from the first requestor route over HTTP.
///
/// Any non-empty payload is approved. Deployments replace this with a processor that
/// inspects the asset for its declared type.
pub struct RouteFetchProcessor {
    client: Client,
}

impl RouteFetchProcessor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl VerificationProcessor for RouteFetchProcessor {
    type Asset = Vec<u8>;

    async fn retrieve_asset(
        &self,
        _event: &AssetClassificationEvent,
        scope_attribute: &AssetScopeAttribute,
        access_routes: &[AccessRoute],
    ) -> Result<Vec<u8>> {
        let route = access_routes.first().with_context(|| {
            format!(
                "No requestor access routes for scope [{}]",
                scope_attribute.scope_address
            )
        })?;
        debug!("Fetching asset for scope {} from {}", scope_attribute.scope_address, route.route);

        let response = self
            .client
            .get(&route.route)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", route.route))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Asset route {} responded with status {}", route.route, status);
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read asset from {}", route.route))?;
        Ok(bytes.to_vec())
    }

    async fn verify_asset(
        &self,
        _event: &AssetClassificationEvent,
        scope_attribute: &AssetScopeAttribute,
        asset: Vec<u8>,
    ) -> Result<AssetVerification> {
        let verification = if asset.is_empty() {
            AssetVerification::new(false, format!("Asset [{}] is empty", scope_attribute.asset_uuid))
        } else {
            AssetVerification::new(
                true,
                format!(
                    "Asset [{}] retrieved ({} bytes) and accepted as type [{}]",
                    scope_attribute.asset_uuid,
                    asset.len(),
                    scope_attribute.asset_type
                ),
            )
        };
        info!(
            "Verified scope {}: success={}",
            scope_attribute.scope_address, verification.success
        );
        Ok(verification)
    }
}
