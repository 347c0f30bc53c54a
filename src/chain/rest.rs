//! Cosmos REST Gateway Querier
//!
//! Implements `ChainQuerier` against the REST (gRPC gateway) endpoints of a Provenance node:
//! contract smart queries, transaction lookups and auth account lookups.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use tracing::debug;

use super::ChainQuerier;
use crate::model::{AssetScopeAttribute, BaseAccount, TxEvent, TxResponse};

// Accepts u64 values encoded either as JSON strings or numbers
fn deserialize_u64_from_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let value: serde_json::Value = Deserialize::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => s.parse::<u64>().map_err(D::Error::custom),
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("expected unsigned integer, got: {}", n))),
        _ => Err(D::Error::custom(format!(
            "expected string or number, got: {:?}",
            value
        ))),
    }
}

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

#[derive(Debug, Deserialize)]
struct SmartQueryResponse<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct GetTxResponse {
    tx_response: TxResponseBody,
}

#[derive(Debug, Deserialize)]
struct TxResponseBody {
    #[serde(deserialize_with = "deserialize_u64_from_string")]
    height: u64,
    txhash: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    events: Vec<TxEvent>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account: AccountBody,
}

#[derive(Debug, Deserialize)]
struct AccountBody {
    address: String,
    #[serde(deserialize_with = "deserialize_u64_from_string")]
    account_number: u64,
    #[serde(deserialize_with = "deserialize_u64_from_string")]
    sequence: u64,
}

// ============================================================================
// REST QUERIER IMPLEMENTATION
// ============================================================================

/// `ChainQuerier` backed by a node's REST gateway.
pub struct RestChainQuerier {
    client: Client,
    base_url: String,
    contract_address: String,
}

impl RestChainQuerier {
    /// Creates a querier for the given REST base URL and contract address.
    pub fn new(base_url: &str, contract_address: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            contract_address: contract_address.to_string(),
        })
    }

    /// Runs a smart query against the contract and decodes its `data` payload.
    async fn smart_query<T: DeserializeOwned>(&self, query: &serde_json::Value) -> Result<T> {
        let encoded = general_purpose::URL_SAFE.encode(serde_json::to_vec(query)?);
        let url = format!(
            "{}/cosmwasm/wasm/v1/contract/{}/smart/{}",
            self.base_url, self.contract_address, encoded
        );
        debug!("Contract smart query: {}", query);
        let response: SmartQueryResponse<T> = self.get_json(&url).await?;
        response.data.ok_or_else(|| {
            anyhow::anyhow!(
                "Received null response from asset classification smart contract for query: {}",
                query
            )
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Request to {} failed with status {}: {}", url, status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

#[async_trait]
impl ChainQuerier for RestChainQuerier {
    async fn query_asset_scope_attribute(&self, scope_address: &str) -> Result<AssetScopeAttribute> {
        let query = json!({
            "query_asset_scope_attribute": {
                "identifier": {
                    "type": "scope_address",
                    "value": scope_address,
                }
            }
        });
        self.smart_query(&query)
            .await
            .with_context(|| format!("Query asset scope attribute by scope address [{}]", scope_address))
    }

    async fn get_tx(&self, tx_hash: &str) -> Result<TxResponse> {
        let url = format!("{}/cosmos/tx/v1beta1/txs/{}", self.base_url, tx_hash);
        let response: GetTxResponse = self.get_json(&url).await?;
        let body = response.tx_response;
        let timestamp = body
            .timestamp
            .as_deref()
            .and_then(|timestamp| DateTime::parse_from_rfc3339(timestamp).ok())
            .map(|timestamp| timestamp.with_timezone(&Utc));

        Ok(TxResponse {
            height: body.height,
            txhash: body.txhash,
            timestamp,
            code: body.code,
            events: body.events,
        })
    }

    async fn get_base_account(&self, address: &str) -> Result<BaseAccount> {
        let url = format!("{}/cosmos/auth/v1beta1/accounts/{}", self.base_url, address);
        let response: AccountResponse = self
            .get_json(&url)
            .await
            .with_context(|| format!("Failed to look up account {}", address))?;

        Ok(BaseAccount {
            address: response.account.address,
            account_number: response.account.account_number,
            sequence: response.account.sequence,
        })
    }
}
