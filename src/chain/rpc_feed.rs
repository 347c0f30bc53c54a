//! Tendermint RPC Block Feed
//!
//! Streams blocks by polling the node's RPC endpoints: `/status` for the latest height,
//! `/block` for the header time and raw transactions, and `/block_results` for the events of
//! each transaction. Event attributes are passed through exactly as the node returns them
//! (base64 for the block results endpoint).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{BlockFeed, BlockStream};
use crate::model::{BlockData, BlockTx, TxEvent};

// ============================================================================
// RPC RESPONSE STRUCTURES
// ============================================================================

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    latest_block_height: String,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: BlockHeader,
    data: BlockBody,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    #[serde(default)]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct BlockResultsResult {
    #[serde(default)]
    txs_results: Option<Vec<TxResult>>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    events: Vec<TxEvent>,
}

// ============================================================================
// BLOCK FEED IMPLEMENTATION
// ============================================================================

/// `BlockFeed` that polls a Tendermint RPC endpoint.
#[derive(Clone)]
pub struct RpcBlockFeed {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl RpcBlockFeed {
    pub fn new(base_url: &str, poll_interval: Duration, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
        })
    }

    async fn rpc_get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to send RPC request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("RPC request to {} failed with status {}: {}", url, status, body);
        }

        let response: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse RPC response from {}", url))?;
        Ok(response.result)
    }

    /// Latest committed block height reported by the node.
    pub async fn latest_height(&self) -> Result<u64> {
        let status: StatusResult = self.rpc_get("status").await?;
        status
            .sync_info
            .latest_block_height
            .parse::<u64>()
            .context("Failed to parse latest_block_height")
    }

    /// Fetches a block and the events of each of its transactions.
    pub async fn fetch_block(&self, height: u64) -> Result<BlockData> {
        let block: BlockResult = self.rpc_get(&format!("block?height={}", height)).await?;
        let results: BlockResultsResult = self
            .rpc_get(&format!("block_results?height={}", height))
            .await?;

        let time = block
            .block
            .header
            .time
            .as_deref()
            .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
            .map(|time| time.with_timezone(&Utc));

        let tx_hashes = block
            .block
            .data
            .txs
            .unwrap_or_default()
            .iter()
            .map(|tx| tx_hash(tx))
            .collect::<Result<Vec<_>>>()?;

        let txs_results = results.txs_results.unwrap_or_default();
        if tx_hashes.len() != txs_results.len() {
            anyhow::bail!(
                "Block {} has {} transactions but {} transaction results",
                height,
                tx_hashes.len(),
                txs_results.len()
            );
        }

        let txs = tx_hashes
            .into_iter()
            .zip(txs_results)
            .map(|(txhash, result)| BlockTx {
                txhash,
                events: result.events,
            })
            .collect();

        Ok(BlockData { height, time, txs })
    }
}

/// Hash of a raw transaction: uppercase hex SHA-256 of its bytes.
pub fn tx_hash(encoded_tx: &str) -> Result<String> {
    let bytes = general_purpose::STANDARD
        .decode(encoded_tx)
        .context("Failed to decode transaction bytes")?;
    Ok(hex::encode_upper(Sha256::digest(bytes)))
}

struct FeedState {
    feed: RpcBlockFeed,
    next_height: Option<u64>,
    latest_height: u64,
    done: bool,
}

impl FeedState {
    async fn next_block(&mut self) -> Result<BlockData> {
        loop {
            let next_height = match self.next_height {
                Some(height) if height <= self.latest_height => height,
                _ => {
                    let latest_height = self.feed.latest_height().await?;
                    let next_height = *self.next_height.get_or_insert(latest_height);
                    self.latest_height = latest_height;
                    if next_height > latest_height {
                        tokio::time::sleep(self.feed.poll_interval).await;
                        continue;
                    }
                    next_height
                }
            };
            let block = self.feed.fetch_block(next_height).await?;
            self.next_height = Some(next_height + 1);
            return Ok(block);
        }
    }
}

#[async_trait]
impl BlockFeed for RpcBlockFeed {
    async fn current_height(&self) -> Result<Option<u64>> {
        self.latest_height().await.map(Some)
    }

    async fn open(&self, from_height: Option<u64>) -> Result<BlockStream> {
        info!("Opening block feed at {} from height {:?}", self.base_url, from_height);
        let state = FeedState {
            feed: self.clone(),
            next_height: from_height,
            latest_height: 0,
            done: false,
        };
        let stream = futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            let block = state.next_block().await;
            if block.is_err() {
                state.done = true;
            }
            Some((block, state))
        });
        Ok(Box::pin(stream))
    }

    async fn shutdown(&self) -> Result<()> {
        debug!("Block feed for {} shut down", self.base_url);
        Ok(())
    }
}
