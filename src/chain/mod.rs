//! Chain Collaborators
//!
//! The verifier talks to the chain through three narrow interfaces: a querier for contract
//! and transaction lookups, an executor that signs and broadcasts the verification message,
//! and a block feed that streams blocks from a given height.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::model::{AssetScopeAttribute, BaseAccount, BlockData, BroadcastTxResponse, TxResponse, VerifyAssetExecute};

pub mod dry_run;
pub mod rest;
pub mod rpc_feed;

pub use dry_run::DryRunExecutor;
pub use rest::RestChainQuerier;
pub use rpc_feed::RpcBlockFeed;

/// Stream of blocks produced by a `BlockFeed`. An error item ends the stream.
pub type BlockStream = BoxStream<'static, anyhow::Result<BlockData>>;

/// Read access to the chain and the asset classification contract.
#[async_trait]
pub trait ChainQuerier: Send + Sync {
    /// Fetches the scope attribute for a scope address. Fails if none exists.
    async fn query_asset_scope_attribute(&self, scope_address: &str) -> anyhow::Result<AssetScopeAttribute>;

    /// Fetches a transaction and its events by hash.
    async fn get_tx(&self, tx_hash: &str) -> anyhow::Result<TxResponse>;

    /// Fetches the auth account, including its current sequence number.
    async fn get_base_account(&self, address: &str) -> anyhow::Result<BaseAccount>;
}

/// Signs and broadcasts contract executions on behalf of the verifier account.
#[async_trait]
pub trait ChainExecutor: Send + Sync {
    /// Broadcasts a `verify_asset` execution signed with the given account and sequence.
    async fn verify_asset(
        &self,
        execute: &VerifyAssetExecute,
        account: &BaseAccount,
    ) -> anyhow::Result<BroadcastTxResponse>;
}

/// A restartable, sequential source of blocks.
#[async_trait]
pub trait BlockFeed: Send + Sync {
    /// Latest height known to the node, if it can be determined.
    async fn current_height(&self) -> anyhow::Result<Option<u64>>;

    /// Opens a stream starting at `from_height`, or at the latest block when `None`.
    async fn open(&self, from_height: Option<u64>) -> anyhow::Result<BlockStream>;

    /// Releases any resources held by the feed. Called after every stream ends.
    async fn shutdown(&self) -> anyhow::Result<()>;
}
