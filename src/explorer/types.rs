//! Types for the explorer chain-data API.

use serde::{Deserialize, Serialize};

/// Offset/limit window controlling a paged explorer query.
///
/// For block-id pages the offset is tip-anchored: `offset` is the distance of
/// the page's highest block from the current remote tip, and the ids inside
/// the page are returned in ascending height order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub offset: u64,
    pub limit: u64,
}

/// Inclusive height window for address history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightRange {
    pub from: u64,
    pub to: u64,
}

/// A token amount carried by a transaction output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetInfo {
    #[serde(rename = "tokenId")]
    pub token_id: String,
    pub amount: u64,
}

/// A transaction output as reported by the explorer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputInfo {
    #[serde(rename = "boxId")]
    pub box_id: String,
    pub address: String,
    pub index: u32,
    /// Value in nanoERG.
    pub value: u64,
    #[serde(default)]
    pub assets: Vec<AssetInfo>,
}

/// A transaction input as reported by the explorer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputInfo {
    #[serde(rename = "boxId")]
    pub box_id: String,
    pub address: String,
    pub index: u32,
}

/// A confirmed transaction as reported by the explorer.
///
/// Only the fields the mirror ingests are modelled; everything else in the
/// explorer payload is ignored during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxInfo {
    pub id: String,
    #[serde(rename = "inclusionHeight")]
    pub inclusion_height: u64,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub inputs: Vec<InputInfo>,
    #[serde(default)]
    pub outputs: Vec<OutputInfo>,
}

/// Response to a signed-transaction submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSubmitResponse {
    pub id: String,
}

/// Error types for explorer operations
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no data returned")]
    NoData,

    #[error("explorer error: {0}")]
    Api(String),
}

/// Remote chain-data provider consumed by the syncers.
///
/// The local mirror trusts a single provider's answers; implementations do
/// not validate block contents, only shuttle them. Failures abort the
/// current sync attempt and are retried by the caller's next scheduled pass.
#[async_trait::async_trait]
pub trait ChainSource: Send + Sync {
    /// Current chain height at the remote tip.
    async fn get_height(&self) -> Result<u64, ChainError>;

    /// Block ids for a tip-anchored page, ascending by height.
    async fn get_block_ids(&self, paging: Paging) -> Result<Vec<String>, ChainError>;

    /// The block id at a single height.
    async fn get_block_id_at_height(&self, height: u64) -> Result<String, ChainError>;

    /// Number of transactions touching `address` inside the height window.
    async fn get_address_tx_count(
        &self,
        address: &str,
        range: HeightRange,
    ) -> Result<u64, ChainError>;

    /// A page of transactions touching `address` inside the height window.
    async fn get_address_transactions(
        &self,
        address: &str,
        range: HeightRange,
        paging: Paging,
    ) -> Result<Vec<TxInfo>, ChainError>;

    /// The full transaction list of a single block.
    async fn get_block_transactions(&self, block_id: &str) -> Result<Vec<TxInfo>, ChainError>;

    /// Submit a signed transaction, returning its id.
    async fn submit_transaction(&self, raw: &[u8]) -> Result<TxSubmitResponse, ChainError>;
}
