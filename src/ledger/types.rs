//! Entities of the local ledger mirror.

use crate::explorer::ChainError;
use crate::ledger::store::StoreError;

use serde::{Deserialize, Serialize};
use std::fmt;

pub type WalletId = u64;
pub type AddressId = u64;

/// Label partitioning every mirrored entity; each network is an independent
/// chain instance with its own header run, boxes and cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkId {
    Mainnet,
    Testnet,
}

impl NetworkId {
    pub const ALL: [NetworkId; 2] = [NetworkId::Mainnet, NetworkId::Testnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkId::Mainnet => "mainnet",
            NetworkId::Testnet => "testnet",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally mirrored block header.
///
/// For a given network the stored heights form a contiguous strictly
/// increasing run and `block_id` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub network: NetworkId,
    pub height: u64,
    pub block_id: String,
}

/// A wallet grouping tracked addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: WalletId,
    pub name: String,
    pub network: NetworkId,
}

/// A tracked address together with its sync cursor.
///
/// `process_height` is the height up to which the address's boxes and spends
/// have been reconciled with the remote source. It only moves forward,
/// except when a fork rollback clamps it back to the fork point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: AddressId,
    pub wallet_id: WalletId,
    pub address: String,
    pub network: NetworkId,
    pub process_height: u64,
}

/// A token amount held by a box, in the order the chain reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValue {
    pub token_id: String,
    pub amount: u64,
}

/// Spend metadata applied to a box once its spending transaction is seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendInfo {
    pub tx: String,
    pub height: u64,
    pub index: u32,
    pub timestamp: i64,
}

/// A mirrored unspent-or-spent transaction output.
///
/// Created only by ingesting the outputs of one transaction; the spend
/// fields are the only mutation afterwards. Fork rollback deletes the box
/// when its creation height lies above the fork point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub box_id: String,
    pub network: NetworkId,
    pub address_id: AddressId,
    pub create_tx: String,
    pub create_height: u64,
    pub create_index: u32,
    pub create_timestamp: i64,
    /// Value in nanoERG.
    pub value: u64,
    pub tokens: Vec<TokenValue>,
    /// Hex encoding of the canonical serialized output payload.
    pub serialized: String,
    pub spend: Option<SpendInfo>,
}

impl BoxRecord {
    pub fn is_unspent(&self) -> bool {
        self.spend.is_none()
    }

    pub fn token_amount(&self, token_id: &str) -> u64 {
        self.tokens
            .iter()
            .filter(|token| token.token_id == token_id)
            .map(|token| token.amount)
            .sum()
    }
}

/// Lifecycle state of a mirrored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    New,
    Pending,
    Confirmed,
}

/// A mirrored transaction touching a tracked address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx_id: String,
    pub network: NetworkId,
    pub height: u64,
    pub timestamp: i64,
    pub status: TxStatus,
}

/// A spend observed before (or independently of) its box's creation, held
/// apart from the box table until reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedSpend {
    pub box_id: String,
    pub network: NetworkId,
    pub spend_tx: String,
    pub spend_height: u64,
    pub spend_index: u32,
    pub spend_timestamp: i64,
}

/// Outcome of a covering-box selection. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageResult {
    pub covered: bool,
    pub boxes: Vec<BoxRecord>,
}

/// Summed unspent value held by an address or wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Balance {
    /// Total unspent value in nanoERG.
    pub value: u64,
    /// Total unspent amount per token id.
    pub tokens: Vec<TokenValue>,
}

/// Error types for the sync core
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("chain source error: {0}")]
    Chain(#[from] ChainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("header continuity broken: {0}")]
    ContinuityBroken(String),

    #[error("no progress during header sync at height {0}")]
    NoProgress(u64),

    #[error("fork scan exhausted local headers walking back from height {0}")]
    ForkScanExhausted(u64),
}
