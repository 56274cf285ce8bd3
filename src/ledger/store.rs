//!
//! Local ledger store: repository traits over headers, addresses, boxes and
//! transactions, plus the in-memory implementation used by the service.
//!
//! The store is the only shared mutable resource of the sync core. All
//! components open it for reads and writes and rely on the entity
//! invariants (contiguous header runs, create-before-spend on boxes) rather
//! than cross-component locking. Snapshots are persisted as JSON next to a
//! small metadata file.

use crate::ledger::types::*;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;
use tracing::info;

const SNAPSHOT_FILE: &str = "ledger_store.json";
const SNAPSHOT_META_FILE: &str = "ledger_store.meta.json";

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("header batch would leave a gap: expected height {expected}, got {got}")]
    HeaderGap { expected: u64, got: u64 },

    #[error("duplicate block id {0}")]
    DuplicateBlockId(String),

    #[error("unknown wallet {0}")]
    UnknownWallet(WalletId),

    #[error("unknown address {0}")]
    UnknownAddress(AddressId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Counts of what a fork rollback discarded or reverted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForkRollback {
    pub headers_removed: usize,
    pub boxes_removed: usize,
    pub spends_reverted: usize,
    pub txs_removed: usize,
}

/// Repository for the mirrored header chain
#[async_trait::async_trait]
pub trait HeaderRepository: Send + Sync {
    /// Append a contiguous batch of headers at the tip of a network's run.
    async fn insert_headers(&self, headers: &[Header]) -> Result<(), StoreError>;
    async fn last_header(&self, network: NetworkId) -> Result<Option<Header>, StoreError>;
    async fn header_at(
        &self,
        network: NetworkId,
        height: u64,
    ) -> Result<Option<Header>, StoreError>;
    /// All headers of a network, highest first.
    async fn headers_desc(&self, network: NetworkId) -> Result<Vec<Header>, StoreError>;
}

/// Repository for wallets and tracked addresses
#[async_trait::async_trait]
pub trait AddressRepository: Send + Sync {
    async fn create_wallet(
        &self,
        name: &str,
        network: NetworkId,
    ) -> Result<WalletRecord, StoreError>;
    async fn create_address(
        &self,
        wallet_id: WalletId,
        address: &str,
    ) -> Result<AddressRecord, StoreError>;
    async fn wallets(&self, network: NetworkId) -> Result<Vec<WalletRecord>, StoreError>;
    async fn address(&self, id: AddressId) -> Result<Option<AddressRecord>, StoreError>;
    async fn find_address(
        &self,
        network: NetworkId,
        address: &str,
    ) -> Result<Option<AddressRecord>, StoreError>;
    async fn addresses_for_network(
        &self,
        network: NetworkId,
    ) -> Result<Vec<AddressRecord>, StoreError>;
    async fn addresses_for_wallet(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<AddressRecord>, StoreError>;
    /// Commit an address's sync cursor.
    async fn set_process_height(
        &self,
        address_id: AddressId,
        height: u64,
    ) -> Result<(), StoreError>;
}

/// Repository for boxes and staged spends
#[async_trait::async_trait]
pub trait BoxRepository: Send + Sync {
    /// Create a box, or refresh the creation metadata of an existing one.
    /// The spend fields of an existing box are preserved.
    async fn insert_or_update_box(&self, record: BoxRecord) -> Result<(), StoreError>;
    async fn box_by_id(
        &self,
        network: NetworkId,
        box_id: &str,
    ) -> Result<Option<BoxRecord>, StoreError>;
    /// Mark a box spent. Returns false when the box is not mirrored.
    async fn apply_spend(
        &self,
        network: NetworkId,
        box_id: &str,
        spend: SpendInfo,
    ) -> Result<bool, StoreError>;
    /// Unspent boxes owned by the given addresses, in stable storage order.
    async fn unspent_boxes_for_addresses(
        &self,
        address_ids: &[AddressId],
    ) -> Result<Vec<BoxRecord>, StoreError>;
    /// Unspent boxes of a wallet, joined through its addresses.
    async fn unspent_boxes_for_wallet(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<BoxRecord>, StoreError>;
    async fn stage_spend(&self, spend: StagedSpend) -> Result<(), StoreError>;
    async fn staged_spend_for(
        &self,
        network: NetworkId,
        box_id: &str,
    ) -> Result<Option<StagedSpend>, StoreError>;
    async fn delete_staged_spend(
        &self,
        network: NetworkId,
        box_id: &str,
    ) -> Result<(), StoreError>;
    async fn address_balance(&self, address_id: AddressId) -> Result<Balance, StoreError>;
    async fn wallet_balance(&self, wallet_id: WalletId) -> Result<Balance, StoreError>;
}

/// Repository for mirrored transactions
#[async_trait::async_trait]
pub trait TxRepository: Send + Sync {
    /// Insert or refresh a transaction record. Returns true when the record
    /// was newly created.
    async fn update_or_create_tx(&self, record: TxRecord) -> Result<bool, StoreError>;
    async fn tx_by_id(
        &self,
        network: NetworkId,
        tx_id: &str,
    ) -> Result<Option<TxRecord>, StoreError>;
    async fn txs_in_range(
        &self,
        network: NetworkId,
        from: u64,
        to: u64,
    ) -> Result<Vec<TxRecord>, StoreError>;
}

/// The full store surface consumed by the syncers and the selector.
#[async_trait::async_trait]
pub trait LedgerStore:
    HeaderRepository + AddressRepository + BoxRepository + TxRepository
{
    /// Truncate the mirror back to `fork_height`: headers strictly above the
    /// fork point are discarded, boxes created above it are deleted, spends
    /// applied above it are reverted, transactions and staged spends above
    /// it are dropped, and every address cursor is clamped down to it.
    async fn fork_rollback(
        &self,
        network: NetworkId,
        fork_height: u64,
    ) -> Result<ForkRollback, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreInner {
    wallets: Vec<WalletRecord>,
    addresses: Vec<AddressRecord>,
    headers: Vec<Header>,
    boxes: Vec<BoxRecord>,
    txs: Vec<TxRecord>,
    staged_spends: Vec<StagedSpend>,
    next_wallet_id: WalletId,
    next_address_id: AddressId,
}

/// In-memory ledger store with JSON snapshot persistence.
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: RwLock<StoreInner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot from `data_dir`, or start empty when none exists.
    pub async fn load(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            info!("No ledger snapshot at {:?}, starting empty", path);
            return Ok(Self::new());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let inner: StoreInner = serde_json::from_str(&content)?;
        info!(
            "Loaded ledger snapshot from {:?} ({} headers, {} boxes)",
            path,
            inner.headers.len(),
            inner.boxes.len()
        );
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    /// Persist the whole store as pretty JSON plus a metadata file.
    pub async fn save(&self, data_dir: &Path) -> Result<(), StoreError> {
        let inner = self.inner.read().unwrap().clone();

        let metadata = serde_json::json!({
            "saved_at": chrono::Utc::now().to_rfc3339(),
            "headers": inner.headers.len(),
            "boxes": inner.boxes.len(),
            "transactions": inner.txs.len(),
        });
        tokio::fs::write(
            data_dir.join(SNAPSHOT_META_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )
        .await?;

        let path = data_dir.join(SNAPSHOT_FILE);
        tokio::fs::write(&path, serde_json::to_string_pretty(&inner)?).await?;
        info!("Saved ledger snapshot to {:?}", path);
        Ok(())
    }

    fn sort_boxes(mut boxes: Vec<BoxRecord>) -> Vec<BoxRecord> {
        // Stable storage order the coverage selector iterates in.
        boxes.sort_by(|a, b| {
            (a.create_height, a.create_index, &a.box_id)
                .cmp(&(b.create_height, b.create_index, &b.box_id))
        });
        boxes
    }

    fn balance_of(boxes: &[BoxRecord]) -> Balance {
        let mut balance = Balance::default();
        let mut tokens = std::collections::BTreeMap::new();
        for record in boxes {
            balance.value += record.value;
            for token in &record.tokens {
                *tokens.entry(token.token_id.clone()).or_insert(0u64) += token.amount;
            }
        }
        balance.tokens = tokens
            .into_iter()
            .map(|(token_id, amount)| TokenValue { token_id, amount })
            .collect();
        balance
    }
}

#[async_trait::async_trait]
impl HeaderRepository for MemoryLedgerStore {
    async fn insert_headers(&self, headers: &[Header]) -> Result<(), StoreError> {
        if headers.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().unwrap();
        let network = headers[0].network;

        // The batch itself must be a contiguous ascending run.
        for (prev, next) in headers.iter().tuple_windows() {
            if next.height != prev.height + 1 || next.network != network {
                return Err(StoreError::HeaderGap {
                    expected: prev.height + 1,
                    got: next.height,
                });
            }
        }

        // And it must attach to the current tip, unless the run is empty
        // (bootstrap seeds the first header at an arbitrary height).
        if let Some(last) = inner
            .headers
            .iter()
            .filter(|header| header.network == network)
            .last()
        {
            if headers[0].height != last.height + 1 {
                return Err(StoreError::HeaderGap {
                    expected: last.height + 1,
                    got: headers[0].height,
                });
            }
        }

        // Nothing is persisted from a batch that fails validation.
        for header in headers {
            if inner
                .headers
                .iter()
                .any(|existing| existing.network == network && existing.block_id == header.block_id)
            {
                return Err(StoreError::DuplicateBlockId(header.block_id.clone()));
            }
        }

        inner.headers.extend_from_slice(headers);
        Ok(())
    }

    async fn last_header(&self, network: NetworkId) -> Result<Option<Header>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .headers
            .iter()
            .filter(|header| header.network == network)
            .last()
            .cloned())
    }

    async fn header_at(
        &self,
        network: NetworkId,
        height: u64,
    ) -> Result<Option<Header>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .headers
            .iter()
            .find(|header| header.network == network && header.height == height)
            .cloned())
    }

    async fn headers_desc(&self, network: NetworkId) -> Result<Vec<Header>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .headers
            .iter()
            .filter(|header| header.network == network)
            .rev()
            .cloned()
            .collect())
    }

}

#[async_trait::async_trait]
impl AddressRepository for MemoryLedgerStore {
    async fn create_wallet(
        &self,
        name: &str,
        network: NetworkId,
    ) -> Result<WalletRecord, StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.next_wallet_id += 1;
        let wallet = WalletRecord {
            id: inner.next_wallet_id,
            name: name.to_string(),
            network,
        };
        inner.wallets.push(wallet.clone());
        Ok(wallet)
    }

    async fn create_address(
        &self,
        wallet_id: WalletId,
        address: &str,
    ) -> Result<AddressRecord, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let network = inner
            .wallets
            .iter()
            .find(|wallet| wallet.id == wallet_id)
            .ok_or(StoreError::UnknownWallet(wallet_id))?
            .network;
        inner.next_address_id += 1;
        let record = AddressRecord {
            id: inner.next_address_id,
            wallet_id,
            address: address.to_string(),
            network,
            process_height: 0,
        };
        inner.addresses.push(record.clone());
        Ok(record)
    }

    async fn wallets(&self, network: NetworkId) -> Result<Vec<WalletRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .wallets
            .iter()
            .filter(|wallet| wallet.network == network)
            .cloned()
            .collect())
    }

    async fn address(&self, id: AddressId) -> Result<Option<AddressRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.addresses.iter().find(|a| a.id == id).cloned())
    }

    async fn find_address(
        &self,
        network: NetworkId,
        address: &str,
    ) -> Result<Option<AddressRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .addresses
            .iter()
            .find(|a| a.network == network && a.address == address)
            .cloned())
    }

    async fn addresses_for_network(
        &self,
        network: NetworkId,
    ) -> Result<Vec<AddressRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .addresses
            .iter()
            .filter(|a| a.network == network)
            .cloned()
            .collect())
    }

    async fn addresses_for_wallet(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<AddressRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .addresses
            .iter()
            .filter(|a| a.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn set_process_height(
        &self,
        address_id: AddressId,
        height: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let record = inner
            .addresses
            .iter_mut()
            .find(|a| a.id == address_id)
            .ok_or(StoreError::UnknownAddress(address_id))?;
        record.process_height = height;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BoxRepository for MemoryLedgerStore {
    async fn insert_or_update_box(&self, record: BoxRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner
            .boxes
            .iter_mut()
            .find(|b| b.network == record.network && b.box_id == record.box_id)
        {
            Some(existing) => {
                let spend = existing.spend.take();
                *existing = record;
                existing.spend = spend;
            }
            None => inner.boxes.push(record),
        }
        Ok(())
    }

    async fn box_by_id(
        &self,
        network: NetworkId,
        box_id: &str,
    ) -> Result<Option<BoxRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .boxes
            .iter()
            .find(|b| b.network == network && b.box_id == box_id)
            .cloned())
    }

    async fn apply_spend(
        &self,
        network: NetworkId,
        box_id: &str,
        spend: SpendInfo,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner
            .boxes
            .iter_mut()
            .find(|b| b.network == network && b.box_id == box_id)
        {
            Some(existing) => {
                existing.spend = Some(spend);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unspent_boxes_for_addresses(
        &self,
        address_ids: &[AddressId],
    ) -> Result<Vec<BoxRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        let boxes = inner
            .boxes
            .iter()
            .filter(|b| b.is_unspent() && address_ids.contains(&b.address_id))
            .cloned()
            .collect();
        Ok(Self::sort_boxes(boxes))
    }

    async fn unspent_boxes_for_wallet(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<BoxRecord>, StoreError> {
        let address_ids: Vec<AddressId> = self
            .addresses_for_wallet(wallet_id)
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();
        self.unspent_boxes_for_addresses(&address_ids).await
    }

    async fn stage_spend(&self, spend: StagedSpend) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner
            .staged_spends
            .iter_mut()
            .find(|s| s.network == spend.network && s.box_id == spend.box_id)
        {
            Some(existing) => *existing = spend,
            None => inner.staged_spends.push(spend),
        }
        Ok(())
    }

    async fn staged_spend_for(
        &self,
        network: NetworkId,
        box_id: &str,
    ) -> Result<Option<StagedSpend>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .staged_spends
            .iter()
            .find(|s| s.network == network && s.box_id == box_id)
            .cloned())
    }

    async fn delete_staged_spend(
        &self,
        network: NetworkId,
        box_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner
            .staged_spends
            .retain(|s| !(s.network == network && s.box_id == box_id));
        Ok(())
    }

    async fn address_balance(&self, address_id: AddressId) -> Result<Balance, StoreError> {
        let boxes = self.unspent_boxes_for_addresses(&[address_id]).await?;
        Ok(Self::balance_of(&boxes))
    }

    async fn wallet_balance(&self, wallet_id: WalletId) -> Result<Balance, StoreError> {
        let boxes = self.unspent_boxes_for_wallet(wallet_id).await?;
        Ok(Self::balance_of(&boxes))
    }
}

#[async_trait::async_trait]
impl TxRepository for MemoryLedgerStore {
    async fn update_or_create_tx(&self, record: TxRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner
            .txs
            .iter_mut()
            .find(|tx| tx.network == record.network && tx.tx_id == record.tx_id)
        {
            Some(existing) => {
                *existing = record;
                Ok(false)
            }
            None => {
                inner.txs.push(record);
                Ok(true)
            }
        }
    }

    async fn tx_by_id(
        &self,
        network: NetworkId,
        tx_id: &str,
    ) -> Result<Option<TxRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .txs
            .iter()
            .find(|tx| tx.network == network && tx.tx_id == tx_id)
            .cloned())
    }

    async fn txs_in_range(
        &self,
        network: NetworkId,
        from: u64,
        to: u64,
    ) -> Result<Vec<TxRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .txs
            .iter()
            .filter(|tx| tx.network == network && tx.height >= from && tx.height <= to)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn fork_rollback(
        &self,
        network: NetworkId,
        fork_height: u64,
    ) -> Result<ForkRollback, StoreError> {
        let mut inner = self.inner.write().unwrap();
        let mut stats = ForkRollback::default();

        let before = inner.headers.len();
        inner
            .headers
            .retain(|header| !(header.network == network && header.height > fork_height));
        stats.headers_removed = before - inner.headers.len();

        let before = inner.boxes.len();
        inner
            .boxes
            .retain(|b| !(b.network == network && b.create_height > fork_height));
        stats.boxes_removed = before - inner.boxes.len();

        for record in inner.boxes.iter_mut().filter(|b| b.network == network) {
            if record
                .spend
                .as_ref()
                .is_some_and(|spend| spend.height > fork_height)
            {
                record.spend = None;
                stats.spends_reverted += 1;
            }
        }

        let before = inner.txs.len();
        inner
            .txs
            .retain(|tx| !(tx.network == network && tx.height > fork_height));
        stats.txs_removed = before - inner.txs.len();

        inner
            .staged_spends
            .retain(|s| !(s.network == network && s.spend_height > fork_height));

        for address in inner.addresses.iter_mut().filter(|a| a.network == network) {
            address.process_height = address.process_height.min(fork_height);
        }

        Ok(stats)
    }
}
