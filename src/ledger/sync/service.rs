//! Sync orchestration and integration point for the sync components.
//!
//! One `sync_pass` per network per scheduler tick: keep the header chain
//! consistent with the remote tip (forward sync or fork rollback, never
//! both), then bring every tracked address's box set up to the current
//! height, then notify listeners that data changed. Failures abort the
//! affected step, are folded into the returned report and never escape the
//! pass; the mirror simply stays at its last committed state until the next
//! tick.
//!
//! Header work on one network is serialized by a per-network lock; address
//! ingestion is serialized per address while distinct addresses run
//! concurrently.

use crate::explorer::ChainSource;
use crate::ledger::store::LedgerStore;
use crate::ledger::sync::boxes::BoxSync;
use crate::ledger::sync::events::{EventDispatcher, SyncEvent, SyncEventHandler};
use crate::ledger::sync::headers::{HeaderOutcome, HeaderSync};
use crate::ledger::types::*;

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Result of syncing a single address during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressOutcome {
    pub address_id: AddressId,
    pub ok: bool,
    pub from_height: u64,
    pub to_height: u64,
}

/// Status of one sync pass, returned to the caller for logging.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub network: NetworkId,
    pub header_outcome: Option<HeaderOutcome>,
    pub header_error: Option<String>,
    pub addresses: Vec<AddressOutcome>,
    pub changed: bool,
}

impl SyncReport {
    fn new(network: NetworkId) -> Self {
        Self {
            network,
            header_outcome: None,
            header_error: None,
            addresses: Vec::new(),
            changed: false,
        }
    }

    /// Get a human-readable summary of the pass.
    pub fn summary(&self) -> String {
        let headers = match (&self.header_outcome, &self.header_error) {
            (Some(HeaderOutcome::Advanced { new_tip }), _) => format!("tip {}", new_tip),
            (Some(HeaderOutcome::RolledBack { fork_height }), _) => {
                format!("rolled back to {}", fork_height)
            }
            (None, Some(error)) => format!("header sync failed: {}", error),
            (None, None) => "no header work".to_string(),
        };
        let synced = self.addresses.iter().filter(|outcome| outcome.ok).count();
        let failed: Vec<String> = self
            .addresses
            .iter()
            .filter(|outcome| !outcome.ok)
            .map(|outcome| outcome.address_id.to_string())
            .collect();
        format!(
            "[{}] {}; {}/{} addresses synced{}{}",
            self.network,
            headers,
            synced,
            self.addresses.len(),
            if failed.is_empty() {
                String::new()
            } else {
                format!("; failed addresses: {}", failed.join(", "))
            },
            if self.changed { "; data changed" } else { "" }
        )
    }
}

/// Coordinates header sync, fork resolution and address ingestion for all
/// tracked networks against one store and one chain source.
pub struct SyncService {
    store: Arc<dyn LedgerStore>,
    source: Arc<dyn ChainSource>,
    headers: HeaderSync,
    boxes: BoxSync,
    dispatcher: Mutex<EventDispatcher>,
    network_locks: HashMap<NetworkId, Mutex<()>>,
    address_locks: Mutex<HashMap<AddressId, Arc<Mutex<()>>>>,
}

impl SyncService {
    pub fn new(store: Arc<dyn LedgerStore>, source: Arc<dyn ChainSource>) -> Self {
        let network_locks = NetworkId::ALL
            .into_iter()
            .map(|network| (network, Mutex::new(())))
            .collect();

        Self {
            headers: HeaderSync::new(store.clone(), source.clone()),
            boxes: BoxSync::new(store.clone(), source.clone()),
            store,
            source,
            dispatcher: Mutex::new(EventDispatcher::new()),
            network_locks,
            address_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register_handler(&self, handler: Box<dyn SyncEventHandler>) {
        self.dispatcher.lock().await.register_handler(handler);
    }

    async fn dispatch(&self, event: SyncEvent) {
        self.dispatcher.lock().await.dispatch(&event).await;
    }

    async fn address_lock(&self, address_id: AddressId) -> Arc<Mutex<()>> {
        self.address_locks
            .lock()
            .await
            .entry(address_id)
            .or_default()
            .clone()
    }

    /// Run one full sync pass for a network.
    pub async fn sync_pass(&self, network: NetworkId) -> SyncReport {
        // Header work on the same network must never interleave.
        let _network_guard = self.network_locks[&network].lock().await;
        let mut report = SyncReport::new(network);

        match self.sync_headers(network).await {
            Ok((previous_tip, outcome)) => {
                report.header_outcome = Some(outcome);
                match outcome {
                    HeaderOutcome::Advanced { new_tip } => {
                        report.changed = previous_tip.is_none_or(|tip| new_tip > tip);
                        if report.changed {
                            self.dispatch(SyncEvent::HeadersAdvanced { network, new_tip })
                                .await;
                        }
                    }
                    HeaderOutcome::RolledBack { fork_height } => {
                        report.changed = true;
                        self.dispatch(SyncEvent::ForkResolved {
                            network,
                            fork_height,
                        })
                        .await;
                    }
                }
            }
            Err(e) => {
                warn!("[{}] header sync failed: {}", network, e);
                report.header_error = Some(e.to_string());
                self.dispatch(SyncEvent::SyncFailed {
                    network,
                    error: e.to_string(),
                })
                .await;
            }
        }

        match self.store.addresses_for_network(network).await {
            Ok(addresses) => {
                report.addresses =
                    join_all(addresses.into_iter().map(|a| self.sync_one_address(a))).await;
            }
            Err(e) => {
                warn!("[{}] could not load addresses: {}", network, e);
                self.dispatch(SyncEvent::SyncFailed {
                    network,
                    error: e.to_string(),
                })
                .await;
            }
        }

        if report
            .addresses
            .iter()
            .any(|outcome| outcome.ok && outcome.to_height > outcome.from_height)
        {
            report.changed = true;
        }

        if report.changed {
            self.dispatch(SyncEvent::DataChanged { network }).await;
        }

        report
    }

    /// Advance or repair the header chain, seeding it from the remote tip
    /// on first contact. Returns the previous tip alongside the outcome.
    async fn sync_headers(
        &self,
        network: NetworkId,
    ) -> Result<(Option<u64>, HeaderOutcome), SyncError> {
        match self.store.last_header(network).await? {
            Some(last) => {
                let outcome = self.headers.sync_blocks(&last).await?;
                Ok((Some(last.height), outcome))
            }
            None => {
                // First contact: seed the mirror at the remote tip. History
                // below the seed is not mirrored.
                let remote_height = self.source.get_height().await?;
                let block_id = self.source.get_block_id_at_height(remote_height).await?;
                self.store
                    .insert_headers(&[Header {
                        network,
                        height: remote_height,
                        block_id,
                    }])
                    .await?;
                info!("[{}] seeded header chain at height {}", network, remote_height);
                Ok((None, HeaderOutcome::Advanced {
                    new_tip: remote_height,
                }))
            }
        }
    }

    /// Sync one address under its own lock; concurrent passes over the same
    /// address serialize, distinct addresses proceed in parallel.
    async fn sync_one_address(&self, address: AddressRecord) -> AddressOutcome {
        let lock = self.address_lock(address.id).await;
        let _guard = lock.lock().await;

        // Re-read the cursor under the lock so a concurrent pass's commits
        // are visible.
        let current = match self.store.address(address.id).await {
            Ok(Some(record)) => record,
            _ => address,
        };
        let from_height = current.process_height;
        let address_id = current.id;
        let network = current.network;

        let ok = self.boxes.sync_boxes(&current).await;

        let to_height = match self.store.address(address_id).await {
            Ok(Some(record)) => record.process_height,
            _ => from_height,
        };
        if ok {
            self.dispatch(SyncEvent::AddressSynced {
                network,
                address_id,
                height: to_height,
            })
            .await;
        }

        AddressOutcome {
            address_id,
            ok,
            from_height,
            to_height,
        }
    }

    /// Submit a signed transaction through the chain source and track it
    /// as pending until ingestion confirms it.
    pub async fn submit_transaction(
        &self,
        network: NetworkId,
        raw: &[u8],
    ) -> Result<String, SyncError> {
        let response = self.source.submit_transaction(raw).await?;
        self.store
            .update_or_create_tx(TxRecord {
                tx_id: response.id.clone(),
                network,
                height: 0,
                timestamp: chrono::Utc::now().timestamp_millis(),
                status: TxStatus::Pending,
            })
            .await?;
        info!("[{}] submitted transaction {}", network, response.id);
        Ok(response.id)
    }
}
