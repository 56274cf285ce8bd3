//! Address transaction synchronization.
//!
//! Advances an address's `process_height` cursor to the remote chain
//! height, ingesting every transaction that touches the address in between.
//! Oversized windows are bisected until they fit the page ceiling or
//! collapse to a single block, which is then read directly. Spends are
//! staged separately from box creation (a spend can be observed before its
//! originating box exists) and reconciled once the cursor reaches the
//! remote height. Any failure aborts the attempt; committed cursor
//! progress is retained so the next invocation resumes.

use crate::explorer::{ChainSource, HeightRange, Paging, TxInfo};
use crate::ledger::store::LedgerStore;
use crate::ledger::types::*;

use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum address transactions fetched in a single page.
pub const MAX_TX_PER_PAGE: u64 = 100;

/// Keeps tracked addresses' box sets consistent with the remote ledger.
pub struct BoxSync {
    store: Arc<dyn LedgerStore>,
    source: Arc<dyn ChainSource>,
}

impl BoxSync {
    pub fn new(store: Arc<dyn LedgerStore>, source: Arc<dyn ChainSource>) -> Self {
        Self { store, source }
    }

    /// Advance the address to the remote chain height.
    ///
    /// Returns false on any unexpected failure without raising; the cursor
    /// keeps its last committed value so a subsequent call resumes safely.
    pub async fn sync_boxes(&self, address: &AddressRecord) -> bool {
        match self.sync_address(address).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "[{}] sync of address {} aborted: {}",
                    address.network, address.address, e
                );
                false
            }
        }
    }

    async fn sync_address(&self, address: &AddressRecord) -> Result<(), SyncError> {
        // The remote height is captured once: the window never chases a
        // tip that moves during a long sync.
        let remote_height = self.source.get_height().await?;
        let mut process_height = address.process_height;
        let mut to_height = remote_height;

        while process_height < remote_height {
            let window = HeightRange {
                from: process_height,
                to: to_height,
            };
            let count = self
                .source
                .get_address_tx_count(&address.address, window)
                .await?;

            if count > MAX_TX_PER_PAGE {
                if to_height > process_height + 1 {
                    // Narrow the window until it fits a page or collapses
                    // to a single height.
                    to_height = (to_height + process_height) / 2;
                    continue;
                }
                // A single block with more transactions than the page
                // ceiling: read the block directly.
                let block_id = self.source.get_block_id_at_height(to_height).await?;
                let transactions = self.source.get_block_transactions(&block_id).await?;
                debug!(
                    "[{}] ingesting {} transactions from block {} at {}",
                    address.network,
                    transactions.len(),
                    block_id,
                    to_height
                );
                for tx in &transactions {
                    self.ingest_transaction(tx, address).await?;
                }
            } else {
                let transactions = self
                    .source
                    .get_address_transactions(
                        &address.address,
                        window,
                        Paging {
                            offset: 0,
                            limit: MAX_TX_PER_PAGE,
                        },
                    )
                    .await?;
                for tx in &transactions {
                    self.ingest_transaction(tx, address).await?;
                }
            }

            self.store.set_process_height(address.id, to_height).await?;
            process_height = to_height;
            to_height = remote_height;
        }

        self.reconcile_spends(address).await
    }

    /// Mirror one transaction: boxes for outputs paying the address, staged
    /// spends for inputs drawing from it.
    async fn ingest_transaction(
        &self,
        tx: &TxInfo,
        address: &AddressRecord,
    ) -> Result<(), SyncError> {
        let created = self
            .store
            .update_or_create_tx(TxRecord {
                tx_id: tx.id.clone(),
                network: address.network,
                height: tx.inclusion_height,
                timestamp: tx.timestamp,
                status: TxStatus::Confirmed,
            })
            .await?;
        if created {
            debug!(
                "[{}] recorded transaction {} at {}",
                address.network, tx.id, tx.inclusion_height
            );
        }

        for output in &tx.outputs {
            if output.address != address.address {
                continue;
            }
            let serialized = hex::encode(serde_json::to_vec(output)?);
            self.store
                .insert_or_update_box(BoxRecord {
                    box_id: output.box_id.clone(),
                    network: address.network,
                    address_id: address.id,
                    create_tx: tx.id.clone(),
                    create_height: tx.inclusion_height,
                    create_index: output.index,
                    create_timestamp: tx.timestamp,
                    value: output.value,
                    tokens: output
                        .assets
                        .iter()
                        .map(|asset| TokenValue {
                            token_id: asset.token_id.clone(),
                            amount: asset.amount,
                        })
                        .collect(),
                    serialized,
                    spend: None,
                })
                .await?;
        }

        for input in &tx.inputs {
            if input.address != address.address {
                continue;
            }
            self.store
                .stage_spend(StagedSpend {
                    box_id: input.box_id.clone(),
                    network: address.network,
                    spend_tx: tx.id.clone(),
                    spend_height: tx.inclusion_height,
                    spend_index: input.index,
                    spend_timestamp: tx.timestamp,
                })
                .await?;
        }

        Ok(())
    }

    /// Apply staged spends to the boxes they belong to, now that every
    /// creation up to the remote height has been committed.
    async fn reconcile_spends(&self, address: &AddressRecord) -> Result<(), SyncError> {
        let boxes = self
            .store
            .unspent_boxes_for_addresses(&[address.id])
            .await?;

        for record in boxes {
            if let Some(staged) = self
                .store
                .staged_spend_for(address.network, &record.box_id)
                .await?
            {
                self.store
                    .apply_spend(
                        address.network,
                        &record.box_id,
                        SpendInfo {
                            tx: staged.spend_tx,
                            height: staged.spend_height,
                            index: staged.spend_index,
                            timestamp: staged.spend_timestamp,
                        },
                    )
                    .await?;
                self.store
                    .delete_staged_spend(address.network, &record.box_id)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::mock::MockChainSource;
    use crate::explorer::{AssetInfo, InputInfo, OutputInfo};
    use crate::ledger::store::{AddressRepository, BoxRepository, MemoryLedgerStore, TxRepository};

    const NET: NetworkId = NetworkId::Testnet;
    const ADDR: &str = "addr-tracked";

    fn output(box_id: &str, address: &str, index: u32, value: u64) -> OutputInfo {
        OutputInfo {
            box_id: box_id.to_string(),
            address: address.to_string(),
            index,
            value,
            assets: Vec::new(),
        }
    }

    fn input(box_id: &str, address: &str, index: u32) -> InputInfo {
        InputInfo {
            box_id: box_id.to_string(),
            address: address.to_string(),
            index,
        }
    }

    fn tx(id: &str, height: u64, inputs: Vec<InputInfo>, outputs: Vec<OutputInfo>) -> TxInfo {
        TxInfo {
            id: id.to_string(),
            inclusion_height: height,
            timestamp: height as i64 * 1000,
            inputs,
            outputs,
        }
    }

    async fn tracked_address(store: &MemoryLedgerStore) -> AddressRecord {
        let wallet = store.create_wallet("main", NET).await.unwrap();
        store.create_address(wallet.id, ADDR).await.unwrap()
    }

    fn setup() -> (Arc<MemoryLedgerStore>, Arc<MockChainSource>, BoxSync) {
        let store = Arc::new(MemoryLedgerStore::new());
        let source = Arc::new(MockChainSource::new());
        let sync = BoxSync::new(store.clone(), source.clone());
        (store, source, sync)
    }

    #[tokio::test]
    async fn ingests_outputs_and_marks_spends() {
        let (store, source, sync) = setup();
        let address = tracked_address(&store).await;

        source.set_height(20);
        source.push_address_tx(
            ADDR,
            tx("tx-create", 5, vec![], vec![output("box-1", ADDR, 0, 700)]),
        );
        source.push_address_tx(
            ADDR,
            tx("tx-spend", 9, vec![input("box-1", ADDR, 0)], vec![]),
        );

        assert!(sync.sync_boxes(&address).await);

        let record = store.box_by_id(NET, "box-1").await.unwrap().unwrap();
        let spend = record.spend.expect("box should be spent");
        assert_eq!(spend.tx, "tx-spend");
        assert_eq!(spend.height, 9);
        // The staged record is consumed by reconciliation.
        assert!(store.staged_spend_for(NET, "box-1").await.unwrap().is_none());

        let cursor = store.address(address.id).await.unwrap().unwrap();
        assert_eq!(cursor.process_height, 20);

        let mirrored = store.tx_by_id(NET, "tx-create").await.unwrap().unwrap();
        assert_eq!(mirrored.status, TxStatus::Confirmed);
    }

    #[tokio::test]
    async fn spend_observed_before_creation_is_reconciled() {
        let (store, source, sync) = setup();
        let address = tracked_address(&store).await;

        // The spend sits at a lower height than the creation, so it is
        // ingested first in window order.
        source.set_height(10);
        source.push_address_tx(
            ADDR,
            tx("tx-spend", 3, vec![input("box-late", ADDR, 1)], vec![]),
        );
        source.push_address_tx(
            ADDR,
            tx("tx-create", 8, vec![], vec![output("box-late", ADDR, 0, 40)]),
        );

        assert!(sync.sync_boxes(&address).await);

        let record = store.box_by_id(NET, "box-late").await.unwrap().unwrap();
        assert_eq!(record.spend.expect("spend applied").tx, "tx-spend");
    }

    #[tokio::test]
    async fn oversized_windows_are_bisected() {
        let (store, source, sync) = setup();
        let address = tracked_address(&store).await;

        // 101 transactions spread over heights 1..=101: the first count
        // query overflows and the window must be bisected before paging.
        source.set_height(101);
        for height in 1..=101u64 {
            source.push_address_tx(
                ADDR,
                tx(
                    &format!("tx-{}", height),
                    height,
                    vec![],
                    vec![output(&format!("box-{}", height), ADDR, 0, 10)],
                ),
            );
        }

        assert!(sync.sync_boxes(&address).await);

        let boxes = store.unspent_boxes_for_addresses(&[address.id]).await.unwrap();
        assert_eq!(boxes.len(), 101);
        let cursor = store.address(address.id).await.unwrap().unwrap();
        assert_eq!(cursor.process_height, 101);
    }

    #[tokio::test]
    async fn single_block_overflow_reads_the_block_directly() {
        let (store, source, sync) = setup();
        let address = tracked_address(&store).await;

        // One block holds more transactions than the page ceiling, so the
        // window collapses to that height and the block is read whole.
        source.set_chain(&[(6, "block-6")]);
        let mut block_txs = Vec::new();
        for index in 0..=MAX_TX_PER_PAGE {
            let tx_id = format!("tx-{}", index);
            let box_id = format!("box-{}", index);
            let item = tx(&tx_id, 6, vec![], vec![output(&box_id, ADDR, 0, 1)]);
            source.push_address_tx(ADDR, item.clone());
            block_txs.push(item);
        }
        source.set_block_txs("block-6", block_txs);
        // Nothing below the crowded block.
        store.set_process_height(address.id, 5).await.unwrap();
        let address = store.address(address.id).await.unwrap().unwrap();

        assert!(sync.sync_boxes(&address).await);

        let boxes = store.unspent_boxes_for_addresses(&[address.id]).await.unwrap();
        assert_eq!(boxes.len(), MAX_TX_PER_PAGE as usize + 1);
    }

    #[tokio::test]
    async fn failure_keeps_committed_progress_for_resumption() {
        let (store, source, sync) = setup();
        let address = tracked_address(&store).await;

        source.set_height(10);
        source.push_address_tx(
            ADDR,
            tx("tx-1", 2, vec![], vec![output("box-1", ADDR, 0, 10)]),
        );
        source.fail_next();

        // The height query fails before anything is ingested.
        assert!(!sync.sync_boxes(&address).await);
        assert_eq!(
            store.address(address.id).await.unwrap().unwrap().process_height,
            0
        );

        // The next invocation starts from the retained cursor and succeeds.
        let address = store.address(address.id).await.unwrap().unwrap();
        assert!(sync.sync_boxes(&address).await);
        assert_eq!(
            store.address(address.id).await.unwrap().unwrap().process_height,
            10
        );
        assert!(store.box_by_id(NET, "box-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn outputs_to_other_addresses_are_ignored() {
        let (store, source, sync) = setup();
        let address = tracked_address(&store).await;

        source.set_height(5);
        source.push_address_tx(
            ADDR,
            tx(
                "tx-mixed",
                4,
                vec![input("box-foreign", "addr-other", 0)],
                vec![
                    output("box-mine", ADDR, 0, 10),
                    output("box-theirs", "addr-other", 1, 20),
                ],
            ),
        );

        assert!(sync.sync_boxes(&address).await);

        assert!(store.box_by_id(NET, "box-mine").await.unwrap().is_some());
        assert!(store.box_by_id(NET, "box-theirs").await.unwrap().is_none());
        assert!(store
            .staged_spend_for(NET, "box-foreign")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn serialized_payload_round_trips() {
        let (store, source, sync) = setup();
        let address = tracked_address(&store).await;

        source.set_height(3);
        let mut paid = output("box-rich", ADDR, 2, 1234);
        paid.assets = vec![AssetInfo {
            token_id: "tok-a".to_string(),
            amount: 9,
        }];
        source.push_address_tx(ADDR, tx("tx-rich", 2, vec![], vec![paid.clone()]));

        assert!(sync.sync_boxes(&address).await);

        let record = store.box_by_id(NET, "box-rich").await.unwrap().unwrap();
        let bytes = hex::decode(&record.serialized).unwrap();
        let decoded: OutputInfo = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, paid);
        assert_eq!(record.token_amount("tok-a"), 9);
    }
}
