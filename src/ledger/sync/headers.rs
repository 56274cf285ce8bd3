//! Forward header synchronization and fork resolution.
//!
//! Forward sync pulls tip-anchored pages of block ids from the remote
//! source and stitches them onto the local run using a two-header overlap:
//! every accepted page must contain the most recently accepted header, or
//! continuity between old and new data cannot be established and the
//! attempt fails without touching the store. Fork resolution compares ids
//! at matching heights and walks backward linearly until local and remote
//! agree; a single invocation either resolves a fork or advances forward,
//! never both.

use crate::explorer::{ChainSource, Paging};
use crate::ledger::store::{ForkRollback, LedgerStore};
use crate::ledger::types::{Header, NetworkId, SyncError};

use std::sync::Arc;
use tracing::{debug, info};

/// Page size for steady-state header fetches.
pub const HEADER_PAGE_LIMIT: u64 = 50;
/// Smaller page used for the first fetch of a sync attempt.
pub const INITIAL_PAGE_LIMIT: u64 = 10;

/// What a `sync_blocks` invocation did to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOutcome {
    /// Forward sync accepted headers up to the new tip.
    Advanced { new_tip: u64 },
    /// A fork was resolved by truncating back to the fork point.
    RolledBack { fork_height: u64 },
}

/// Build the header run for a received id page.
///
/// Ids are in ascending height order; heights are assigned consecutively
/// starting just above `base_height`.
pub(crate) fn create_header_run(ids: &[String], base_height: u64, network: NetworkId) -> Vec<Header> {
    ids.iter()
        .enumerate()
        .map(|(index, id)| Header {
            network,
            height: base_height + 1 + index as u64,
            block_id: id.clone(),
        })
        .collect()
}

/// Tip-anchored paging for the next header fetch: the page ends
/// `offset` below the remote tip and overlaps the two most recently
/// accepted local headers.
fn header_paging(remote_height: u64, current_height: u64, limit: u64) -> Paging {
    Paging {
        offset: (remote_height + 2).saturating_sub(current_height + limit),
        limit,
    }
}

/// Keeps the local header chain consistent with the remote tip.
pub struct HeaderSync {
    store: Arc<dyn LedgerStore>,
    source: Arc<dyn ChainSource>,
}

impl HeaderSync {
    pub fn new(store: Arc<dyn LedgerStore>, source: Arc<dyn ChainSource>) -> Self {
        Self { store, source }
    }

    /// Fetch and persist all headers between the local tip and the remote
    /// tip. Returns the new local tip height.
    pub async fn step_forward(&self, last_local: &Header) -> Result<u64, SyncError> {
        let network = last_local.network;
        let remote_height = self.source.get_height().await?;
        let mut current_height = last_local.height;
        let mut limit = INITIAL_PAGE_LIMIT;
        let mut anchors: Vec<Header> = vec![last_local.clone()];
        let mut zero_progress_pages = 0u32;

        while current_height < remote_height {
            let paging = header_paging(remote_height, current_height, limit);
            let ids = self.source.get_block_ids(paging).await?;
            limit = HEADER_PAGE_LIMIT;

            if ids.is_empty() {
                zero_progress_pages += 1;
                if zero_progress_pages >= 2 {
                    return Err(SyncError::NoProgress(current_height));
                }
                continue;
            }

            // The page's last id sits `offset` below the remote tip.
            let top = remote_height - paging.offset;
            let base = top.saturating_sub(ids.len() as u64);
            let run = create_header_run(&ids, base, network);

            let fresh = self.check_overlaps(&anchors, &run)?;
            if fresh.is_empty() {
                zero_progress_pages += 1;
                if zero_progress_pages >= 2 {
                    return Err(SyncError::NoProgress(current_height));
                }
                continue;
            }
            zero_progress_pages = 0;

            self.store.insert_headers(&fresh).await?;
            current_height = fresh.last().map(|header| header.height).unwrap_or(current_height);
            anchors = next_anchors(anchors, &fresh);

            debug!(
                "[{}] accepted {} headers up to {} (remote {})",
                network,
                fresh.len(),
                current_height,
                remote_height
            );
        }

        Ok(current_height)
    }

    /// Locate the overlap anchors inside a received run and return the
    /// genuinely new headers after them.
    ///
    /// The most recently accepted header must be present by value; when two
    /// anchors are held, the older one must sit directly before it.
    fn check_overlaps(&self, anchors: &[Header], run: &[Header]) -> Result<Vec<Header>, SyncError> {
        let last_anchor = anchors.last().ok_or_else(|| {
            SyncError::ContinuityBroken("no overlap anchor available".to_string())
        })?;

        let position = run
            .iter()
            .position(|header| header == last_anchor)
            .ok_or_else(|| {
                SyncError::ContinuityBroken(format!(
                    "overlap header {}@{} not found in received page",
                    last_anchor.block_id, last_anchor.height
                ))
            })?;

        if anchors.len() == 2 && position >= 1 && run[position - 1] != anchors[0] {
            return Err(SyncError::ContinuityBroken(format!(
                "received page disagrees below overlap header {}@{}",
                last_anchor.block_id, last_anchor.height
            )));
        }

        Ok(run[position + 1..].to_vec())
    }

    /// True iff the remote id at the local tip height differs from the
    /// locally stored id, i.e. the chains diverged.
    pub async fn check_fork(&self, last_local: &Header) -> Result<bool, SyncError> {
        let received = self
            .source
            .get_block_id_at_height(last_local.height)
            .await?;
        Ok(received != last_local.block_id)
    }

    /// Walk backward one height at a time until local and remote ids agree
    /// and return that height as the fork point.
    ///
    /// Linear in the reorganization depth; reorganizations are assumed
    /// shallow relative to chain length.
    pub async fn calc_fork(&self, last_local: &Header) -> Result<u64, SyncError> {
        let loaded = self.store.headers_desc(last_local.network).await?;

        for local in &loaded {
            let received = self.source.get_block_id_at_height(local.height).await?;
            if received == local.block_id {
                return Ok(local.height);
            }
        }

        Err(SyncError::ForkScanExhausted(last_local.height))
    }

    /// Truncate the mirror back to `fork_height`: headers strictly above
    /// the fork point are discarded, along with the boxes, spends and
    /// transactions recorded above it.
    pub async fn remove_from_db(
        &self,
        fork_height: u64,
        network: NetworkId,
    ) -> Result<ForkRollback, SyncError> {
        let stats = self.store.fork_rollback(network, fork_height).await?;
        info!(
            "[{}] rolled back to {}: {} headers, {} boxes, {} txs removed, {} spends reverted",
            network,
            fork_height,
            stats.headers_removed,
            stats.boxes_removed,
            stats.txs_removed,
            stats.spends_reverted
        );
        Ok(stats)
    }

    /// One header pass: resolve a fork if the tips diverged, otherwise
    /// advance forward. Never both in the same invocation.
    pub async fn sync_blocks(&self, last_local: &Header) -> Result<HeaderOutcome, SyncError> {
        if self.check_fork(last_local).await? {
            let fork_height = self.calc_fork(last_local).await?;
            self.remove_from_db(fork_height, last_local.network).await?;
            Ok(HeaderOutcome::RolledBack { fork_height })
        } else {
            let new_tip = self.step_forward(last_local).await?;
            Ok(HeaderOutcome::Advanced { new_tip })
        }
    }
}

/// The overlap anchors for the next page: the last two accepted headers.
fn next_anchors(previous: Vec<Header>, fresh: &[Header]) -> Vec<Header> {
    if fresh.len() >= 2 {
        fresh[fresh.len() - 2..].to_vec()
    } else {
        let mut anchors = previous;
        anchors.extend_from_slice(fresh);
        if anchors.len() > 2 {
            anchors.drain(..anchors.len() - 2);
        }
        anchors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::mock::MockChainSource;
    use crate::ledger::store::{HeaderRepository, MemoryLedgerStore};

    const NET: NetworkId = NetworkId::Testnet;

    fn header(height: u64, block_id: &str) -> Header {
        Header {
            network: NET,
            height,
            block_id: block_id.to_string(),
        }
    }

    fn chain(range: std::ops::RangeInclusive<u64>) -> Vec<(u64, String)> {
        range.map(|height| (height, format!("b{}", height))).collect()
    }

    async fn seeded(
        local: std::ops::RangeInclusive<u64>,
        remote: &[(u64, String)],
    ) -> (HeaderSync, Arc<MemoryLedgerStore>, Arc<MockChainSource>) {
        let store = Arc::new(MemoryLedgerStore::new());
        let headers: Vec<Header> = local.map(|h| header(h, &format!("b{}", h))).collect();
        store.insert_headers(&headers).await.unwrap();

        let source = Arc::new(MockChainSource::new());
        let remote: Vec<(u64, &str)> = remote.iter().map(|(h, id)| (*h, id.as_str())).collect();
        source.set_chain(&remote);

        let sync = HeaderSync::new(store.clone(), source.clone());
        (sync, store, source)
    }

    #[test]
    fn header_run_assigns_consecutive_heights() {
        let ids = vec!["123".to_string(), "190".to_string()];
        let run = create_header_run(&ids, 0, NET);
        assert_eq!(run, vec![header(1, "123"), header(2, "190")]);
    }

    #[test]
    fn paging_overlaps_the_last_two_headers() {
        // Steady state: page top sits limit - 2 above the local tip.
        let paging = header_paging(1000, 100, 50);
        assert_eq!(paging.offset, 852);
        assert_eq!(1000 - paging.offset, 148);

        // Near the tip the offset clamps to zero.
        let paging = header_paging(103, 100, 50);
        assert_eq!(paging.offset, 0);
    }

    #[tokio::test]
    async fn single_anchor_overlap_inserts_only_the_new_header() {
        // Local knows heights 1..=2; the remote serves ids for 2 and 3.
        let remote = vec![(2, "b2".to_string()), (3, "b3".to_string())];
        let (sync, store, _) = seeded(1..=2, &remote).await;

        let tip = sync.step_forward(&header(2, "b2")).await.unwrap();
        assert_eq!(tip, 3);

        let run = store.headers_desc(NET).await.unwrap();
        assert_eq!(
            run.iter().map(|h| h.height).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
        assert_eq!(run[0].block_id, "b3");
    }

    #[tokio::test]
    async fn multi_page_sync_keeps_the_run_contiguous() {
        let (sync, store, _) = seeded(1..=2, &chain(1..=60)).await;

        let tip = sync.step_forward(&header(2, "b2")).await.unwrap();
        assert_eq!(tip, 60);

        let run = store.headers_desc(NET).await.unwrap();
        let heights: Vec<u64> = run.iter().rev().map(|h| h.height).collect();
        assert_eq!(heights, (1..=60).collect::<Vec<u64>>());
        // No duplicates or losses across page boundaries.
        for (height, h) in heights.iter().zip(run.iter().rev()) {
            assert_eq!(h.block_id, format!("b{}", height));
        }
    }

    #[tokio::test]
    async fn missing_overlap_is_a_fatal_continuity_failure() {
        // The remote serves a chain that disagrees at the local tip height.
        let mut remote = chain(1..=20);
        remote[1].1 = "different".to_string();
        let (sync, store, _) = seeded(1..=2, &remote).await;

        let result = sync.step_forward(&header(2, "b2")).await;
        assert!(matches!(result, Err(SyncError::ContinuityBroken(_))));
        // Nothing from the rejected page was persisted.
        assert_eq!(store.last_header(NET).await.unwrap().unwrap().height, 2);
    }

    #[tokio::test]
    async fn empty_pages_do_not_spin() {
        let (sync, _, source) = seeded(1..=2, &[]).await;
        source.set_height(10);

        let result = sync.step_forward(&header(2, "b2")).await;
        assert!(matches!(result, Err(SyncError::NoProgress(2))));
    }

    #[tokio::test]
    async fn check_fork_compares_ids_at_the_local_tip() {
        let (sync, _, _) = seeded(1..=10, &chain(1..=10)).await;

        assert!(!sync.check_fork(&header(10, "b10")).await.unwrap());
        assert!(sync.check_fork(&header(10, "other")).await.unwrap());
    }

    #[tokio::test]
    async fn calc_fork_walks_back_to_the_last_agreeing_height() {
        // Heights 9 and 10 were reorganized away on the remote side.
        let mut remote = chain(1..=10);
        remote[8].1 = "b9-new".to_string();
        remote[9].1 = "b10-new".to_string();
        let (sync, _, _) = seeded(1..=10, &remote).await;

        let fork_height = sync.calc_fork(&header(10, "b10")).await.unwrap();
        assert_eq!(fork_height, 8);
    }

    #[tokio::test]
    async fn fork_rollback_then_resync_converges_on_the_remote_chain() {
        let mut remote = chain(1..=10);
        remote[8].1 = "b9-new".to_string();
        remote[9].1 = "b10-new".to_string();
        let (sync, store, _) = seeded(1..=10, &remote).await;

        // First pass resolves the fork and truncates heights 9 and 10.
        let outcome = sync.sync_blocks(&header(10, "b10")).await.unwrap();
        assert_eq!(outcome, HeaderOutcome::RolledBack { fork_height: 8 });
        assert_eq!(store.last_header(NET).await.unwrap().unwrap().height, 8);

        // Second pass sees no divergence and advances forward again.
        let last = store.last_header(NET).await.unwrap().unwrap();
        let outcome = sync.sync_blocks(&last).await.unwrap();
        assert_eq!(outcome, HeaderOutcome::Advanced { new_tip: 10 });
        assert_eq!(
            store.header_at(NET, 9).await.unwrap().unwrap().block_id,
            "b9-new"
        );
        assert_eq!(
            store.header_at(NET, 10).await.unwrap().unwrap().block_id,
            "b10-new"
        );
    }

    #[tokio::test]
    async fn fork_scan_past_all_local_headers_fails() {
        let remote: Vec<(u64, String)> =
            (1..=5).map(|h| (h, format!("other{}", h))).collect();
        let (sync, _, _) = seeded(1..=5, &remote).await;

        let result = sync.calc_fork(&header(5, "b5")).await;
        assert!(matches!(result, Err(SyncError::ForkScanExhausted(5))));
    }
}
