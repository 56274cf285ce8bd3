//! In-memory `ChainSource` test double shared by the sync tests.

use super::types::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct MockInner {
    height: u64,
    ids_by_height: BTreeMap<u64, String>,
    address_txs: HashMap<String, Vec<TxInfo>>,
    block_txs: HashMap<String, Vec<TxInfo>>,
    fail_next: bool,
    submitted: Vec<Vec<u8>>,
}

/// Scriptable remote chain used in place of the explorer in tests.
#[derive(Default)]
pub struct MockChainSource {
    inner: Mutex<MockInner>,
}

impl MockChainSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remote chain with `blocks`, setting the tip to the
    /// highest height present.
    pub fn set_chain(&self, blocks: &[(u64, &str)]) {
        let mut inner = self.inner.lock().unwrap();
        inner.ids_by_height = blocks
            .iter()
            .map(|(height, id)| (*height, id.to_string()))
            .collect();
        inner.height = blocks.iter().map(|(height, _)| *height).max().unwrap_or(0);
    }

    pub fn set_height(&self, height: u64) {
        self.inner.lock().unwrap().height = height;
    }

    pub fn push_address_tx(&self, address: &str, tx: TxInfo) {
        self.inner
            .lock()
            .unwrap()
            .address_txs
            .entry(address.to_string())
            .or_default()
            .push(tx);
    }

    pub fn set_block_txs(&self, block_id: &str, txs: Vec<TxInfo>) {
        self.inner
            .lock()
            .unwrap()
            .block_txs
            .insert(block_id.to_string(), txs);
    }

    /// Make the next remote call fail with an API error.
    pub fn fail_next(&self) {
        self.inner.lock().unwrap().fail_next = true;
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().submitted.clone()
    }

    fn check_failure(inner: &mut MockInner) -> Result<(), ChainError> {
        if inner.fail_next {
            inner.fail_next = false;
            return Err(ChainError::Api("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainSource for MockChainSource {
    async fn get_height(&self) -> Result<u64, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        Ok(inner.height)
    }

    async fn get_block_ids(&self, paging: Paging) -> Result<Vec<String>, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        let top = inner.height.saturating_sub(paging.offset);
        let bottom = (top + 1).saturating_sub(paging.limit);
        Ok(inner
            .ids_by_height
            .range(bottom..=top)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn get_block_id_at_height(&self, height: u64) -> Result<String, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        inner
            .ids_by_height
            .get(&height)
            .cloned()
            .ok_or(ChainError::NoData)
    }

    async fn get_address_tx_count(
        &self,
        address: &str,
        range: HeightRange,
    ) -> Result<u64, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        Ok(inner
            .address_txs
            .get(address)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| tx.inclusion_height >= range.from && tx.inclusion_height <= range.to)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn get_address_transactions(
        &self,
        address: &str,
        range: HeightRange,
        paging: Paging,
    ) -> Result<Vec<TxInfo>, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        Ok(inner
            .address_txs
            .get(address)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| tx.inclusion_height >= range.from && tx.inclusion_height <= range.to)
                    .skip(paging.offset as usize)
                    .take(paging.limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_block_transactions(&self, block_id: &str) -> Result<Vec<TxInfo>, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        inner
            .block_txs
            .get(block_id)
            .cloned()
            .ok_or(ChainError::NoData)
    }

    async fn submit_transaction(&self, raw: &[u8]) -> Result<TxSubmitResponse, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failure(&mut inner)?;
        inner.submitted.push(raw.to_vec());
        Ok(TxSubmitResponse {
            id: format!("submitted-{}", inner.submitted.len()),
        })
    }
}
