//! Covering-box selection for transaction building.
//!
//! First-fit greedy selection over the stable box order the store exposes:
//! no attempt is made to minimize the number of boxes, avoid dust or prefer
//! exact matches. An unsatisfied result means insufficient funds for the
//! request, never a retryable error. Selection only reads the box set the
//! syncers maintain and may therefore reflect a snapshot that is stale by
//! the time a transaction is built; callers re-validate before broadcast.

use crate::ledger::store::{LedgerStore, StoreError};
use crate::ledger::types::*;

use std::collections::HashMap;
use std::sync::Arc;

/// Which box set to draw candidates from.
#[derive(Debug, Clone)]
pub enum CoverageSource {
    /// All unspent boxes of a wallet, joined through its addresses.
    Wallet(WalletId),
    /// All unspent boxes of an explicit address set.
    Addresses(Vec<AddressId>),
}

/// Selects unspent boxes covering a requested amount plus token requirements.
pub struct CoverageSelector {
    store: Arc<dyn LedgerStore>,
}

impl CoverageSelector {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Greedily select boxes until `amount` nanoERG and every token
    /// requirement are covered.
    pub async fn get_covering_box(
        &self,
        amount: u64,
        source: CoverageSource,
        token_requirements: &HashMap<String, u64>,
    ) -> Result<CoverageResult, StoreError> {
        let candidates = match source {
            CoverageSource::Wallet(wallet_id) => {
                self.store.unspent_boxes_for_wallet(wallet_id).await?
            }
            CoverageSource::Addresses(address_ids) => {
                self.store.unspent_boxes_for_addresses(&address_ids).await?
            }
        };

        let mut remaining_amount = amount as i128;
        let mut remaining_tokens: HashMap<&str, i128> = token_requirements
            .iter()
            .map(|(token_id, required)| (token_id.as_str(), *required as i128))
            .collect();
        let mut selected = Vec::new();

        for candidate in candidates {
            if !Self::is_required(&candidate, remaining_amount, &remaining_tokens) {
                continue;
            }

            remaining_amount -= candidate.value as i128;
            for token in &candidate.tokens {
                if let Some(required) = remaining_tokens.get_mut(token.token_id.as_str()) {
                    *required -= token.amount as i128;
                }
            }
            selected.push(candidate);

            if remaining_amount <= 0 && remaining_tokens.values().all(|required| *required <= 0) {
                return Ok(CoverageResult {
                    covered: true,
                    boxes: selected,
                });
            }
        }

        Ok(CoverageResult {
            covered: false,
            boxes: selected,
        })
    }

    fn is_required(
        candidate: &BoxRecord,
        remaining_amount: i128,
        remaining_tokens: &HashMap<&str, i128>,
    ) -> bool {
        if remaining_amount > 0 {
            return true;
        }
        candidate.tokens.iter().any(|token| {
            token.amount > 0
                && remaining_tokens
                    .get(token.token_id.as_str())
                    .is_some_and(|required| *required > 0)
        })
    }
}
