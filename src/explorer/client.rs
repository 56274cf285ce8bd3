//!
//! REST client for an Ergo-explorer-shaped chain-data API.
//!
//! This module provides an async client used by the syncers to read block
//! ids, address history and block contents, and to submit signed
//! transactions. All methods are async and designed for use with Tokio.

use super::types::*;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct BlockIdItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    block: BlockBody,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    #[serde(rename = "blockTransactions", default = "Vec::new")]
    block_transactions: Vec<TxInfo>,
}

/// Explorer REST client
#[derive(Clone)]
pub struct ExplorerClient {
    /// The underlying HTTP client.
    http_client: Client,
    /// Base URL of the explorer API, without a trailing slash.
    base_url: String,
}

impl ExplorerClient {
    /// Create a new explorer client.
    ///
    /// # Arguments
    /// * `base_url` - The explorer API root, e.g. `https://api.ergoplatform.com`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ChainError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let response = self.http_client.get(&url).query(query).send().await?;

        if !response.status().is_success() {
            return Err(ChainError::Api(format!(
                "HTTP {} from {}",
                response.status(),
                path
            )));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait::async_trait]
impl ChainSource for ExplorerClient {
    async fn get_height(&self) -> Result<u64, ChainError> {
        let info: NetworkInfo = self.get_json("/api/v1/info", &[]).await?;
        Ok(info.height)
    }

    async fn get_block_ids(&self, paging: Paging) -> Result<Vec<String>, ChainError> {
        // The explorer orders descending from the tip; reversing the page
        // yields the ascending run the header synchronizer expects.
        let response: ItemsResponse<BlockIdItem> = self
            .get_json(
                "/api/v1/blocks",
                &[
                    ("offset", paging.offset.to_string()),
                    ("limit", paging.limit.to_string()),
                    ("sortBy", "height".to_string()),
                    ("sortDirection", "desc".to_string()),
                ],
            )
            .await?;

        let mut ids: Vec<String> = response.items.into_iter().map(|item| item.id).collect();
        ids.reverse();
        Ok(ids)
    }

    async fn get_block_id_at_height(&self, height: u64) -> Result<String, ChainError> {
        let ids: Vec<String> = self
            .get_json(&format!("/api/v1/blocks/at/{}", height), &[])
            .await?;
        ids.into_iter().next().ok_or(ChainError::NoData)
    }

    async fn get_address_tx_count(
        &self,
        address: &str,
        range: HeightRange,
    ) -> Result<u64, ChainError> {
        let response: ItemsResponse<TxInfo> = self
            .get_json(
                &format!("/api/v1/addresses/{}/transactions", address),
                &[
                    ("offset", "0".to_string()),
                    ("limit", "1".to_string()),
                    ("fromHeight", range.from.to_string()),
                    ("toHeight", range.to.to_string()),
                ],
            )
            .await?;
        Ok(response.total)
    }

    async fn get_address_transactions(
        &self,
        address: &str,
        range: HeightRange,
        paging: Paging,
    ) -> Result<Vec<TxInfo>, ChainError> {
        let response: ItemsResponse<TxInfo> = self
            .get_json(
                &format!("/api/v1/addresses/{}/transactions", address),
                &[
                    ("offset", paging.offset.to_string()),
                    ("limit", paging.limit.to_string()),
                    ("fromHeight", range.from.to_string()),
                    ("toHeight", range.to.to_string()),
                ],
            )
            .await?;
        Ok(response.items)
    }

    async fn get_block_transactions(&self, block_id: &str) -> Result<Vec<TxInfo>, ChainError> {
        let response: BlockResponse = self
            .get_json(&format!("/api/v1/blocks/{}", block_id), &[])
            .await?;
        Ok(response.block.block_transactions)
    }

    async fn submit_transaction(&self, raw: &[u8]) -> Result<TxSubmitResponse, ChainError> {
        let url = format!("{}/api/v1/mempool/transactions/submit", self.base_url);
        debug!("POST {}", url);

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(raw.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChainError::Api(format!(
                "transaction rejected: HTTP {}",
                response.status()
            )));
        }

        Ok(response.json::<TxSubmitResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_transaction_payload() {
        let raw = r#"{
            "id": "tx-1",
            "inclusionHeight": 42,
            "timestamp": 1700000000000,
            "numConfirmations": 7,
            "inputs": [
                {"boxId": "in-1", "address": "addr-a", "index": 0, "value": 100}
            ],
            "outputs": [
                {
                    "boxId": "out-1",
                    "address": "addr-b",
                    "index": 0,
                    "value": 5000000000,
                    "assets": [{"tokenId": "tok-1", "amount": 3, "name": "T"}]
                }
            ]
        }"#;

        let tx: TxInfo = serde_json::from_str(raw).expect("payload should decode");
        assert_eq!(tx.id, "tx-1");
        assert_eq!(tx.inclusion_height, 42);
        assert_eq!(tx.inputs[0].box_id, "in-1");
        assert_eq!(tx.outputs[0].value, 5_000_000_000);
        assert_eq!(tx.outputs[0].assets[0].token_id, "tok-1");
    }

    #[test]
    fn decode_items_response_without_items() {
        let raw = r#"{"total": 120}"#;
        let response: ItemsResponse<BlockIdItem> =
            serde_json::from_str(raw).expect("response should decode");
        assert!(response.items.is_empty());
        assert_eq!(response.total, 120);
    }
}
