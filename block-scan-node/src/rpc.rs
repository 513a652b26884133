//! JSON-RPC client for EVM nodes.
//!
//! [`EvmRpc`] implements [`ChainIo`] over plain HTTP. The wire types and their
//! conversions into `block-scan` types are public so they can be tested without
//! a node.
use crate::error::NodeError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use block_scan::{
    chain::ChainIo,
    types::{BlockHeader, FilteredBlock, Log, LogFilter, RawLog, Receipt, TxStatus},
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::{
    collections::HashSet,
    sync::atomic::{AtomicU64, Ordering},
};

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &str) -> Result<u64, NodeError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Err(NodeError::InvalidQuantity(value.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| NodeError::InvalidQuantity(value.to_string()))
}

fn quantity(value: u64) -> String {
    format!("0x{value:x}")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub hash: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// A block fetched with full transaction objects.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcBlock {
    pub hash: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

impl RpcBlock {
    /// Keeps the transactions sent to one of `contracts`.
    ///
    /// `contracts` holds the matched recipient of each kept transaction and
    /// `targets` its sender.
    pub fn filter(&self, contracts: &[String]) -> Result<FilteredBlock, NodeError> {
        let tracked: HashSet<String> = contracts.iter().map(|c| c.to_lowercase()).collect();
        let mut found = FilteredBlock {
            timestamp: parse_quantity(&self.timestamp)?,
            ..Default::default()
        };
        for tx in &self.transactions {
            let Some(to) = tx.to.as_deref().map(str::to_lowercase) else {
                continue;
            };
            if !tracked.contains(&to) {
                continue;
            }
            found.txs.push(tx.hash.clone());
            found.contracts.push(to);
            found.targets.push(tx.from.clone().unwrap_or_default().to_lowercase());
        }
        Ok(found)
    }
}

/// A block fetched without transaction bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcHeader {
    pub hash: Option<String>,
    pub timestamp: String,
}

impl RpcHeader {
    pub fn to_header(&self) -> Result<BlockHeader, NodeError> {
        Ok(BlockHeader {
            timestamp: parse_quantity(&self.timestamp)?,
            hash: self.hash.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    pub transaction_hash: Option<String>,
    pub block_number: Option<String>,
    pub block_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl RpcLog {
    pub fn to_log(&self) -> Log {
        Log {
            topics: self.topics.clone(),
            data: self.data.clone(),
            address: self.address.clone(),
        }
    }

    /// Converts a mined log. Pending logs, without a transaction or block,
    /// yield `None`.
    pub fn into_raw(self) -> Result<Option<RawLog>, NodeError> {
        let (Some(tx_hash), Some(block_number)) = (self.transaction_hash, self.block_number) else {
            return Ok(None);
        };
        Ok(Some(RawLog {
            address: self.address,
            topics: self.topics,
            data: self.data,
            tx_hash,
            block_number: parse_quantity(&block_number)?,
            block_hash: self.block_hash.unwrap_or_default(),
        }))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub block_number: String,
    pub block_hash: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub logs_bloom: Option<String>,
    #[serde(default)]
    pub transaction_index: Option<String>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

impl RpcReceipt {
    /// Builds the scanner receipt of `chain`. Logs flagged `removed` by a
    /// reorg are dropped.
    pub fn into_receipt(self, chain: &str) -> Result<Receipt, NodeError> {
        Ok(Receipt {
            block_number: parse_quantity(&self.block_number)?,
            logs: self
                .logs
                .iter()
                .filter(|l| !l.removed)
                .map(RpcLog::to_log)
                .collect(),
            status: self.status.unwrap_or_else(|| "0x1".to_string()),
            chain_source: chain.to_string(),
            gas_used: self.gas_used.unwrap_or_default(),
            logs_bloom: self.logs_bloom.unwrap_or_default(),
            solidity: true,
            transaction_index: self.transaction_index.unwrap_or_default(),
            block_hash: self.block_hash,
        })
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self.status.as_deref(), Some("0x0"))
    }
}

/// Renders the `eth_getLogs` / `eth_subscribe` filter object.
pub fn filter_params(filter: &LogFilter) -> Value {
    let mut params = json!({
        "address": filter.addresses,
        "fromBlock": quantity(filter.from_block),
    });
    if let Some(to) = filter.to_block {
        params["toBlock"] = json!(quantity(to));
    }
    params
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC client for one EVM chain.
pub struct EvmRpc {
    client: reqwest::Client,
    url: String,
    chain: String,
    next_id: AtomicU64,
}

impl EvmRpc {
    pub fn new(url: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            chain: chain.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Makes a JSON-RPC call and decodes its `result`.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params
        });

        let mut response: Value = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {method}"))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {method} response"))?;

        if let Some(error) = response.get("error") {
            let body: RpcErrorBody = serde_json::from_value(error.clone())
                .with_context(|| format!("Malformed {method} error: {error}"))?;
            return Err(NodeError::Rpc {
                code: body.code,
                message: body.message,
            }
            .into());
        }
        let result = response
            .get_mut("result")
            .map(Value::take)
            .context("RPC response missing 'result' field")?;
        serde_json::from_value(result).with_context(|| format!("Failed to decode {method} result"))
    }

    pub async fn get_block_number(&self) -> Result<u64> {
        let head: String = self.call("eth_blockNumber", json!([])).await?;
        Ok(parse_quantity(&head)?)
    }

    pub async fn get_block(&self, number: u64) -> Result<Option<RpcBlock>> {
        self.call("eth_getBlockByNumber", json!([quantity(number), true]))
            .await
    }

    pub async fn get_header(&self, number: u64) -> Result<Option<RpcHeader>> {
        self.call("eth_getBlockByNumber", json!([quantity(number), false]))
            .await
    }

    pub async fn get_receipt(&self, tx: &str) -> Result<Option<RpcReceipt>> {
        self.call("eth_getTransactionReceipt", json!([tx])).await
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let logs: Vec<RpcLog> = self.call("eth_getLogs", json!([filter_params(filter)])).await?;
        let mut raw = Vec::with_capacity(logs.len());
        for log in logs.into_iter().filter(|l| !l.removed) {
            if let Some(log) = log.into_raw()? {
                raw.push(log);
            }
        }
        Ok(raw)
    }
}

#[async_trait]
impl ChainIo for EvmRpc {
    async fn receipt_log(&self, tx: &str) -> Result<Option<Receipt>> {
        match self.get_receipt(tx).await? {
            Some(receipt) => Ok(Some(receipt.into_receipt(&self.chain)?)),
            None => Ok(None),
        }
    }

    async fn block_number(&self) -> u64 {
        match self.get_block_number().await {
            Ok(head) => head,
            Err(e) => {
                tracing::warn!(chain = %self.chain, "Failed to read chain head: {:#}", e);
                0
            }
        }
    }

    async fn filter_trans(&self, block_num: u64, filter: &[String]) -> Result<FilteredBlock> {
        let block = self
            .get_block(block_num)
            .await?
            .with_context(|| format!("block {block_num} not found"))?;
        Ok(block.filter(filter)?)
    }

    async fn block_header(&self, block_num: u64) -> Option<BlockHeader> {
        match self.get_header(block_num).await {
            Ok(Some(header)) => header.to_header().ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(chain = %self.chain, block = block_num, "Failed to read block header: {:#}", e);
                None
            }
        }
    }

    async fn transaction_status(&self, tx: &str) -> TxStatus {
        match self.get_receipt(tx).await {
            Ok(Some(receipt)) if receipt.succeeded() => TxStatus::Success,
            Ok(Some(_)) => TxStatus::Fail,
            Ok(None) | Err(_) => TxStatus::Unknown,
        }
    }
}
