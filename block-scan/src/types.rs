//! Chain-agnostic data model shared by both scan engines.
use serde::{Deserialize, Serialize};
use std::fmt;

/// The address of a tracked contract.
///
/// Addresses are compared case-insensitively throughout the scanner, so the
/// inner value is always stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ContractAddress(String);

impl ContractAddress {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContractAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ContractAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ContractAddress> for String {
    fn from(value: ContractAddress) -> Self {
        value.0
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single event log emitted by a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub topics: Vec<String>,
    pub data: String,
    pub address: String,
}

impl Log {
    /// Identity of a log inside one receipt: lower-cased address, data and
    /// the concatenated topics.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.address.to_lowercase(),
            self.data,
            self.topics.concat()
        )
    }
}

/// A transaction receipt as handed to the distribution stage.
///
/// The serialized field names are the payload format downstream job workers
/// read, so they are kept stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "block_number")]
    pub block_number: u64,
    pub logs: Vec<Log>,
    pub status: String,
    #[serde(rename = "chainSource")]
    pub chain_source: String,
    #[serde(rename = "gasUsed", default)]
    pub gas_used: String,
    #[serde(rename = "logsBloom", default)]
    pub logs_bloom: String,
    /// `true` routes dispatch through the job queue, `false` through an
    /// in-process callback.
    pub solidity: bool,
    #[serde(rename = "transactionIndex", default)]
    pub transaction_index: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
}

/// A transaction discovered by the polling sweep, waiting for its receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTx {
    pub tx: String,
    pub block_timestamp: u64,
    pub contract: String,
    /// How many times the receipt was found missing or empty.
    pub attempts: u32,
}

impl CandidateTx {
    pub fn new(tx: impl Into<String>, block_timestamp: u64, contract: impl Into<String>) -> Self {
        Self {
            tx: tx.into(),
            block_timestamp,
            contract: contract.into(),
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub timestamp: u64,
    pub hash: String,
}

/// Result of filtering one block for transactions that touch tracked contracts.
///
/// `txs` and `contracts` are index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredBlock {
    pub txs: Vec<String>,
    pub contracts: Vec<String>,
    pub timestamp: u64,
    pub targets: Vec<String>,
}

/// The outcome of a transaction as reported by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Fail,
    Unknown,
}

/// A log as delivered by a log filter query or a live log subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub block_hash: String,
}

impl RawLog {
    pub fn to_log(&self) -> Log {
        Log {
            topics: self.topics.clone(),
            data: self.data.clone(),
            address: self.address.clone(),
        }
    }
}

/// A block-range log query restricted to a set of contract addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<String>,
    pub from_block: u64,
    /// `None` leaves the range open-ended (live subscriptions).
    pub to_block: Option<u64>,
}
