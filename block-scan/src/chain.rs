//! # Chain Access
//!
//! The scanner never talks to a node directly. Both engines go through the
//! traits in this module, which keeps them usable against any RPC transport
//! and against in-memory mocks in tests.
//!
//! - [`ChainIo`]: block-by-block access used by the polling engine and by the
//!   subscription engine's receipt fetches.
//! - [`LogClient`]: log filtering and live log streaming used by the
//!   subscription engine.
//! - [`LogDialer`]: opens a [`LogClient`] for a websocket endpoint.

use crate::types::{BlockHeader, FilteredBlock, LogFilter, RawLog, Receipt, TxStatus};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// A trait abstracting over block, transaction and receipt queries.
#[async_trait]
pub trait ChainIo: Send + Sync {
    /// Fetches the receipt of a transaction. `Ok(None)` means the node does
    /// not know the receipt yet.
    async fn receipt_log(&self, tx: &str) -> Result<Option<Receipt>>;

    /// Returns the current chain head, or `0` when the node is unreachable.
    async fn block_number(&self) -> u64;

    /// Lists the transactions of `block_num` whose target is one of `filter`.
    async fn filter_trans(&self, block_num: u64, filter: &[String]) -> Result<FilteredBlock>;

    async fn block_header(&self, block_num: u64) -> Option<BlockHeader>;

    async fn transaction_status(&self, tx: &str) -> TxStatus;
}

/// A stream of logs from a live subscription.
///
/// An `Err` item, or the end of the stream, means the subscription broke.
pub type LogStream = BoxStream<'static, Result<RawLog>>;

/// A trait abstracting over log queries and log subscriptions.
#[async_trait]
pub trait LogClient: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    /// Returns every log in the (inclusive) block range of `filter`.
    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>>;

    async fn block_by_number(&self, number: u64) -> Result<BlockHeader>;

    /// Opens a live subscription for logs matching `filter`.
    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream>;
}

/// Connects a [`LogClient`] to a websocket endpoint.
#[async_trait]
pub trait LogDialer: Send + Sync {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn LogClient>>;
}
