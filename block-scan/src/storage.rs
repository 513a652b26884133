use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// The logical key under which cursors are conventionally grouped, one entry
/// per chain name.
pub const CURSOR_KEY: &str = "WipeBlock";

/// A trait defining the required functionality for a persistent cursor backend.
/// This allows for different database implementations.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Retrieves the last fully processed block height of `chain`.
    /// Returns 0 if nothing has been stored yet.
    ///
    /// # Arguments
    ///
    /// * `chain` - The chain name, also used as the key of its cursor.
    async fn get_start_block(&self, chain: &str) -> Result<u64>;

    /// Records `height` as the last fully processed block of `chain`.
    ///
    /// Implementations store the value as given; keeping it monotonic is the
    /// caller's concern.
    ///
    /// # Arguments
    ///
    /// * `chain` - The chain name.
    /// * `height` - The block height every transaction up to which was dispatched.
    async fn set_start_block(&self, chain: &str, height: u64) -> Result<()>;
}

/// An in-process [`CursorStore`], mainly useful for tests and ephemeral runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryCursorStore {
    cursors: Arc<DashMap<String, u64>>,
}

impl MemoryCursorStore {
    /// Creates an empty store. Clones share the same cursors.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn get_start_block(&self, chain: &str) -> Result<u64> {
        Ok(self.cursors.get(chain).map(|v| *v).unwrap_or(0))
    }

    async fn set_start_block(&self, chain: &str, height: u64) -> Result<()> {
        self.cursors.insert(chain.to_string(), height);
        Ok(())
    }
}

/// Writes the cursor of one chain, forward only.
///
/// Receipts can complete out of block order (a re-queued transaction finishes
/// after younger ones), so a lower height than the last one written is ignored.
pub(crate) struct CursorWriter {
    store: Arc<dyn CursorStore>,
    chain: String,
    last: u64,
}

impl CursorWriter {
    pub(crate) fn new(store: Arc<dyn CursorStore>, chain: String) -> Self {
        Self { store, chain, last: 0 }
    }

    /// Reads the stored cursor and remembers it as the write floor.
    pub(crate) async fn load(&mut self) -> u64 {
        match self.store.get_start_block(&self.chain).await {
            Ok(height) => {
                self.last = self.last.max(height);
                height
            }
            Err(e) => {
                tracing::warn!(chain = %self.chain, "Failed to read cursor: {}", e);
                0
            }
        }
    }

    /// Persists `height` if it is above the last written one. A failed write
    /// is logged and retried with the next advance.
    pub(crate) async fn advance(&mut self, height: u64) {
        if height <= self.last {
            return;
        }
        match self.store.set_start_block(&self.chain, height).await {
            Ok(()) => self.last = height,
            Err(e) => tracing::error!(chain = %self.chain, height, "Failed to persist cursor: {}", e),
        }
    }
}
