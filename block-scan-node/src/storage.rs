/// A `sled`-based implementation of the cursor trait defined in `block-scan`.
use anyhow::Result;
use async_trait::async_trait;
use block_scan::storage::{CursorStore, CURSOR_KEY};
use sled::{Db, Tree};

/// Keeps one cursor per chain in the `WipeBlock` tree, keyed by chain name.
///
/// Heights are stored as decimal strings so the tree stays readable with
/// generic sled tooling.
#[derive(Clone)]
pub struct SledCursorStore {
    tree: Tree,
}

impl SledCursorStore {
    /// Opens the cursor tree of `db`. The database can be shared with the job queue.
    pub fn open(db: &Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(CURSOR_KEY)?,
        })
    }
}

#[async_trait]
impl CursorStore for SledCursorStore {
    async fn get_start_block(&self, chain: &str) -> Result<u64> {
        let height = self
            .tree
            .get(chain)?
            .and_then(|v| String::from_utf8(v.to_vec()).ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(height)
    }

    async fn set_start_block(&self, chain: &str, height: u64) -> Result<()> {
        self.tree.insert(chain, height.to_string().as_bytes())?;
        self.tree.flush_async().await?;
        Ok(())
    }
}
