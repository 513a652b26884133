use crate::types::{Log, Receipt};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// A live transaction waiting out the confirmation delay.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub tx: String,
    /// Logs seen so far. Only a preview: the receipt is fetched again at flush time.
    pub receipt: Receipt,
    pub block_timestamp: u64,
    pub first_seen: Instant,
}

/// Transactions seen on the live feed but not trusted yet.
///
/// An entry becomes due once `delay` has elapsed since it was first seen.
#[derive(Debug)]
pub struct PendingBuffer {
    entries: HashMap<String, PendingEntry>,
    delay: Duration,
}

impl PendingBuffer {
    pub fn new(delay: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            delay,
        }
    }

    pub fn contains(&self, tx: &str) -> bool {
        self.entries.contains_key(tx)
    }

    pub fn insert(&mut self, tx: String, receipt: Receipt, block_timestamp: u64, first_seen: Instant) {
        self.entries.insert(
            tx.clone(),
            PendingEntry {
                tx,
                receipt,
                block_timestamp,
                first_seen,
            },
        );
    }

    /// Appends `log` to the preview receipt of `tx`. Returns `false` when the
    /// transaction is not pending.
    pub fn push_log(&mut self, tx: &str, log: Log) -> bool {
        match self.entries.get_mut(tx) {
            Some(entry) => {
                entry.receipt.logs.push(log);
                true
            }
            None => false,
        }
    }

    /// Entries whose delay has elapsed at `now`, oldest block first.
    /// They stay in the buffer until [`PendingBuffer::remove`].
    pub fn due(&self, now: Instant) -> Vec<PendingEntry> {
        let mut due: Vec<PendingEntry> = self
            .entries
            .values()
            .filter(|entry| now.saturating_duration_since(entry.first_seen) >= self.delay)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.receipt
                .block_number
                .cmp(&b.receipt.block_number)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });
        due
    }

    pub fn remove(&mut self, tx: &str) -> Option<PendingEntry> {
        self.entries.remove(tx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
