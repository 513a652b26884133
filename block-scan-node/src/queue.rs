//! A `sled`-backed [`JobQueue`].
//!
//! Every queue name gets its own tree. Entries are keyed by a monotonically
//! increasing id from [`sled::Db::generate_id`], so iterating a tree yields jobs
//! in enqueue order. Values are bincode-encoded [`JobEnvelope`]s.
use crate::error::NodeError;
use anyhow::Result;
use async_trait::async_trait;
use block_scan::dispatcher::{Job, JobQueue};
use serde::{Deserialize, Serialize};
use sled::Db;

/// A job as stored on a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub jid: String,
    pub class: String,
    pub queue: String,
    pub args: Job,
    /// Milliseconds since the Unix epoch.
    pub enqueued_at: i64,
}

#[derive(Clone)]
pub struct SledJobQueue {
    db: Db,
}

impl SledJobQueue {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Jobs waiting on `queue`, oldest first.
    pub fn pending(&self, queue: &str) -> Result<Vec<JobEnvelope>, NodeError> {
        let tree = self.db.open_tree(queue)?;
        let mut jobs = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, value) = entry?;
            let (job, _): (JobEnvelope, usize) =
                bincode::serde::decode_from_slice(&value, bincode::config::standard())?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    fn push(&self, envelope: &JobEnvelope) -> Result<(), NodeError> {
        let tree = self.db.open_tree(&envelope.queue)?;
        let key = self.db.generate_id()?.to_be_bytes();
        let value = bincode::serde::encode_to_vec(envelope, bincode::config::standard())?;
        tree.insert(key, value)?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for SledJobQueue {
    async fn enqueue(&self, queue: &str, class: &str, job: &Job) -> Result<String> {
        let envelope = JobEnvelope {
            jid: uuid::Uuid::new_v4().simple().to_string(),
            class: class.to_string(),
            queue: queue.to_string(),
            args: job.clone(),
            enqueued_at: chrono::Utc::now().timestamp_millis(),
        };
        self.push(&envelope)?;
        self.db.flush_async().await?;
        tracing::debug!(queue, jid = %envelope.jid, tx = %job.tx, "Job stored");
        Ok(envelope.jid)
    }
}
