//! # Dispatch
//!
//! Hands one (transaction, contract) pair to its downstream handler.
//!
//! ## Strategies
//! The receipt's `solidity` flag picks the route:
//! - `true`: a [`Job`] is enqueued on the `<chain>Process` queue of a [`JobQueue`].
//! - `false`: the `<ContractName>Callback` handler registered in the
//!   transaction's [`Callbacks`] is awaited in-process. A missing handler is a no-op.
use crate::{
    error::{CallbackError, DispatchError},
    types::Receipt,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;

/// The unit of work placed on a job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub tx: String,
    pub contract_name: String,
    pub task_id: String,
    pub block_timestamp: u64,
    pub chain: String,
    pub receipts: Receipt,
}

/// A downstream job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues `job` on `queue` under the job class `class` and returns the
    /// queue's identifier for it.
    ///
    /// # Arguments
    ///
    /// * `queue` - The queue name, see [`queue_name`].
    /// * `class` - The job class downstream workers register for.
    /// * `job` - The payload.
    async fn enqueue(&self, queue: &str, class: &str, job: &Job) -> anyhow::Result<String>;
}

pub type CallbackFuture = BoxFuture<'static, Result<(), CallbackError>>;
pub type CallbackHandler = Arc<dyn Fn(CancellationToken) -> CallbackFuture + Send + Sync>;

/// The in-process handlers available for one transaction, keyed by
/// `<ContractName>Callback`.
#[derive(Clone, Default)]
pub struct Callbacks {
    handlers: HashMap<String, CallbackHandler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the contract `contract_name`.
    ///
    /// # Arguments
    ///
    /// * `contract_name` - The contract name as configured in the scan options,
    ///   not its address.
    /// * `handler` - Called with a fresh, never-cancelled token. Returning
    ///   [`CallbackError::AlreadyProcessed`] is not treated as a failure.
    pub fn on<F, Fut>(mut self, contract_name: &str, handler: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        let handler: CallbackHandler =
            Arc::new(move |token| -> CallbackFuture { Box::pin(handler(token)) });
        self.handlers.insert(handler_name(contract_name), handler);
        self
    }

    /// The handler registered for `contract_name`, if any.
    pub fn get(&self, contract_name: &str) -> Option<&CallbackHandler> {
        self.handlers.get(&handler_name(contract_name))
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builds the [`Callbacks`] of one transaction from `(tx, block_timestamp, receipt)`.
pub type CallbackFactory = Arc<dyn Fn(&str, u64, &Receipt) -> Callbacks + Send + Sync>;

fn handler_name(contract_name: &str) -> String {
    format!("{contract_name}Callback")
}

/// The queue a chain's jobs go to: the lower-cased chain name followed by
/// `Process`, e.g. `crabProcess`.
pub fn queue_name(chain_source: &str) -> String {
    format!("{}Process", chain_source.to_lowercase())
}

/// The dispatch payload of one transaction. `contract_name` is filled in per
/// matching contract before each [`FilterBlock::dispatch`].
#[derive(Debug, Clone)]
pub struct FilterBlock<'a> {
    pub contract_name: String,
    pub txid: &'a str,
    pub receipt: &'a Receipt,
    pub block_timestamp: u64,
    pub callbacks: Callbacks,
}

impl FilterBlock<'_> {
    /// Routes the payload to the job queue or the in-process callback.
    ///
    /// Returns the job id when a job was enqueued. Failures are returned as is
    /// and never retried.
    ///
    /// # Arguments
    ///
    /// * `queue` - Required when the receipt has `solidity` set, otherwise unused.
    pub async fn dispatch(
        &self,
        queue: Option<&dyn JobQueue>,
    ) -> Result<Option<String>, DispatchError> {
        if !self.receipt.solidity {
            self.run_callback().await?;
            return Ok(None);
        }

        let queue = queue.ok_or_else(|| DispatchError::NoQueue(self.receipt.chain_source.clone()))?;
        let name = queue_name(&self.receipt.chain_source);
        let job = Job {
            tx: self.txid.to_string(),
            contract_name: self.contract_name.clone(),
            task_id: uuid::Uuid::new_v4().to_string(),
            block_timestamp: self.block_timestamp,
            chain: self.receipt.chain_source.clone(),
            receipts: self.receipt.clone(),
        };
        let jid = queue
            .enqueue(&name, &name, &job)
            .await
            .map_err(|source| DispatchError::Enqueue { queue: name.clone(), source })?;
        tracing::debug!(tx = %self.txid, queue = %name, jid = %jid, "Job enqueued");
        Ok(Some(jid))
    }

    async fn run_callback(&self) -> Result<(), DispatchError> {
        let Some(handler) = self.callbacks.get(&self.contract_name) else {
            return Ok(());
        };
        match handler(CancellationToken::new()).await {
            Ok(()) | Err(CallbackError::AlreadyProcessed) => Ok(()),
            Err(CallbackError::Other(source)) => {
                let handler = handler_name(&self.contract_name);
                tracing::error!(tx = %self.txid, "Process error. {}: {}", handler, source);
                Err(DispatchError::Callback { handler, source })
            }
        }
    }
}
