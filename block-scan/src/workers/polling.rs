use crate::{
    config::ScanContext,
    distribution::Distributor,
    error::ScanError,
    storage::CursorWriter,
    types::{CandidateTx, TxStatus},
};
use super::panic_message;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// Pause before re-reading the chain head after the node reported none.
const HEAD_RETRY: Duration = Duration::from_secs(1);

/// Walks blocks one by one and feeds the transactions it finds to a consumer
/// that waits for their receipts.
pub struct Polling {
    ctx: Arc<ScanContext>,
    txn_tx: mpsc::Sender<CandidateTx>,
    txn_rx: mpsc::Receiver<CandidateTx>,
}

impl Polling {
    pub fn new(ctx: Arc<ScanContext>) -> Self {
        let (txn_tx, txn_rx) = mpsc::channel(ctx.sync.capacity());
        Self { ctx, txn_tx, txn_rx }
    }

    /// Runs the block sweep until `cancel` fires.
    ///
    /// The consumer task is spawned alongside and stops on the same signal,
    /// or when the sweep exits. A consumer that dies ends the run with
    /// [`ScanError::Panicked`] so the coordinator can restart the scan.
    pub async fn wipe_block(self, cancel: CancellationToken) -> Result<(), ScanError> {
        let Polling { ctx, txn_tx, txn_rx } = self;

        let consumer_cancel = cancel.child_token();
        let _consumer_guard = consumer_cancel.clone().drop_guard();
        let consumer = Consumer {
            distributor: Distributor::new(ctx.clone()),
            cursor: CursorWriter::new(ctx.cursor.clone(), ctx.chain.clone()),
            ctx: ctx.clone(),
            txn_tx: txn_tx.clone(),
            txn_rx,
            backlog: VecDeque::new(),
        };
        let mut consumer = tokio::spawn(consumer.run(consumer_cancel));

        let sweeper = Sweeper { ctx, txn_tx };
        tokio::select! {
            swept = sweeper.run(&cancel) => swept,
            joined = &mut consumer => match joined {
                Ok(()) if cancel.is_cancelled() => Ok(()),
                Ok(()) => Err(ScanError::Panicked("transaction consumer stopped".to_string())),
                Err(join_err) if join_err.is_panic() => {
                    Err(ScanError::Panicked(panic_message(join_err.into_panic())))
                }
                Err(join_err) => Err(ScanError::Panicked(join_err.to_string())),
            },
        }
    }
}

/// The producing half of the engine: filters blocks and queues candidates.
struct Sweeper {
    ctx: Arc<ScanContext>,
    txn_tx: mpsc::Sender<CandidateTx>,
}

impl Sweeper {
    async fn run(&self, cancel: &CancellationToken) -> Result<(), ScanError> {
        tracing::debug!(chain = %self.ctx.chain, "start wipeBlock");
        let filter_contracts = self.ctx.contract_filter();
        let sleep_time = self.ctx.poll_interval();
        let mut current_block_num = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let chain_block_num = self.ctx.chain_io.block_number().await;
            if chain_block_num == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = sleep(HEAD_RETRY) => continue,
                }
            }
            if current_block_num == 0 {
                current_block_num = self.read_cursor().await;
            }
            if current_block_num == 0 {
                current_block_num = self.ctx.init_block;
            }
            if current_block_num == 0 {
                current_block_num = chain_block_num;
            }

            if current_block_num < chain_block_num {
                for block in current_block_num + 1..=chain_block_num {
                    match self.sweep_block(block, &filter_contracts, cancel).await {
                        Sweep::Done => current_block_num = block,
                        Sweep::Failed => break,
                        Sweep::Cancelled => return Ok(()),
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep(sleep_time) => {}
            }
        }
    }

    async fn read_cursor(&self) -> u64 {
        match self.ctx.cursor.get_start_block(&self.ctx.chain).await {
            Ok(height) => height,
            Err(e) => {
                tracing::warn!(chain = %self.ctx.chain, "Failed to read cursor: {}", e);
                0
            }
        }
    }

    /// Filters one block and queues its transactions.
    async fn sweep_block(&self, block: u64, filter: &[String], cancel: &CancellationToken) -> Sweep {
        let found = match self.ctx.chain_io.filter_trans(block, filter).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(chain = %self.ctx.chain, block, "Failed to filter block, retrying next tick: {}", e);
                return Sweep::Failed;
            }
        };

        if found.txs.is_empty() {
            if block % 100 == 0 {
                tracing::debug!(chain = %self.ctx.chain, "scan current block {}", block);
            }
            return Sweep::Done;
        }

        tracing::debug!(
            chain = %self.ctx.chain,
            block,
            "find tx id {:?}; transaction contracts {:?}",
            found.txs,
            found.targets
        );
        for (index, tx) in found.txs.iter().enumerate() {
            let contract = found.contracts.get(index).cloned().unwrap_or_default();
            let candidate = CandidateTx::new(tx.clone(), found.timestamp, contract);
            tokio::select! {
                _ = cancel.cancelled() => return Sweep::Cancelled,
                sent = self.txn_tx.send(candidate) => {
                    if sent.is_err() {
                        return Sweep::Cancelled;
                    }
                }
            }
        }
        Sweep::Done
    }
}

enum Sweep {
    Done,
    Failed,
    Cancelled,
}

/// Drains the transaction channel, waiting for each receipt to become available.
struct Consumer {
    ctx: Arc<ScanContext>,
    distributor: Distributor,
    cursor: CursorWriter,
    txn_tx: mpsc::Sender<CandidateTx>,
    txn_rx: mpsc::Receiver<CandidateTx>,
    /// Re-queued transactions that did not fit back into the full channel.
    backlog: VecDeque<CandidateTx>,
}

impl Consumer {
    async fn run(mut self, cancel: CancellationToken) {
        self.cursor.load().await;
        while let Some(txn) = self.next(&cancel).await {
            self.process(txn).await;
        }
        tracing::debug!(chain = %self.ctx.chain, "Consumer stopped");
    }

    async fn next(&mut self, cancel: &CancellationToken) -> Option<CandidateTx> {
        if cancel.is_cancelled() {
            return None;
        }
        if let Some(txn) = self.backlog.pop_front() {
            return match self.txn_rx.try_recv() {
                Ok(fresh) => {
                    self.backlog.push_front(txn);
                    Some(fresh)
                }
                Err(_) => Some(txn),
            };
        }
        tokio::select! {
            _ = cancel.cancelled() => None,
            txn = self.txn_rx.recv() => txn,
        }
    }

    async fn process(&mut self, txn: CandidateTx) {
        if self.ctx.chain_io.transaction_status(&txn.tx).await == TxStatus::Fail {
            tracing::debug!(chain = %self.ctx.chain, tx = %txn.tx, "Transaction failed, dropping");
            return;
        }

        let receipt = match self.ctx.chain_io.receipt_log(&txn.tx).await {
            Ok(Some(receipt)) if !receipt.logs.is_empty() => receipt,
            Ok(_) => {
                self.requeue(txn);
                tokio::task::yield_now().await;
                return;
            }
            Err(e) => {
                tracing::debug!(chain = %self.ctx.chain, tx = %txn.tx, "Receipt not available yet: {}", e);
                self.requeue(txn);
                tokio::task::yield_now().await;
                return;
            }
        };

        self.ctx.metrics.scan_tx_total(&self.ctx.chain);
        if self
            .distributor
            .run_before_push_middleware(&txn.tx, txn.block_timestamp, &receipt)
        {
            let block_number = receipt.block_number;
            self.distributor
                .receipt_distribution(&txn.tx, txn.block_timestamp, receipt)
                .await;
            self.cursor.advance(block_number).await;
        }
    }

    /// Puts a transaction whose receipt is missing or empty back in line.
    fn requeue(&mut self, mut txn: CandidateTx) {
        txn.attempts = txn.attempts.saturating_add(1);
        if let Some(max) = self.ctx.sync.max_receipt_retries {
            if txn.attempts > max {
                tracing::warn!(
                    chain = %self.ctx.chain,
                    tx = %txn.tx,
                    attempts = txn.attempts,
                    "Receipt never became available, dropping transaction"
                );
                return;
            }
        }
        match self.txn_tx.try_send(txn) {
            Ok(()) => {}
            Err(TrySendError::Full(txn)) | Err(TrySendError::Closed(txn)) => {
                self.backlog.push_back(txn)
            }
        }
    }
}
