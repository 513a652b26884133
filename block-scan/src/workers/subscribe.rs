use crate::{
    chain::{LogClient, LogDialer},
    config::ScanContext,
    distribution::Distributor,
    error::ScanError,
    retry::try_return,
    storage::CursorWriter,
    types::{LogFilter, RawLog, Receipt},
    workers::pending::PendingBuffer,
};
use anyhow::anyhow;
use futures::StreamExt;
use std::{collections::HashMap, sync::Arc};
use tokio::time::{sleep, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Pause before asking again for a chain head the node could not report.
const HEAD_RETRY: Duration = Duration::from_secs(1);

/// The logs of one transaction collected during catch-up.
struct TxLogs {
    tx: String,
    block_timestamp: u64,
    receipt: Receipt,
}

/// Catches up over historical logs, then follows the live log feed, holding
/// each live transaction back until the confirmation delay has passed.
pub struct Subscribe {
    ctx: Arc<ScanContext>,
    distributor: Distributor,
    endpoint: String,
    dialer: Arc<dyn LogDialer>,
}

impl Subscribe {
    pub fn new(ctx: Arc<ScanContext>) -> Result<Self, ScanError> {
        let endpoint = ctx.resolve_wss_endpoint()?;
        let dialer = ctx
            .log_dialer
            .clone()
            .ok_or(ScanError::MissingOption("log_dialer"))?;
        if ctx.job_queue.is_none() {
            return Err(ScanError::MissingOption("job_queue"));
        }
        Ok(Self {
            distributor: Distributor::new(ctx.clone()),
            ctx,
            endpoint,
            dialer,
        })
    }

    pub async fn wipe_block(self, cancel: CancellationToken) -> Result<(), ScanError> {
        let client = self.dialer.dial(&self.endpoint).await?;
        let mut cursor = CursorWriter::new(self.ctx.cursor.clone(), self.ctx.chain.clone());

        let mut current_block_num = cursor.load().await;
        if current_block_num == 0 {
            current_block_num = self.ctx.init_block;
        }

        let Some(reached) = self
            .filter_logs(&cancel, current_block_num, client.as_ref(), &mut cursor)
            .await
        else {
            return Ok(());
        };

        let filter = LogFilter {
            addresses: self.ctx.contract_filter(),
            from_block: reached + 1,
            to_block: None,
        };
        let mut logs = client.subscribe_logs(&filter).await?;
        tracing::info!(chain = %self.ctx.chain, from_block = reached + 1, "Subscribed to live logs");

        let mut pending = PendingBuffer::new(self.ctx.sync.confirmation_delay());
        let mut ticker = tokio::time::interval(self.ctx.sync.flush_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.push(&mut pending, &mut cursor).await?;
                    return Ok(());
                }
                msg = logs.next() => match msg {
                    Some(Ok(log)) => self.accept(&mut pending, client.as_ref(), log).await,
                    Some(Err(e)) => {
                        self.push(&mut pending, &mut cursor).await?;
                        return Err(ScanError::Subscription(e));
                    }
                    None => {
                        self.push(&mut pending, &mut cursor).await?;
                        return Err(ScanError::SubscriptionClosed);
                    }
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        self.push(&mut pending, &mut cursor).await?;
                    }
                }
            }
        }
    }

    /// Replays historical logs in windows until the chain head is reached and
    /// returns the height reached. `None` means the scan was cancelled.
    async fn filter_logs(
        &self,
        cancel: &CancellationToken,
        mut start_block: u64,
        client: &dyn LogClient,
        cursor: &mut CursorWriter,
    ) -> Option<u64> {
        let addresses = self.ctx.contract_filter();
        let window = self.ctx.sync.window();

        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let head = match client.block_number().await {
                Ok(head) if head > 0 => head,
                Ok(_) | Err(_) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = sleep(HEAD_RETRY) => continue,
                    }
                }
            };
            if head <= start_block {
                return Some(start_block);
            }

            let end_block = head.min(start_block.saturating_add(window));
            let filter = LogFilter {
                addresses: addresses.clone(),
                from_block: start_block + 1,
                to_block: Some(end_block),
            };
            let raw_logs = match client.filter_logs(&filter).await {
                Ok(raw_logs) => raw_logs,
                Err(e) => {
                    tracing::warn!(
                        chain = %self.ctx.chain,
                        from_block = filter.from_block,
                        to_block = end_block,
                        "Failed to filter logs, retrying window: {}",
                        e
                    );
                    tokio::task::yield_now().await;
                    continue;
                }
            };

            for entry in self.group_by_tx(client, raw_logs).await {
                self.distribute(&entry.tx, entry.block_timestamp, entry.receipt, cursor)
                    .await;
            }

            start_block = end_block;
            cursor.advance(start_block).await;
            tracing::debug!(chain = %self.ctx.chain, "catch-up reached block {}", start_block);
        }
    }

    /// Groups logs by transaction, in order of first appearance.
    async fn group_by_tx(&self, client: &dyn LogClient, raw_logs: Vec<RawLog>) -> Vec<TxLogs> {
        let mut grouped: Vec<TxLogs> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for raw in raw_logs {
            let slot = match index.get(&raw.tx_hash) {
                Some(slot) => *slot,
                None => {
                    let block_timestamp = match self.block_timestamp(client, raw.block_number).await {
                        Ok(ts) => ts,
                        Err(e) => {
                            tracing::warn!(chain = %self.ctx.chain, tx = %raw.tx_hash, "Skipping log: {}", e);
                            continue;
                        }
                    };
                    grouped.push(TxLogs {
                        tx: raw.tx_hash.clone(),
                        block_timestamp,
                        receipt: self.shell_receipt(&raw),
                    });
                    index.insert(raw.tx_hash.clone(), grouped.len() - 1);
                    grouped.len() - 1
                }
            };
            grouped[slot].receipt.logs.push(raw.to_log());
        }
        grouped
    }

    /// Records a live log under its transaction, creating the pending entry
    /// on first sight.
    async fn accept(&self, pending: &mut PendingBuffer, client: &dyn LogClient, raw: RawLog) {
        if !pending.contains(&raw.tx_hash) {
            let block_timestamp = match self.block_timestamp(client, raw.block_number).await {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::warn!(chain = %self.ctx.chain, tx = %raw.tx_hash, "Dropping live log: {}", e);
                    return;
                }
            };
            pending.insert(
                raw.tx_hash.clone(),
                self.shell_receipt(&raw),
                block_timestamp,
                Instant::now(),
            );
        }
        pending.push_log(&raw.tx_hash, raw.to_log());
    }

    /// Distributes every pending transaction whose confirmation delay has passed.
    ///
    /// The receipt is fetched again from the chain so that only the canonical
    /// logs are dispatched. Running out of attempts is fatal.
    async fn push(&self, pending: &mut PendingBuffer, cursor: &mut CursorWriter) -> Result<(), ScanError> {
        let attempts = self.ctx.sync.attempts();
        let chain_io = self.ctx.chain_io.as_ref();

        for entry in pending.due(Instant::now()) {
            let tx = entry.tx.as_str();
            let receipt = try_return(
                || async move {
                    chain_io
                        .receipt_log(tx)
                        .await?
                        .ok_or_else(|| anyhow!("receipt of {} not found", tx))
                },
                attempts,
            )
            .await
            .map_err(|source| ScanError::ReceiptUnavailable {
                tx: entry.tx.clone(),
                attempts,
                source,
            })?;

            self.distribute(tx, entry.block_timestamp, receipt, cursor).await;
            pending.remove(tx);
        }
        Ok(())
    }

    async fn distribute(&self, tx: &str, block_timestamp: u64, receipt: Receipt, cursor: &mut CursorWriter) {
        self.ctx.metrics.scan_tx_total(&self.ctx.chain);
        if !self
            .distributor
            .run_before_push_middleware(tx, block_timestamp, &receipt)
        {
            return;
        }
        let block_number = receipt.block_number;
        self.distributor
            .receipt_distribution(tx, block_timestamp, receipt)
            .await;
        cursor.advance(block_number).await;
    }

    async fn block_timestamp(&self, client: &dyn LogClient, number: u64) -> anyhow::Result<u64> {
        let header = try_return(|| client.block_by_number(number), self.ctx.sync.attempts()).await?;
        Ok(header.timestamp)
    }

    fn shell_receipt(&self, raw: &RawLog) -> Receipt {
        Receipt {
            block_number: raw.block_number,
            status: "0x01".to_string(),
            chain_source: self.ctx.chain.clone(),
            solidity: true,
            block_hash: raw.block_hash.clone(),
            ..Default::default()
        }
    }
}
