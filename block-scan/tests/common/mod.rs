#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use block_scan::{
    chain::{ChainIo, LogClient, LogDialer, LogStream},
    config::{ScanOptions, SyncConfig},
    dispatcher::{CallbackFactory, Callbacks, Job, JobQueue},
    metrics::Metrics,
    storage::{CursorStore, MemoryCursorStore},
    types::{BlockHeader, ContractAddress, FilteredBlock, Log, LogFilter, RawLog, Receipt, TxStatus},
};
use futures::StreamExt;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const CHAIN: &str = "Crab";

pub fn log(address: &str, data: &str, topics: &[&str]) -> Log {
    Log {
        topics: topics.iter().map(|t| t.to_string()).collect(),
        data: data.to_string(),
        address: address.to_string(),
    }
}

pub fn receipt(block_number: u64, logs: Vec<Log>) -> Receipt {
    Receipt {
        block_number,
        logs,
        status: "0x01".to_string(),
        chain_source: CHAIN.to_string(),
        block_hash: block_number.to_string(),
        ..Default::default()
    }
}

pub fn raw_log(address: &str, tx: &str, block_number: u64, data: &str) -> RawLog {
    RawLog {
        address: address.to_string(),
        topics: vec!["0xddf2".to_string()],
        data: data.to_string(),
        tx_hash: tx.to_string(),
        block_number,
        block_hash: format!("0xhash{block_number}"),
    }
}

/// Polls `check` every 10ms for up to two seconds of (possibly paused) time.
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// An in-memory chain for the polling engine and for receipt fetches.
#[derive(Default)]
pub struct MockChainIo {
    pub head: AtomicU64,
    /// Returned for every block without an explicit entry in `blocks`.
    pub every_block: Mutex<Option<FilteredBlock>>,
    pub blocks: Mutex<HashMap<u64, FilteredBlock>>,
    pub receipts: Mutex<HashMap<String, Receipt>>,
    /// Number of leading `receipt_log` calls that answer `None`, per tx.
    pub missing: Mutex<HashMap<String, u32>>,
    pub failed: Mutex<HashSet<String>>,
    /// Blocks whose next `filter_trans` call errors.
    pub filter_errors: Mutex<HashSet<u64>>,
    pub filter_calls: Mutex<Vec<u64>>,
    pub receipt_calls: Mutex<HashMap<String, u32>>,
    pub panic_on_head: bool,
    pub head_calls: AtomicUsize,
}

impl MockChainIo {
    pub fn with_head(head: u64) -> Self {
        let mock = Self::default();
        mock.head.store(head, Ordering::SeqCst);
        mock
    }

    pub fn block(self, number: u64, txs: &[&str], contract: &str, timestamp: u64) -> Self {
        self.blocks.lock().unwrap().insert(
            number,
            FilteredBlock {
                txs: txs.iter().map(|t| t.to_string()).collect(),
                contracts: txs.iter().map(|_| contract.to_string()).collect(),
                timestamp,
                targets: txs.iter().map(|_| contract.to_string()).collect(),
            },
        );
        self
    }

    pub fn receipt(self, tx: &str, receipt: Receipt) -> Self {
        self.receipts.lock().unwrap().insert(tx.to_string(), receipt);
        self
    }

    pub fn missing_first(self, tx: &str, times: u32) -> Self {
        self.missing.lock().unwrap().insert(tx.to_string(), times);
        self
    }

    pub fn failed_tx(self, tx: &str) -> Self {
        self.failed.lock().unwrap().insert(tx.to_string());
        self
    }

    pub fn fail_filter_once(self, block: u64) -> Self {
        self.filter_errors.lock().unwrap().insert(block);
        self
    }

    pub fn receipt_calls(&self, tx: &str) -> u32 {
        self.receipt_calls.lock().unwrap().get(tx).copied().unwrap_or(0)
    }

    pub fn filter_calls(&self) -> Vec<u64> {
        self.filter_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainIo for MockChainIo {
    async fn receipt_log(&self, tx: &str) -> Result<Option<Receipt>> {
        *self
            .receipt_calls
            .lock()
            .unwrap()
            .entry(tx.to_string())
            .or_default() += 1;

        if let Some(left) = self.missing.lock().unwrap().get_mut(tx) {
            if *left > 0 {
                *left -= 1;
                return Ok(None);
            }
        }
        Ok(self.receipts.lock().unwrap().get(tx).cloned())
    }

    async fn block_number(&self) -> u64 {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_head {
            panic!("node exploded");
        }
        self.head.load(Ordering::SeqCst)
    }

    async fn filter_trans(&self, block_num: u64, _filter: &[String]) -> Result<FilteredBlock> {
        self.filter_calls.lock().unwrap().push(block_num);
        if self.filter_errors.lock().unwrap().remove(&block_num) {
            return Err(anyhow!("filter of block {} failed", block_num));
        }
        if let Some(found) = self.blocks.lock().unwrap().get(&block_num) {
            return Ok(found.clone());
        }
        Ok(self.every_block.lock().unwrap().clone().unwrap_or_default())
    }

    async fn block_header(&self, _block_num: u64) -> Option<BlockHeader> {
        Some(BlockHeader {
            timestamp: 123456789,
            hash: "1".to_string(),
        })
    }

    async fn transaction_status(&self, tx: &str) -> TxStatus {
        if self.failed.lock().unwrap().contains(tx) {
            TxStatus::Fail
        } else {
            TxStatus::Success
        }
    }
}

/// A cursor store that remembers every write.
#[derive(Default)]
pub struct RecordingCursor {
    inner: MemoryCursorStore,
    pub writes: Mutex<Vec<u64>>,
}

impl RecordingCursor {
    pub async fn starting_at(height: u64) -> Self {
        let cursor = Self::default();
        cursor
            .inner
            .set_start_block(CHAIN, height)
            .await
            .expect("memory store never fails");
        cursor
    }

    pub fn writes(&self) -> Vec<u64> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<u64> {
        self.writes.lock().unwrap().last().copied()
    }
}

#[async_trait]
impl CursorStore for RecordingCursor {
    async fn get_start_block(&self, chain: &str) -> Result<u64> {
        self.inner.get_start_block(chain).await
    }

    async fn set_start_block(&self, chain: &str, height: u64) -> Result<()> {
        self.writes.lock().unwrap().push(height);
        self.inner.set_start_block(chain, height).await
    }
}

/// A job queue that keeps what it is given.
#[derive(Default)]
pub struct RecordingQueue {
    pub jobs: Mutex<Vec<(String, String, Job)>>,
    /// Contract names whose enqueue fails.
    pub reject: Mutex<HashSet<String>>,
}

impl RecordingQueue {
    pub fn jobs(&self) -> Vec<(String, String, Job)> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, queue: &str, class: &str, job: &Job) -> Result<String> {
        if self.reject.lock().unwrap().contains(&job.contract_name) {
            return Err(anyhow!("queue refused {}", job.contract_name));
        }
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push((queue.to_string(), class.to_string(), job.clone()));
        Ok(format!("jid-{}", jobs.len()))
    }
}

#[derive(Default)]
pub struct CountingMetrics {
    pub counts: Mutex<HashMap<String, u64>>,
}

impl CountingMetrics {
    pub fn get(&self, key: &str) -> u64 {
        self.counts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn bump(&self, key: String) {
        *self.counts.lock().unwrap().entry(key).or_default() += 1;
    }
}

impl Metrics for CountingMetrics {
    fn scan_tx_total(&self, network: &str) {
        self.bump(format!("tx:{network}"));
    }

    fn scan_callback_total(&self, name: &str) {
        self.bump(format!("callback:{name}"));
    }

    fn scan_callback_error_total(&self, name: &str) {
        self.bump(format!("error:{name}"));
    }
}

/// Records every invocation of the callback factory.
#[derive(Default)]
pub struct FactoryProbe {
    pub calls: Mutex<Vec<(String, u64, Receipt)>>,
}

impl FactoryProbe {
    pub fn calls(&self) -> Vec<(String, u64, Receipt)> {
        self.calls.lock().unwrap().clone()
    }

    /// A factory that records its arguments and hands out `callbacks`.
    pub fn factory(self: &Arc<Self>, callbacks: Callbacks) -> CallbackFactory {
        let probe = self.clone();
        Arc::new(move |tx: &str, ts: u64, receipt: &Receipt| {
            probe
                .calls
                .lock()
                .unwrap()
                .push((tx.to_string(), ts, receipt.clone()));
            callbacks.clone()
        })
    }
}

/// Baseline options for the `Crab` chain tracking contract `222` as `fake`.
pub fn options(chain_io: Arc<dyn ChainIo>, cursor: Arc<dyn CursorStore>, factory: CallbackFactory) -> ScanOptions {
    ScanOptions {
        chain_io: Some(chain_io),
        cursor: Some(cursor),
        chain: CHAIN.to_string(),
        contracts_name: HashMap::from([(ContractAddress::new("222"), "fake".to_string())]),
        sleep_time: Duration::from_millis(20),
        callback_factory: Some(factory),
        callback_method_prefix: vec!["Fake".to_string()],
        sync: SyncConfig::default(),
        ..Default::default()
    }
}

/// An in-memory log source for the subscription engine.
#[derive(Default)]
pub struct MockLogClient {
    pub head: AtomicU64,
    pub logs: Mutex<Vec<RawLog>>,
    /// Number of leading `filter_logs` calls that error.
    pub filter_failures: AtomicUsize,
    pub filter_calls: Mutex<Vec<(u64, Option<u64>)>>,
    pub subscriptions: Mutex<Vec<mpsc::Sender<Result<RawLog>>>>,
    pub subscribe_from: Mutex<Vec<u64>>,
}

impl MockLogClient {
    pub fn with_head(head: u64) -> Self {
        let client = Self::default();
        client.head.store(head, Ordering::SeqCst);
        client
    }

    pub fn filter_calls(&self) -> Vec<(u64, Option<u64>)> {
        self.filter_calls.lock().unwrap().clone()
    }

    pub fn subscribed(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// The sender feeding the most recent subscription.
    pub fn live(&self) -> mpsc::Sender<Result<RawLog>> {
        self.subscriptions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no subscription opened yet")
    }

    /// Ends every open subscription stream.
    pub fn close_subscriptions(&self) {
        self.subscriptions.lock().unwrap().clear();
    }
}

#[async_trait]
impl LogClient for MockLogClient {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        self.filter_calls
            .lock()
            .unwrap()
            .push((filter.from_block, filter.to_block));
        if self
            .filter_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("eth_getLogs timed out"));
        }
        let to = filter.to_block.unwrap_or(u64::MAX);
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.block_number >= filter.from_block && l.block_number <= to)
            .cloned()
            .collect())
    }

    async fn block_by_number(&self, number: u64) -> Result<BlockHeader> {
        Ok(BlockHeader {
            timestamp: 1_000 + number,
            hash: format!("0xhash{number}"),
        })
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream> {
        let (tx, rx) = mpsc::channel(64);
        self.subscriptions.lock().unwrap().push(tx);
        self.subscribe_from.lock().unwrap().push(filter.from_block);
        Ok(ReceiverStream::new(rx).boxed())
    }
}

pub struct MockDialer {
    pub client: Arc<MockLogClient>,
    pub dials: AtomicUsize,
    pub endpoints: Mutex<Vec<String>>,
}

impl MockDialer {
    pub fn new(client: Arc<MockLogClient>) -> Self {
        Self {
            client,
            dials: AtomicUsize::new(0),
            endpoints: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LogDialer for MockDialer {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn LogClient>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        Ok(self.client.clone())
    }
}
