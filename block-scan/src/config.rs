use crate::{
    chain::{ChainIo, LogDialer},
    dispatcher::{CallbackFactory, JobQueue},
    error::ScanError,
    metrics::{Metrics, NoopMetrics},
    storage::CursorStore,
    types::{ContractAddress, Receipt},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Poll interval used when [`ScanOptions::sleep_time`] is zero.
pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_secs(5);

/// A pre-dispatch predicate over `(tx, block_timestamp, receipt)`.
/// Returning `false` vetoes distribution of the transaction.
pub type BeforePushFn = Arc<dyn Fn(&str, u64, &Receipt) -> bool + Send + Sync>;

/// Tunables shared by both engines.
///
/// Loaded from `BLOCK_*` environment variables by [`SyncConfig::from_env`] or
/// embedded in a larger configuration file. Zero values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Poll interval in seconds. Overrides [`ScanOptions::sleep_time`] when set and non-zero.
    pub polling_sleep_time: Option<u64>,
    /// Confirmation delay in seconds before a live transaction is flushed.
    pub delay_send_time: u64,
    /// Seconds between flush ticks of the subscription engine.
    pub flush_interval: u64,
    /// The maximum number of blocks per catch-up log query.
    pub catchup_window: u64,
    /// Attempts for block and receipt fetches on the subscription path.
    pub fetch_attempts: usize,
    /// Capacity of the polling engine's transaction channel.
    pub channel_capacity: usize,
    /// Drop a polled transaction after this many missing receipts. `None` retries forever.
    pub max_receipt_retries: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            polling_sleep_time: None,
            delay_send_time: 5,
            flush_interval: 2,
            catchup_window: 500,
            fetch_attempts: 10,
            channel_capacity: 1000,
            max_receipt_retries: None,
        }
    }
}

impl SyncConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ScanError> {
        Self::from_source(None)
    }

    /// Reads the configuration from `vars` instead of the process environment
    /// when given. Keys use the same `BLOCK_*` names.
    ///
    /// # Arguments
    ///
    /// * `vars` - Variables such as `BLOCK_DELAY_SEND_TIME`. `None` reads the
    ///   process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Config`] when a value does not parse.
    pub fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self, ScanError> {
        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("BLOCK")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_secs(non_zero(self.delay_send_time, Self::default().delay_send_time))
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(non_zero(self.flush_interval, Self::default().flush_interval))
    }

    pub fn window(&self) -> u64 {
        non_zero(self.catchup_window, Self::default().catchup_window)
    }

    pub fn attempts(&self) -> usize {
        non_zero(self.fetch_attempts, Self::default().fetch_attempts)
    }

    pub fn capacity(&self) -> usize {
        non_zero(self.channel_capacity, Self::default().channel_capacity)
    }
}

fn non_zero<T: PartialEq + Default>(value: T, fallback: T) -> T {
    if value == T::default() {
        fallback
    } else {
        value
    }
}

/// Everything needed to scan one chain.
///
/// Options are checked by [`ScanOptions::validate`] before an engine starts and
/// can be reused across restarts.
#[derive(Clone, Default)]
pub struct ScanOptions {
    pub chain_io: Option<Arc<dyn ChainIo>>,
    pub cursor: Option<Arc<dyn CursorStore>>,
    pub chain: String,
    pub contracts_name: HashMap<ContractAddress, String>,
    pub sleep_time: Duration,
    pub callback_factory: Option<CallbackFactory>,
    /// Contract names, matched case-insensitively, that are dispatched.
    pub callback_method_prefix: Vec<String>,
    pub init_block: u64,
    pub run_forever: bool,
    pub before_push_middleware: Vec<BeforePushFn>,
    pub job_queue: Option<Arc<dyn JobQueue>>,
    /// Subscription mode only.
    pub log_dialer: Option<Arc<dyn LogDialer>>,
    /// Subscription mode only. Falls back to `<CHAIN>_WSS_RPC`.
    pub wss_endpoint: Option<String>,
    pub metrics: Option<Arc<dyn Metrics>>,
    pub sync: SyncConfig,
}

/// Validated, immutable scan settings shared by an engine and its tasks.
#[derive(Clone)]
pub struct ScanContext {
    pub chain: String,
    pub chain_io: Arc<dyn ChainIo>,
    pub cursor: Arc<dyn CursorStore>,
    pub contracts: HashMap<ContractAddress, String>,
    pub callback_factory: CallbackFactory,
    pub callback_prefixes: Vec<String>,
    pub init_block: u64,
    pub sleep_time: Duration,
    pub middleware: Vec<BeforePushFn>,
    pub job_queue: Option<Arc<dyn JobQueue>>,
    pub log_dialer: Option<Arc<dyn LogDialer>>,
    pub wss_endpoint: Option<String>,
    pub metrics: Arc<dyn Metrics>,
    pub sync: SyncConfig,
}

impl ScanOptions {
    /// Checks the options and builds the context an engine runs with.
    ///
    /// Checked in order: `chain_io`, `cursor`, a non-empty `chain`, a non-empty
    /// `contracts_name` and `callback_factory`. A zero `sleep_time` becomes
    /// [`DEFAULT_SLEEP_TIME`] and a missing metrics sink a no-op one.
    ///
    /// Engine-specific requirements (websocket endpoint, dialer, job queue) are
    /// checked when the engine is built.
    pub fn validate(&self) -> Result<ScanContext, ScanError> {
        let chain_io = self.chain_io.clone().ok_or(ScanError::MissingOption("chain_io"))?;
        let cursor = self.cursor.clone().ok_or(ScanError::MissingOption("cursor"))?;
        if self.chain.is_empty() {
            return Err(ScanError::EmptyChain);
        }
        if self.contracts_name.is_empty() {
            return Err(ScanError::NoContracts);
        }
        let callback_factory = self
            .callback_factory
            .clone()
            .ok_or(ScanError::MissingOption("callback_factory"))?;

        let sleep_time = if self.sleep_time.is_zero() {
            DEFAULT_SLEEP_TIME
        } else {
            self.sleep_time
        };

        Ok(ScanContext {
            chain: self.chain.clone(),
            chain_io,
            cursor,
            contracts: self.contracts_name.clone(),
            callback_factory,
            callback_prefixes: self.callback_method_prefix.clone(),
            init_block: self.init_block,
            sleep_time,
            middleware: self.before_push_middleware.clone(),
            job_queue: self.job_queue.clone(),
            log_dialer: self.log_dialer.clone(),
            wss_endpoint: self.wss_endpoint.clone(),
            metrics: self
                .metrics
                .clone()
                .unwrap_or_else(|| Arc::new(NoopMetrics)),
            sync: self.sync.clone(),
        })
    }
}

impl ScanContext {
    /// The interval between polling ticks. A positive
    /// [`SyncConfig::polling_sleep_time`] overrides the configured sleep time.
    pub fn poll_interval(&self) -> Duration {
        match self.sync.polling_sleep_time {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => self.sleep_time,
        }
    }

    /// Tracked contract addresses, sorted for stable queries.
    pub fn contract_filter(&self) -> Vec<String> {
        let mut filter: Vec<String> = self.contracts.keys().map(|k| k.to_string()).collect();
        filter.sort();
        filter
    }

    /// Resolves the websocket endpoint of the subscription engine.
    ///
    /// An explicit endpoint wins over the `<CHAIN>_WSS_RPC` environment variable.
    /// Either way it must be a `ws://` or `wss://` URL.
    pub fn resolve_wss_endpoint(&self) -> Result<String, ScanError> {
        let var = format!("{}_WSS_RPC", self.chain.to_uppercase());
        let endpoint = match &self.wss_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => std::env::var(&var).unwrap_or_default(),
        };
        if endpoint.is_empty() || !endpoint.starts_with("ws") {
            return Err(ScanError::InvalidEndpoint(var));
        }
        Ok(endpoint)
    }
}
