pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod rpc;
pub mod storage;
pub mod ws;

use anyhow::{bail, Context, Result};
use block_scan::{
    config::{ScanOptions, SyncConfig},
    dispatcher::{Callbacks, JobQueue},
    metrics::Metrics,
    start_scan_chain_events,
    storage::CursorStore,
    types::{ContractAddress, Receipt},
};
use crate::{
    cli::{Cli, Commands},
    config::{load_config, ChainConfig},
    metrics::PrometheusMetrics,
    queue::SledJobQueue,
    rpc::EvmRpc,
    storage::SledCursorStore,
    ws::EvmDialer,
};
use clap::Parser;
use std::{sync::Arc, time::Duration};
use tokio::{signal, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// Builds the scan options of one configured chain.
///
/// Chain receipts are dispatched through `queue`, so the callback factory
/// hands out no in-process handlers.
pub fn chain_options(
    chain: &ChainConfig,
    sync: &SyncConfig,
    cursor: Arc<dyn CursorStore>,
    queue: Arc<dyn JobQueue>,
    metrics: Option<Arc<dyn Metrics>>,
) -> ScanOptions {
    let rpc = Arc::new(EvmRpc::new(&chain.rpc_url, &chain.name));
    ScanOptions {
        chain_io: Some(rpc.clone()),
        cursor: Some(cursor),
        chain: chain.name.clone(),
        contracts_name: chain
            .contracts
            .iter()
            .map(|(address, name)| (ContractAddress::new(address), name.clone()))
            .collect(),
        sleep_time: Duration::from_secs(chain.poll_interval_secs),
        callback_factory: Some(Arc::new(|_: &str, _: u64, _: &Receipt| Callbacks::new())),
        callback_method_prefix: chain.prefixes(),
        init_block: chain.init_block,
        run_forever: chain.run_forever,
        before_push_middleware: Vec::new(),
        job_queue: Some(queue),
        log_dialer: Some(Arc::new(EvmDialer::new(rpc))),
        wss_endpoint: chain.wss_url.clone(),
        metrics,
        sync: sync.clone(),
    }
}

/// The main entry point of the node: parses the CLI, loads configuration,
/// initializes logging and scans every configured chain until Ctrl+C.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_cmd) => {
            // We can't log yet, so we print directly.
            match &run_cmd.config {
                Some(path) => println!("Loading configuration from '{}'", path),
                None => println!("No config file provided, using default settings."),
            }
            let config = load_config(run_cmd.config.as_deref())?;
            block_scan_logger::init(&config.node.log)?;

            if config.chains.is_empty() {
                bail!("no chains configured");
            }

            let cancel = CancellationToken::new();
            let mut tasks = JoinSet::new();

            let metrics: Option<Arc<dyn Metrics>> = if config.node.metrics.enabled {
                let prometheus = Arc::new(PrometheusMetrics::new()?);
                let addr = crate::metrics::listen_addr(&config.node.metrics.port)?;
                let server = crate::metrics::serve(prometheus.clone(), addr, cancel.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.await {
                        tracing::error!("Metrics server stopped: {:#}", e);
                    }
                });
                Some(prometheus as Arc<dyn Metrics>)
            } else {
                None
            };

            let db = sled::open(&config.node.db_path)
                .with_context(|| format!("Failed to open database at '{}'", config.node.db_path))?;
            let cursor: Arc<dyn CursorStore> = Arc::new(SledCursorStore::open(&db)?);
            let queue: Arc<dyn JobQueue> = Arc::new(SledJobQueue::new(db.clone()));

            for chain in &config.chains {
                let opts = chain_options(chain, &config.sync, cursor.clone(), queue.clone(), metrics.clone());
                let mode = chain.mode;
                let name = chain.name.clone();
                let token = cancel.clone();
                tasks.spawn(async move {
                    let result = start_scan_chain_events(token, mode, &opts).await;
                    (name, result)
                });
            }

            tokio::select! {
                res = signal::ctrl_c() => match res {
                    Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown..."),
                    Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal."),
                },
                _ = wait_all(&mut tasks) => tracing::warn!("Every chain scan has stopped."),
            }

            cancel.cancel();
            wait_all(&mut tasks).await;
            db.flush_async().await?;
            tracing::info!("Shutdown complete.");
        }
    }

    Ok(())
}

async fn wait_all(tasks: &mut JoinSet<(String, Result<(), block_scan::ScanError>)>) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((chain, Ok(()))) => tracing::info!(chain = %chain, "Scan finished"),
            Ok((chain, Err(e))) => tracing::error!(chain = %chain, "Scan failed: {}", e),
            Err(e) => tracing::error!("Scan task aborted: {}", e),
        }
    }
}
