//! # Scan Coordinator & Engines
//!
//! This module defines [`start_scan_chain_events`], the entry point that runs one
//! chain's scan until it is cancelled.
//!
//! ## Engines
//! - [`Polling`]: walks blocks through [`ChainIo`](crate::chain::ChainIo) and drains
//!   the transactions it finds through a retrying consumer.
//! - [`Subscribe`]: replays historical logs in bounded windows, then follows a live
//!   log subscription behind a confirmation delay.
//!
//! ## Supervision
//! The selected engine runs in its own task. With `run_forever` set, a terminal
//! error or a panic restarts the whole scan after [`RESTART_BACKOFF`]; the restart
//! re-reads the persisted cursor, so committed progress survives while in-flight
//! work is dropped.

mod pending;
mod polling;
mod subscribe;

pub use pending::{PendingBuffer, PendingEntry};
pub use polling::Polling;
pub use subscribe::Subscribe;

use crate::{
    config::{ScanContext, ScanOptions},
    error::ScanError,
};
use serde::{Deserialize, Serialize};
use std::{any::Any, fmt, str::FromStr, sync::Arc};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// Delay before a supervised scan is restarted.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Selects the scan engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Subscribe,
    Polling,
}

impl FromStr for ScanType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "subscribe" => Ok(Self::Subscribe),
            "polling" => Ok(Self::Polling),
            other => Err(anyhow::anyhow!("not implement '{}' type", other)),
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe => f.write_str("subscribe"),
            Self::Polling => f.write_str("polling"),
        }
    }
}

enum Engine {
    Polling(Polling),
    Subscribe(Subscribe),
}

impl Engine {
    fn init(scan_type: ScanType, ctx: ScanContext) -> Result<Self, ScanError> {
        let ctx = Arc::new(ctx);
        match scan_type {
            ScanType::Polling => Ok(Self::Polling(Polling::new(ctx))),
            ScanType::Subscribe => Ok(Self::Subscribe(Subscribe::new(ctx)?)),
        }
    }

    async fn wipe_block(self, cancel: CancellationToken) -> Result<(), ScanError> {
        match self {
            Self::Polling(engine) => engine.wipe_block(cancel).await,
            Self::Subscribe(engine) => engine.wipe_block(cancel).await,
        }
    }
}

/// Scans one chain with the engine selected by `scan_type` until `cancel` fires.
///
/// Configuration problems are reported before any loop starts. Once running,
/// a clean stop returns `Ok(())`; a terminal error or panic is returned unless
/// `opt.run_forever` is set, in which case the scan is restarted.
pub async fn start_scan_chain_events(
    cancel: CancellationToken,
    scan_type: ScanType,
    opt: &ScanOptions,
) -> Result<(), ScanError> {
    loop {
        let ctx = opt.validate()?;
        let chain = ctx.chain.clone();
        let engine = Engine::init(scan_type, ctx)?;

        tracing::info!(chain = %chain, mode = %scan_type, "Starting scan");
        let outcome = tokio::spawn(engine.wipe_block(cancel.clone())).await;

        let err = match outcome {
            Ok(Ok(())) => {
                tracing::info!(chain = %chain, "Scan stopped");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(join_err) if join_err.is_panic() => {
                ScanError::Panicked(panic_message(join_err.into_panic()))
            }
            Err(join_err) => ScanError::Panicked(join_err.to_string()),
        };

        if !opt.run_forever || cancel.is_cancelled() {
            return Err(err);
        }

        tracing::error!(chain = %chain, "run {} WipeBlock error: {}. restarting...", chain, err);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = sleep(RESTART_BACKOFF) => {}
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
