//! A chain event scanner.
//!
//! This crate watches tracked contracts on a blockchain, deduplicates the
//! events their transactions emit, and hands each (transaction, contract) pair
//! to a downstream job queue or in-process callback, while persisting a
//! resumable cursor per chain.
//!
//! # Key Components
//!
//! *   [`workers::start_scan_chain_events`]: The main entry point. It validates a
//!     [`config::ScanOptions`], runs the selected engine and supervises restarts.
//! *   [`workers::Polling`] and [`workers::Subscribe`]: the block-walking and the
//!     log-subscription engines.
//! *   [`distribution::Distributor`]: the shared dedup/filter/dispatch stage.
//! *   [`chain`], [`storage`], [`dispatcher`], [`metrics`]: the traits through
//!     which the scanner reaches the chain, the cursor backend, the job queue
//!     and a metrics sink.

/// Traits for chain access: block queries, log filters and log subscriptions.
pub mod chain;
/// Scan options and environment-driven tunables.
pub mod config;
/// Job queue and callback dispatch of a single (transaction, contract) pair.
pub mod dispatcher;
/// Receipt deduplication and per-contract dispatch.
pub mod distribution;
pub mod error;
pub mod metrics;
/// Bounded retry of flaky calls.
pub mod retry;
/// A trait and an in-memory implementation for persistent cursors.
pub mod storage;
/// Chain-agnostic receipts, logs and queries.
pub mod types;
/// The scan engines and their supervising coordinator.
pub mod workers;

pub use error::ScanError;
pub use workers::{start_scan_chain_events, ScanType};
