//! # Distribution Stage
//!
//! Turns one receipt into zero or more dispatches. Shared by both engines.
//!
//! Deduplication happens twice. Identical logs (same address, data and topics)
//! inside a receipt collapse to their first occurrence, and each contract
//! address dispatches at most once per transaction, however many logs it emitted.
use crate::{
    config::ScanContext,
    dispatcher::FilterBlock,
    types::{ContractAddress, Log, Receipt},
};
use std::{collections::HashSet, sync::Arc};

/// Drops repeated logs, keeping the first occurrence of each in order.
pub fn dedup_logs(logs: &[Log]) -> Vec<Log> {
    let mut seen = HashSet::new();
    logs.iter()
        .filter(|log| seen.insert(log.dedup_key()))
        .cloned()
        .collect()
}

#[derive(Clone)]
pub struct Distributor {
    ctx: Arc<ScanContext>,
}

impl Distributor {
    pub fn new(ctx: Arc<ScanContext>) -> Self {
        Self { ctx }
    }

    /// Runs the pre-dispatch predicates in order. All must pass.
    pub fn run_before_push_middleware(&self, tx: &str, block_timestamp: u64, receipt: &Receipt) -> bool {
        self.ctx
            .middleware
            .iter()
            .all(|check| check(tx, block_timestamp, receipt))
    }

    /// Dispatches `receipt` once per tracked contract it touches and returns
    /// the number of dispatches issued.
    ///
    /// A failed dispatch is logged and counted; the remaining contracts are
    /// still dispatched.
    pub async fn receipt_distribution(&self, tx: &str, block_timestamp: u64, mut receipt: Receipt) -> usize {
        receipt.logs = dedup_logs(&receipt.logs);
        if receipt.logs.is_empty() {
            return 0;
        }

        let callbacks = (self.ctx.callback_factory)(tx, block_timestamp, &receipt);
        let mut fb = FilterBlock {
            contract_name: String::new(),
            txid: tx,
            receipt: &receipt,
            block_timestamp,
            callbacks,
        };

        let queue = self.ctx.job_queue.as_deref();
        let mut dispatched = HashSet::new();
        let mut issued = 0;
        for log in &receipt.logs {
            let address = ContractAddress::new(&log.address);
            if !dispatched.insert(address.clone()) {
                continue;
            }

            let Some(prefix) = self.match_prefix(&address) else {
                continue;
            };
            fb.contract_name = prefix.to_string();
            self.ctx.metrics.scan_callback_total(prefix);
            issued += 1;
            if let Err(e) = fb.dispatch(queue).await {
                self.ctx.metrics.scan_callback_error_total(prefix);
                tracing::error!(chain = %self.ctx.chain, tx, contract = %address, "Dispatch failed: {}", e);
            }
        }

        issued
    }

    /// The configured prefix whose name matches the contract at `address`.
    fn match_prefix(&self, address: &ContractAddress) -> Option<&str> {
        let name = self.ctx.contracts.get(address)?;
        if name.is_empty() {
            return None;
        }
        let name = name.to_lowercase();
        self.ctx
            .callback_prefixes
            .iter()
            .find(|prefix| prefix.to_lowercase() == name)
            .map(String::as_str)
    }
}
