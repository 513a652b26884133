mod common;

use block_scan::{
    dispatcher::{CallbackFactory, Callbacks},
    start_scan_chain_events,
    storage::{CursorStore, MemoryCursorStore},
    types::Receipt,
    ScanError, ScanType,
};
use common::*;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

fn panicking_chain() -> Arc<MockChainIo> {
    Arc::new(MockChainIo {
        panic_on_head: true,
        ..MockChainIo::with_head(10)
    })
}

/// Block 5 carries one transaction to the tracked contract `222`.
fn chain_with_tracked_tx() -> Arc<MockChainIo> {
    Arc::new(
        MockChainIo::with_head(5)
            .block(5, &["0xtx"], "222", 1000)
            .receipt("0xtx", receipt(5, vec![log("222", "0x01", &["0xddf2"])])),
    )
}

/// A callback factory that counts its calls and then panics.
fn exploding_factory(calls: Arc<AtomicUsize>) -> CallbackFactory {
    Arc::new(move |_: &str, _: u64, _: &Receipt| -> Callbacks {
        calls.fetch_add(1, Ordering::SeqCst);
        panic!("factory exploded")
    })
}

#[tokio::test]
async fn test_invalid_options_fail_fast_even_when_running_forever() {
    let probe = Arc::new(FactoryProbe::default());
    let mut opts = options(
        Arc::new(MockChainIo::with_head(10)),
        Arc::new(MemoryCursorStore::new()),
        probe.factory(Callbacks::new()),
    );
    opts.run_forever = true;
    opts.contracts_name.clear();

    let result = start_scan_chain_events(CancellationToken::new(), ScanType::Polling, &opts).await;

    assert!(matches!(result, Err(ScanError::NoContracts)));
}

#[tokio::test]
async fn test_panic_is_reported_without_run_forever() {
    let probe = Arc::new(FactoryProbe::default());
    let opts = options(
        panicking_chain(),
        Arc::new(MemoryCursorStore::new()),
        probe.factory(Callbacks::new()),
    );

    let result = start_scan_chain_events(CancellationToken::new(), ScanType::Polling, &opts).await;

    match result {
        Err(ScanError::Panicked(msg)) => assert_eq!(msg, "node exploded"),
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_engine_is_restarted() {
    let chain = panicking_chain();
    let probe = Arc::new(FactoryProbe::default());
    let mut opts = options(
        chain.clone(),
        Arc::new(MemoryCursorStore::new()),
        probe.factory(Callbacks::new()),
    );
    opts.run_forever = true;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle =
        tokio::spawn(async move { start_scan_chain_events(token, ScanType::Polling, &opts).await });

    assert!(wait_until(|| chain.head_calls.load(Ordering::SeqCst) >= 2).await);
    cancel.cancel();

    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_cancelled_scan_returns_ok() {
    let chain = Arc::new(MockChainIo::with_head(10));
    let probe = Arc::new(FactoryProbe::default());
    let opts = options(
        chain.clone(),
        Arc::new(MemoryCursorStore::new()),
        probe.factory(Callbacks::new()),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = start_scan_chain_events(cancel, ScanType::Polling, &opts).await;

    assert!(result.is_ok());
    assert!(chain.filter_calls().is_empty());
}

#[tokio::test]
async fn test_consumer_panic_is_reported_without_run_forever() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut opts = options(
        chain_with_tracked_tx(),
        Arc::new(MemoryCursorStore::new()),
        exploding_factory(calls.clone()),
    );
    opts.init_block = 4;

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        start_scan_chain_events(CancellationToken::new(), ScanType::Polling, &opts),
    )
    .await
    .expect("scan did not return after the consumer panicked");

    match result {
        Err(ScanError::Panicked(msg)) => assert_eq!(msg, "factory exploded"),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_consumer_panic_restarts_the_scan() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cursor = Arc::new(MemoryCursorStore::new());
    let mut opts = options(chain_with_tracked_tx(), cursor.clone(), exploding_factory(calls.clone()));
    opts.init_block = 4;
    opts.run_forever = true;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle =
        tokio::spawn(async move { start_scan_chain_events(token, ScanType::Polling, &opts).await });

    assert!(wait_until(|| calls.load(Ordering::SeqCst) >= 2).await);
    cancel.cancel();

    assert!(handle.await.unwrap().is_ok());
    // The panicking transaction never committed its block.
    assert_eq!(cursor.get_start_block(CHAIN).await.unwrap(), 0);
}
