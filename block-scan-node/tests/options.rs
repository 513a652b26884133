use block_scan::{
    config::SyncConfig,
    dispatcher::JobQueue,
    storage::{CursorStore, MemoryCursorStore},
    types::ContractAddress,
    ScanType,
};
use block_scan_node::{chain_options, config::ChainConfig, queue::SledJobQueue};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tempfile::tempdir;

#[test]
fn test_chain_options_from_chain_config() {
    let dir = tempdir().unwrap();
    let queue: Arc<dyn JobQueue> = Arc::new(SledJobQueue::new(sled::open(dir.path()).unwrap()));
    let cursor: Arc<dyn CursorStore> = Arc::new(MemoryCursorStore::default());
    let chain = ChainConfig {
        name: "Crab".to_string(),
        rpc_url: "http://127.0.0.1:9933".to_string(),
        wss_url: Some("wss://crab.example/ws".to_string()),
        mode: ScanType::Subscribe,
        init_block: 77,
        contracts: HashMap::from([("0xAAAA".to_string(), "Bridge".to_string())]),
        callback_prefixes: Vec::new(),
        run_forever: false,
        poll_interval_secs: 4,
    };

    let opts = chain_options(&chain, &SyncConfig::default(), cursor, queue, None);

    assert!(opts.validate().is_ok());
    assert_eq!(opts.chain, "Crab");
    assert_eq!(opts.init_block, 77);
    assert!(!opts.run_forever);
    assert_eq!(opts.sleep_time, Duration::from_secs(4));
    assert_eq!(opts.callback_method_prefix, vec!["Bridge".to_string()]);
    assert_eq!(opts.contracts_name.get(&ContractAddress::new("0xaaaa")).map(String::as_str), Some("Bridge"));
    assert_eq!(opts.wss_endpoint.as_deref(), Some("wss://crab.example/ws"));
    assert!(opts.log_dialer.is_some());
    assert!(opts.metrics.is_none());
}
