use block_scan::metrics::Metrics;
use block_scan_node::metrics::{listen_addr, PrometheusMetrics};

#[test]
fn test_counters_are_rendered_per_network() {
    let metrics = PrometheusMetrics::new().unwrap();

    metrics.scan_tx_total("Crab");
    metrics.scan_tx_total("Crab");
    metrics.scan_callback_total("Bridge");
    metrics.scan_callback_error_total("Bridge");

    let text = metrics.render().unwrap();
    assert!(text.contains(r#"scan_tx_total{network="Crab"} 2"#));
    assert!(text.contains(r#"scan_callback_total{network="Bridge"} 1"#));
    assert!(text.contains(r#"scan_callback_error_total{network="Bridge"} 1"#));
}

#[test]
fn test_instances_do_not_share_counters() {
    let first = PrometheusMetrics::new().unwrap();
    let second = PrometheusMetrics::new().unwrap();

    first.scan_tx_total("Crab");

    assert!(!second.render().unwrap().contains(r#"network="Crab""#));
}

#[test]
fn test_listen_addr() {
    assert_eq!(listen_addr(":8085").unwrap().to_string(), "0.0.0.0:8085");
    assert_eq!(listen_addr("127.0.0.1:9000").unwrap().to_string(), "127.0.0.1:9000");
    assert!(listen_addr("nonsense").is_err());
}
