/// A sink for the scanner's counters.
///
/// The library only counts; exporting is left to the embedding process.
pub trait Metrics: Send + Sync {
    /// A transaction with a usable receipt was picked up on `network`.
    fn scan_tx_total(&self, network: &str);

    /// A dispatch was issued for the contract handler `name`.
    fn scan_callback_total(&self, name: &str);

    /// A dispatch for the contract handler `name` failed.
    fn scan_callback_error_total(&self, name: &str);
}

/// Discards every sample. Used when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn scan_tx_total(&self, _network: &str) {}

    fn scan_callback_total(&self, _name: &str) {}

    fn scan_callback_error_total(&self, _name: &str) {}
}
