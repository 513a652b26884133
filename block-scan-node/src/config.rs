use anyhow::{Context, Result};
use block_scan::{config::SyncConfig, ScanType};
use block_scan_logger::LogConfig;
use serde::Deserialize;
use std::collections::HashMap;

/// The top-level configuration of the scanner node.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSpecificConfig,
    /// Engine tunables shared by every chain. Without a `[sync]` section the
    /// `BLOCK_*` environment variables apply.
    #[serde(default = "sync_from_env")]
    pub sync: SyncConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

/// Contains settings that are unique to the node binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeSpecificConfig {
    /// Location of the sled database holding cursors and job queues.
    pub db_path: String,
    pub metrics: MetricsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Listen address, `:port` for every interface.
    pub port: String,
}

/// One chain to scan.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Chain name. Also the cursor key and the job queue prefix.
    pub name: String,
    pub rpc_url: String,
    /// Subscription mode only. Falls back to `<NAME>_WSS_RPC`.
    #[serde(default)]
    pub wss_url: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: ScanType,
    #[serde(default)]
    pub init_block: u64,
    /// Contract address to contract name.
    pub contracts: HashMap<String, String>,
    /// Contract names that are dispatched. Defaults to every configured name.
    #[serde(default)]
    pub callback_prefixes: Vec<String>,
    #[serde(default = "default_run_forever")]
    pub run_forever: bool,
    /// Seconds between polling ticks; 0 uses the library default.
    #[serde(default)]
    pub poll_interval_secs: u64,
}

fn sync_from_env() -> SyncConfig {
    SyncConfig::from_env().unwrap_or_default()
}

fn default_mode() -> ScanType {
    ScanType::Polling
}

fn default_run_forever() -> bool {
    true
}

impl ChainConfig {
    pub fn prefixes(&self) -> Vec<String> {
        if !self.callback_prefixes.is_empty() {
            return self.callback_prefixes.clone();
        }
        let mut names: Vec<String> = self.contracts.values().cloned().collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Default for NodeSpecificConfig {
    fn default() -> Self {
        Self {
            db_path: "./block_scan.db".to_string(),
            metrics: MetricsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: ":8085".to_string(),
        }
    }
}

/// Loads the node configuration.
///
/// Sources, lowest precedence first: the TOML file at `path` when given,
/// `BLOCK_SCAN__SECTION__KEY` environment variables, then `ENABLE_METRICS` and
/// `METRICS_PORT` for the metrics section.
pub fn load_config(path: Option<&str>) -> Result<NodeConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    }
    builder = builder
        .add_source(
            config::Environment::with_prefix("BLOCK_SCAN")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("node.metrics.enabled", std::env::var("ENABLE_METRICS").ok())?
        .set_override_option("node.metrics.port", std::env::var("METRICS_PORT").ok())?;

    let settings: NodeConfig = builder
        .build()
        .context(format!(
            "Failed to build configuration from '{}'",
            path.unwrap_or("<defaults>")
        ))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
