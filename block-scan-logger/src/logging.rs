use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::{fs::OpenOptions, str::FromStr, sync::Mutex};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    prelude::*,
    EnvFilter, Registry,
};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Plain,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Base level for every target, e.g. `info`.
    pub level: String,
    /// Extra `EnvFilter` directives appended to the base level, e.g. `hyper=warn`.
    pub filter: Option<String>,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file_path: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filter: None,
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
        }
    }
}

/// Builds the event filter. `RUST_LOG`, when set, replaces the configured one.
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter> {
    if let Ok(directives) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !directives.trim().is_empty() {
            return Ok(EnvFilter::try_new(directives)?);
        }
    }

    let level = Level::from_str(&config.level).unwrap_or(Level::INFO);
    let mut directives = level.as_str().to_lowercase();
    if let Some(extra) = config.filter.as_deref().filter(|f| !f.is_empty()) {
        directives.push(',');
        directives.push_str(extra);
    }
    Ok(EnvFilter::try_new(directives)?)
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = env_filter(config)?;

    let writer = match config.output {
        LogOutput::File => {
            let file_path = config
                .file_path
                .as_deref()
                .ok_or_else(|| anyhow!("Log output is 'file' but 'file_path' is not specified"))?;
            let log_file = OpenOptions::new().create(true).append(true).open(file_path)?;
            BoxMakeWriter::new(Mutex::new(log_file))
        }
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
    };

    let subscriber = Registry::default().with(filter);
    match config.format {
        LogFormat::Json => subscriber
            .with(fmt::layer().with_writer(writer).json())
            .try_init()?,
        LogFormat::Plain => subscriber
            .with(fmt::layer().with_writer(writer).pretty())
            .try_init()?,
    }

    Ok(())
}
