use thiserror::Error;

/// Defines the primary error types of the scanner.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("{0} must be set")]
    MissingOption(&'static str),

    #[error("chain must not be empty")]
    EmptyChain,

    #[error("contracts map must not be empty")]
    NoContracts,

    #[error("check if {0} is a valid websocket connection")]
    InvalidEndpoint(String),

    #[error("Failed to load sync configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Chain I/O error: {0}")]
    Chain(#[from] anyhow::Error),

    #[error("Receipt for {tx} unavailable after {attempts} attempts: {source}")]
    ReceiptUnavailable {
        tx: String,
        attempts: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Log subscription failed: {0}")]
    Subscription(anyhow::Error),

    #[error("Log subscription closed by the remote end")]
    SubscriptionClosed,

    #[error("Scan engine panicked: {0}")]
    Panicked(String),
}

/// Errors raised while handing a transaction to its downstream handler.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no job queue configured for chain {0}")]
    NoQueue(String),

    #[error("Failed to enqueue job on {queue}: {source}")]
    Enqueue {
        queue: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{handler} failed: {source}")]
    Callback {
        handler: String,
        #[source]
        source: anyhow::Error,
    },
}

/// The result of an in-process contract callback.
#[derive(Error, Debug)]
pub enum CallbackError {
    /// The transaction was handled before. Not treated as a failure.
    #[error("tx exist")]
    AlreadyProcessed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
