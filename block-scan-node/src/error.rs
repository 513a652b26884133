use thiserror::Error;

/// Errors raised by the node's concrete backends.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Invalid hex quantity: {0}")]
    InvalidQuantity(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] bincode::error::EncodeError),

    #[error("Deserialization failed: {0}")]
    Deserialization(#[from] bincode::error::DecodeError),
}
