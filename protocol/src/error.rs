//! Protocol error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid local timestamp: {0}")]
    InvalidLocalTimestamp(String),

    #[error("Ambiguous or skipped local time: {0}")]
    NonexistentLocalTime(String),

    #[error("Invalid wire timestamp: {0}")]
    InvalidWireTimestamp(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
