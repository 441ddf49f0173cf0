//! MAP client error types.
//!
//! Only caller-facing failures are errors. Transport drops, own-number
//! timeouts and stale completions are absorbed by the connection state
//! machine and show up as state transitions instead.

use thiserror::Error;

use crate::session::ConnectionState;

/// MAP client errors.
#[derive(Error, Debug)]
pub enum MapClientError {
    /// Operation requires a connected MAS session.
    #[error("MAS session not connected")]
    NotConnected,

    /// Operation is not valid in the current connection state.
    #[error("Invalid state for operation: {0:?}")]
    InvalidState(ConnectionState),

    /// Recipient URI could not be turned into an address.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Bluetooth device address could not be parsed.
    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    /// Outbound message had no recipients.
    #[error("Message has no recipients")]
    EmptyMessage,

    /// The connection task has stopped and no longer accepts input.
    #[error("Connection mailbox closed")]
    MailboxClosed,


    /// Message store rejected an insert.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for MAP client operations
pub type Result<T> = std::result::Result<T, MapClientError>;

impl From<toml::de::Error> for MapClientError {
    fn from(err: toml::de::Error) -> Self {
        MapClientError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for MapClientError {
    fn from(err: toml::ser::Error) -> Self {
        MapClientError::Config(err.to_string())
    }
}
