//! Error types for the sync core
//!
//! This module provides the crate-wide error type using `thiserror`. Frame and
//! storage failures keep their own types so callers can classify them (drop the
//! connection, drop the message, or fall back to a default) before they are
//! folded into [`Error`].

use crate::protocol::FrameError;
use crate::storage::StorageError;
use thiserror::Error;

/// Main error type for the sync core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire frame errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Payload decoding errors
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Peer registry / transmission errors
    #[error("Peer error: {0}")]
    Peer(String),

    /// Header synchronization errors
    #[error("Sync error: {0}")]
    Sync(String),

    /// Channel send errors
    #[error("Channel send error: {0}")]
    ChannelSend(String),
}

/// Result type alias for the sync core
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid payload error
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    /// Create a peer error
    pub fn peer(msg: impl Into<String>) -> Self {
        Self::Peer(msg.into())
    }

    /// Create a sync error
    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    /// Create a channel send error
    pub fn channel_send(msg: impl Into<String>) -> Self {
        Self::ChannelSend(msg.into())
    }

    /// Whether the connection this error surfaced on must be torn down
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            Error::Frame(frame) => frame.is_connection_fatal(),
            Error::Io(_) | Error::InvalidPayload(_) => true,
            _ => false,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<::config::ConfigError> for Error {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
