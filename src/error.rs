//! Error types

use thiserror::Error;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Transport-level failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Failed to bind socket: {0}")]
    BindFailed(String),

    #[error("Failed to resolve address: {0}")]
    AddressResolution(String),

    #[error("Failed to send datagram: {0}")]
    SendFailed(String),
}

/// Packet decoding failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Packet truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid length: {0}")]
    InvalidLength(&'static str),

    #[error("Item text is not valid UTF-8")]
    InvalidText,
}

/// Session lifecycle failures, also used as the termination cause
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is already running")]
    AlreadyRunning,

    #[error("Session has been terminated")]
    Terminated,

    #[error("Failed to bind channel: {0}")]
    Bind(#[from] NetworkError),

    #[error("Failed to start receive loop: {0}")]
    Spawn(String),

    #[error("Receive loop failed: {0}")]
    Receive(String),

    #[error("Internal failure: {0}")]
    Internal(String),
}
