use chatnet_wire::WireError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors produced while decoding or validating a single message frame.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("framing error: {0}")]
    Wire(#[from] WireError),

    #[error("message failed validation: {0}")]
    Validation(String),

    #[error("checksum mismatch for message {msg_id}")]
    ChecksumMismatch { msg_id: String },

    #[error("invalid username: {0}")]
    InvalidUsername(String),
}

/// Errors that cause a connection (not just a single frame) to close.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Wire(#[from] WireError),

    #[error("no session is registered for {0}")]
    SessionNotFound(SocketAddr),

    #[error("session timed out waiting for heartbeat")]
    SessionTimeout,

    #[error("client disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
