use thiserror::Error;

/// Errors that can occur while reading or writing a length-prefixed frame.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame length {0} exceeds the maximum message size of {1}")]
    FrameTooLarge(u32, u32),

    #[error("connection closed before a full frame was read")]
    UnexpectedEof,
}

pub type Result<T> = std::result::Result<T, WireError>;
