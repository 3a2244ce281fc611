use thiserror::Error;

use crate::config::error::ConfigError;

/// Top-level error `main` aggregates everything into, following the teacher's
/// `AppError` shape.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("logger already initialized: {0}")]
    Logger(#[from] log::SetLoggerError),
}
