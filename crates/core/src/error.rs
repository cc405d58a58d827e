//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid stream kind: {0}")]
    InvalidStreamKind(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("invalid playback token: {0}")]
    InvalidToken(String),

    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias using the core error.
pub type Result<T> = std::result::Result<T, Error>;
