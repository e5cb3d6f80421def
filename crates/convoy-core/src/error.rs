//! Core error types shared by the bus, session store, and tool context.

use thiserror::Error;

/// Errors surfaced by `convoy-core` primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("bus channel closed")]
    BusClosed,
}

pub type CoreResult<T> = Result<T, CoreError>;
