//! Scheduler error types.

use thiserror::Error;

/// Errors surfaced by the cron service's job CRUD operations.
#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid cron expression '{0}': {1}")]
    InvalidCron(String, String),

    #[error("session already has {0} enabled tasks, the max per session")]
    QuotaExceeded(usize),

    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type CronResult<T> = Result<T, CronError>;
