//! Scheduled task service — cron-expression jobs, persisted per session,
//! rehydrated at startup and fired by a custom async timer.

pub mod error;
pub mod service;
pub mod types;

pub use error::{CronError, CronResult};
pub use service::{CronService, DEFAULT_MAX_TASKS_PER_SESSION};
pub use types::{
    compute_next_run_from, CronJob, CronJobState, CronSchedule, CronStore, JobStatus,
    ScheduleKind,
};
