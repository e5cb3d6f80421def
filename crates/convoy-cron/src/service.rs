//! Cron service — custom async scheduler with job persistence.
//!
//!
//! Architecture:
//! - Jobs stored in `~/.convoy/cron/jobs.json`
//! - Timer sleeps until the nearest `next_run_at_ms`, then fires due jobs
//! - On trigger, a synthetic inbound message is published onto the bus with
//!   sender `"scheduler"`; the owning session's normal turn handling picks
//!   it up and the channel's registered outbound handler delivers the reply
//! - No APScheduler. Fully custom async timer using `tokio::time::sleep`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use convoy_core::bus::queue::MessageBus;
use convoy_core::bus::types::InboundMessage;

use crate::error::{CronError, CronResult};
use crate::types::{compute_next_run_from, CronJob, CronSchedule, CronStore, JobStatus, ScheduleKind};

/// Default ceiling on enabled tasks per session, used by `add_task` when the
/// caller doesn't supply its own.
pub const DEFAULT_MAX_TASKS_PER_SESSION: usize = 20;

// ─────────────────────────────────────────────
// CronService
// ─────────────────────────────────────────────

/// Cron scheduler — manages jobs, persistence, and timed execution.
pub struct CronService {
    /// Path to the jobs JSON file.
    store_path: PathBuf,
    /// In-memory job store (protected by mutex for async safety).
    store: Arc<Mutex<CronStore>>,
    /// Message bus — triggers are published here as inbound messages.
    bus: Arc<MessageBus>,
    /// Shutdown signal.
    shutdown: Arc<Notify>,
    /// Re-arm signal (when jobs are added/modified).
    rearm: Arc<Notify>,
}

impl CronService {
    /// Create a new cron service.
    ///
    /// If `store_path` is `None`, defaults to `~/.convoy/cron/jobs.json`.
    pub fn new(bus: Arc<MessageBus>, store_path: Option<PathBuf>) -> Self {
        let path = store_path.unwrap_or_else(|| {
            let data_dir = convoy_core::utils::get_data_path();
            data_dir.join("cron").join("jobs.json")
        });

        Self {
            store_path: path,
            store: Arc::new(Mutex::new(CronStore::new())),
            bus,
            shutdown: Arc::new(Notify::new()),
            rearm: Arc::new(Notify::new()),
        }
    }

    // ─────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────

    /// Load the store from disk.
    pub async fn load(&self) -> anyhow::Result<()> {
        if !self.store_path.exists() {
            debug!(path = %self.store_path.display(), "no cron store file, starting empty");
            return Ok(());
        }

        let data = tokio::fs::read_to_string(&self.store_path).await?;
        let loaded: CronStore = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("failed to parse cron store: {}", e))?;

        let mut store = self.store.lock().await;
        *store = loaded;
        info!(
            path = %self.store_path.display(),
            jobs = store.jobs.len(),
            "loaded cron store"
        );
        Ok(())
    }

    /// Save the store to disk.
    pub async fn save(&self) -> anyhow::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.store_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let store = self.store.lock().await;
        let json = serde_json::to_string_pretty(&*store)?;
        tokio::fs::write(&self.store_path, json).await?;
        debug!(path = %self.store_path.display(), "saved cron store");
        Ok(())
    }

    // ─────────────────────────────────────────
    // Job management
    // ─────────────────────────────────────────

    /// Create and schedule a task for a session, enforcing the per-session
    /// quota and validating the cron expression up front.
    ///
    /// Mirrors `addTask`: validates the cron expression (`InvalidCron` on
    /// failure), checks the session's enabled-task count against
    /// `max_per_session` (`QuotaExceeded` on failure), assigns an id,
    /// persists, schedules, and returns the task.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_task(
        &self,
        session_id: impl Into<String>,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        cron_expr: impl Into<String>,
        description: impl Into<String>,
        prompt: impl Into<String>,
        creator_user_id: Option<String>,
        max_per_session: usize,
    ) -> CronResult<CronJob> {
        let session_id = session_id.into();
        let cron_expr = cron_expr.into();

        let schedule = CronSchedule::cron(cron_expr.clone());
        schedule
            .validate()
            .map_err(|e| CronError::InvalidCron(cron_expr, e))?;

        {
            let store = self.store.lock().await;
            let current = store.enabled_count_for_session(&session_id);
            if current >= max_per_session {
                return Err(CronError::QuotaExceeded(max_per_session));
            }
        }

        let job = CronJob::new(
            session_id,
            channel,
            chat_id,
            description,
            prompt,
            schedule,
            creator_user_id,
        );
        let id = self
            .add_job(job)
            .await
            .map_err(|e| CronError::Other(e.to_string()))?;
        let task = self.get_job(&id).await.expect("just-inserted job must exist");
        Ok(task)
    }

    /// Add a job directly. Computes next run time and saves.
    pub async fn add_job(&self, mut job: CronJob) -> anyhow::Result<String> {
        // Compute initial next_run
        let now_ms = Utc::now().timestamp_millis();
        job.state.next_run_at_ms = compute_next_run_from(&job.schedule, now_ms);

        let id = job.id.clone();
        {
            let mut store = self.store.lock().await;
            store.add(job);
        }
        self.save().await?;
        self.rearm.notify_one();
        info!(id = %id, "added cron job");
        Ok(id)
    }

    /// Remove a job by ID.
    pub async fn remove_job(&self, id: &str) -> anyhow::Result<bool> {
        let removed = {
            let mut store = self.store.lock().await;
            store.remove(id)
        };
        if removed {
            self.save().await?;
            self.rearm.notify_one();
            info!(id = %id, "removed cron job");
        }
        Ok(removed)
    }

    /// Enable or disable a job. Idempotent.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> anyhow::Result<bool> {
        let found = {
            let mut store = self.store.lock().await;
            if let Some(job) = store.find_mut(id) {
                job.enabled = enabled;
                job.updated_at_ms = Utc::now().timestamp_millis();
                if enabled {
                    let now = Utc::now().timestamp_millis();
                    job.state.next_run_at_ms = compute_next_run_from(&job.schedule, now);
                }
                true
            } else {
                false
            }
        };
        if found {
            self.save().await?;
            self.rearm.notify_one();
        }
        Ok(found)
    }

    /// List all jobs (snapshot).
    pub async fn list_jobs(&self) -> Vec<CronJob> {
        let store = self.store.lock().await;
        store.jobs.clone()
    }

    /// List jobs belonging to a session.
    pub async fn list_jobs_for_session(&self, session_id: &str) -> Vec<CronJob> {
        let store = self.store.lock().await;
        store
            .jobs
            .iter()
            .filter(|j| j.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Get a single job by ID.
    pub async fn get_job(&self, id: &str) -> Option<CronJob> {
        let store = self.store.lock().await;
        store.find(id).cloned()
    }

    // ─────────────────────────────────────────
    // Timer loop
    // ─────────────────────────────────────────

    /// Start the scheduler loop.
    ///
    /// Loads the store, then enters a loop:
    /// 1. Find nearest `next_run_at_ms`
    /// 2. Sleep until that time (or shutdown/rearm signal)
    /// 3. Execute all due jobs
    /// 4. Recompute and repeat
    pub async fn start(&self) -> anyhow::Result<()> {
        // Load persisted jobs
        if let Err(e) = self.load().await {
            warn!(error = %e, "failed to load cron store, starting empty");
        }

        info!("cron service started");

        loop {
            // Find how long to sleep
            let sleep_ms = {
                let store = self.store.lock().await;
                Self::next_wake_ms(&store)
            };

            let sleep_duration = if let Some(ms) = sleep_ms {
                let delay = (ms - Utc::now().timestamp_millis()).max(0) as u64;
                std::time::Duration::from_millis(delay)
            } else {
                // No scheduled jobs — sleep a long time, rearm will wake us
                std::time::Duration::from_secs(3600)
            };

            debug!(sleep_ms = sleep_duration.as_millis() as u64, "cron timer armed");

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    // Timer fired — execute due jobs
                    self.execute_due_jobs().await;
                }
                _ = self.rearm.notified() => {
                    debug!("cron timer re-armed (job added/modified)");
                    // Loop back to recalculate sleep
                }
                _ = self.shutdown.notified() => {
                    info!("cron service shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Stop the scheduler.
    pub async fn stop(&self) {
        info!("stopping cron service");
        self.shutdown.notify_waiters();
    }

    /// Find the nearest next_run_at_ms across all enabled jobs.
    fn next_wake_ms(store: &CronStore) -> Option<i64> {
        store
            .jobs
            .iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.state.next_run_at_ms)
            .min()
    }

    /// Execute all due jobs.
    async fn execute_due_jobs(&self) {
        // Collect due job IDs (avoid holding lock during execution)
        let due_ids: Vec<String> = {
            let store = self.store.lock().await;
            store
                .due_jobs()
                .iter()
                .map(|j| j.id.clone())
                .collect()
        };

        if due_ids.is_empty() {
            return;
        }

        debug!(count = due_ids.len(), "executing due cron jobs");

        for id in &due_ids {
            self.execute_job(id).await;
        }
    }

    /// Fire a single job by ID: publishes a synthetic inbound message onto
    /// the bus and advances (or retires) its schedule.
    ///
    /// Delivery of the agent's reply is not this service's concern — the
    /// agent loop's normal per-turn handling picks the message up off the
    /// bus and replies through whatever outbound handler the job's channel
    /// has registered.
    pub async fn execute_job(&self, id: &str) {
        // Get a snapshot of the job
        let job = {
            let store = self.store.lock().await;
            store.find(id).cloned()
        };

        let job = match job {
            Some(j) => j,
            None => {
                warn!(id = %id, "cron job not found for execution");
                return;
            }
        };

        info!(id = %job.id, description = %job.description, "firing cron job");

        let mut inbound = InboundMessage::new(
            job.session_id.clone(),
            job.channel.clone(),
            "scheduler",
            job.chat_id.clone(),
            job.trigger_text(),
        );
        inbound
            .metadata
            .insert("scheduled_task_id".to_string(), job.id.clone());
        if let Some(ref uid) = job.creator_user_id {
            inbound.metadata.insert("creator_user_id".to_string(), uid.clone());
        }

        let publish_result = self.bus.publish_inbound(inbound);
        if let Err(ref e) = publish_result {
            error!(id = %id, error = %e, "failed to publish cron trigger onto bus");
        }

        // Update job state
        let now_ms = Utc::now().timestamp_millis();
        let mut should_delete = false;

        {
            let mut store = self.store.lock().await;
            if let Some(j) = store.find_mut(id) {
                j.state.last_run_at_ms = Some(now_ms);
                j.state.run_count += 1;
                j.state.last_status = if publish_result.is_ok() {
                    j.state.last_error = None;
                    Some(JobStatus::Ok)
                } else {
                    j.state.last_error = Some(publish_result.err().unwrap().to_string());
                    Some(JobStatus::Error)
                };

                // Compute next run
                if j.schedule.kind == ScheduleKind::At && j.delete_after_run {
                    should_delete = true;
                } else if j.schedule.kind == ScheduleKind::At {
                    j.enabled = false;
                    j.state.next_run_at_ms = None;
                } else {
                    j.state.next_run_at_ms = compute_next_run_from(&j.schedule, now_ms);
                }

                j.updated_at_ms = now_ms;
            }

            // Delete one-shot jobs
            if should_delete {
                store.remove(id);
            }
        }

        // Save
        if let Err(e) = self.save().await {
            error!(error = %e, "failed to save cron store after job execution");
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CronSchedule;
    use tempfile::TempDir;

    fn make_bus() -> Arc<MessageBus> {
        Arc::new(MessageBus::new())
    }

    fn make_service(dir: &TempDir) -> CronService {
        let path = dir.path().join("jobs.json");
        CronService::new(make_bus(), Some(path))
    }

    fn job(session_id: &str) -> CronJob {
        CronJob::new(
            session_id,
            "cli",
            "chat-1",
            "test task",
            "do the thing",
            CronSchedule::every(10_000),
            None,
        )
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        let j = job("sess-1");
        let id = svc.add_job(j).await.unwrap();

        let jobs = svc.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert_eq!(jobs[0].description, "test task");
    }

    #[tokio::test]
    async fn test_remove_job() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        let id = svc.add_job(job("sess-1")).await.unwrap();

        assert!(svc.remove_job(&id).await.unwrap());
        assert!(svc.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_nonexistent() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);
        assert!(!svc.remove_job("xyz").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_enabled() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        let id = svc.add_job(job("sess-1")).await.unwrap();

        svc.set_enabled(&id, false).await.unwrap();
        let jobs = svc.list_jobs().await;
        assert!(!jobs[0].enabled);

        svc.set_enabled(&id, true).await.unwrap();
        let jobs = svc.list_jobs().await;
        assert!(jobs[0].enabled);
    }

    #[tokio::test]
    async fn test_set_enabled_nonexistent() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);
        assert!(!svc.set_enabled("xyz", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_job() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        let id = svc.add_job(job("sess-1")).await.unwrap();

        assert!(svc.get_job(&id).await.is_some());
        assert!(svc.get_job("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_list_jobs_for_session() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        svc.add_job(job("sess-1")).await.unwrap();
        svc.add_job(job("sess-1")).await.unwrap();
        svc.add_job(job("sess-2")).await.unwrap();

        assert_eq!(svc.list_jobs_for_session("sess-1").await.len(), 2);
        assert_eq!(svc.list_jobs_for_session("sess-2").await.len(), 1);
        assert_eq!(svc.list_jobs_for_session("sess-3").await.len(), 0);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");

        // Create and save
        {
            let svc = CronService::new(make_bus(), Some(path.clone()));
            svc.add_job(job("sess-1")).await.unwrap();
        }

        // Reload
        {
            let svc = CronService::new(make_bus(), Some(path));
            svc.load().await.unwrap();
            let jobs = svc.list_jobs().await;
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].description, "test task");
        }
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);
        // Should not error, just start empty
        svc.load().await.unwrap();
        assert!(svc.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_task_validates_cron() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        let err = svc
            .add_task(
                "sess-1",
                "cli",
                "chat-1",
                "not a cron expression",
                "desc",
                "prompt",
                None,
                DEFAULT_MAX_TASKS_PER_SESSION,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CronError::InvalidCron(_, _)));
    }

    #[tokio::test]
    async fn test_add_task_enforces_quota() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        for _ in 0..2 {
            svc.add_task(
                "sess-1", "cli", "chat-1", "0 9 * * *", "desc", "prompt", None, 2,
            )
            .await
            .unwrap();
        }

        let err = svc
            .add_task(
                "sess-1", "cli", "chat-1", "0 10 * * *", "desc2", "prompt2", None, 2,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CronError::QuotaExceeded(2)));
    }

    #[tokio::test]
    async fn test_add_task_ok() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        let task = svc
            .add_task(
                "sess-1",
                "telegram",
                "chat-42",
                "0 9 * * *",
                "morning briefing",
                "summarize overnight news",
                Some("user-7".into()),
                DEFAULT_MAX_TASKS_PER_SESSION,
            )
            .await
            .unwrap();

        assert_eq!(task.session_id, "sess-1");
        assert_eq!(task.channel, "telegram");
        assert_eq!(task.description, "morning briefing");
        assert_eq!(task.creator_user_id.as_deref(), Some("user-7"));
        assert!(task.state.next_run_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_execute_job_publishes_inbound() {
        let dir = TempDir::new().unwrap();
        let bus = make_bus();
        let path = dir.path().join("jobs.json");
        let svc = CronService::new(bus.clone(), Some(path));

        let mut j = job("sess-1");
        j.description = "deliver".into();
        j.task_prompt = "do it".into();
        j.state.next_run_at_ms = Some(0);
        let id = svc.add_job(j).await.unwrap();

        svc.execute_job(&id).await;

        let msg = bus.recv_inbound().await.expect("expected a trigger message");
        assert_eq!(msg.session_id, "sess-1");
        assert_eq!(msg.channel, "cli");
        assert_eq!(msg.sender_id, "scheduler");
        assert!(msg.content.contains("deliver"));
        assert!(msg.content.contains("do it"));
        assert_eq!(msg.metadata.get("scheduled_task_id"), Some(&id));

        let after = svc.get_job(&id).await.unwrap();
        assert_eq!(after.state.last_status, Some(JobStatus::Ok));
        assert_eq!(after.state.run_count, 1);
        assert!(after.state.next_run_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_execute_oneshot_deleted() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        let mut j = job("sess-1");
        j.schedule = CronSchedule::at(0);
        j.delete_after_run = true;
        j.state.next_run_at_ms = Some(0);
        let id = svc.add_job(j).await.unwrap();

        svc.execute_job(&id).await;

        // Job should be deleted
        assert!(svc.get_job(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_execute_oneshot_disabled() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);

        let mut j = job("sess-1");
        j.schedule = CronSchedule::at(0);
        j.delete_after_run = false;
        j.state.next_run_at_ms = Some(0);
        let id = svc.add_job(j).await.unwrap();

        svc.execute_job(&id).await;

        // Job should be disabled, not deleted
        let j = svc.get_job(&id).await.unwrap();
        assert!(!j.enabled);
        assert!(j.state.next_run_at_ms.is_none());
    }

    #[tokio::test]
    async fn test_next_wake_ms() {
        let mut store = CronStore::new();

        // Empty store → None
        assert!(CronService::next_wake_ms(&store).is_none());

        // One job
        let mut j1 = job("sess-1");
        j1.state.next_run_at_ms = Some(5000);
        store.add(j1);
        assert_eq!(CronService::next_wake_ms(&store), Some(5000));

        // Two jobs — picks earliest
        let mut j2 = job("sess-1");
        j2.state.next_run_at_ms = Some(3000);
        store.add(j2);
        assert_eq!(CronService::next_wake_ms(&store), Some(3000));
    }

    #[tokio::test]
    async fn test_next_wake_ms_ignores_disabled() {
        let mut store = CronStore::new();
        let mut j1 = job("sess-1");
        j1.enabled = false;
        j1.state.next_run_at_ms = Some(1000);
        store.add(j1);
        assert!(CronService::next_wake_ms(&store).is_none());
    }

    #[tokio::test]
    async fn test_stop() {
        let dir = TempDir::new().unwrap();
        let svc = make_service(&dir);
        // stop should not error even without start
        svc.stop().await;
    }
}
