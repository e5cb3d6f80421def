//! `convoy cron` — manage scheduled tasks from the CLI.
//!
//! - `convoy cron list [--all] [--session ID]` — list scheduled tasks
//! - `convoy cron add --description DESC --prompt PROMPT --cron EXPR` — add a task
//! - `convoy cron remove <ID>` — remove a task
//! - `convoy cron enable <ID> [--disable]` — enable/disable a task
//! - `convoy cron run <ID>` — manually fire a task now

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use convoy_core::bus::queue::MessageBus;
use convoy_core::utils::get_data_path;
use convoy_cron::types::{CronJob, ScheduleKind};
use convoy_cron::{CronService, DEFAULT_MAX_TASKS_PER_SESSION};

/// Session id scheduled tasks are filed under when created from the CLI.
///
/// Matches `AgentLoop::process_direct`'s own hardcoded session id, so a task
/// created here fires back into the same conversation a single-shot
/// `convoy agent -m ...` run would have used.
const CLI_SESSION_ID: &str = "cli-direct";

/// Chat id `process_direct` uses for single-shot runs; matched here so a
/// synthetic trigger message routes the same way a live CLI turn would.
const CLI_CHAT_ID: &str = "direct";

// ─────────────────────────────────────────────
// Subcommand enum
// ─────────────────────────────────────────────

/// Cron subcommands.
#[derive(Subcommand)]
pub enum CronCommands {
    /// List scheduled tasks
    List {
        /// Include disabled tasks
        #[arg(short, long, default_value_t = false)]
        all: bool,
    },

    /// Schedule a new task
    Add {
        /// Short human-readable description, shown when the task fires
        #[arg(short, long)]
        description: String,

        /// Prompt sent to the agent when the task fires
        #[arg(short, long)]
        prompt: String,

        /// Standard 5-field cron expression, e.g. "0 9 * * *"
        #[arg(short, long)]
        cron: String,

        /// Session id this task belongs to (defaults to the CLI's own session)
        #[arg(long, default_value = "cli-direct")]
        session: String,
    },

    /// Remove a scheduled task by ID
    Remove {
        /// Task ID (8-character hex)
        job_id: String,
    },

    /// Enable or disable a task
    Enable {
        /// Task ID (8-character hex)
        job_id: String,

        /// Disable instead of enable
        #[arg(long, default_value_t = false)]
        disable: bool,
    },

    /// Manually fire a task now
    Run {
        /// Task ID (8-character hex)
        job_id: String,
    },
}

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

/// Dispatch a cron subcommand.
pub async fn dispatch(cmd: CronCommands) -> Result<()> {
    match cmd {
        CronCommands::List { all } => list_jobs(all).await,
        CronCommands::Add {
            description,
            prompt,
            cron,
            session,
        } => add_task(session, description, prompt, cron).await,
        CronCommands::Remove { job_id } => remove_job(&job_id).await,
        CronCommands::Enable { job_id, disable } => enable_job(&job_id, !disable).await,
        CronCommands::Run { job_id } => run_job(&job_id).await,
    }
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

/// Create a CronService with the default store path (no bus needed for CLI ops).
fn make_service() -> CronService {
    let store_path = get_data_path().join("cron").join("jobs.json");
    // Bus is not used in CLI-only operations, so create a dummy one
    let bus = Arc::new(MessageBus::new());
    CronService::new(bus, Some(store_path))
}

/// Format milliseconds as a human-readable duration.
fn format_duration_ms(ms: i64) -> String {
    let secs = ms / 1000;
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

/// Format a Unix epoch timestamp (ms) as a local datetime string.
fn format_timestamp_ms(ms: i64) -> String {
    use chrono::{Local, TimeZone};
    match Local.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        _ => "—".to_string(),
    }
}

// ─────────────────────────────────────────────
// Command implementations
// ─────────────────────────────────────────────

/// `convoy cron list [--all]`
async fn list_jobs(include_disabled: bool) -> Result<()> {
    let service = make_service();
    service.load().await.context("failed to load cron store")?;

    let jobs = service.list_jobs().await;
    let jobs: Vec<&CronJob> = if include_disabled {
        jobs.iter().collect()
    } else {
        jobs.iter().filter(|j| j.enabled).collect()
    };

    if jobs.is_empty() {
        println!("  No scheduled tasks.{}", if !include_disabled { " Use --all to include disabled." } else { "" });
        return Ok(());
    }

    println!();
    println!("{}", "  Scheduled Tasks".cyan().bold());
    println!();

    // Header
    println!(
        "  {:<10} {:<24} {:<18} {:<10} {}",
        "ID".bold(),
        "Description".bold(),
        "Schedule".bold(),
        "Status".bold(),
        "Next Run".bold(),
    );
    println!("  {}", "─".repeat(80));

    for job in &jobs {
        // Format schedule
        let schedule = match job.schedule.kind {
            ScheduleKind::Every => {
                let ms = job.schedule.every_ms.unwrap_or(60_000);
                format!("every {}", format_duration_ms(ms))
            }
            ScheduleKind::Cron => {
                job.schedule.expr.clone().unwrap_or_else(|| "—".to_string())
            }
            ScheduleKind::At => "one-time".to_string(),
        };

        // Format status
        let status = if job.enabled {
            "enabled".green().to_string()
        } else {
            "disabled".dimmed().to_string()
        };

        // Format next run
        let next_run = match job.state.next_run_at_ms {
            Some(ms) => format_timestamp_ms(ms),
            None => "—".to_string(),
        };

        println!(
            "  {:<10} {:<24} {:<18} {:<10} {}",
            job.id, job.description, schedule, status, next_run
        );
    }

    println!();
    Ok(())
}

/// `convoy cron add`
async fn add_task(session: String, description: String, prompt: String, cron: String) -> Result<()> {
    let service = make_service();
    service.load().await.context("failed to load cron store")?;

    let task = service
        .add_task(
            session,
            "cli",
            CLI_CHAT_ID,
            cron,
            description,
            prompt,
            None,
            DEFAULT_MAX_TASKS_PER_SESSION,
        )
        .await
        .context("failed to add scheduled task")?;

    println!(
        "  {} Added task {} ({})",
        "✓".green(),
        task.id.cyan(),
        task.description
    );

    Ok(())
}

/// `convoy cron remove <ID>`
async fn remove_job(id: &str) -> Result<()> {
    let service = make_service();
    service.load().await.context("failed to load cron store")?;

    if service.remove_job(id).await? {
        println!("  {} Removed task {}", "✓".green(), id.cyan());
    } else {
        println!("  {} Task {} not found", "✗".red(), id);
    }

    Ok(())
}

/// `convoy cron enable <ID> [--disable]`
async fn enable_job(id: &str, enabled: bool) -> Result<()> {
    let service = make_service();
    service.load().await.context("failed to load cron store")?;

    if service.set_enabled(id, enabled).await? {
        let label = if enabled { "Enabled" } else { "Disabled" };
        let description = service
            .get_job(id)
            .await
            .map(|j| j.description)
            .unwrap_or_default();
        println!(
            "  {} {} task '{}' ({})",
            "✓".green(),
            label,
            description,
            id.cyan()
        );
    } else {
        println!("  {} Task {} not found", "✗".red(), id);
    }

    Ok(())
}

/// `convoy cron run <ID>`
async fn run_job(id: &str) -> Result<()> {
    let service = make_service();
    service.load().await.context("failed to load cron store")?;

    let job = service.get_job(id).await;
    if job.is_none() {
        println!("  {} Task {} not found", "✗".red(), id);
        return Ok(());
    }
    let job = job.unwrap();

    println!(
        "  {} Firing task '{}' ({})...",
        "⠿".dimmed(),
        job.description,
        id.cyan()
    );

    // Firing publishes a synthetic message onto the bus; run the agent loop
    // directly against the task's prompt so the CLI has something to print.
    let agent_loop = crate::build_agent_loop().await?;
    let response = agent_loop
        .process_direct(&job.task_prompt)
        .await
        .context("agent processing failed")?;

    // Update last-run state / advance the schedule as a real fire would.
    service.execute_job(id).await;

    println!();
    println!("{}", "🦀 Convoy".cyan().bold());
    if response.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{response}");
    }
    println!();

    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
