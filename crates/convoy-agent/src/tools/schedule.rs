//! Schedule tool — lets the agent manage its own scheduled tasks.
//!
//! Backed by `convoy_cron::CronService`. Tasks are always scoped to the
//! calling turn's session/channel/chat (read from `ToolContext`) — an agent
//! can list, create, and cancel its own tasks but can't reach into another
//! session's schedule.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use convoy_core::ToolContext;
use convoy_cron::{CronService, DEFAULT_MAX_TASKS_PER_SESSION};

use super::base::{optional_string, require_string, Tool};

// ─────────────────────────────────────────────
// ScheduleTool
// ─────────────────────────────────────────────

/// Lets the agent add, list, enable/disable, and remove scheduled tasks for
/// its own session.
pub struct ScheduleTool {
    cron: Arc<CronService>,
    max_per_session: usize,
}

impl ScheduleTool {
    pub fn new(cron: Arc<CronService>) -> Self {
        Self { cron, max_per_session: DEFAULT_MAX_TASKS_PER_SESSION }
    }
}

#[async_trait]
impl Tool for ScheduleTool {
    fn name(&self) -> &str {
        "schedule"
    }

    fn description(&self) -> &str {
        "Manage scheduled tasks for this conversation. action=\"add\" creates a task that \
         fires on a cron schedule, sending its prompt back into this conversation when due. \
         action=\"list\" shows this session's tasks. action=\"remove\" deletes one by id. \
         action=\"enable\"/\"disable\" toggles one without deleting it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove", "enable", "disable"],
                    "description": "Which schedule operation to perform"
                },
                "cron": {
                    "type": "string",
                    "description": "Standard 5-field cron expression, e.g. \"0 9 * * *\" (required for action=\"add\")"
                },
                "description": {
                    "type": "string",
                    "description": "Short human-readable label for the task (required for action=\"add\")"
                },
                "prompt": {
                    "type": "string",
                    "description": "Prompt sent back into this conversation when the task fires (required for action=\"add\")"
                },
                "task_id": {
                    "type": "string",
                    "description": "Task id (required for action=\"remove\"/\"enable\"/\"disable\")"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let action = require_string(&params, "action")?;

        match action.as_str() {
            "add" => {
                let cron_expr = require_string(&params, "cron")?;
                let description = require_string(&params, "description")?;
                let prompt = require_string(&params, "prompt")?;

                let task = self
                    .cron
                    .add_task(
                        ctx.session_id.clone(),
                        ctx.channel.clone(),
                        ctx.chat_id.clone(),
                        cron_expr,
                        description,
                        prompt,
                        ctx.user_id.clone(),
                        self.max_per_session,
                    )
                    .await?;

                debug!(task_id = %task.id, session_id = %ctx.session_id, "scheduled task added via tool");
                Ok(format!(
                    "Scheduled task {} ({}) added: next run {}",
                    task.id,
                    task.description,
                    task.state
                        .next_run_at_ms
                        .map(|ms| ms.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                ))
            }
            "list" => {
                let tasks = self.cron.list_jobs_for_session(&ctx.session_id).await;
                if tasks.is_empty() {
                    return Ok("No scheduled tasks for this conversation.".to_string());
                }
                let lines: Vec<String> = tasks
                    .iter()
                    .map(|t| {
                        let status = if t.enabled { "enabled" } else { "disabled" };
                        format!("{} [{}] {} — {}", t.id, status, t.description, t.schedule.expr.as_deref().unwrap_or("?"))
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
            "remove" => {
                let task_id = require_string(&params, "task_id")?;
                let task = self.require_owned_task(&task_id, ctx).await?;
                self.cron.remove_job(&task.id).await?;
                Ok(format!("Removed scheduled task {}", task.id))
            }
            "enable" | "disable" => {
                let task_id = require_string(&params, "task_id")?;
                let task = self.require_owned_task(&task_id, ctx).await?;
                let enabled = action == "enable";
                self.cron.set_enabled(&task.id, enabled).await?;
                Ok(format!("{} scheduled task {}", if enabled { "Enabled" } else { "Disabled" }, task.id))
            }
            other => {
                let _ = optional_string(&params, "task_id");
                anyhow::bail!("Unknown schedule action: {other}")
            }
        }
    }
}

impl ScheduleTool {
    /// Fetch a task by id, rejecting ids that belong to another session.
    async fn require_owned_task(&self, task_id: &str, ctx: &ToolContext) -> anyhow::Result<convoy_cron::CronJob> {
        let task = self
            .cron
            .get_job(task_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("No scheduled task with id {task_id}"))?;
        if task.session_id != ctx.session_id {
            anyhow::bail!("No scheduled task with id {task_id}");
        }
        Ok(task)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
