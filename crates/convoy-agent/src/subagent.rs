//! Subagent Manager — background task delegation.
//!
//! The main agent can delegate tasks to subagents via the `spawn` tool.
//! Each subagent runs as a `tokio::spawn` task with:
//! - Its own system prompt (task-focused, simpler than the main agent's)
//! - A limited tool registry (filesystem, shell, web — NO message, spawn, edit)
//! - An independent message history (ephemeral, not persisted)
//! - The same LLM provider as the parent
//!
//! On completion, the subagent publishes its result as a synthetic inbound
//! message on the bus, targeted at the originating session. The agent loop
//! picks it up and summarizes the result for the user. A cancelled subagent
//! never announces.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use convoy_core::bus::queue::MessageBus;
use convoy_core::bus::types::{InboundMessage, ProgressMessage, ProgressStep};
use convoy_core::types::ToolCall;
use convoy_core::wire::Message;
use convoy_core::SubagentConfig;
use convoy_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::agent_loop::ExecToolConfig;
use crate::context::ContextBuilder;
use crate::tools::filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::registry::ToolRegistry;
use crate::tools::shell::ExecTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};
use convoy_core::ToolContext;

// ─────────────────────────────────────────────
// TaskInfo
// ─────────────────────────────────────────────

/// Metadata about a running (or recently finished, pending GC) subagent task.
#[derive(Clone)]
pub struct TaskInfo {
    /// Unique task identifier (8 hex chars).
    pub id: String,
    /// Short display label for the task.
    pub label: String,
    /// Full task description sent to the subagent.
    pub task: String,
    /// Session that originated the spawn request.
    pub origin_session_id: String,
    /// Channel that originated the request.
    pub origin_channel: String,
    /// Chat ID that originated the request.
    pub origin_chat_id: String,
    /// Cancellation handle for this task.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for TaskInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInfo")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("origin_session_id", &self.origin_session_id)
            .finish()
    }
}

/// Outcome of a finished subagent run, used to pick the announcement verb
/// and to suppress the announcement entirely on cancellation.
enum RunOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

// ─────────────────────────────────────────────
// SubagentManager
// ─────────────────────────────────────────────

/// Manages the lifecycle of background subagent tasks.
///
/// Created once alongside the agent loop and shared via `Arc`. The
/// `SpawnTool` holds a reference and delegates `spawn()` calls here.
pub struct SubagentManager {
    provider: Arc<dyn LlmProvider>,
    workspace: PathBuf,
    bus: Arc<MessageBus>,
    model: String,
    brave_api_key: Option<String>,
    exec_config: ExecToolConfig,
    restrict_to_workspace: bool,
    request_config: LlmRequestConfig,
    config: SubagentConfig,
    /// Global concurrency gate — `spawn` fails with an error when exhausted
    /// rather than queuing, matching the spec's `CapacityExceeded` contract.
    capacity: Arc<Semaphore>,
    /// Currently running or recently-finished (within retention) tasks.
    running_tasks: RwLock<HashMap<String, TaskInfo>>,
}

impl SubagentManager {
    /// Create a new subagent manager.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        bus: Arc<MessageBus>,
        model: String,
        brave_api_key: Option<String>,
        exec_config: ExecToolConfig,
        restrict_to_workspace: bool,
        request_config: LlmRequestConfig,
        config: SubagentConfig,
    ) -> Self {
        let capacity = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            provider,
            workspace,
            bus,
            model,
            brave_api_key,
            exec_config,
            restrict_to_workspace,
            request_config,
            config,
            capacity,
            running_tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn a subagent task in the background.
    ///
    /// Returns an immediate confirmation string, or an error if the global
    /// concurrency cap is currently exhausted (`CapacityExceeded`). The
    /// actual work runs as a `tokio::spawn` task.
    pub async fn spawn(
        self: &Arc<Self>,
        origin_session_id: String,
        task: String,
        label: Option<String>,
        origin_channel: String,
        origin_chat_id: String,
    ) -> String {
        let Ok(permit) = Arc::clone(&self.capacity).try_acquire_owned() else {
            warn!(session_id = %origin_session_id, "subagent capacity exceeded");
            return format!(
                "Cannot start subagent: at most {} can run at once right now. Try again shortly.",
                self.config.max_concurrent
            );
        };

        let task_id = generate_task_id();
        let display_label = label.unwrap_or_else(|| {
            if task.len() > 30 {
                format!("{}…", &task[..30])
            } else {
                task.clone()
            }
        });
        let cancel = CancellationToken::new();

        let info = TaskInfo {
            id: task_id.clone(),
            label: display_label.clone(),
            task: task.clone(),
            origin_session_id: origin_session_id.clone(),
            origin_channel: origin_channel.clone(),
            origin_chat_id: origin_chat_id.clone(),
            cancel: cancel.clone(),
        };

        {
            let mut tasks = self.running_tasks.write().await;
            tasks.insert(task_id.clone(), info);
        }

        self.bus
            .publish_progress(ProgressMessage {
                session_id: origin_session_id.clone(),
                channel: origin_channel.clone(),
                chat_id: origin_chat_id.clone(),
                step: ProgressStep::SubagentSpawned,
                iteration: 0,
                tool_name: Some("spawn".into()),
                detail: format!("spawned subagent '{display_label}' (id: {task_id})"),
                is_error: false,
            })
            .await;

        let mgr = Arc::clone(self);
        let tid = task_id.clone();
        let lbl = display_label.clone();
        let t = task.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let outcome = mgr.run_subagent(&tid, &t, &cancel).await;

            match &outcome {
                RunOutcome::Completed(text) => {
                    mgr.announce_result(&tid, &lbl, &t, true, text, &origin_session_id, &origin_channel, &origin_chat_id)
                        .await;
                }
                RunOutcome::Failed(err) => {
                    error!(task_id = %tid, error = %err, "subagent task failed");
                    mgr.announce_result(&tid, &lbl, &t, false, err, &origin_session_id, &origin_channel, &origin_chat_id)
                        .await;
                }
                RunOutcome::Cancelled => {
                    info!(task_id = %tid, "subagent cancelled, not announcing");
                }
            }

            // Retain the record briefly so a racing cancel/status lookup still
            // finds it, then GC.
            tokio::time::sleep(Duration::from_secs(mgr.config.retention_secs)).await;
            mgr.running_tasks.write().await.remove(&tid);
            debug!(task_id = %tid, "subagent task record GC'd");
        });

        format!(
            "Subagent [{display_label}] started (id: {task_id}). I'll notify you when it completes."
        )
    }

    /// Cancel every running subagent originated from `session_id`. Returns
    /// the count of tasks signalled.
    pub async fn cancel_by_session(&self, session_id: &str) -> usize {
        let tasks = self.running_tasks.read().await;
        let mut count = 0;
        for info in tasks.values() {
            if info.origin_session_id == session_id && !info.cancel.is_cancelled() {
                info.cancel.cancel();
                count += 1;
            }
        }
        count
    }

    /// Cancel a single task by id. Returns whether a matching, not-yet-cancelled task was found.
    pub async fn cancel_by_id(&self, task_id: &str) -> bool {
        let tasks = self.running_tasks.read().await;
        match tasks.get(task_id) {
            Some(info) if !info.cancel.is_cancelled() => {
                info.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel every currently tracked task. Does not wait for settlement
    /// beyond issuing the cancellation signal — callers that need to block
    /// until tasks actually finish should poll `task_count()`.
    pub async fn stop_all(&self) -> usize {
        let tasks = self.running_tasks.read().await;
        let mut count = 0;
        for info in tasks.values() {
            if !info.cancel.is_cancelled() {
                info.cancel.cancel();
                count += 1;
            }
        }
        count
    }

    /// Run the subagent's LLM ↔ tool loop.
    ///
    /// Builds an isolated tool registry, runs the LLM ↔ tool loop until a
    /// final answer, max iterations, or cancellation, and returns the
    /// corresponding outcome.
    async fn run_subagent(&self, task_id: &str, task: &str, cancel: &CancellationToken) -> RunOutcome {
        info!(task_id = %task_id, "subagent starting");

        let mut tools = ToolRegistry::new();
        let allowed_dir = if self.restrict_to_workspace {
            Some(self.workspace.clone())
        } else {
            None
        };

        tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_dir)));
        tools.register(Arc::new(ExecTool::new(
            self.workspace.clone(),
            Some(self.exec_config.timeout),
            self.restrict_to_workspace,
        )));
        tools.register(Arc::new(WebSearchTool::new(self.brave_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));

        let system_prompt = self.build_subagent_prompt(task);
        let mut messages = vec![
            Message::System { content: system_prompt },
            Message::User {
                content: convoy_core::wire::MessageContent::Text(task.to_string()),
            },
        ];

        let tool_defs = tools.get_definitions();
        let ctx = ToolContext::new(format!("subagent:{task_id}"), self.workspace.clone(), "subagent", task_id);
        let max_iterations = self.config.max_iterations;

        for iteration in 0..max_iterations {
            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            debug!(task_id = %task_id, iteration = iteration, "subagent LLM call");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RunOutcome::Cancelled,
                r = self.provider.chat(&messages, Some(&tool_defs), &self.model, &self.request_config) => r,
            };

            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            if response.has_tool_calls() {
                let tool_calls: Vec<ToolCall> = response.tool_calls.clone();
                ContextBuilder::add_assistant_message(&mut messages, response.content.clone(), tool_calls.clone());

                for tc in &tool_calls {
                    if cancel.is_cancelled() {
                        return RunOutcome::Cancelled;
                    }
                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();

                    info!(task_id = %task_id, tool = %tc.function.name, iteration = iteration, "subagent executing tool");

                    let result = match tools.execute(&tc.function.name, params, &ctx).await {
                        Ok(r) => r,
                        Err(e) => e.to_string(),
                    };
                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);
                }
            } else {
                let result = response
                    .content
                    .unwrap_or_else(|| "Subagent completed processing but produced no output.".into());
                info!(task_id = %task_id, result_len = result.len(), "subagent finished");
                return RunOutcome::Completed(result);
            }
        }

        RunOutcome::Completed("Subagent completed processing but produced no output.".into())
    }

    /// Announce the subagent result back to the bus using the spec's fixed
    /// template. Never called for a cancelled run.
    #[allow(clippy::too_many_arguments)]
    async fn announce_result(
        &self,
        task_id: &str,
        label: &str,
        task: &str,
        succeeded: bool,
        result: &str,
        origin_session_id: &str,
        origin_channel: &str,
        origin_chat_id: &str,
    ) {
        let verdict = if succeeded { "completed successfully" } else { "failed" };
        let content = format!("[Subagent '{label}' {verdict}]\n\nTask: {task}\n\nResult:\n{result}");

        let msg = InboundMessage::new(origin_session_id, origin_channel, "subagent", origin_chat_id, content);

        info!(task_id = %task_id, succeeded = succeeded, "announcing subagent result");
        if let Err(e) = self.bus.publish_inbound(msg) {
            error!(task_id = %task_id, error = %e, "failed to announce subagent result");
        }
    }

    /// Build the subagent's system prompt.
    fn build_subagent_prompt(&self, task: &str) -> String {
        format!(
            "# Subagent\n\
             You are a subagent spawned by the main agent to complete a specific task.\n\n\
             ## Your Task\n\
             {task}\n\n\
             ## Rules\n\
             1. Stay focused — complete only the assigned task\n\
             2. Your final response will be reported back to the main agent\n\
             3. Do not initiate conversations or take on side tasks\n\
             4. Be concise but informative\n\n\
             ## What You Can Do\n\
             - Read and write files in the workspace\n\
             - List directory contents\n\
             - Execute shell commands\n\
             - Search the web and fetch web pages\n\n\
             ## What You Cannot Do\n\
             - Send messages directly to users (no message tool)\n\
             - Spawn other subagents\n\
             - Edit files in-place (use write_file to overwrite)\n\
             - Access the main agent's conversation history\n\n\
             ## Workspace\n\
             Your workspace is at: {workspace}",
            workspace = self.workspace.display()
        )
    }

    /// Get info about currently running tasks.
    pub async fn running_tasks(&self) -> Vec<TaskInfo> {
        let tasks = self.running_tasks.read().await;
        tasks.values().cloned().collect()
    }

    /// Get the number of tracked tasks (running or pending GC).
    pub async fn task_count(&self) -> usize {
        let tasks = self.running_tasks.read().await;
        tasks.len()
    }
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

/// Generate a short unique task ID (8 hex chars from timestamp + counter).
fn generate_task_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = nanos.wrapping_mul(6364136223846793005).wrapping_add(count as u64);
    format!("{:08x}", (mixed >> 32) as u32)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
