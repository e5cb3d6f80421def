//! Agent loop — the LLM ↔ tool-calling main loop.
//!
//! Receives inbound messages, builds context, calls the LLM, dispatches
//! tool calls, and publishes outbound responses. Enforces per-session FIFO
//! ordering, a global concurrency cap, cooperative cancellation, and the
//! `/`-command surface ahead of the LLM loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use convoy_core::bus::queue::MessageBus;
use convoy_core::bus::types::{InboundMessage, OutboundMessage, ProgressMessage, ProgressStep};
use convoy_core::session::storage::JsonlSessionStorage;
use convoy_core::session::store::SessionStore;
use convoy_core::types::ToolCall;
use convoy_core::wire::Message;
use convoy_core::AgentLoopConfig;
use convoy_cron::CronService;
use convoy_providers::traits::{LlmProvider, LlmRequestConfig};

use crate::context::{ContextBuilder, SpaceContext};
use crate::subagent::SubagentManager;
use crate::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use crate::tools::message::MessageTool;
use crate::tools::registry::ToolRegistry;
use crate::tools::schedule::ScheduleTool;
use crate::tools::shell::ExecTool;
use crate::tools::spawn::SpawnTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};
use convoy_core::{SubagentConfig, ToolContext};

/// Configuration for the exec tool.
#[derive(Clone, Debug)]
pub struct ExecToolConfig {
    /// Timeout in seconds (default 60).
    pub timeout: u64,
}

impl Default for ExecToolConfig {
    fn default() -> Self {
        Self { timeout: 60 }
    }
}

// ─────────────────────────────────────────────
// Per-session dispatch state
// ─────────────────────────────────────────────

/// Tracks the FIFO chain lock and outstanding cancellation handles for one
/// session. The mutex's fairness (FIFO-ordered waiters) is what gives the
/// per-session ordering guarantee; no suspension point occurs between
/// reading/installing this entry and the caller's first await.
struct SessionQueueState {
    chain: Arc<AsyncMutex<()>>,
    tokens: Vec<(u64, CancellationToken)>,
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The main agent loop: polls the message bus, calls the LLM, dispatches tools.
pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    workspace: PathBuf,
    model: String,
    config: AgentLoopConfig,
    request_config: LlmRequestConfig,
    tools: ToolRegistry,
    context: ContextBuilder,
    sessions: Arc<SessionStore>,
    subagent_manager: Arc<SubagentManager>,
    /// Global concurrency gate, sized `config.max_concurrent_messages`.
    capacity: Arc<Semaphore>,
    /// Per-session FIFO + cancellation bookkeeping.
    dispatch: StdMutex<HashMap<String, SessionQueueState>>,
    agent_name: String,
}

impl AgentLoop {
    /// Create a new agent loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        workspace: PathBuf,
        model: Option<String>,
        config: Option<AgentLoopConfig>,
        request_config: Option<LlmRequestConfig>,
        brave_api_key: Option<String>,
        exec_config: Option<ExecToolConfig>,
        restrict_to_workspace: bool,
        sessions: Option<Arc<SessionStore>>,
        agent_name: Option<String>,
        cron: Option<Arc<CronService>>,
    ) -> Self {
        let model = model.unwrap_or_else(|| provider.default_model().to_string());
        let config = config.unwrap_or_default();
        let request_config = request_config.unwrap_or_default();
        let exec_config = exec_config.unwrap_or_default();
        let agent_name = agent_name.unwrap_or_else(|| "Convoy".into());
        let sessions = sessions.unwrap_or_else(|| {
            let storage = JsonlSessionStorage::new(workspace.join("sessions"))
                .expect("failed to initialize session storage");
            Arc::new(SessionStore::new(Arc::new(storage)))
        });

        let context = ContextBuilder::new(&workspace, &agent_name);

        let mut tools = ToolRegistry::new();
        let allowed_dir = if restrict_to_workspace {
            Some(workspace.clone())
        } else {
            None
        };

        tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
        tools.register(Arc::new(ListDirTool::new(allowed_dir)));
        tools.register(Arc::new(ExecTool::new(
            workspace.clone(),
            Some(exec_config.timeout),
            restrict_to_workspace,
        )));
        tools.register(Arc::new(WebSearchTool::new(brave_api_key.clone())));
        tools.register(Arc::new(WebFetchTool::new()));

        let message_tool = Arc::new(MessageTool::new(bus.clone()));
        tools.register(message_tool);

        let subagent_config = SubagentConfig::default();
        let subagent_manager = Arc::new(SubagentManager::new(
            provider.clone(),
            workspace.clone(),
            bus.clone(),
            model.clone(),
            brave_api_key,
            exec_config,
            restrict_to_workspace,
            request_config.clone(),
            subagent_config,
        ));

        let spawn_tool = Arc::new(SpawnTool::new(subagent_manager.clone()));
        tools.register(spawn_tool);

        if let Some(cron_service) = cron {
            tools.register(Arc::new(ScheduleTool::new(cron_service)));
        }

        info!(
            model = %model,
            tools = tools.len(),
            max_iterations = config.max_iterations,
            max_concurrent_messages = config.max_concurrent_messages,
            "agent loop initialized"
        );

        let capacity = Arc::new(Semaphore::new(config.max_concurrent_messages));

        Self {
            bus,
            provider,
            workspace,
            model,
            config,
            request_config,
            tools,
            context,
            sessions,
            subagent_manager,
            capacity,
            dispatch: StdMutex::new(HashMap::new()),
            agent_name,
        }
    }

    /// Install the loop's cancellation hook on the bus and run the
    /// dispatch loop. Returns once the inbound channel closes.
    pub async fn run(self: &Arc<Self>) {
        let me = Arc::clone(self);
        self.bus
            .on_session_cancel(Arc::new(move |session_id: &str| {
                me.cancel_session_sync(session_id);
            }))
            .await;

        info!("agent loop started, waiting for messages");
        loop {
            match self.bus.recv_inbound().await {
                Some(msg) => {
                    let me = Arc::clone(self);
                    tokio::spawn(async move { me.dispatch_message(msg).await });
                }
                None => {
                    info!("inbound channel closed, agent loop exiting");
                    break;
                }
            }
        }
    }

    /// Cancel every queued/in-flight turn for a session. Synchronous because
    /// the bus's cancel hook is a plain `Fn(&str)`.
    fn cancel_session_sync(&self, session_id: &str) {
        let table = self.dispatch.lock().unwrap();
        if let Some(state) = table.get(session_id) {
            for (_, token) in &state.tokens {
                token.cancel();
            }
        }
    }

    /// Register this turn in the per-session FIFO chain, returning the
    /// chain mutex to acquire, this turn's cancellation token, and the id
    /// used to find it again in `finish_turn` (tokens aren't comparable).
    fn enqueue_turn(&self, session_id: &str) -> (Arc<AsyncMutex<()>>, CancellationToken, u64) {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);

        let token = CancellationToken::new();
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let mut table = self.dispatch.lock().unwrap();
        let state = table.entry(session_id.to_string()).or_insert_with(|| SessionQueueState {
            chain: Arc::new(AsyncMutex::new(())),
            tokens: Vec::new(),
        });
        state.tokens.push((id, token.clone()));
        (state.chain.clone(), token, id)
    }

    /// Drop this turn's token from the session's tracked set once it settles.
    fn finish_turn(&self, session_id: &str, id: u64) {
        let mut table = self.dispatch.lock().unwrap();
        if let Some(state) = table.get_mut(session_id) {
            state.tokens.retain(|(tid, _)| *tid != id);
            if state.tokens.is_empty() {
                table.remove(session_id);
            }
        }
    }

    /// Full per-message pipeline: FIFO chain, semaphore, cancellation
    /// rechecks, command dispatch or LLM loop, outbound reply, compaction.
    async fn dispatch_message(&self, msg: InboundMessage) {
        let session_id = msg.session_id.clone();
        let (chain, token, turn_id) = self.enqueue_turn(&session_id);

        let _chain_guard = chain.lock().await;

        if token.is_cancelled() {
            self.finish_turn(&session_id, turn_id);
            return;
        }

        let Ok(_permit) = self.capacity.acquire().await else {
            self.finish_turn(&session_id, turn_id);
            return;
        };

        if token.is_cancelled() {
            self.publish_cancelled_reply(&msg).await;
            self.finish_turn(&session_id, turn_id);
            return;
        }

        let result = self.process_message(&msg, &token).await;

        match result {
            Ok(Some(response)) => {
                self.bus.publish_outbound(response).await;
            }
            Ok(None) => {
                // Cancelled mid-turn: spec says no user-visible text beyond
                // the /stop acknowledgement, which process_message already sent.
            }
            Err(e) => {
                error!(error = %e, session_id = %session_id, "message processing error");
                let err_msg = OutboundMessage::new(&session_id, &msg.channel, &msg.chat_id, format!("\u{274c} {e}"));
                self.bus.publish_outbound(err_msg).await;
            }
        }

        self.finish_turn(&session_id, turn_id);

        // Asynchronous post-turn compaction, fire-and-forget.
        self.maybe_compact(&session_id).await;
    }

    async fn publish_cancelled_reply(&self, msg: &InboundMessage) {
        let reply = OutboundMessage::new(&msg.session_id, &msg.channel, &msg.chat_id, "[Session cancelled]");
        self.bus.publish_outbound(reply).await;
    }

    /// Process a single inbound message → outbound response.
    ///
    /// Returns `Ok(None)` if the turn was cancelled partway through (no
    /// user-visible reply beyond whatever a `/stop` handler already sent).
    async fn process_message(
        &self,
        msg: &InboundMessage,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        let session = self.sessions.get_or_create(&msg.session_id, &msg.channel, &msg.chat_id).await;

        // Bind user identity: scheduler-originated messages carry their
        // creator in metadata; otherwise derive a stable identity from
        // (channel, sender) on first contact.
        if session.meta.user_id.is_none() {
            let user_id = msg
                .metadata
                .get("creator_user_id")
                .cloned()
                .unwrap_or_else(|| format!("{}:{}", msg.channel, msg.sender_id));
            self.sessions.set_session_user(&msg.session_id, user_id).await;
        }

        if let Some(command) = msg.content.strip_prefix('/') {
            let reply = self.handle_command(msg, command).await;
            return Ok(Some(reply));
        }

        let ctx = ToolContext::new(msg.session_id.clone(), self.workspace.clone(), msg.channel.clone(), msg.chat_id.clone());

        let history = self.sessions.get_history(&msg.session_id, self.config.memory_window).await;
        let media_paths: Vec<String> = msg.media.iter().map(|m| m.path.clone()).collect();
        let space = self.load_space_context(&msg.session_id).await;
        let mut messages = self.context.build_messages(&history, &msg.content, &media_paths, &msg.channel, &msg.chat_id, space.as_ref());

        self.sessions
            .add_message(&msg.session_id, convoy_core::types::ChatMessage::user(&msg.content))
            .await?;

        let tool_defs = self.tools.get_definitions();
        let mut final_content: Option<String> = None;

        for iteration in 0..self.config.max_iterations {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            self.bus
                .publish_progress(ProgressMessage {
                    session_id: msg.session_id.clone(),
                    channel: msg.channel.clone(),
                    chat_id: msg.chat_id.clone(),
                    step: ProgressStep::TurnStarted,
                    iteration,
                    tool_name: None,
                    detail: "thinking".into(),
                    is_error: false,
                })
                .await;

            debug!(iteration = iteration, session_id = %msg.session_id, "LLM call");
            let response = self.provider.chat(&messages, Some(&tool_defs), &self.model, &self.request_config).await;

            if cancel.is_cancelled() {
                return Ok(None);
            }

            if response.has_tool_calls() {
                let tool_calls: Vec<ToolCall> = response.tool_calls.clone();

                if let Some(text) = response.content.clone().filter(|c| !c.trim().is_empty()) {
                    self.bus
                        .publish_progress(ProgressMessage {
                            session_id: msg.session_id.clone(),
                            channel: msg.channel.clone(),
                            chat_id: msg.chat_id.clone(),
                            step: ProgressStep::LlmResponse,
                            iteration,
                            tool_name: None,
                            detail: text,
                            is_error: false,
                        })
                        .await;
                }

                ContextBuilder::add_assistant_message(&mut messages, response.content.clone(), tool_calls.clone());

                self.sessions
                    .add_message(&msg.session_id, convoy_core::types::ChatMessage::assistant_tool_calls(tool_calls.clone()))
                    .await?;

                for tc in &tool_calls {
                    if cancel.is_cancelled() {
                        return Ok(None);
                    }

                    self.bus
                        .publish_progress(ProgressMessage {
                            session_id: msg.session_id.clone(),
                            channel: msg.channel.clone(),
                            chat_id: msg.chat_id.clone(),
                            step: ProgressStep::ToolStarted,
                            iteration,
                            tool_name: Some(tc.function.name.clone()),
                            detail: "executing".into(),
                            is_error: false,
                        })
                        .await;

                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();

                    info!(tool = %tc.function.name, iteration = iteration, session_id = %msg.session_id, "executing tool call");
                    let (result, is_error) = match self.tools.execute(&tc.function.name, params, &ctx).await {
                        Ok(r) => (r, false),
                        Err(e) => (e.to_string(), true),
                    };

                    self.bus
                        .publish_progress(ProgressMessage {
                            session_id: msg.session_id.clone(),
                            channel: msg.channel.clone(),
                            chat_id: msg.chat_id.clone(),
                            step: ProgressStep::ToolFinished,
                            iteration,
                            tool_name: Some(tc.function.name.clone()),
                            detail: result.clone(),
                            is_error,
                        })
                        .await;

                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);
                    self.sessions
                        .add_message(&msg.session_id, convoy_core::types::ChatMessage::tool_result(&tc.id, &tc.function.name, &result))
                        .await?;
                }
            } else {
                final_content = response.content;
                break;
            }
        }

        let content = match final_content {
            Some(c) => c,
            None => {
                let err = format!("I reached my iteration limit ({}) without a final answer.", self.config.max_iterations);
                warn!(session_id = %msg.session_id, "iteration limit reached");
                self.sessions
                    .add_message(&msg.session_id, convoy_core::types::ChatMessage::assistant(&err))
                    .await?;
                return Ok(Some(OutboundMessage::new(&msg.session_id, &msg.channel, &msg.chat_id, err)));
            }
        };

        self.sessions
            .add_message(&msg.session_id, convoy_core::types::ChatMessage::assistant(&content))
            .await?;

        Ok(Some(OutboundMessage::new(&msg.session_id, &msg.channel, &msg.chat_id, content)))
    }

    /// Load the Space block for a session, if one is bound via channel_data.
    async fn load_space_context(&self, session_id: &str) -> Option<SpaceContext> {
        let session = self.sessions.get_or_create(session_id, "unknown", "unknown").await;
        let name = session.meta.channel_data.get("space_name")?.clone();
        let notes = session.meta.channel_data.get("space_notes").cloned().unwrap_or_default();
        Some(SpaceContext { name, notes })
    }

    /// Dispatch a `/`-command. Always returns a reply; never enters the LLM loop.
    async fn handle_command(&self, msg: &InboundMessage, command: &str) -> OutboundMessage {
        let mut parts = command.trim().splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or("").to_lowercase();
        let rest = parts.next().unwrap_or("").trim();

        let reply = match verb.as_str() {
            "help" => self.cmd_help(),
            "about" => format!("{} — an agent runtime built on convoy-core.", self.agent_name),
            "clear" => {
                self.sessions.clear_session(&msg.session_id).await;
                "Session history cleared.".to_string()
            }
            "tools" => {
                let names = self.tools.tool_names();
                format!("Available tools: {}", names.join(", "))
            }
            "status" => {
                format!(
                    "Model: {}\nMax iterations: {}\nMax concurrent messages: {}\nActive subagents: {}",
                    self.model,
                    self.config.max_iterations,
                    self.config.max_concurrent_messages,
                    self.subagent_manager.task_count().await
                )
            }
            "stop" => {
                self.cancel_session_sync(&msg.session_id);
                let cancelled_subagents = self.subagent_manager.cancel_by_session(&msg.session_id).await;
                format!("Stopping. Cancelled {cancelled_subagents} subagent task(s).")
            }
            "whoami" => {
                let session = self.sessions.get_or_create(&msg.session_id, &msg.channel, &msg.chat_id).await;
                match session.meta.user_id {
                    Some(uid) => format!("You are: {uid}"),
                    None => "No identity bound to this session yet.".to_string(),
                }
            }
            "link" => {
                if rest.is_empty() {
                    "Usage: /link <user-id>".to_string()
                } else {
                    let session = self.sessions.get_or_create(&msg.session_id, &msg.channel, &msg.chat_id).await;
                    if let Some(current) = session.meta.user_id {
                        let moved = self.sessions.migrate_sessions_user(&current, rest).await;
                        format!("Linked. {moved} session(s) moved to '{rest}'.")
                    } else {
                        self.sessions.set_session_user(&msg.session_id, rest.to_string()).await;
                        format!("Linked this session to '{rest}'.")
                    }
                }
            }
            "unlink" => {
                let fresh = format!("{}:{}", msg.channel, msg.sender_id);
                self.sessions.set_session_user(&msg.session_id, fresh.clone()).await;
                format!("Unlinked. Reverted to '{fresh}'.")
            }
            "space" => self.cmd_space(msg, rest).await,
            other => format!("Unknown command '/{other}'. Try /help."),
        };

        OutboundMessage::new(&msg.session_id, &msg.channel, &msg.chat_id, reply)
    }

    async fn cmd_space(&self, msg: &InboundMessage, rest: &str) -> String {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let sub = parts.next().unwrap_or("").to_lowercase();
        let arg = parts.next().unwrap_or("").trim();

        match sub.as_str() {
            "set" => {
                if arg.is_empty() {
                    "Usage: /space set <name> [notes...]".to_string()
                } else {
                    let mut name_and_notes = arg.splitn(2, char::is_whitespace);
                    let name = name_and_notes.next().unwrap_or("").to_string();
                    let notes = name_and_notes.next().unwrap_or("").to_string();
                    self.sessions.set_session_channel_data(&msg.session_id, "space_name", name.clone()).await;
                    self.sessions.set_session_channel_data(&msg.session_id, "space_notes", notes).await;
                    format!("Space set to '{name}'.")
                }
            }
            "clear" => {
                self.sessions.set_session_channel_data(&msg.session_id, "space_name", "").await;
                self.sessions.set_session_channel_data(&msg.session_id, "space_notes", "").await;
                "Space cleared.".to_string()
            }
            "show" | "" => match self.load_space_context(&msg.session_id).await {
                Some(space) if !space.name.is_empty() => format!("Space: {}\n{}", space.name, space.notes),
                _ => "No space bound to this session.".to_string(),
            },
            other => format!("Unknown /space subcommand '{other}'. Try: set, clear, show."),
        }
    }

    fn cmd_help(&self) -> String {
        "Commands:\n\
         /help — show this message\n\
         /about — what is this agent\n\
         /clear — clear this session's history\n\
         /tools — list available tools\n\
         /status — show runtime status\n\
         /stop — cancel the in-flight turn and any running subagents\n\
         /whoami — show the identity bound to this session\n\
         /link <user-id> — link this session to an identity\n\
         /unlink — revert to this channel's default identity\n\
         /space <set|clear|show> — manage this session's bound Space"
            .to_string()
    }

    /// Compact a session's history if it has grown past `memory_window`.
    async fn maybe_compact(&self, session_id: &str) {
        let Some(to_compress) = self.sessions.get_messages_to_compress(session_id, self.config.compaction_keep_recent).await else {
            return;
        };
        if to_compress.is_empty() {
            return;
        }

        let summary_prompt = format!(
            "Summarize the following conversation excerpt concisely, preserving facts and decisions:\n\n{}",
            to_compress
                .iter()
                .map(|m| format!("{:?}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n")
        );

        let summary_messages = vec![Message::User {
            content: convoy_core::wire::MessageContent::Text(summary_prompt),
        }];
        let summary_config = LlmRequestConfig {
            max_tokens: 512,
            temperature: 0.2,
        };

        let summary_text = {
            let response = self.provider.chat(&summary_messages, None, &self.model, &summary_config).await;
            response.content.unwrap_or_else(|| deterministic_summary(&to_compress))
        };

        let count = to_compress.len();
        self.sessions.apply_compression(session_id, summary_text, count).await;
        debug!(session_id = %session_id, compressed = count, "session compacted");
    }

    /// Direct processing mode (CLI entry point).
    pub async fn process_direct(&self, text: &str) -> anyhow::Result<String> {
        let msg = InboundMessage::new("cli-direct", "cli", "user", "direct", text);
        let token = CancellationToken::new();
        match self.process_message(&msg, &token).await? {
            Some(response) => Ok(response.content),
            None => Ok("[Session cancelled]".into()),
        }
    }

    /// Get a reference to the tool registry (for testing/extension).
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get a reference to the subagent manager (for testing/extension).
    pub fn subagent_manager(&self) -> &Arc<SubagentManager> {
        &self.subagent_manager
    }
}

/// One-line-per-message fallback summary, used when the provider call for
/// compaction fails.
fn deterministic_summary(messages: &[convoy_core::types::ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| matches!(m.role, convoy_core::types::Role::User | convoy_core::types::Role::Assistant))
        .map(|m| {
            let snippet: String = m.content.chars().take(120).collect();
            format!("- {:?}: {snippet}", m.role)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
