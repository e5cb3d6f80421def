//! Per-invocation capability passed into every tool execution.
//!
//! Tools must never reach for ambient or externally-mutated state (a
//! `set_context`-style call made before execution, a module-level static) to
//! learn which session, workspace, or user they're acting on behalf of —
//! that information is only ever valid for the single call it was threaded
//! into. Passing it explicitly as a `ToolContext` argument makes concurrent
//! turns for different sessions safe to run side by side.

use std::path::PathBuf;

/// The identity and environment a single tool call executes within.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub session_id: String,
    pub workspace_dir: PathBuf,
    pub channel: String,
    pub chat_id: String,
    pub user_id: Option<String>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, workspace_dir: PathBuf, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        ToolContext {
            session_id: session_id.into(),
            workspace_dir,
            channel: channel.into(),
            chat_id: chat_id.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
