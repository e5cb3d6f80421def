//! Messages flowing across the bus between transports and the agent loop.

use crate::types::MediaAttachment;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// An inbound message handed to the bus by a transport (or synthesized by
/// the scheduler / a subagent announcement).
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Opaque session identifier this message belongs to.
    pub session_id: String,
    /// Transport name (e.g. "cli", "scheduler", "subagent").
    pub channel: String,
    /// Sender identifier within the transport.
    pub sender_id: String,
    /// Chat/conversation identifier within the transport.
    pub chat_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub media: Vec<MediaAttachment>,
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        session_id: impl Into<String>,
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            session_id: session_id.into(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A reply from the agent loop to a transport.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub session_id: String,
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub media: Vec<MediaAttachment>,
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    pub fn new(session_id: impl Into<String>, channel: impl Into<String>, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        OutboundMessage {
            session_id: session_id.into(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A step tag describing what kind of progress a [`ProgressMessage`] reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressStep {
    /// The agent loop started processing a turn.
    TurnStarted,
    /// The assistant produced inline text alongside tool calls.
    LlmResponse,
    /// The model requested a tool call.
    ToolStarted,
    /// A tool call finished.
    ToolFinished,
    /// A subagent was spawned.
    SubagentSpawned,
}

/// A best-effort, non-authoritative progress notification emitted while a
/// turn is in flight. Delivery is fire-and-forget — nothing blocks on it and
/// a dropped progress message is never retried.
#[derive(Clone, Debug)]
pub struct ProgressMessage {
    pub session_id: String,
    pub channel: String,
    pub chat_id: String,
    pub step: ProgressStep,
    /// Monotonically increasing within a turn (starts at 0).
    pub iteration: usize,
    pub tool_name: Option<String>,
    pub detail: String,
    /// Set on a `ToolFinished` step when the tool call failed.
    pub is_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_message_carries_session_id() {
        let msg = InboundMessage::new("sess-1", "cli", "local", "default", "hi");
        assert_eq!(msg.session_id, "sess-1");
        assert_eq!(msg.channel, "cli");
    }

    #[test]
    fn outbound_message_defaults() {
        let msg = OutboundMessage::new("sess-1", "cli", "default", "hello back");
        assert!(msg.reply_to.is_none());
        assert!(msg.media.is_empty());
    }
}
