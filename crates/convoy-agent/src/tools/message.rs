//! Message tool — lets the agent proactively send messages to channels.
//!
//! Targets the current conversation by default, but can address a different
//! channel/chat (or a different session entirely) so one conversation can
//! notify another user or space.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use convoy_core::bus::queue::MessageBus;
use convoy_core::bus::types::OutboundMessage;
use convoy_core::ToolContext;

use super::base::{optional_string, require_string, Tool};

// ─────────────────────────────────────────────
// MessageTool
// ─────────────────────────────────────────────

/// Allows the agent to send messages to channels.
///
/// Destination defaults to the calling turn's own channel/chat/session
/// (read from the `ToolContext` passed into `execute`); all three can be
/// overridden per call to reach a different conversation.
pub struct MessageTool {
    bus: Arc<MessageBus>,
}

impl MessageTool {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a channel. By default sends to the current conversation. \
         Can optionally target a different channel, chat_id, and session_id — \
         use this to notify another user or space."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message content to send"
                },
                "channel": {
                    "type": "string",
                    "description": "Target channel (optional, defaults to current)"
                },
                "chat_id": {
                    "type": "string",
                    "description": "Target chat ID (optional, defaults to current)"
                },
                "session_id": {
                    "type": "string",
                    "description": "Target session ID, for reaching a different conversation entirely (optional, defaults to current)"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let content = require_string(&params, "content")?;
        let channel = optional_string(&params, "channel").unwrap_or_else(|| ctx.channel.clone());
        let chat_id = optional_string(&params, "chat_id").unwrap_or_else(|| ctx.chat_id.clone());
        let session_id =
            optional_string(&params, "session_id").unwrap_or_else(|| ctx.session_id.clone());

        debug!(
            session_id = %session_id,
            channel = %channel,
            chat_id = %chat_id,
            "sending message via tool"
        );

        let msg = OutboundMessage::new(&session_id, &channel, &chat_id, &content);
        self.bus.publish_outbound(msg).await;

        Ok(format!("Message sent to {channel}:{chat_id}"))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_ctx() -> ToolContext {
        ToolContext::new("sess-default", std::env::temp_dir(), "discord", "guild_1")
    }

    #[test]
    fn test_tool_definition() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus);
        let def = tool.to_definition();
        assert_eq!(def.function.name, "message");
        assert_eq!(def.tool_type, "function");
    }

    #[tokio::test]
    async fn test_execute_no_handler_does_not_error() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus);
        let mut params = HashMap::new();
        params.insert("content".into(), json!("Hello from agent"));
        let result = tool.execute(params, &test_ctx()).await.unwrap();
        assert_eq!(result, "Message sent to discord:guild_1");
    }

    #[tokio::test]
    async fn test_execute_with_channel_override() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus);
        let mut params = HashMap::new();
        params.insert("content".into(), json!("Hello"));
        params.insert("channel".into(), json!("slack"));
        params.insert("chat_id".into(), json!("C12345"));
        let result = tool.execute(params, &test_ctx()).await.unwrap();
        assert_eq!(result, "Message sent to slack:C12345");
    }

    #[tokio::test]
    async fn test_execute_missing_content() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus);
        let params = HashMap::new();
        let result = tool.execute(params, &test_ctx()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_execute_dispatches_to_registered_handler() {
        let bus = Arc::new(MessageBus::new());
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        bus.register_outbound_handler(
            "slack",
            Arc::new(move |_msg| {
                let called = called_clone.clone();
                Box::pin(async move {
                    called.store(true, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .await;

        let tool = MessageTool::new(bus);
        let mut params = HashMap::new();
        params.insert("content".into(), json!("ping"));
        params.insert("channel".into(), json!("slack"));
        params.insert("chat_id".into(), json!("C1"));
        let result = tool.execute(params, &test_ctx()).await.unwrap();
        assert!(result.contains("Message sent"));
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_execute_cross_session_override() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus);
        let mut params = HashMap::new();
        params.insert("content".into(), json!("notifying another session"));
        params.insert("session_id".into(), json!("sess-other"));
        let result = tool.execute(params, &test_ctx()).await.unwrap();
        // Still addressed by channel:chat_id (unchanged), but routed under a
        // different session — covered indirectly since no handler is
        // registered and the call still succeeds.
        assert_eq!(result, "Message sent to discord:guild_1");
    }
}
