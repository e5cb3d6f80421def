//! Core conversational data model.
//!
//! [`ChatMessage`] is the single representation the session store, agent loop
//! and compaction logic all operate on. It is deliberately flatter than the
//! wire format a given LLM provider expects — see [`crate::wire`] for the
//! OpenAI-compatible shape that providers actually send over HTTP.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a [`ChatMessage`] within a session transcript.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single turn in a session transcript.
///
/// Every message the session store accepts or returns is one of these —
/// there is no separate "wire" message type at this layer. `tool_calls` is
/// populated only on `Assistant` messages that requested tool execution;
/// `tool_call_id`/`tool_name` are populated only on `Tool` result messages.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Stable id, assigned by the session store when the message is appended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, String::new());
        msg.tool_calls = Some(tool_calls);
        msg
    }

    pub fn tool_result(tool_call_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg.tool_name = Some(tool_name.into());
        msg
    }

    fn new(role: Role, content: String) -> Self {
        ChatMessage {
            id: None,
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Whether this is an assistant message carrying one or more pending tool calls.
    pub fn is_tool_call_head(&self) -> bool {
        self.role == Role::Assistant
            && self
                .tool_calls
                .as_ref()
                .map(|calls| !calls.is_empty())
                .unwrap_or(false)
    }

    pub fn tool_call_count(&self) -> usize {
        self.tool_calls.as_ref().map(|c| c.len()).unwrap_or(0)
    }
}

// ─────────────────────────────────────────────
// Tool calls / definitions
// ─────────────────────────────────────────────

/// A tool call requested by the assistant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the JSON-encoded arguments string into a flat object map.
    ///
    /// Returns an empty map (rather than an error) for malformed or
    /// non-object argument payloads — callers treat a missing argument the
    /// same way as a malformed one.
    pub fn arguments_map(&self) -> HashMap<String, serde_json::Value> {
        serde_json::from_str::<serde_json::Value>(&self.function.arguments)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .map(|obj| obj.into_iter().collect())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, matching the wire format LLM providers use.
    pub arguments: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Error wrapper surfaced by the tool registry when a tool call cannot be
/// dispatched or fails during execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolExecutionError {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub message: String,
}

impl std::fmt::Display for ToolExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tool '{}' failed: {}", self.tool_name, self.message)
    }
}

impl std::error::Error for ToolExecutionError {}

// ─────────────────────────────────────────────
// LLM response
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageInfo>,
    pub reasoning_content: Option<String>,
}

impl LlmResponse {
    pub fn error(msg: impl Into<String>) -> Self {
        LlmResponse {
            content: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A media attachment carried by an inbound or outbound message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MediaAttachment {
    pub mime_type: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_message_has_no_tool_fields() {
        let msg = ChatMessage::user("hi");
        assert_eq!(msg.role, Role::User);
        assert!(msg.tool_calls.is_none());
        assert!(msg.tool_call_id.is_none());
    }

    #[test]
    fn assistant_tool_calls_is_detected_as_chain_head() {
        let calls = vec![ToolCall::new("call_1", "read_file", "{}")];
        let msg = ChatMessage::assistant_tool_calls(calls);
        assert!(msg.is_tool_call_head());
        assert_eq!(msg.tool_call_count(), 1);
    }

    #[test]
    fn assistant_text_message_is_not_chain_head() {
        let msg = ChatMessage::assistant("hello");
        assert!(!msg.is_tool_call_head());
    }

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let msg = ChatMessage::tool_result("call_1", "read_file", "contents");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.tool_name.as_deref(), Some("read_file"));
    }

    #[test]
    fn arguments_map_parses_object() {
        let call = ToolCall::new("1", "search", r#"{"query": "rust"}"#);
        let args = call.arguments_map();
        assert_eq!(args.get("query"), Some(&json!("rust")));
    }

    #[test]
    fn arguments_map_is_empty_on_malformed_json() {
        let call = ToolCall::new("1", "search", "not json");
        assert!(call.arguments_map().is_empty());
    }

    #[test]
    fn round_trips_through_json() {
        let mut msg = ChatMessage::assistant("done");
        msg.id = Some("m1".into());
        msg.metadata.insert("k".into(), "v".into());
        let s = serde_json::to_string(&msg).unwrap();
        let back: ChatMessage = serde_json::from_str(&s).unwrap();
        assert_eq!(back, msg);
    }
}
