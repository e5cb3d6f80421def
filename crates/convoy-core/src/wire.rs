//! OpenAI-compatible wire format for talking to LLM providers.
//!
//! [`crate::types::ChatMessage`] is the session store's flat representation;
//! this module holds the tagged-enum shape providers actually serialize to
//! JSON, plus the conversion from one to the other.

use crate::types::{ChatMessage, Role, ToolCall, ToolDefinition, UsageInfo};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: MessageContent },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },

    #[serde(rename = "tool")]
    Tool { content: String, tool_call_id: String },
}

impl From<&ChatMessage> for Message {
    fn from(m: &ChatMessage) -> Self {
        match m.role {
            Role::System => Message::System {
                content: m.content.clone(),
            },
            Role::User => Message::User {
                content: MessageContent::Text(m.content.clone()),
            },
            Role::Assistant => {
                if let Some(calls) = m.tool_calls.clone().filter(|c| !c.is_empty()) {
                    Message::Assistant {
                        content: None,
                        tool_calls: Some(calls),
                        reasoning_content: None,
                    }
                } else {
                    Message::Assistant {
                        content: Some(m.content.clone()),
                        tool_calls: None,
                        reasoning_content: None,
                    }
                }
            }
            Role::Tool => Message::Tool {
                content: m.content.clone(),
                tool_call_id: m.tool_call_id.clone().unwrap_or_default(),
            },
        }
    }
}

/// Convert a full transcript of [`ChatMessage`] into wire messages.
pub fn to_wire_messages(messages: &[ChatMessage]) -> Vec<Message> {
    messages.iter().map(Message::from).collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: Option<String>,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

impl From<ChatCompletionResponse> for crate::types::LlmResponse {
    fn from(resp: ChatCompletionResponse) -> Self {
        use crate::types::LlmResponse;
        match resp.choices.into_iter().next() {
            Some(c) => LlmResponse {
                content: c.message.content,
                tool_calls: c.message.tool_calls.unwrap_or_default(),
                finish_reason: c.finish_reason,
                usage: resp.usage,
                reasoning_content: c.message.reasoning_content,
            },
            None => LlmResponse::error("No choices in response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_converts() {
        let cm = ChatMessage::system("be helpful");
        let wire = Message::from(&cm);
        assert!(matches!(wire, Message::System { content } if content == "be helpful"));
    }

    #[test]
    fn assistant_with_tool_calls_drops_content() {
        let cm = ChatMessage::assistant_tool_calls(vec![ToolCall::new("1", "x", "{}")]);
        let wire = Message::from(&cm);
        match wire {
            Message::Assistant { content, tool_calls, .. } => {
                assert!(content.is_none());
                assert_eq!(tool_calls.unwrap().len(), 1);
            }
            _ => panic!("expected assistant"),
        }
    }

    #[test]
    fn tool_message_carries_call_id() {
        let cm = ChatMessage::tool_result("call_9", "exec", "ok");
        let wire = Message::from(&cm);
        match wire {
            Message::Tool { tool_call_id, content } => {
                assert_eq!(tool_call_id, "call_9");
                assert_eq!(content, "ok");
            }
            _ => panic!("expected tool"),
        }
    }

    #[test]
    fn empty_choices_becomes_error_response() {
        let resp = ChatCompletionResponse {
            id: None,
            choices: vec![],
            usage: None,
        };
        let llm: crate::types::LlmResponse = resp.into();
        assert_eq!(llm.content.as_deref(), Some("No choices in response"));
    }
}
