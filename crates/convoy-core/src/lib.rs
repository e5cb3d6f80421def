//! Core data model, message bus, session store, and shared runtime
//! primitives for Convoy.
//!
//! This crate has no knowledge of LLM providers, tools, or transports — it
//! only defines the shapes and persistence those higher layers build on.

pub mod bus;
pub mod config;
pub mod error;
pub mod session;
pub mod tool_context;
pub mod types;
pub mod utils;
pub mod wire;

pub use bus::{InboundMessage, MessageBus, OutboundMessage, ProgressMessage, ProgressStep};
pub use config::{AgentLoopConfig, SchedulerConfig, SubagentConfig};
pub use error::{CoreError, CoreResult};
pub use session::{Session, SessionMeta, SessionStorage, SessionStore, SessionSummary};
pub use tool_context::ToolContext;
pub use types::{ChatMessage, FunctionCall, LlmResponse, Role, ToolCall, ToolDefinition, ToolExecutionError};
