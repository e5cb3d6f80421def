//! Message bus connecting transports, the scheduler, and subagents to the agent loop.

pub mod queue;
pub mod types;

pub use queue::{CancelHook, MessageBus, OutboundHandler, ProgressHandler};
pub use types::{InboundMessage, OutboundMessage, ProgressMessage, ProgressStep};
