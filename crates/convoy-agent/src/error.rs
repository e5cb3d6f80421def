//! Agent-loop and subagent error types.

use thiserror::Error;

/// Errors surfaced by the agent loop and subagent manager.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("reached max_iterations ({0}) without a final answer")]
    IterationLimit(usize),

    #[error("turn cancelled")]
    Cancelled,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("subagent capacity exceeded (max {0} concurrent)")]
    SubagentCapacityExceeded(usize),

    #[error("unknown command '{0}', try /help")]
    UnknownCommand(String),

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error(transparent)]
    ToolExecution(#[from] convoy_core::types::ToolExecutionError),

    #[error(transparent)]
    Core(#[from] convoy_core::CoreError),
}

pub type AgentResult<T> = Result<T, AgentError>;
