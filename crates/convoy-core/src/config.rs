//! Ambient runtime knobs.
//!
//! Loading these from a config file or environment is out of scope here —
//! callers construct these structs directly (the CLI binary's `main` is the
//! natural place to do that) — but the knobs themselves, and their
//! defaults, are first-class so the agent loop, subagent manager, and
//! scheduler don't hardcode magic numbers inline.

/// Concurrency and history knobs for the agent loop.
#[derive(Clone, Debug)]
pub struct AgentLoopConfig {
    /// Maximum number of turns processed concurrently across all sessions.
    pub max_concurrent_messages: usize,
    /// Messages kept in the model-visible window before compaction kicks in.
    pub memory_window: usize,
    /// Messages a compaction pass keeps verbatim (the rest become summary).
    pub compaction_keep_recent: usize,
    /// Model tool-calling round trips allowed before a turn is forced to stop.
    pub max_iterations: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        AgentLoopConfig {
            max_concurrent_messages: 8,
            memory_window: 50,
            compaction_keep_recent: 20,
            max_iterations: 20,
        }
    }
}

/// Knobs for the subagent manager.
#[derive(Clone, Debug)]
pub struct SubagentConfig {
    pub max_concurrent: usize,
    pub max_iterations: usize,
    /// How long a finished subagent's record is kept around before GC, so a
    /// racing cancellation request still finds it.
    pub retention_secs: u64,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        SubagentConfig {
            max_concurrent: 4,
            max_iterations: 15,
            retention_secs: 60,
        }
    }
}

/// Knobs for the scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub max_tasks_per_session: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { max_tasks_per_session: 20 }
    }
}
