//! Session store — chain-safe transcript persistence and compaction.
//!
//! # Disk format
//!
//! Each session is a `.jsonl` file under `~/.convoy/sessions/`, one
//! [`crate::types::ChatMessage`] per line, append-only. A sibling
//! `.summary.json` holds the rolling compaction summary, and a `meta/`
//! directory holds one small JSON index record per session so listing and
//! per-user lookups never need to read a full transcript.

pub mod storage;
pub mod store;
pub mod types;

pub use storage::{JsonlSessionStorage, SessionStorage};
pub use store::SessionStore;
pub use types::{Session, SessionMeta, SessionSummary};
