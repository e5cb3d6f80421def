//! Session, summary, and index types.

use crate::types::ChatMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A rolling compaction summary replacing the oldest portion of a
/// session's transcript.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub content: String,
    /// Total number of head messages this summary accounts for, across all
    /// compaction rounds applied so far.
    pub compressed_count: usize,
    pub last_updated: DateTime<Utc>,
}

/// Lightweight index record — one per session, used for listing and
/// per-user lookups without loading the full transcript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub channel: String,
    pub chat_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub channel_data: HashMap<String, String>,
}

impl SessionMeta {
    pub fn new(id: impl Into<String>, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        let now = Utc::now();
        SessionMeta {
            id: id.into(),
            channel: channel.into(),
            chat_id: chat_id.into(),
            user_id: None,
            created_at: now,
            updated_at: now,
            channel_data: HashMap::new(),
        }
    }
}

/// A live session: its index record plus the in-memory tail of its
/// transcript (messages already folded into `summary` are not held here).
#[derive(Clone, Debug)]
pub struct Session {
    pub meta: SessionMeta,
    pub messages: Vec<ChatMessage>,
    pub summary: Option<SessionSummary>,
}

impl Session {
    pub fn new(id: impl Into<String>, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Session {
            meta: SessionMeta::new(id, channel, chat_id),
            messages: Vec::new(),
            summary: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }
}
