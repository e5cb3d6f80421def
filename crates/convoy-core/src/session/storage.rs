//! Pluggable persistence for the session store.
//!
//! The default implementation mirrors a well-worn pattern for small local
//! stores: one append-only JSONL file per session for messages, a sibling
//! JSON file for the rolling summary, and one JSON file per session under a
//! `meta/` directory for the index so metadata listing never has to read a
//! full transcript.

use super::types::{SessionMeta, SessionSummary};
use crate::types::ChatMessage;
use crate::utils;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// Narrow persistence interface the session store talks to. Kept separate
/// from `SessionStore` so the on-disk layout can be swapped (e.g. for an
/// in-memory fake in tests) without touching compaction or chain-safety
/// logic.
pub trait SessionStorage: Send + Sync {
    fn load_all_session_metas(&self) -> io::Result<Vec<SessionMeta>>;
    fn save_session_meta(&self, meta: &SessionMeta) -> io::Result<()>;
    fn append_message(&self, session_id: &str, msg: &ChatMessage) -> io::Result<()>;
    fn load_messages(&self, session_id: &str) -> io::Result<Vec<ChatMessage>>;
    fn clear_messages(&self, session_id: &str) -> io::Result<()>;
    fn load_summary(&self, session_id: &str) -> io::Result<Option<SessionSummary>>;
    fn save_summary(&self, session_id: &str, summary: &SessionSummary) -> io::Result<()>;
    fn clear_summary(&self, session_id: &str) -> io::Result<()>;
}

/// JSONL-on-disk implementation rooted at `~/.convoy/sessions/` by default.
pub struct JsonlSessionStorage {
    root: PathBuf,
}

impl JsonlSessionStorage {
    pub fn new(root: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(root.join("meta"))?;
        Ok(JsonlSessionStorage { root })
    }

    fn messages_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", utils::safe_filename(session_id)))
    }

    fn summary_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.summary.json", utils::safe_filename(session_id)))
    }

    fn meta_path(&self, session_id: &str) -> PathBuf {
        self.root.join("meta").join(format!("{}.json", utils::safe_filename(session_id)))
    }
}

impl SessionStorage for JsonlSessionStorage {
    fn load_all_session_metas(&self) -> io::Result<Vec<SessionMeta>> {
        let mut metas = Vec::new();
        let dir = self.root.join("meta");
        if !dir.exists() {
            return Ok(metas);
        }
        for entry in fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(meta) = serde_json::from_str::<SessionMeta>(&content) {
                    metas.push(meta);
                }
            }
        }
        Ok(metas)
    }

    fn save_session_meta(&self, meta: &SessionMeta) -> io::Result<()> {
        let path = self.meta_path(&meta.id);
        fs::write(path, serde_json::to_string_pretty(meta)?)
    }

    fn append_message(&self, session_id: &str, msg: &ChatMessage) -> io::Result<()> {
        let path = self.messages_path(session_id);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(msg)?)
    }

    fn load_messages(&self, session_id: &str) -> io::Result<Vec<ChatMessage>> {
        let path = self.messages_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path)?;
        let reader = io::BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(msg) = serde_json::from_str::<ChatMessage>(&line) {
                out.push(msg);
            }
        }
        Ok(out)
    }

    fn clear_messages(&self, session_id: &str) -> io::Result<()> {
        let path = self.messages_path(session_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn load_summary(&self, session_id: &str) -> io::Result<Option<SessionSummary>> {
        let path = self.summary_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content).ok())
    }

    fn save_summary(&self, session_id: &str, summary: &SessionSummary) -> io::Result<()> {
        let path = self.summary_path(session_id);
        fs::write(path, serde_json::to_string_pretty(summary)?)
    }

    fn clear_summary(&self, session_id: &str) -> io::Result<()> {
        let path = self.summary_path(session_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
