//! Session store: in-memory cache over pluggable [`SessionStorage`], with
//! chain-safe compaction boundaries and cold-start replay.

use super::storage::SessionStorage;
use super::types::{Session, SessionMeta, SessionSummary};
use crate::error::CoreResult;
use crate::types::{ChatMessage, Role};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        SessionStore {
            storage,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get an existing session or create one, replaying it from disk
    /// (summary + messages past the summary's `compressed_count`) on first
    /// touch this process.
    ///
    /// A session already cached under a placeholder `"unknown"` channel
    /// (e.g. one created by `add_message` before the transport's first
    /// inbound message arrived) is upgraded in place to the real
    /// `channel`/`chat_id` passed in here.
    pub async fn get_or_create(&self, session_id: &str, channel: &str, chat_id: &str) -> Session {
        {
            let mut cache = self.cache.write().await;
            if let Some(session) = cache.get_mut(session_id) {
                if session.meta.channel == "unknown" && channel != "unknown" {
                    session.meta.channel = channel.to_string();
                    session.meta.chat_id = chat_id.to_string();
                    session.meta.updated_at = Utc::now();
                    if let Err(e) = self.storage.save_session_meta(&session.meta) {
                        warn!(session_id, error = %e, "failed to persist upgraded session meta");
                    }
                }
                return session.clone();
            }
        }

        let mut session = Session::new(session_id, channel, chat_id);
        let summary = self.storage.load_summary(session_id).ok().flatten();
        let all_messages = self.storage.load_messages(session_id).unwrap_or_default();
        let skip = summary.as_ref().map(|s| s.compressed_count).unwrap_or(0).min(all_messages.len());
        session.messages = all_messages.into_iter().skip(skip).collect();
        session.summary = summary;

        if let Ok(metas) = self.storage.load_all_session_metas() {
            if let Some(existing) = metas.into_iter().find(|m| m.id == session_id) {
                session.meta = existing;
            }
        }

        self.cache.write().await.insert(session_id.to_string(), session.clone());
        session
    }

    /// Append a message, assigning it a stable id if it doesn't have one.
    ///
    /// Persisting the message is fatal for the turn: a disk or IO failure is
    /// surfaced to the caller rather than swallowed, so a turn never
    /// proceeds believing a message was saved when it wasn't. The message is
    /// only added to the in-memory cache once it's durably on disk, keeping
    /// the two in sync. Failing to persist the session's *metadata*
    /// afterward is not fatal — it's secondary bookkeeping, logged and
    /// swallowed like other housekeeping writes in this store.
    pub async fn add_message(&self, session_id: &str, mut msg: ChatMessage) -> CoreResult<ChatMessage> {
        if msg.id.is_none() {
            msg.id = Some(uuid::Uuid::new_v4().to_string());
        }

        self.storage.append_message(session_id, &msg)?;

        let mut cache = self.cache.write().await;
        let session = cache
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, "unknown", "unknown"));
        session.messages.push(msg.clone());
        session.meta.updated_at = Utc::now();

        if let Err(e) = self.storage.save_session_meta(&session.meta) {
            warn!(session_id, error = %e, "failed to persist session meta");
        }
        Ok(msg)
    }

    /// The window of recent messages to hand the model, sanitised so it
    /// never begins mid tool-call chain (a leading `tool` message with no
    /// preceding assistant head in the window would be meaningless to a
    /// provider, which expects every tool result immediately preceded by its
    /// call).
    ///
    /// If the session carries a compaction summary, it's prepended as a
    /// synthetic `system` message carrying the summarized context that has
    /// since been dropped from the in-memory log — one slot of `window` is
    /// reserved for it so the total returned never exceeds `window + 1`.
    pub async fn get_history(&self, session_id: &str, window: usize) -> Vec<ChatMessage> {
        let cache = self.cache.read().await;
        let Some(session) = cache.get(session_id) else {
            return Vec::new();
        };

        let summary_msg = session.summary.as_ref().map(|s| ChatMessage::system(&s.content));
        let message_window = if summary_msg.is_some() { window.saturating_sub(1) } else { window };

        let len = session.messages.len();
        let mut start = if len > message_window { len - message_window } else { 0 };
        while start < len && session.messages[start].role == Role::Tool {
            start += 1;
        }

        summary_msg.into_iter().chain(session.messages[start..].iter().cloned()).collect()
    }

    /// Compute the head slice eligible for compaction, or `None` if there
    /// are fewer than `keep_recent` messages (nothing to compact) or the
    /// entire log is one unbroken chain (unusual, but possible for a
    /// long-running tool loop).
    pub async fn get_messages_to_compress(&self, session_id: &str, keep_recent: usize) -> Option<Vec<ChatMessage>> {
        let cache = self.cache.read().await;
        let session = cache.get(session_id)?;
        let boundary = safe_compress_boundary(&session.messages, keep_recent)?;
        Some(session.messages[..boundary].to_vec())
    }

    /// Replace the compacted head with `summary_text`, dropping
    /// `compressed_count` messages from the front of the in-memory log and
    /// accumulating the running total on the persisted summary. The
    /// on-disk transcript itself is left untouched — only `clear_session`
    /// truncates it.
    pub async fn apply_compression(&self, session_id: &str, summary_text: String, compressed_count: usize) {
        let mut cache = self.cache.write().await;
        let Some(session) = cache.get_mut(session_id) else {
            return;
        };
        let drop_n = compressed_count.min(session.messages.len());
        session.messages.drain(..drop_n);

        let total = session.summary.as_ref().map(|s| s.compressed_count).unwrap_or(0) + compressed_count;
        let summary = SessionSummary {
            content: summary_text,
            compressed_count: total,
            last_updated: Utc::now(),
        };
        if let Err(e) = self.storage.save_summary(session_id, &summary) {
            warn!(session_id, error = %e, "failed to persist session summary");
        }
        session.summary = Some(summary);
    }

    pub async fn clear_session(&self, session_id: &str) {
        if let Some(session) = self.cache.write().await.get_mut(session_id) {
            session.messages.clear();
            session.summary = None;
            session.meta.updated_at = Utc::now();
        }
        if let Err(e) = self.storage.clear_messages(session_id) {
            warn!(session_id, error = %e, "failed to clear persisted messages");
        }
        if let Err(e) = self.storage.clear_summary(session_id) {
            warn!(session_id, error = %e, "failed to clear persisted summary");
        }
    }

    pub async fn set_session_user(&self, session_id: &str, user_id: impl Into<String>) {
        let user_id = user_id.into();
        let mut cache = self.cache.write().await;
        if let Some(session) = cache.get_mut(session_id) {
            session.meta.user_id = Some(user_id.clone());
            let _ = self.storage.save_session_meta(&session.meta);
        }
    }

    pub async fn set_session_channel_data(&self, session_id: &str, key: impl Into<String>, value: impl Into<String>) {
        let mut cache = self.cache.write().await;
        if let Some(session) = cache.get_mut(session_id) {
            session.meta.channel_data.insert(key.into(), value.into());
            let _ = self.storage.save_session_meta(&session.meta);
        }
    }

    /// Reassign every session currently owned by `from_user_id` to
    /// `to_user_id`. Used when a transient identity (e.g. a new channel
    /// handle) is linked to an existing account.
    pub async fn migrate_sessions_user(&self, from_user_id: &str, to_user_id: &str) -> usize {
        let mut count = 0;
        let mut cache = self.cache.write().await;
        for session in cache.values_mut() {
            if session.meta.user_id.as_deref() == Some(from_user_id) {
                session.meta.user_id = Some(to_user_id.to_string());
                let _ = self.storage.save_session_meta(&session.meta);
                count += 1;
            }
        }
        // Also sweep sessions known to storage but not yet cached.
        if let Ok(metas) = self.storage.load_all_session_metas() {
            for mut meta in metas {
                if cache.contains_key(&meta.id) {
                    continue;
                }
                if meta.user_id.as_deref() == Some(from_user_id) {
                    meta.user_id = Some(to_user_id.to_string());
                    let _ = self.storage.save_session_meta(&meta);
                    count += 1;
                }
            }
        }
        count
    }

    pub async fn find_sessions_by_user(&self, user_id: &str) -> Vec<SessionMeta> {
        let mut found: HashMap<String, SessionMeta> = HashMap::new();
        if let Ok(metas) = self.storage.load_all_session_metas() {
            for meta in metas {
                if meta.user_id.as_deref() == Some(user_id) {
                    found.insert(meta.id.clone(), meta);
                }
            }
        }
        for session in self.cache.read().await.values() {
            if session.meta.user_id.as_deref() == Some(user_id) {
                found.insert(session.meta.id.clone(), session.meta.clone());
            }
        }
        let mut out: Vec<_> = found.into_values().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out
    }
}

/// Walk a proposed compaction boundary backward until it no longer splits a
/// tool-call chain: landing on a `tool` message walks back to the
/// preceding assistant-with-tool-calls head (excluding the whole chain from
/// compaction); landing exactly on that head walks back one further message
/// so the head itself isn't compacted away from its own results.
fn safe_compress_boundary(messages: &[ChatMessage], keep_recent: usize) -> Option<usize> {
    let len = messages.len();
    if len <= keep_recent {
        return None;
    }
    let mut boundary = len - keep_recent;
    loop {
        if boundary == 0 {
            return None;
        }
        if messages[boundary].role == Role::Tool {
            let mut idx = boundary;
            while idx > 0 {
                idx -= 1;
                if messages[idx].is_tool_call_head() {
                    break;
                }
            }
            boundary = idx;
        } else if messages[boundary].is_tool_call_head() {
            boundary -= 1;
        } else {
            break;
        }
    }
    if boundary == 0 {
        None
    } else {
        Some(boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::storage::JsonlSessionStorage;
    use crate::types::ToolCall;
    use tempfile::tempdir;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(JsonlSessionStorage::new(dir.path().to_path_buf()).unwrap());
        (SessionStore::new(storage), dir)
    }

    #[tokio::test]
    async fn add_message_assigns_id() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        let msg = store.add_message("s1", ChatMessage::user("hi")).await.unwrap();
        assert!(msg.id.is_some());
    }

    #[tokio::test]
    async fn get_history_respects_window() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        for i in 0..10 {
            store.add_message("s1", ChatMessage::user(format!("m{i}"))).await.unwrap();
        }
        let history = store.get_history("s1", 3).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "m7");
    }

    #[tokio::test]
    async fn get_history_skips_leading_orphan_tool_message() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        store.add_message("s1", ChatMessage::user("task")).await.unwrap();
        store
            .add_message("s1", ChatMessage::assistant_tool_calls(vec![ToolCall::new("c1", "exec", "{}")]))
            .await
            .unwrap();
        store.add_message("s1", ChatMessage::tool_result("c1", "exec", "done")).await.unwrap();
        store.add_message("s1", ChatMessage::assistant("result summary")).await.unwrap();

        // window of 1 would land exactly on the trailing assistant text, fine;
        // window of 2 lands on the tool result — must skip forward past it.
        let history = store.get_history("s1", 2).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Assistant);
        assert_eq!(history[0].content, "result summary");
    }

    #[tokio::test]
    async fn compress_boundary_never_splits_chain() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        store.add_message("s1", ChatMessage::user("u1")).await.unwrap();
        store.add_message("s1", ChatMessage::user("u2")).await.unwrap();
        store
            .add_message("s1", ChatMessage::assistant_tool_calls(vec![ToolCall::new("c1", "exec", "{}")]))
            .await
            .unwrap();
        store.add_message("s1", ChatMessage::tool_result("c1", "exec", "done")).await.unwrap();
        store.add_message("s1", ChatMessage::user("u3")).await.unwrap();

        // keep_recent = 2 would naively land the boundary inside the tool chain
        // (index 3, the tool result) — it must be pushed back to the chain head (index 2).
        let to_compress = store.get_messages_to_compress("s1", 2).await.unwrap();
        assert_eq!(to_compress.len(), 2);
        assert_eq!(to_compress[0].content, "u1");
        assert_eq!(to_compress[1].content, "u2");
    }

    #[tokio::test]
    async fn apply_compression_accumulates_count() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        for i in 0..5 {
            store.add_message("s1", ChatMessage::user(format!("m{i}"))).await.unwrap();
        }
        store.apply_compression("s1", "summary round 1".into(), 2).await;
        let session = store.get_or_create("s1", "cli", "default").await;
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.summary.as_ref().unwrap().compressed_count, 2);

        store.apply_compression("s1", "summary round 2".into(), 1).await;
        let session = store.get_or_create("s1", "cli", "default").await;
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.summary.as_ref().unwrap().compressed_count, 3);
    }

    #[tokio::test]
    async fn clear_session_drops_messages_and_summary() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        store.add_message("s1", ChatMessage::user("hi")).await.unwrap();
        store.apply_compression("s1", "summary".into(), 1).await;
        store.clear_session("s1").await;
        let session = store.get_or_create("s1", "cli", "default").await;
        assert!(session.messages.is_empty());
        assert!(session.summary.is_none());
    }

    #[tokio::test]
    async fn find_sessions_by_user_after_set_session_user() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        store.get_or_create("s2", "cli", "other").await;
        store.set_session_user("s1", "alice").await;
        let found = store.find_sessions_by_user("alice").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "s1");
    }

    #[tokio::test]
    async fn migrate_sessions_user_reassigns_all() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        store.get_or_create("s2", "cli", "other").await;
        store.set_session_user("s1", "temp-id").await;
        store.set_session_user("s2", "temp-id").await;
        let moved = store.migrate_sessions_user("temp-id", "alice").await;
        assert_eq!(moved, 2);
        assert_eq!(store.find_sessions_by_user("alice").await.len(), 2);
    }

    #[tokio::test]
    async fn cold_start_replays_past_compressed_count() {
        let dir = tempdir().unwrap();
        {
            let storage = Arc::new(JsonlSessionStorage::new(dir.path().to_path_buf()).unwrap());
            let store = SessionStore::new(storage);
            store.get_or_create("s1", "cli", "default").await;
            for i in 0..5 {
                store.add_message("s1", ChatMessage::user(format!("m{i}"))).await.unwrap();
            }
            store.apply_compression("s1", "earlier context".into(), 3).await;
        }
        {
            let storage = Arc::new(JsonlSessionStorage::new(dir.path().to_path_buf()).unwrap());
            let store = SessionStore::new(storage);
            let session = store.get_or_create("s1", "cli", "default").await;
            assert_eq!(session.messages.len(), 2);
            assert_eq!(session.messages[0].content, "m3");
            assert_eq!(session.summary.unwrap().compressed_count, 3);
        }
    }

    #[tokio::test]
    async fn get_history_prepends_summary_as_system_message() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        for i in 0..5 {
            store.add_message("s1", ChatMessage::user(format!("m{i}"))).await.unwrap();
        }
        store.apply_compression("s1", "earlier: the user asked about pricing".into(), 3).await;

        let history = store.get_history("s1", 5).await;
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, "earlier: the user asked about pricing");
        // window of 5 reserves one slot for the summary, leaving 4 for messages —
        // but only 2 remain after compaction, so all of them come back.
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].content, "m3");
        assert_eq!(history[2].content, "m4");
    }

    #[tokio::test]
    async fn get_history_without_summary_has_no_system_message() {
        let (store, _dir) = store();
        store.get_or_create("s1", "cli", "default").await;
        store.add_message("s1", ChatMessage::user("hi")).await.unwrap();
        let history = store.get_history("s1", 5).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn get_or_create_upgrades_unknown_channel() {
        let (store, _dir) = store();
        // Simulate a session first touched via add_message (channel "unknown")
        // before any inbound message carrying the real channel arrived.
        store.add_message("s1", ChatMessage::user("hi")).await.unwrap();

        let session = store.get_or_create("s1", "telegram", "chat_42").await;
        assert_eq!(session.meta.channel, "telegram");
        assert_eq!(session.meta.chat_id, "chat_42");

        // The upgrade sticks in the cache.
        let again = store.get_or_create("s1", "unknown", "unknown").await;
        assert_eq!(again.meta.channel, "telegram");
        assert_eq!(again.meta.chat_id, "chat_42");
    }

    /// A [`SessionStorage`] whose message appends always fail, used to
    /// verify persistence errors surface to the caller instead of being
    /// swallowed.
    struct FailingStorage;

    impl SessionStorage for FailingStorage {
        fn load_all_session_metas(&self) -> std::io::Result<Vec<SessionMeta>> {
            Ok(Vec::new())
        }
        fn save_session_meta(&self, _meta: &SessionMeta) -> std::io::Result<()> {
            Ok(())
        }
        fn append_message(&self, _session_id: &str, _msg: &ChatMessage) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
        fn load_messages(&self, _session_id: &str) -> std::io::Result<Vec<ChatMessage>> {
            Ok(Vec::new())
        }
        fn clear_messages(&self, _session_id: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn load_summary(&self, _session_id: &str) -> std::io::Result<Option<SessionSummary>> {
            Ok(None)
        }
        fn save_summary(&self, _session_id: &str, _summary: &SessionSummary) -> std::io::Result<()> {
            Ok(())
        }
        fn clear_summary(&self, _session_id: &str) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn add_message_surfaces_persistence_failure() {
        let store = SessionStore::new(Arc::new(FailingStorage));
        store.get_or_create("s1", "cli", "default").await;
        let err = store.add_message("s1", ChatMessage::user("hi")).await.unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Io(_)));

        // The message must not have been admitted into the in-memory log either.
        let history = store.get_history("s1", 10).await;
        assert!(history.is_empty());
    }
}
