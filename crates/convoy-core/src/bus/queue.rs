//! The message bus — the only channel through which transports, the
//! scheduler, and subagents hand work to the agent loop and get replies back.
//!
//! Inbound delivery is a single multi-producer queue: any number of
//! transports/producers hold a cloned sender, the agent loop is the sole
//! consumer. Outbound and progress delivery is the inverse: one handler per
//! channel name, looked up and invoked directly rather than queued, so a
//! transport's own backpressure and ordering guarantees apply.

use super::types::{InboundMessage, OutboundMessage, ProgressMessage};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub type OutboundHandler = Arc<dyn Fn(OutboundMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type ProgressHandler = Arc<dyn Fn(ProgressMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type CancelHook = Arc<dyn Fn(&str) + Send + Sync>;

/// The central nervous system connecting transports, the scheduler, and
/// subagent announcements to the agent loop.
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    outbound_handlers: RwLock<HashMap<String, OutboundHandler>>,
    progress_handlers: RwLock<HashMap<String, ProgressHandler>>,
    cancel_hook: RwLock<Option<CancelHook>>,
    closed: CancellationToken,
}

impl MessageBus {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        MessageBus {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_handlers: RwLock::new(HashMap::new()),
            progress_handlers: RwLock::new(HashMap::new()),
            cancel_hook: RwLock::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Clone of the inbound sender, handed to transports/producers.
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<InboundMessage> {
        self.inbound_tx.clone()
    }

    pub fn publish_inbound(&self, msg: InboundMessage) -> Result<(), mpsc::error::SendError<InboundMessage>> {
        self.inbound_tx.send(msg)
    }

    /// Receive the next inbound message, or `None` once the bus is closed.
    ///
    /// Only one logical consumer (the agent loop's dispatch task) should call
    /// this in a loop; concurrent callers serialize on the receiver lock.
    pub async fn recv_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            msg = rx.recv() => msg,
        }
    }

    /// Stop `recv_inbound` from yielding further messages, drop every
    /// registered outbound/progress handler, and clear the cancel hook.
    pub async fn close(&self) {
        self.closed.cancel();
        self.outbound_handlers.write().await.clear();
        self.progress_handlers.write().await.clear();
        self.cancel_hook.write().await.take();
    }

    /// Register the handler a channel's outbound replies are delivered to.
    /// Replacing an existing registration for the same name is allowed.
    pub async fn register_outbound_handler(&self, channel: impl Into<String>, handler: OutboundHandler) {
        self.outbound_handlers.write().await.insert(channel.into(), handler);
    }

    pub async fn register_progress_handler(&self, channel: impl Into<String>, handler: ProgressHandler) {
        self.progress_handlers.write().await.insert(channel.into(), handler);
    }

    /// Deliver an outbound message synchronously: looked up and awaited
    /// inline, not queued. A missing handler or handler error is logged and
    /// swallowed — the agent loop's turn has already completed by this point
    /// and has nothing useful to do with the failure.
    pub async fn publish_outbound(&self, msg: OutboundMessage) {
        let handler = self.outbound_handlers.read().await.get(&msg.channel).cloned();
        match handler {
            Some(handler) => {
                let channel = msg.channel.clone();
                let fut = AssertUnwindSafe(handler(msg)).catch_unwind();
                match fut.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(channel = %channel, error = %e, "outbound handler failed"),
                    Err(_) => warn!(channel = %channel, "outbound handler panicked"),
                }
            }
            None => warn!(channel = %msg.channel, "no outbound handler registered, dropping reply"),
        }
    }

    /// Deliver a progress notification. Fire-and-forget: spawned and never
    /// awaited, so a slow or failing progress handler never delays the turn
    /// that produced it.
    pub async fn publish_progress(&self, msg: ProgressMessage) {
        let handler = self.progress_handlers.read().await.get(&msg.channel).cloned();
        if let Some(handler) = handler {
            let channel = msg.channel.clone();
            tokio::spawn(async move {
                let fut = AssertUnwindSafe(handler(msg)).catch_unwind();
                match fut.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(channel = %channel, error = %e, "progress handler failed"),
                    Err(_) => warn!(channel = %channel, "progress handler panicked"),
                }
            });
        }
    }

    /// Register the callback invoked when a session is cancelled. Only one
    /// hook is supported; the agent loop installs it once at startup.
    pub async fn on_session_cancel(&self, hook: CancelHook) {
        *self.cancel_hook.write().await = Some(hook);
    }

    /// Request cancellation of an in-flight turn for `session_id`. Calling
    /// this for a session with nothing in flight is a no-op; calling it more
    /// than once for the same turn must be safe since the hook itself (the
    /// agent loop's per-turn `CancellationToken::cancel`) is idempotent.
    pub async fn cancel_session(&self, session_id: &str) {
        if let Some(hook) = self.cancel_hook.read().await.as_ref() {
            hook(session_id);
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn inbound_round_trips_in_order() {
        let bus = MessageBus::new();
        for i in 1..=3 {
            bus.publish_inbound(InboundMessage::new("s", "cli", "u", "c", format!("msg-{i}")))
                .unwrap();
        }
        for i in 1..=3 {
            let m = bus.recv_inbound().await.unwrap();
            assert_eq!(m.content, format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn outbound_dispatches_to_registered_handler() {
        let bus = MessageBus::new();
        let received = Arc::new(Mutex::new(None));
        let received2 = received.clone();
        bus.register_outbound_handler(
            "cli",
            Arc::new(move |msg: OutboundMessage| {
                let received2 = received2.clone();
                Box::pin(async move {
                    *received2.lock().await = Some(msg.content);
                    Ok(())
                })
            }),
        )
        .await;

        bus.publish_outbound(OutboundMessage::new("s", "cli", "c", "hello")).await;
        assert_eq!(received.lock().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn outbound_without_handler_does_not_panic() {
        let bus = MessageBus::new();
        bus.publish_outbound(OutboundMessage::new("s", "nobody", "c", "x")).await;
    }

    #[tokio::test]
    async fn progress_is_fire_and_forget() {
        let bus = MessageBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.register_progress_handler(
            "cli",
            Arc::new(move |_msg: ProgressMessage| {
                let count2 = count2.clone();
                Box::pin(async move {
                    count2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .await;

        bus.publish_progress(ProgressMessage {
            session_id: "s".into(),
            channel: "cli".into(),
            chat_id: "c".into(),
            step: super::super::types::ProgressStep::ToolStarted,
            iteration: 0,
            tool_name: Some("exec".into()),
            detail: "running".into(),
            is_error: false,
        })
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_session_invokes_hook() {
        let bus = MessageBus::new();
        let cancelled = Arc::new(Mutex::new(Vec::new()));
        let cancelled2 = cancelled.clone();
        bus.on_session_cancel(Arc::new(move |sid: &str| {
            // can't await in a sync Fn; use try_lock since no contention in this test
            cancelled2.try_lock().unwrap().push(sid.to_string());
        }))
        .await;

        bus.cancel_session("sess-1").await;
        assert_eq!(cancelled.lock().await.as_slice(), &["sess-1".to_string()]);
    }

    #[tokio::test]
    async fn close_ends_recv_inbound() {
        let bus = Arc::new(MessageBus::new());
        bus.close().await;
        assert!(bus.recv_inbound().await.is_none());
    }

    #[tokio::test]
    async fn close_clears_handlers_and_cancel_hook() {
        let bus = MessageBus::new();
        bus.register_outbound_handler("cli", Arc::new(|_msg| Box::pin(async { Ok(()) })))
            .await;
        bus.register_progress_handler("cli", Arc::new(|_msg| Box::pin(async { Ok(()) })))
            .await;
        bus.on_session_cancel(Arc::new(|_sid: &str| {})).await;

        bus.close().await;

        assert!(bus.outbound_handlers.read().await.is_empty());
        assert!(bus.progress_handlers.read().await.is_empty());
        assert!(bus.cancel_hook.read().await.is_none());
    }
}
