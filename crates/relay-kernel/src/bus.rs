//! Inter-worker message bus.
//!
//! Each registered worker gets a FIFO mailbox. Sending with
//! `requires_response = true` allocates a correlation entry and returns a
//! future that resolves when a `response` message carrying the matching
//! `correlation_id` arrives, or times out. Ported from the reference
//! `InterAgentCommunicator`: same default priorities (broadcast = 7,
//! collaboration = 3, delegation = 2, response = 2, default = 5) and the same
//! 30-second default response timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Notify};
use uuid::Uuid;

use crate::error::{KernelError, Result};

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Unique message identifier, `msg_<8 hex chars>` matching the reference
/// implementation's id shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    fn generate(prefix: &str) -> Self {
        let hex = Uuid::now_v7().simple().to_string();
        Self(format!("{prefix}_{}", &hex[..8]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of message carried through the bus, determining dispatch behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Request,
    Response,
    Broadcast,
    Collaboration,
    Delegation,
    Notification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    pub recipient: String,
    pub kind: MessageKind,
    pub content: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub requires_response: bool,
    pub correlation_id: Option<MessageId>,
    pub priority: u8,
}

struct Mailbox {
    sender: mpsc::UnboundedSender<Message>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

/// Per-worker handler invoked by the bus's dispatch loop for any message not
/// of `MessageKind::Response` (those are routed straight to
/// `complete_response`). Mirrors the relay-events `EventHandler` shape: one
/// method per message kind, each independently overridable. Default bodies
/// reject the kind so a worker only has to implement what it actually
/// supports.
#[async_trait::async_trait]
pub trait BusHandler: Send + Sync {
    async fn handle_request(&self, message: &Message) -> std::result::Result<serde_json::Value, String> {
        let _ = message;
        Err("request handling not implemented".to_string())
    }

    async fn handle_collaboration(&self, message: &Message) -> std::result::Result<serde_json::Value, String> {
        let _ = message;
        Err("collaboration handling not implemented".to_string())
    }

    async fn handle_delegation(&self, message: &Message) -> std::result::Result<serde_json::Value, String> {
        let _ = message;
        Err("delegation handling not implemented".to_string())
    }

    async fn handle_broadcast(&self, message: &Message) {
        let _ = message;
    }
}

struct Inner {
    mailboxes: DashMap<String, Arc<Mailbox>>,
    handlers: DashMap<String, Arc<dyn BusHandler>>,
    pending: DashMap<MessageId, oneshot::Sender<Message>>,
    channels: DashMap<String, Vec<String>>,
    response_timeout: Duration,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

/// Per-worker mailbox bus with request/response correlation and broadcast
/// fan-out.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_response_timeout(DEFAULT_RESPONSE_TIMEOUT)
    }

    #[must_use]
    pub fn with_response_timeout(response_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                mailboxes: DashMap::new(),
                handlers: DashMap::new(),
                pending: DashMap::new(),
                channels: DashMap::new(),
                response_timeout,
                shutdown: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
            }),
        }
    }

    /// Create a mailbox for `worker_id`, replacing any existing one. The old
    /// mailbox's sender is dropped, so any dispatch loop still reading it
    /// winds down on its next `recv()`.
    pub fn register(&self, worker_id: impl Into<String>) {
        let worker_id = worker_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.mailboxes.insert(
            worker_id.clone(),
            Arc::new(Mailbox {
                sender: tx,
                receiver: tokio::sync::Mutex::new(rx),
            }),
        );
        tracing::info!(worker_id = %worker_id, "worker registered with message bus");
    }

    /// Attach a [`BusHandler`] to `worker_id` and start a background loop
    /// that drains its mailbox, routing each message to the matching handler
    /// method by `kind` and, for request-shaped kinds, `respond`-ing with the
    /// handler's result automatically. `Response` messages bypass the
    /// handler entirely and resolve the matching pending `send(...,
    /// requires_response: true)` call. Requires `register(worker_id)` to have
    /// already created the mailbox.
    pub fn register_handler(&self, worker_id: impl Into<String>, handler: Arc<dyn BusHandler>) {
        let worker_id = worker_id.into();
        self.inner.handlers.insert(worker_id.clone(), handler);
        let Some(mailbox) = self.inner.mailboxes.get(&worker_id).map(|m| m.clone()) else {
            tracing::warn!(worker_id = %worker_id, "register_handler called before register");
            return;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(Self::dispatch_loop(inner, worker_id, mailbox));
    }

    async fn dispatch_loop(inner: Arc<Inner>, worker_id: String, mailbox: Arc<Mailbox>) {
        tracing::debug!(worker_id = %worker_id, "dispatch loop started");
        loop {
            if inner.shutdown.load(Ordering::Acquire) {
                tracing::debug!(worker_id = %worker_id, "dispatch loop shutting down");
                break;
            }

            let message = {
                let mut rx = mailbox.receiver.lock().await;
                tokio::select! {
                    msg = rx.recv() => msg,
                    _ = inner.shutdown_notify.notified() => None,
                }
            };

            let Some(message) = message else {
                if inner.shutdown.load(Ordering::Acquire) {
                    tracing::debug!(worker_id = %worker_id, "dispatch loop shutting down");
                } else {
                    tracing::debug!(worker_id = %worker_id, "mailbox closed, dispatch loop exiting");
                }
                break;
            };

            Self::dispatch_one(&inner, &worker_id, message).await;
        }
    }

    async fn dispatch_one(inner: &Arc<Inner>, worker_id: &str, message: Message) {
        if message.kind == MessageKind::Response {
            let bus = Self { inner: Arc::clone(inner) };
            if let Err(error) = bus.complete_response(message) {
                tracing::warn!(worker_id = %worker_id, %error, "undeliverable response");
            }
            return;
        }

        let Some(handler) = inner.handlers.get(worker_id).map(|h| Arc::clone(h.value())) else {
            tracing::warn!(worker_id = %worker_id, "no handler registered, dropping message");
            return;
        };

        if message.kind == MessageKind::Broadcast || message.kind == MessageKind::Notification {
            handler.handle_broadcast(&message).await;
            return;
        }

        let outcome = match message.kind {
            MessageKind::Request => handler.handle_request(&message).await,
            MessageKind::Collaboration => handler.handle_collaboration(&message).await,
            MessageKind::Delegation => handler.handle_delegation(&message).await,
            MessageKind::Response | MessageKind::Broadcast | MessageKind::Notification => unreachable!(),
        };

        if !message.requires_response {
            if let Err(error) = outcome {
                tracing::warn!(worker_id = %worker_id, %error, "handler failed for a message with no response expected");
            }
            return;
        }

        let bus = Self { inner: Arc::clone(inner) };
        let content = match outcome {
            Ok(value) => serde_json::json!({"ok": true, "value": value}),
            Err(error) => serde_json::json!({"ok": false, "error": error}),
        };
        if let Err(error) = bus.respond(message.id, worker_id.to_string(), message.sender, content) {
            tracing::warn!(worker_id = %worker_id, %error, "failed to enqueue response");
        }
    }

    pub fn registered_workers(&self) -> Vec<String> {
        self.inner.mailboxes.iter().map(|e| e.key().clone()).collect()
    }

    /// Opt a registered worker into a named channel. A no-op if the worker
    /// isn't registered or is already subscribed.
    pub fn subscribe(&self, worker_id: &str, channel: impl Into<String>) {
        if !self.inner.mailboxes.contains_key(worker_id) {
            return;
        }
        let mut members = self.inner.channels.entry(channel.into()).or_default();
        if !members.iter().any(|w| w == worker_id) {
            members.push(worker_id.to_string());
        }
    }

    /// Workers currently subscribed to `channel`, in subscription order.
    pub fn channel_members(&self, channel: &str) -> Vec<String> {
        self.inner.channels.get(channel).map(|m| m.clone()).unwrap_or_default()
    }

    fn enqueue(&self, recipient: &str, message: Message) -> Result<()> {
        let mailbox = self
            .inner
            .mailboxes
            .get(recipient)
            .ok_or_else(|| KernelError::WorkerNotRegistered {
                worker_id: recipient.to_string(),
            })?;
        mailbox
            .sender
            .send(message)
            .map_err(|_| KernelError::WorkerNotRegistered {
                worker_id: recipient.to_string(),
            })
    }

    /// Receive the next message addressed to `worker_id`, suspending until
    /// one arrives.
    pub async fn receive(&self, worker_id: &str) -> Option<Message> {
        let mailbox = self.inner.mailboxes.get(worker_id)?.clone();
        let mut rx = mailbox.receiver.lock().await;
        rx.recv().await
    }

    /// Send a message, awaiting a correlated response if `requires_response`.
    pub async fn send(
        &self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        kind: MessageKind,
        content: serde_json::Value,
        requires_response: bool,
        priority: u8,
    ) -> Result<Option<serde_json::Value>> {
        let sender = sender.into();
        let recipient = recipient.into();
        let id = MessageId::generate("msg");

        let message = Message {
            id: id.clone(),
            sender,
            recipient: recipient.clone(),
            kind,
            content,
            timestamp: Utc::now(),
            requires_response,
            correlation_id: None,
            priority,
        };

        if requires_response {
            let (tx, rx) = oneshot::channel();
            self.inner.pending.insert(id.clone(), tx);
            self.enqueue(&recipient, message)?;

            match tokio::time::timeout(self.inner.response_timeout, rx).await {
                Ok(Ok(response)) => Ok(Some(response.content)),
                _ => {
                    self.inner.pending.remove(&id);
                    tracing::warn!(message_id = %id, "response timed out");
                    Err(KernelError::MessageTimeout { message_id: id })
                }
            }
        } else {
            self.enqueue(&recipient, message)?;
            Ok(None)
        }
    }

    /// Fan a message out to every registered worker except `sender`, or to
    /// `recipients` if given. Broadcasts carry priority 7 by default.
    pub fn broadcast(
        &self,
        sender: impl Into<String>,
        content: serde_json::Value,
        recipients: Option<Vec<String>>,
    ) -> usize {
        let sender = sender.into();
        let targets = recipients.unwrap_or_else(|| self.registered_workers());
        let mut delivered = 0;
        for target in targets.into_iter().filter(|t| t != &sender) {
            let message = Message {
                id: MessageId::generate("broadcast"),
                sender: sender.clone(),
                recipient: target.clone(),
                kind: MessageKind::Broadcast,
                content: content.clone(),
                timestamp: Utc::now(),
                requires_response: false,
                correlation_id: None,
                priority: 7,
            };
            if self.enqueue(&target, message).is_ok() {
                delivered += 1;
            }
        }
        tracing::info!(sender = %sender, delivered, "broadcast sent");
        delivered
    }

    /// Convenience wrapper matching the reference's `request_collaboration`
    /// (priority 3, response required).
    pub async fn request_collaboration(
        &self,
        requester: impl Into<String>,
        collaborator: impl Into<String>,
        task: serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        self.send(requester, collaborator, MessageKind::Collaboration, task, true, 3)
            .await
    }

    /// Convenience wrapper matching the reference's `delegate_task`
    /// (priority 2, response required).
    pub async fn delegate(
        &self,
        delegator: impl Into<String>,
        delegate: impl Into<String>,
        task: serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        self.send(delegator, delegate, MessageKind::Delegation, task, true, 2)
            .await
    }

    /// Answer an earlier request. Responses carry priority 2 and stamp
    /// `correlation_id` with the original request's id.
    pub fn respond(&self, original_message_id: MessageId, sender: impl Into<String>, recipient: impl Into<String>, content: serde_json::Value) -> Result<()> {
        let recipient = recipient.into();
        let response = Message {
            id: MessageId::generate("resp"),
            sender: sender.into(),
            recipient: recipient.clone(),
            kind: MessageKind::Response,
            content,
            timestamp: Utc::now(),
            requires_response: false,
            correlation_id: Some(original_message_id),
            priority: 2,
        };
        self.enqueue(&recipient, response)
    }

    /// Resolve a pending response future. No-ops (returns
    /// `CorrelationUnknown`) if no request is pending under that id -- this
    /// is an expected, non-fatal occurrence for late responses.
    pub fn complete_response(&self, message: Message) -> Result<()> {
        let Some(correlation_id) = message.correlation_id.clone() else {
            return Err(KernelError::CorrelationUnknown {
                correlation_id: message.id,
            });
        };
        match self.inner.pending.remove(&correlation_id) {
            Some((_, tx)) => {
                let _ = tx.send(message);
                Ok(())
            }
            None => Err(KernelError::CorrelationUnknown { correlation_id }),
        }
    }

    /// Cancel all pending response futures, e.g. on shutdown.
    pub fn cancel_pending(&self) {
        self.inner.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Stop every running dispatch loop and cancel pending responses. Mailboxes
    /// themselves are left intact; `register`/`register_handler` after a
    /// shutdown bus is not supported.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.shutdown_notify.notify_waiters();
        self.cancel_pending();
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

    #[tokio::test]
    async fn send_without_response_delivers_to_mailbox() {
        let bus = MessageBus::new();
        bus.register("worker-a");
        bus.register("worker-b");

        bus.send("worker-a", "worker-b", MessageKind::Notification, serde_json::json!({"hi": true}), false, 5)
            .await
            .unwrap();

        let received = bus.receive("worker-b").await.unwrap();
        assert_eq!(received.sender, "worker-a");
        assert_eq!(received.priority, 5);
    }

    struct Echo;

    #[async_trait::async_trait]
    impl BusHandler for Echo {
        async fn handle_request(&self, message: &Message) -> std::result::Result<serde_json::Value, String> {
            Ok(message.content.clone())
        }
    }

    #[tokio::test]
    async fn request_response_roundtrip() {
        let bus = MessageBus::new();
        bus.register("requester");
        bus.register("responder");
        // requester carries no handler of its own -- its mailbox only ever
        // receives the correlated `Response`, which the dispatch loop routes
        // straight into `complete_response` without consulting a handler.
        bus.register_handler("requester", Arc::new(Echo));
        bus.register_handler("responder", Arc::new(Echo));

        let response = bus
            .send("requester", "responder", MessageKind::Request, serde_json::json!({"hello": "world"}), true, 5)
            .await
            .unwrap();

        assert_eq!(response, Some(serde_json::json!({"ok": true, "value": {"hello": "world"}})));
        bus.shutdown();
    }

    #[tokio::test]
    async fn dispatch_loop_routes_broadcast_to_handler() {
        use std::sync::atomic::AtomicBool;

        struct RecordBroadcast(Arc<AtomicBool>);
        #[async_trait::async_trait]
        impl BusHandler for RecordBroadcast {
            async fn handle_broadcast(&self, _message: &Message) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let bus = MessageBus::new();
        bus.register("a");
        bus.register("b");
        let seen = Arc::new(AtomicBool::new(false));
        bus.register_handler("b", Arc::new(RecordBroadcast(Arc::clone(&seen))));

        bus.broadcast("a", serde_json::json!({"k": "v"}), None);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(seen.load(Ordering::SeqCst));
        bus.shutdown();
    }

    #[tokio::test]
    async fn message_timeout_surfaces_error() {
        let bus = MessageBus::with_response_timeout(Duration::from_millis(20));
        bus.register("requester");
        bus.register("silent");

        let result = bus
            .send("requester", "silent", MessageKind::Request, serde_json::json!({}), true, 5)
            .await;

        assert!(matches!(result, Err(KernelError::MessageTimeout { .. })));
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let bus = MessageBus::new();
        bus.register("a");
        bus.register("b");
        bus.register("c");

        let delivered = bus.broadcast("a", serde_json::json!({"k": "v"}), None);
        assert_eq!(delivered, 2);

        let received = bus.receive("b").await.unwrap();
        assert_eq!(received.kind, MessageKind::Broadcast);
        assert_eq!(received.priority, 7);
    }

    #[tokio::test]
    async fn complete_response_unknown_correlation_is_reported() {
        let bus = MessageBus::new();
        let message = Message {
            id: MessageId::generate("resp"),
            sender: "a".into(),
            recipient: "b".into(),
            kind: MessageKind::Response,
            content: serde_json::Value::Null,
            timestamp: Utc::now(),
            requires_response: false,
            correlation_id: Some(MessageId::generate("msg")),
            priority: 2,
        };
        let result = bus.complete_response(message);
        assert!(matches!(result, Err(KernelError::CorrelationUnknown { .. })));
    }

    #[tokio::test]
    async fn subscribe_adds_registered_worker_to_channel() {
        let bus = MessageBus::new();
        bus.register("a");
        bus.register("b");

        bus.subscribe("a", "standup-notifications");
        bus.subscribe("b", "standup-notifications");
        bus.subscribe("ghost", "standup-notifications");

        let members = bus.channel_members("standup-notifications");
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn send_to_unregistered_worker_errors() {
        let bus = MessageBus::new();
        bus.register("a");
        let result = bus
            .send("a", "nonexistent", MessageKind::Notification, serde_json::Value::Null, false, 5)
            .await;
        assert!(matches!(result, Err(KernelError::WorkerNotRegistered { .. })));
    }
}
