//! Subscription tables.
//!
//! [`SubscriptionRegistry`] is the inbound side: the far end subscribed to
//! one of our services and we push CONTINUE frames to it.
//! [`ContinuationTable`] is the outbound side: we subscribed to one of the
//! far end's services and its CONTINUE frames come back to a handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::{Body, Frame, FrameSink, MessageType, Reply, ReplyHandler};

/// Caller-chosen key identifying one subscription.
///
/// The wire carries it either as a number or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Int(i64),
    Text(String),
}

impl SubscriptionKey {
    /// Reads `subscription_key` from a subscribe/unsubscribe body.
    pub fn from_body(body: &Body) -> Option<Self> {
        let value: Value = serde_json::from_slice(body.as_bytes()).ok()?;
        match value.get("subscription_key")? {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for SubscriptionKey {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for SubscriptionKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound Subscribers
// ─────────────────────────────────────────────────────────────────────────────

/// Subscribers to one provided service: key → request id to push on.
///
/// At most one subscription per key.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    name: String,
    subscribers: Mutex<HashMap<SubscriptionKey, u64>>,
}

impl SubscriptionRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a subscriber. Returns false if `key` is already taken.
    pub fn subscribe(&self, key: SubscriptionKey, request_id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        if subscribers.contains_key(&key) {
            log::debug!(
                "[Subscriptions] {}: key {} already subscribed",
                self.name,
                key
            );
            return false;
        }
        subscribers.insert(key, request_id);
        true
    }

    /// Removes a subscriber. Returns false if `key` was not subscribed.
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        self.subscribers.lock().remove(key).is_some()
    }

    pub fn count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }

    /// Sends one CONTINUE `name` frame to every subscriber.
    ///
    /// Returns the number of successful deliveries. A failed delivery is
    /// logged and does not stop the rest. The subscriber list is bound to the
    /// sink's current transport; if that transport is replaced meanwhile, the
    /// remaining pushes fail instead of reaching the new connection.
    pub async fn fan_out(&self, sink: &dyn FrameSink, name: &str, body: &Body) -> usize {
        let (generation, targets) = {
            let subscribers = self.subscribers.lock();
            let targets: Vec<(SubscriptionKey, u64)> =
                subscribers.iter().map(|(k, id)| (k.clone(), *id)).collect();
            (sink.generation(), targets)
        };

        let mut delivered = 0;
        for (key, request_id) in targets {
            let frame = Frame::new(MessageType::Continue, name, request_id, body.clone());
            match sink.send_frame_on(generation, frame).await {
                Ok(()) => delivered += 1,
                Err(e) => log::warn!(
                    "[Subscriptions] {}: push to key {} (#{}) failed: {}",
                    self.name,
                    key,
                    request_id,
                    e
                ),
            }
        }
        delivered
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound Subscriptions
// ─────────────────────────────────────────────────────────────────────────────

/// Request id → handler for every CONTINUE the far end pushes on it.
#[derive(Default)]
pub struct ContinuationTable {
    handlers: Mutex<HashMap<u64, Arc<dyn ReplyHandler>>>,
}

impl ContinuationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, request_id: u64, handler: Arc<dyn ReplyHandler>) {
        self.handlers.lock().insert(request_id, handler);
    }

    /// Handler for a CONTINUE frame; the entry stays registered.
    pub fn lookup(&self, reply: &Reply) -> Option<Arc<dyn ReplyHandler>> {
        self.handlers.lock().get(&reply.request_id).cloned()
    }

    /// Handler for a COMPLETE frame; the subscription ends, so the entry is
    /// removed.
    pub fn finish(&self, reply: &Reply) -> Option<Arc<dyn ReplyHandler>> {
        self.handlers.lock().remove(&reply.request_id)
    }

    pub fn remove(&self, request_id: u64) -> bool {
        self.handlers.lock().remove(&request_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }
}
