//! Broadcast fan-out of session events.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::SessionEvent;

/// Fans session events out to any number of `broadcast` receivers.
///
/// An optional observer installed with [`set_external_emitter`] sees each
/// event first. Lagging receivers lose the oldest events.
///
/// [`set_external_emitter`]: BroadcastEventBridge::set_external_emitter
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<SessionEvent>,
    observer: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// `capacity` events are buffered per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            observer: Arc::default(),
        }
    }

    /// Replaces the observer.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        self.observer.write().replace(emitter);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl EventEmitter for BroadcastEventBridge {
    fn emit_session(&self, event: SessionEvent) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.emit_session(event.clone());
        }
        // Nobody listening is normal before the first subscriber.
        let _ = self.tx.send(event);
    }
}
