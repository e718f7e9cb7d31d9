//! Event emitter abstraction for decoupling the session from its observers.
//!
//! The session depends on the [`EventEmitter`] trait rather than a concrete
//! channel, so tests and embedders can plug in their own delivery.

use super::SessionEvent;

/// Trait for emitting session events without knowledge of delivery.
///
/// # Example
///
/// ```ignore
/// struct PrintingEmitter;
///
/// impl EventEmitter for PrintingEmitter {
///     fn emit_session(&self, event: SessionEvent) {
///         println!("{:?}", event);
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a session lifecycle event.
    fn emit_session(&self, event: SessionEvent);
}

/// No-op emitter for embedders that only use the broadcast stream.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts pairing events.
    struct CountingEventEmitter {
        paired: AtomicUsize,
        other: AtomicUsize,
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_session(&self, event: SessionEvent) {
            match event {
                SessionEvent::Paired { .. } => self.paired.fetch_add(1, Ordering::SeqCst),
                _ => self.other.fetch_add(1, Ordering::SeqCst),
            };
        }
    }

    #[test]
    fn emitters_are_object_safe() {
        let counting = Arc::new(CountingEventEmitter {
            paired: AtomicUsize::new(0),
            other: AtomicUsize::new(0),
        });
        let emitters: Vec<Arc<dyn EventEmitter>> = vec![
            Arc::new(NoopEventEmitter),
            Arc::new(LoggingEventEmitter),
            counting.clone(),
        ];

        for emitter in &emitters {
            emitter.emit_session(SessionEvent::Paired {
                core_id: "core-1".into(),
            });
            emitter.emit_session(SessionEvent::StateChanged {
                state: SessionState::Paired,
            });
        }

        assert_eq!(counting.paired.load(Ordering::SeqCst), 1);
        assert_eq!(counting.other.load(Ordering::SeqCst), 1);
    }
}
