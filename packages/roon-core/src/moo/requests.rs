//! Outstanding request table.
//!
//! Ids are allocated from a per-connection counter. Each id is parked either
//! as a waiter (a oneshot the caller awaits) or as a one-shot callback. A
//! COMPLETE frame takes the entry out; [`RequestMultiplexer::reset`] drops
//! every entry, which wakes waiters with a closed channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{Reply, ReplyHandler};

enum Pending {
    Waiter {
        tx: oneshot::Sender<Reply>,
        created: Instant,
    },
    Callback(Arc<dyn ReplyHandler>),
}

/// What a COMPLETE frame resolved to.
pub enum Completion {
    /// A one-shot callback the caller must now invoke with the reply.
    Callback(Arc<dyn ReplyHandler>, Reply),
    /// A waiter was woken.
    Delivered,
    /// The waiter had already given up.
    Abandoned,
    /// No entry for this id; the frame is handed back.
    Unmatched(Reply),
}

#[derive(Default)]
pub struct RequestMultiplexer {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
}

impl RequestMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next request id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Parks a waiter for `request_id`.
    pub fn register_waiter(&self, request_id: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id,
            Pending::Waiter {
                tx,
                created: Instant::now(),
            },
        );
        rx
    }

    /// Parks a one-shot callback for `request_id`.
    pub fn register_callback(&self, request_id: u64, handler: Arc<dyn ReplyHandler>) {
        self.pending
            .lock()
            .insert(request_id, Pending::Callback(handler));
    }

    /// Allocates an id and parks a waiter for it in one step, so a concurrent
    /// [`reset`](Self::reset) cannot separate the two.
    pub fn next_waiter(&self) -> (u64, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        let request_id = self.next_id();
        pending.insert(
            request_id,
            Pending::Waiter {
                tx,
                created: Instant::now(),
            },
        );
        (request_id, rx)
    }

    /// Allocates an id and parks a one-shot callback for it.
    pub fn next_callback(&self, handler: Arc<dyn ReplyHandler>) -> u64 {
        let mut pending = self.pending.lock();
        let request_id = self.next_id();
        pending.insert(request_id, Pending::Callback(handler));
        request_id
    }

    /// Drops the entry for `request_id`, e.g. when its send failed.
    pub fn remove(&self, request_id: u64) -> bool {
        self.pending.lock().remove(&request_id).is_some()
    }

    /// Routes a COMPLETE frame to its entry.
    pub fn complete(&self, reply: Reply) -> Completion {
        let entry = self.pending.lock().remove(&reply.request_id);
        match entry {
            Some(Pending::Callback(handler)) => Completion::Callback(handler, reply),
            Some(Pending::Waiter { tx, created }) => {
                log::trace!(
                    "[MOO] Request #{} completed after {:?}",
                    reply.request_id,
                    created.elapsed()
                );
                match tx.send(reply) {
                    Ok(()) => Completion::Delivered,
                    Err(_) => Completion::Abandoned,
                }
            }
            None => Completion::Unmatched(reply),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, request_id: u64) -> bool {
        self.pending.lock().contains_key(&request_id)
    }

    /// Drops all entries and restarts numbering at 0.
    ///
    /// Dropped waiters observe a closed channel.
    pub fn reset(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            self.next_id.store(0, Ordering::Relaxed);
            pending.drain().collect()
        };
        if !drained.is_empty() {
            log::debug!("[MOO] Dropped {} pending request(s) on reset", drained.len());
        }
    }
}
