//! Task spawning seam.
//!
//! The session loop and the agent's zone watcher run as background tasks.
//! [`TaskSpawner`] lets the embedding application decide where they run;
//! [`TokioSpawner`] is the default.

use std::future::Future;

/// Spawns detached background work.
///
/// Spawned tasks are neither joined nor aborted by the spawner. Long-running
/// work stops through its own cancellation (see [`crate::Session::close`]).
pub trait TaskSpawner: Send + Sync {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Spawns onto a Tokio runtime.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
