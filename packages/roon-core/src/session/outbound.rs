//! Serialized outbound path.
//!
//! One async mutex guards the WebSocket sink so frames are never interleaved.
//! A `watch` channel signals when a sink is installed; senders that arrive
//! while disconnected wait on it, bounded by the configured timeout.
//!
//! Every `install` and `take` bumps a generation counter under the sink lock.
//! A frame carries the generation it was built for and is refused once the
//! transport has changed, so request ids never leak into the next connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt};
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::moo::{Frame, FrameSink, MooError};

/// Write half of the transport.
pub type WsSink = Box<dyn Sink<Message, Error = WsError> + Send + Unpin>;

pub struct Outbound {
    sink: Mutex<Option<WsSink>>,
    generation: AtomicU64,
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
    wait_timeout: Duration,
}

impl Outbound {
    pub fn new(cancel: CancellationToken, wait_timeout: Duration) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            sink: Mutex::new(None),
            generation: AtomicU64::new(0),
            ready,
            cancel,
            wait_timeout,
        }
    }

    /// Installs a fresh transport and wakes waiting senders.
    pub async fn install(&self, sink: WsSink) {
        {
            let mut guard = self.sink.lock().await;
            *guard = Some(sink);
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.ready.send_replace(true);
    }

    /// Removes the transport. Frames built for it are refused from now on.
    pub async fn take(&self) -> Option<WsSink> {
        self.ready.send_replace(false);
        let mut guard = self.sink.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        guard.take()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Waits until a transport is installed.
    pub async fn wait_ready(&self) -> Result<(), MooError> {
        if self.cancel.is_cancelled() {
            return Err(MooError::Cancelled);
        }
        let mut rx = self.ready.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(MooError::Cancelled),
            waited = tokio::time::timeout(self.wait_timeout, rx.wait_for(|ready| *ready)) => {
                match waited {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(_)) | Err(_) => Err(MooError::NotConnected),
                }
            }
        }
    }

    /// Waits for a transport and returns its generation.
    pub async fn connected(&self) -> Result<u64, MooError> {
        self.wait_ready().await?;
        Ok(self.generation())
    }

    /// Writes one frame as one binary message on transport `generation`.
    ///
    /// Fails with [`MooError::SessionReset`] if that transport is gone.
    pub async fn send_on(&self, generation: u64, frame: &Frame) -> Result<(), MooError> {
        let bytes = frame.encode();
        let mut guard = self.sink.lock().await;
        let sink = match guard.as_mut() {
            Some(sink) if self.generation() == generation => sink,
            _ => {
                log::debug!(
                    "[Session] Dropping {} built for a replaced transport",
                    frame.summary()
                );
                return Err(MooError::SessionReset);
            }
        };
        sink.send(Message::Binary(bytes.into())).await?;
        Ok(())
    }

    /// Waits for a transport, then writes `frame` on it.
    pub async fn send(&self, frame: &Frame) -> Result<(), MooError> {
        let generation = self.connected().await?;
        self.send_on(generation, frame).await
    }
}

#[async_trait]
impl FrameSink for Outbound {
    fn generation(&self) -> u64 {
        Outbound::generation(self)
    }

    async fn send_frame_on(&self, generation: u64, frame: Frame) -> Result<(), MooError> {
        self.send_on(generation, &frame).await
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), MooError> {
        self.send(&frame).await
    }
}
