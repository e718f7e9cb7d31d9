//! Connect → receive → reset → back off, until cancelled.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{registration, Inner, SessionState};
use crate::events::SessionEvent;
use crate::moo::{ChunkSource, FrameReader, MooError};

/// Adapts the read half of a WebSocket to a [`ChunkSource`].
///
/// Text and binary messages both count as frame bytes; control messages are
/// skipped and a close message ends the stream.
pub struct WsChunks<S>(pub S);

#[async_trait]
impl<S> ChunkSource for WsChunks<S>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin + Send,
{
    async fn next_chunk(&mut self) -> Option<Result<Bytes, MooError>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Text(text)) => return Some(Ok(Bytes::copy_from_slice(text.as_bytes()))),
                Ok(Message::Close(frame)) => {
                    log::debug!("[Session] Close frame from core: {:?}", frame);
                    return None;
                }
                Ok(_) => continue,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(MooError::Transport(e))),
            }
        }
    }
}

/// Why the receive loop ended.
enum Exit {
    Cancelled,
    Closed,
    Failed(MooError),
}

/// Reads and dispatches frames until the transport ends or the session is
/// cancelled.
async fn receive_loop<S: ChunkSource>(inner: &Arc<Inner>, source: S) -> Exit {
    let mut reader = FrameReader::new(source);
    loop {
        let next = tokio::select! {
            _ = inner.cancel.cancelled() => return Exit::Cancelled,
            next = reader.read_frame() => next,
        };

        match next {
            Ok(Some(frame)) => {
                inner.frames_received.fetch_add(1, Ordering::Relaxed);
                inner.dispatch(frame).await;
            }
            Ok(None) => return Exit::Closed,
            Err(MooError::MalformedFrame(reason)) => {
                log::warn!("[Session] Dropping malformed frame: {}", reason);
            }
            Err(e) => return Exit::Failed(e),
        }
    }
}

/// Runs one connection attempt to completion.
async fn connect_once(inner: &Arc<Inner>, url: &str) -> Exit {
    inner.set_state(SessionState::Connecting);
    log::info!("[Session] Connecting to {}", url);

    let connected = tokio::select! {
        _ = inner.cancel.cancelled() => return Exit::Cancelled,
        connected = tokio_tungstenite::connect_async(url) => connected,
    };
    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => return Exit::Failed(MooError::Transport(e)),
    };
    let (sink, stream) = ws.split();

    inner.reset_tables();
    inner.outbound.install(Box::new(sink)).await;

    if let Err(e) = registration::begin(inner).await {
        return Exit::Failed(e);
    }
    receive_loop(inner, WsChunks(stream)).await
}

/// The reconnect loop behind [`super::Session::run`].
pub(super) async fn run_loop(inner: &Arc<Inner>, url: &str) {
    loop {
        inner.frames_received.store(0, Ordering::Relaxed);
        let exit = connect_once(inner, url).await;

        inner.release_transport().await;
        inner.reset_tables();
        let frames = inner.frames_received.load(Ordering::Relaxed);
        inner.set_state(SessionState::Disconnected);
        inner.emit(SessionEvent::Disconnected {
            frames_received: frames,
        });

        match exit {
            Exit::Cancelled => break,
            Exit::Closed => log::info!("[Session] Core closed the connection"),
            Exit::Failed(e) => log::warn!("[Session] Connection to {} failed: {}", url, e),
        }

        let delay = inner.config.backoff_for(frames);
        log::info!(
            "[Session] Reconnecting in {:?} ({} frames received)",
            delay,
            frames
        );
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    log::info!("[Session] Connection loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn ws_chunks_skip_control_messages_and_stop_at_close() {
        let messages: Vec<Result<Message, WsError>> = vec![
            Ok(Message::Ping(Bytes::new())),
            Ok(Message::Binary(Bytes::from_static(b"MOO/1"))),
            Ok(Message::Text("hello".into())),
            Ok(Message::Close(None)),
            Ok(Message::Binary(Bytes::from_static(b"after close"))),
        ];
        let mut chunks = WsChunks(stream::iter(messages));

        assert_eq!(chunks.next_chunk().await.unwrap().unwrap(), Bytes::from_static(b"MOO/1"));
        assert_eq!(chunks.next_chunk().await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert!(chunks.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn ws_chunks_surface_transport_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let messages: Vec<Result<Message, WsError>> = vec![Err(WsError::Io(io))];
        let mut chunks = WsChunks(stream::iter(messages));
        assert!(matches!(
            chunks.next_chunk().await,
            Some(Err(MooError::Transport(_)))
        ));
    }
}
