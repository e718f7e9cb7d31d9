//! Extension point for provided services.

use std::sync::Arc;

use async_trait::async_trait;

use crate::moo::{Body, Frame, FrameSink, MessageType, MooError};

/// Handles inbound requests for one service prefix (`com.example.thing:1`).
///
/// Runs on the receive task; see [`crate::moo::ReplyHandler`] for the
/// restriction on awaiting replies.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, request: &Frame, responder: Responder) -> Result<(), MooError>;
}

/// Replies to one inbound request.
#[derive(Clone)]
///
/// Bound to the transport the request arrived on; replies fail with
/// [`MooError::SessionReset`] once that transport is gone.
pub struct Responder {
    sink: Arc<dyn FrameSink>,
    generation: u64,
    request_id: u64,
}

impl Responder {
    pub fn new(sink: Arc<dyn FrameSink>, request_id: u64) -> Self {
        let generation = sink.generation();
        Self {
            sink,
            generation,
            request_id,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Sink the reply goes out on, for fan-outs triggered by this request.
    pub fn sink(&self) -> &Arc<dyn FrameSink> {
        &self.sink
    }

    /// Final reply; the request is done.
    pub async fn complete(&self, name: &str, body: Body) -> Result<(), MooError> {
        let frame = Frame::new(MessageType::Complete, name, self.request_id, body);
        self.sink.send_frame_on(self.generation, frame).await
    }

    /// Intermediate reply; more may follow on the same request id.
    pub async fn send_continue(&self, name: &str, body: Body) -> Result<(), MooError> {
        let frame = Frame::new(MessageType::Continue, name, self.request_id, body);
        self.sink.send_frame_on(self.generation, frame).await
    }
}
