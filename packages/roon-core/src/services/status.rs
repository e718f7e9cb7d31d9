//! Provided `com.roonlabs.status:1` service.
//!
//! The core subscribes once it has paired with us and shows the latest
//! message under the extension's entry in its settings.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::moo::{Body, Frame, FrameSink, MooError, SubscriptionKey, SubscriptionRegistry};
use crate::protocol_constants::SERVICE_STATUS;
use crate::session::{Responder, ServiceHandler, Session};

/// Body of every status reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
    pub is_error: bool,
}

/// Answers status requests and pushes changes to subscribers.
pub struct StatusService {
    sink: Arc<dyn FrameSink>,
    subscribers: Arc<SubscriptionRegistry>,
    current: RwLock<StatusMessage>,
}

impl StatusService {
    pub fn new(sink: Arc<dyn FrameSink>, subscribers: Arc<SubscriptionRegistry>) -> Self {
        Self {
            sink,
            subscribers,
            current: RwLock::new(StatusMessage::default()),
        }
    }

    /// Creates the service and registers it on `session`.
    pub fn register(session: &Session) -> Arc<Self> {
        let service = Arc::new(Self::new(
            session.sink(),
            session.subscription_registry("status"),
        ));
        session.register_service(SERVICE_STATUS, service.clone());
        service
    }

    pub fn current(&self) -> StatusMessage {
        self.current.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }

    /// Updates the status and pushes `Changed` to every subscriber.
    ///
    /// Returns the number of subscribers reached.
    pub async fn set_status(&self, message: impl Into<String>, is_error: bool) -> usize {
        let status = StatusMessage {
            message: message.into(),
            is_error,
        };
        *self.current.write() = status.clone();

        let body = match Body::json(&status) {
            Ok(body) => body,
            Err(e) => {
                log::error!("[Status] Failed to encode status: {}", e);
                return 0;
            }
        };
        let reached = self
            .subscribers
            .fan_out(self.sink.as_ref(), "Changed", &body)
            .await;
        log::debug!(
            "[Status] '{}' (error: {}) pushed to {} subscriber(s)",
            status.message,
            is_error,
            reached
        );
        reached
    }
}

#[async_trait]
impl ServiceHandler for StatusService {
    async fn handle(&self, request: &Frame, responder: Responder) -> Result<(), MooError> {
        match request.verb() {
            "subscribe_status" => {
                let key = SubscriptionKey::from_body(&request.body)
                    .unwrap_or(SubscriptionKey::Int(request.request_id as i64));
                if !self.subscribers.subscribe(key.clone(), request.request_id) {
                    log::debug!("[Status] Key {} already subscribed", key);
                }
                responder
                    .send_continue("Subscribed", Body::json(&self.current())?)
                    .await
            }
            "unsubscribe_status" => {
                if let Some(key) = SubscriptionKey::from_body(&request.body) {
                    self.subscribers.unsubscribe(&key);
                }
                responder.complete("Unsubscribed", Body::Empty).await
            }
            "get_status" => responder.complete("Success", Body::json(&self.current())?).await,
            other => {
                log::warn!("[Status] Unknown method '{}'", other);
                responder
                    .complete(
                        "InvalidRequest",
                        Body::json(&serde_json::json!({
                            "error": format!("unknown method '{}'", other)
                        }))?,
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moo::MessageType;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Frame>>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, frame: Frame) -> Result<(), MooError> {
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    fn service() -> (Arc<RecordingSink>, StatusService) {
        let sink = Arc::new(RecordingSink::default());
        let service = StatusService::new(sink.clone(), Arc::new(SubscriptionRegistry::new("status")));
        (sink, service)
    }

    fn request(verb: &str, id: u64, body: Value) -> Frame {
        Frame::request(format!("{}/{}", SERVICE_STATUS, verb), id, Body::from(body))
    }

    async fn call(service: &StatusService, sink: &Arc<RecordingSink>, frame: Frame) {
        let responder = Responder::new(sink.clone(), frame.request_id);
        service.handle(&frame, responder).await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_replies_with_current_status() {
        let (sink, service) = service();
        service.set_status("Ready", false).await;

        call(&service, &sink, request("subscribe_status", 4, json!({"subscription_key": 1}))).await;

        let frames = sink.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type, MessageType::Continue);
        assert_eq!(frames[0].name, "Subscribed");
        assert_eq!(frames[0].request_id, 4);
        assert_eq!(
            frames[0].json::<StatusMessage>().unwrap(),
            StatusMessage {
                message: "Ready".into(),
                is_error: false
            }
        );
    }

    #[tokio::test]
    async fn set_status_pushes_changed_to_subscribers() {
        let (sink, service) = service();
        call(&service, &sink, request("subscribe_status", 4, json!({"subscription_key": 1}))).await;
        call(&service, &sink, request("subscribe_status", 9, json!({"subscription_key": 2}))).await;
        sink.frames.lock().clear();

        assert_eq!(service.set_status("No zone playing", true).await, 2);

        let frames = sink.frames.lock();
        let mut ids: Vec<u64> = frames.iter().map(|f| f.request_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![4, 9]);
        assert!(frames.iter().all(|f| f.name == "Changed"));
        assert!(frames[0].json::<StatusMessage>().unwrap().is_error);
    }

    #[tokio::test]
    async fn unsubscribe_stops_pushes() {
        let (sink, service) = service();
        call(&service, &sink, request("subscribe_status", 4, json!({"subscription_key": 1}))).await;
        call(&service, &sink, request("unsubscribe_status", 5, json!({"subscription_key": 1}))).await;

        let last = sink.frames.lock().last().cloned().unwrap();
        assert_eq!(last.message_type, MessageType::Complete);
        assert_eq!(last.name, "Unsubscribed");
        assert_eq!(service.subscriber_count(), 0);
        assert_eq!(service.set_status("Idle", false).await, 0);
    }

    #[tokio::test]
    async fn get_status_completes_with_success() {
        let (sink, service) = service();
        service.set_status("Playing in Kitchen", false).await;
        call(&service, &sink, Frame::request(format!("{}/get_status", SERVICE_STATUS), 2, Body::Empty)).await;

        let frames = sink.frames.lock();
        assert_eq!(frames[0].message_type, MessageType::Complete);
        assert_eq!(frames[0].name, "Success");
        assert_eq!(frames[0].json::<Value>().unwrap()["message"], "Playing in Kitchen");
    }
}
