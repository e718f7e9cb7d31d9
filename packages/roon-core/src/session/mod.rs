//! Connection and session management.
//!
//! A [`Session`] owns the WebSocket to one core. It runs the connect →
//! register → steady-state loop, reconnects with backoff, answers the
//! built-in ping and pairing services, and routes everything else to
//! registered [`ServiceHandler`]s and reply handlers.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected → Connecting → Registering → Unpaired ⇄ Paired
//!       ↑                                        │
//!       └──────────── transport lost ────────────┘
//! ```
//!
//! Every transport replacement clears the request table, the continuation
//! table and every subscriber registry handed out by
//! [`Session::subscription_registry`]. Pending [`Session::send_request`] calls
//! fail with [`MooError::SessionReset`]; request ids restart at 0.

mod connection;
mod handlers;
mod outbound;
mod registration;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use handlers::{Responder, ServiceHandler};
pub use outbound::WsSink;
pub use registration::{CoreInfo, PairingState, RegisterReply};

use crate::config::{ExtensionInfo, SessionConfig};
use crate::error::{RoonError, RoonResult};
use crate::events::{BroadcastEventBridge, EventEmitter, SessionEvent};
use crate::moo::{
    Body, Completion, ContinuationTable, Frame, FrameSink, MessageType, MooError, Reply,
    ReplyHandler, RequestMultiplexer, SubscriptionRegistry,
};
use crate::protocol_constants::PAIRING_STATE_KEY;
use crate::runtime::TaskSpawner;
use crate::store::ConfigStore;
use outbound::Outbound;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Registering,
    Unpaired,
    Paired,
}

impl SessionState {
    /// Whether a transport is up and registration finished.
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Unpaired | Self::Paired)
    }
}

/// Handle to one core connection. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: SessionConfig,
    extension: ExtensionInfo,
    store: Arc<ConfigStore>,
    outbound: Arc<Outbound>,
    requests: RequestMultiplexer,
    continuations: ContinuationTable,
    services: DashMap<String, Arc<dyn ServiceHandler>>,
    registries: Mutex<Vec<Weak<SubscriptionRegistry>>>,
    pairing_subscribers: SubscriptionRegistry,
    state: RwLock<SessionState>,
    core: RwLock<Option<CoreInfo>>,
    pairing: Mutex<PairingState>,
    events: BroadcastEventBridge,
    cancel: CancellationToken,
    frames_received: AtomicU64,
    running: AtomicBool,
}

impl Session {
    /// Creates a session. Nothing connects until [`Session::run`] or
    /// [`Session::start`].
    ///
    /// The persisted pairing state is read from `store` here.
    pub fn new(
        config: SessionConfig,
        extension: ExtensionInfo,
        store: Arc<ConfigStore>,
    ) -> RoonResult<Self> {
        config.validate().map_err(RoonError::Configuration)?;
        extension.validate().map_err(RoonError::Configuration)?;

        let pairing: PairingState = store.load(PAIRING_STATE_KEY).unwrap_or_default();
        let cancel = CancellationToken::new();
        let outbound = Arc::new(Outbound::new(cancel.clone(), config.send_wait_timeout));
        let events = BroadcastEventBridge::new(config.event_channel_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                extension,
                store,
                outbound,
                requests: RequestMultiplexer::new(),
                continuations: ContinuationTable::new(),
                services: DashMap::new(),
                registries: Mutex::new(Vec::new()),
                pairing_subscribers: SubscriptionRegistry::new("pairing"),
                state: RwLock::new(SessionState::Disconnected),
                core: RwLock::new(None),
                pairing: Mutex::new(pairing),
                events,
                cancel,
                frames_received: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Spawns [`Session::run`] on `spawner`.
    pub fn start<S: TaskSpawner>(&self, spawner: &S, url: String) {
        let session = self.clone();
        spawner.spawn(async move { session.run(url).await });
    }

    /// Connects to `url` (`ws://host:port/api`) and keeps reconnecting until
    /// [`Session::close`] is called.
    ///
    /// Returns immediately if the loop is already running.
    pub async fn run(&self, url: String) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            log::warn!("[Session] Connection loop already running");
            return;
        }
        connection::run_loop(&self.inner, &url).await;
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Stops the connection loop and releases the transport.
    ///
    /// Pending requests fail; calling it again is a no-op.
    pub async fn close(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        log::info!("[Session] Closing");
        self.inner.cancel.cancel();
        self.inner.release_transport().await;
        self.inner.reset_tables();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once [`Session::close`] has been called.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    // ─────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Core reported by the last `registry:1/info` reply.
    pub fn core_info(&self) -> Option<CoreInfo> {
        self.inner.core.read().clone()
    }

    pub fn paired_core_id(&self) -> Option<String> {
        self.inner.pairing.lock().paired_core_id.clone()
    }

    pub fn is_paired(&self) -> bool {
        self.state() == SessionState::Paired
    }

    pub fn extension(&self) -> &ExtensionInfo {
        &self.inner.extension
    }

    /// Frames received since the last connect attempt.
    pub fn frames_received(&self) -> u64 {
        self.inner.frames_received.load(Ordering::Relaxed)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Adds an emitter that sees every event before it is broadcast.
    pub fn set_event_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        self.inner.events.set_external_emitter(emitter);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Extension Points
    // ─────────────────────────────────────────────────────────────────────

    /// Routes inbound `REQUEST <prefix>/<verb>` frames to `handler`.
    pub fn register_service(&self, prefix: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        let prefix = prefix.into();
        log::debug!("[Session] Registered service handler for {}", prefix);
        self.inner.services.insert(prefix, handler);
    }

    /// Routes every CONTINUE (and the final COMPLETE) for `request_id` to
    /// `handler`.
    pub fn register_reply_callback(&self, request_id: u64, handler: Arc<dyn ReplyHandler>) {
        self.inner.continuations.register(request_id, handler);
    }

    /// Creates a subscriber registry that is cleared whenever the transport
    /// is replaced.
    pub fn subscription_registry(&self, name: impl Into<String>) -> Arc<SubscriptionRegistry> {
        let registry = Arc::new(SubscriptionRegistry::new(name));
        let mut registries = self.inner.registries.lock();
        registries.retain(|r| r.strong_count() > 0);
        registries.push(Arc::downgrade(&registry));
        registry
    }

    /// Outbound path, for fan-outs that are not replies to a request.
    pub fn sink(&self) -> Arc<dyn FrameSink> {
        self.inner.outbound.clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────

    /// Sends a request and waits for its COMPLETE.
    ///
    /// Must not be awaited from inside a handler.
    pub async fn send_request(&self, name: &str, body: Body) -> Result<Reply, MooError> {
        let generation = self.inner.outbound.connected().await?;
        let (request_id, rx) = self.inner.requests.next_waiter();

        if let Err(e) = self
            .inner
            .outbound
            .send_on(generation, &Frame::request(name, request_id, body))
            .await
        {
            self.inner.forget(generation, || self.inner.requests.remove(request_id));
            return Err(e);
        }

        tokio::select! {
            _ = self.inner.cancel.cancelled() => {
                self.inner.requests.remove(request_id);
                Err(MooError::Cancelled)
            }
            reply = rx => reply.map_err(|_| MooError::SessionReset),
        }
    }

    /// Sends a request whose COMPLETE goes to `handler` once.
    ///
    /// Returns the request id.
    pub async fn send_request_with_callback(
        &self,
        name: &str,
        body: Body,
        handler: Arc<dyn ReplyHandler>,
    ) -> Result<u64, MooError> {
        self.inner.send_with_callback(name, body, handler).await
    }

    /// Sends a subscribe-style request whose CONTINUE frames and final
    /// COMPLETE all go to `handler`.
    ///
    /// Returns the request id.
    pub async fn send_subscription(
        &self,
        name: &str,
        body: Body,
        handler: Arc<dyn ReplyHandler>,
    ) -> Result<u64, MooError> {
        self.inner.send_with_continuation(name, body, handler).await
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        self.events.emit_session(event);
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            log::info!("[Session] {:?} -> {:?}", previous, state);
            self.emit(SessionEvent::StateChanged { state });
        }
    }

    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn core_id(&self) -> Option<String> {
        self.core.read().as_ref().map(|c| c.core_id.clone())
    }

    /// Saves the pairing bucket. Failures are logged; the in-memory copy stays.
    fn persist_pairing(&self, snapshot: &PairingState) {
        if let Err(e) = self.store.save(PAIRING_STATE_KEY, snapshot) {
            log::warn!("[Session] Failed to persist pairing state: {}", e);
        }
    }

    async fn send_with_callback(
        &self,
        name: &str,
        body: Body,
        handler: Arc<dyn ReplyHandler>,
    ) -> Result<u64, MooError> {
        let generation = self.outbound.connected().await?;
        let request_id = self.requests.next_callback(handler);
        if let Err(e) = self
            .outbound
            .send_on(generation, &Frame::request(name, request_id, body))
            .await
        {
            self.forget(generation, || self.requests.remove(request_id));
            return Err(e);
        }
        Ok(request_id)
    }

    async fn send_with_continuation(
        &self,
        name: &str,
        body: Body,
        handler: Arc<dyn ReplyHandler>,
    ) -> Result<u64, MooError> {
        let generation = self.outbound.connected().await?;
        let request_id = self.requests.next_id();
        self.continuations.register(request_id, handler);
        if let Err(e) = self
            .outbound
            .send_on(generation, &Frame::request(name, request_id, body))
            .await
        {
            self.forget(generation, || self.continuations.remove(request_id));
            return Err(e);
        }
        Ok(request_id)
    }

    /// Removes the entry of a request whose send failed.
    ///
    /// Once the transport has moved on, the tables are reset anyway and the
    /// id may already belong to a request on the new connection.
    fn forget(&self, generation: u64, remove: impl FnOnce() -> bool) {
        if self.outbound.generation() == generation {
            remove();
        }
    }

    /// Drops every per-connection table.
    fn reset_tables(&self) {
        self.requests.reset();
        self.continuations.clear();
        self.pairing_subscribers.clear();
        self.registries.lock().retain(|weak| match weak.upgrade() {
            Some(registry) => {
                registry.clear();
                true
            }
            None => false,
        });
    }

    async fn release_transport(&self) {
        if let Some(mut sink) = self.outbound.take().await {
            use futures::SinkExt;
            if let Err(e) = sink.close().await {
                log::debug!("[Session] Error closing transport: {}", e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────

    async fn invoke(&self, handler: Arc<dyn ReplyHandler>, reply: &Reply) {
        if let Err(e) = handler.on_reply(reply).await {
            log::warn!("[Session] Reply handler failed for {}: {}", reply.summary(), e);
        }
    }

    /// Handles one inbound frame. Frames are processed strictly in order.
    async fn dispatch(&self, frame: Frame) {
        match frame.message_type {
            MessageType::Request => self.handle_request(frame).await,
            MessageType::Complete => match self.requests.complete(frame) {
                Completion::Callback(handler, reply) => self.invoke(handler, &reply).await,
                Completion::Delivered | Completion::Abandoned => {}
                Completion::Unmatched(frame) => match self.continuations.finish(&frame) {
                    Some(handler) => self.invoke(handler, &frame).await,
                    None => log::warn!("[Session] Orphaned completion: {}", frame.summary()),
                },
            },
            MessageType::Continue => match self.continuations.lookup(&frame) {
                Some(handler) => self.invoke(handler, &frame).await,
                None => log::warn!(
                    "[Session] CONTINUE for unknown request: {}",
                    frame.summary()
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moo::{ChunkSource, FrameReader};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::channel::mpsc;
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    struct Once(Option<Bytes>);

    #[async_trait]
    impl ChunkSource for Once {
        async fn next_chunk(&mut self) -> Option<Result<Bytes, MooError>> {
            self.0.take().map(Ok)
        }
    }

    struct Harness {
        session: Session,
        sent: mpsc::UnboundedReceiver<Message>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self::in_dir(dir).await
        }

        async fn in_dir(dir: tempfile::TempDir) -> Self {
            let store = Arc::new(ConfigStore::new(dir.path()));
            let session =
                Session::new(SessionConfig::default(), ExtensionInfo::default(), store).unwrap();
            let sent = Self::connect(&session).await;
            Self { session, sent, dir }
        }

        /// Simulates a fresh transport the way the connection loop does.
        async fn connect(session: &Session) -> mpsc::UnboundedReceiver<Message> {
            let (tx, rx) = mpsc::unbounded();
            session.inner.reset_tables();
            session
                .inner
                .outbound
                .install(Box::new(tx.sink_map_err(|_| WsError::ConnectionClosed)))
                .await;
            rx
        }

        async fn next_sent(&mut self) -> Frame {
            let bytes = match self.sent.next().await.unwrap() {
                Message::Binary(b) => b,
                other => panic!("unexpected message {:?}", other),
            };
            FrameReader::new(Once(Some(bytes)))
                .read_frame()
                .await
                .unwrap()
                .unwrap()
        }

        fn nothing_sent(&mut self) -> bool {
            self.sent.try_recv().is_err()
        }

        async fn deliver(&self, message_type: MessageType, name: &str, id: u64, body: Value) {
            let body = if body.is_null() {
                Body::Empty
            } else {
                Body::from(body)
            };
            self.session
                .inner
                .dispatch(Frame::new(message_type, name, id, body))
                .await;
        }

        /// Runs info + register; returns the register request body.
        async fn handshake(&mut self, token: Option<&str>) -> Value {
            registration::begin(&self.session.inner).await.unwrap();
            let info = self.next_sent().await;
            assert_eq!(info.name, "com.roonlabs.registry:1/info");

            self.deliver(
                MessageType::Complete,
                "Success",
                info.request_id,
                json!({"core_id": "core-1", "display_name": "Studio", "display_version": "2.0"}),
            )
            .await;

            let register = self.next_sent().await;
            assert_eq!(register.name, "com.roonlabs.registry:1/register");
            let body: Value = register.json().unwrap();

            let mut reply = json!({"core_id": "core-1", "display_name": "Studio"});
            if let Some(token) = token {
                reply["token"] = json!(token);
            }
            self.deliver(MessageType::Complete, "Registered", register.request_id, reply)
                .await;
            body
        }

        fn stored(&self) -> Option<PairingState> {
            ConfigStore::new(self.dir.path()).load(PAIRING_STATE_KEY)
        }
    }

    #[tokio::test]
    async fn registration_persists_new_token_only() {
        let mut h = Harness::new().await;

        let body = h.handshake(Some("tok-1")).await;
        assert!(body.get("token").is_none());
        assert_eq!(h.session.state(), SessionState::Unpaired);
        assert_eq!(h.stored().unwrap().token_for("core-1"), Some("tok-1"));

        // Same token again: the file must not be rewritten.
        std::fs::remove_file(h.dir.path().join("Configuration.json")).unwrap();
        h.sent = Harness::connect(&h.session).await;
        let body = h.handshake(Some("tok-1")).await;
        assert_eq!(body["token"], "tok-1");
        assert!(!h.dir.path().join("Configuration.json").exists());

        // A different token is written.
        h.sent = Harness::connect(&h.session).await;
        h.handshake(Some("tok-2")).await;
        assert_eq!(h.stored().unwrap().token_for("core-1"), Some("tok-2"));
    }

    #[tokio::test]
    async fn stored_token_is_sent_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PairingState::default();
        state.record_token("core-1", "tok-saved");
        ConfigStore::new(dir.path())
            .save(PAIRING_STATE_KEY, &state)
            .unwrap();

        let mut h = Harness::in_dir(dir).await;
        let body = h.handshake(None).await;
        assert_eq!(body["token"], "tok-saved");
        assert_eq!(body["display_name"], "Roon Agent");
    }

    #[tokio::test]
    async fn handshake_emits_events_in_order() {
        let mut h = Harness::new().await;
        let mut events = h.session.subscribe_events();
        h.handshake(Some("tok")).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SessionEvent::CoreInfo {
                    core_id: "core-1".into(),
                    display_name: "Studio".into(),
                    display_version: "2.0".into(),
                },
                SessionEvent::StateChanged {
                    state: SessionState::Registering
                },
                SessionEvent::StateChanged {
                    state: SessionState::Unpaired
                },
                SessionEvent::Registered {
                    core_id: "core-1".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn ping_is_answered_with_success() {
        let mut h = Harness::new().await;
        h.deliver(MessageType::Request, "com.roonlabs.ping:1/ping", 42, Value::Null)
            .await;

        let reply = h.next_sent().await;
        assert_eq!(reply.message_type, MessageType::Complete);
        assert_eq!(reply.name, "Success");
        assert_eq!(reply.request_id, 42);
        assert_eq!(reply.body, Body::Empty);
    }

    #[tokio::test]
    async fn pairing_subscribe_and_unsubscribe() {
        let mut h = Harness::new().await;
        h.handshake(Some("tok")).await;

        h.deliver(
            MessageType::Request,
            "com.roonlabs.pairing:1/subscribe_pairing",
            7,
            json!({"subscription_key": 0}),
        )
        .await;
        let reply = h.next_sent().await;
        assert_eq!(reply.message_type, MessageType::Continue);
        assert_eq!(reply.name, "Subscribed");
        assert_eq!(reply.json::<Value>().unwrap()["paired_core_id"], "core-1");
        assert!(h.session.is_paired());
        assert_eq!(h.session.paired_core_id().as_deref(), Some("core-1"));
        assert_eq!(h.stored().unwrap().paired_core_id.as_deref(), Some("core-1"));

        h.deliver(
            MessageType::Request,
            "com.roonlabs.pairing:1/unsubscribe_pairing",
            8,
            json!({"subscription_key": 0}),
        )
        .await;
        let reply = h.next_sent().await;
        assert_eq!(reply.message_type, MessageType::Complete);
        assert_eq!(reply.name, "Unsubscribed");
        assert_eq!(h.session.state(), SessionState::Unpaired);
        assert_eq!(h.stored().unwrap().paired_core_id, None);
    }

    #[tokio::test]
    async fn unknown_service_gets_no_reply() {
        let mut h = Harness::new().await;
        h.deliver(MessageType::Request, "com.example.nothing:1/poke", 3, Value::Null)
            .await;
        assert!(h.nothing_sent());
    }

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ServiceHandler for Echo {
        async fn handle(&self, request: &Frame, responder: Responder) -> Result<(), MooError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            responder.complete("Success", request.body.clone()).await
        }
    }

    #[tokio::test]
    async fn registered_service_handles_its_prefix() {
        let mut h = Harness::new().await;
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        h.session.register_service("com.example.echo:1", echo.clone());

        h.deliver(
            MessageType::Request,
            "com.example.echo:1/say",
            11,
            json!({"text": "hi"}),
        )
        .await;

        let reply = h.next_sent().await;
        assert_eq!(reply.request_id, 11);
        assert_eq!(reply.json::<Value>().unwrap()["text"], "hi");
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_request_resolves_with_matching_reply() {
        let mut h = Harness::new().await;
        let session = h.session.clone();
        let call = tokio::spawn(async move {
            session
                .send_request("com.roonlabs.transport:2/get_zones", Body::Empty)
                .await
        });

        let request = h.next_sent().await;
        assert_eq!(request.request_id, 0);
        h.deliver(MessageType::Complete, "Success", 99, json!({"wrong": true}))
            .await;
        h.deliver(MessageType::Complete, "Success", 0, json!({"zones": []}))
            .await;

        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.request_id, 0);
        assert_eq!(reply.json::<Value>().unwrap(), json!({"zones": []}));
    }

    #[tokio::test]
    async fn reset_fails_pending_requests_and_restarts_ids() {
        let mut h = Harness::new().await;
        let registry = h.session.subscription_registry("status");
        registry.subscribe(crate::moo::SubscriptionKey::Int(1), 5);

        let session = h.session.clone();
        let call = tokio::spawn(async move {
            session
                .send_request("com.roonlabs.transport:2/get_zones", Body::Empty)
                .await
        });
        let first = h.next_sent().await;

        h.sent = Harness::connect(&h.session).await;
        assert!(matches!(call.await.unwrap(), Err(MooError::SessionReset)));
        assert_eq!(registry.count(), 0);

        // Late completion for the dropped id is an orphan, not a resolution.
        h.deliver(MessageType::Complete, "Success", first.request_id, json!({}))
            .await;

        let session = h.session.clone();
        tokio::spawn(async move {
            let _ = session
                .send_request("com.roonlabs.transport:2/get_zones", Body::Empty)
                .await;
        });
        assert_eq!(h.next_sent().await.request_id, 0);
    }

    #[tokio::test]
    async fn pushes_do_not_cross_into_the_next_connection() {
        let mut h = Harness::new().await;
        let registry = h.session.subscription_registry("status");
        registry.subscribe(crate::moo::SubscriptionKey::Int(1), 5);

        h.session.inner.outbound.take().await;
        let push = {
            let registry = Arc::clone(&registry);
            let sink = h.session.sink();
            tokio::spawn(async move {
                registry
                    .fan_out(sink.as_ref(), "Changed", &Body::from(json!({"message": "late"})))
                    .await
            })
        };
        h.sent = Harness::connect(&h.session).await;

        assert_eq!(push.await.unwrap(), 0);
        assert_eq!(registry.count(), 0);
        assert!(h.nothing_sent());
    }

    #[tokio::test]
    async fn responder_is_bound_to_its_transport() {
        let mut h = Harness::new().await;
        let responder = Responder::new(h.session.sink(), 3);
        h.sent = Harness::connect(&h.session).await;

        assert!(matches!(
            responder.complete("Success", Body::Empty).await,
            Err(MooError::SessionReset)
        ));
        assert!(h.nothing_sent());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_cancels_requests() {
        let h = Harness::new().await;
        h.session.close().await;
        h.session.close().await;
        assert!(h.session.is_closed());
        assert!(matches!(
            h.session
                .send_request("com.roonlabs.transport:2/get_zones", Body::Empty)
                .await,
            Err(MooError::Cancelled)
        ));
    }
}
