//! Roon Core - client library for Roon extensions.
//!
//! This crate finds a Roon core on the local network, connects to it over
//! the MOO/1 WebSocket protocol and keeps an extension registered and paired
//! across reconnects. It is used by the `roon-agent` binary and can be
//! embedded in other hosts.
//!
//! # Architecture
//!
//! - [`discovery`]: SOOD multicast queries and core selection
//! - [`moo`]: frame codec, request multiplexer and subscription tables
//! - [`session`]: connection loop, registration, pairing and service routing
//! - [`store`]: persisted settings document (tokens, paired core)
//! - [`services`]: status, transport and image services on top of a session
//! - [`events`]: session event stream
//! - [`config`]: tunables and extension metadata
//! - [`error`]: error codes and the crate-wide error type
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning the connection loop
//! - [`EventEmitter`](events::EventEmitter): observing session events
//! - [`ServiceHandler`](session::ServiceHandler): answering core requests
//! - [`ReplyHandler`](moo::ReplyHandler): receiving replies and pushes
//! - [`FrameSink`](moo::FrameSink) / [`ChunkSource`](moo::ChunkSource):
//!   the transport seams of the codec

#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod moo;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod session;
pub mod store;

pub use config::{DiscoveryConfig, ExtensionInfo, SessionConfig};
pub use discovery::{select_core, DiscoveryClient, DiscoveryError, DiscoveryResult};
pub use error::{ErrorCode, RoonError, RoonResult};
pub use events::{
    BroadcastEventBridge, EventEmitter, LoggingEventEmitter, NoopEventEmitter, SessionEvent,
};
pub use moo::{Body, Frame, MessageType, MooError, Reply, ReplyHandler, SubscriptionKey};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use services::{StatusService, Zone, ZoneEvent, ZoneState, ZoneTable};
pub use session::{CoreInfo, Responder, ServiceHandler, Session, SessionState};
pub use store::{ConfigStore, StoreError};
