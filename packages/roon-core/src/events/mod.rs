//! Session event stream.
//!
//! This module provides:
//! - [`EventEmitter`] trait for the session to emit events
//! - [`BroadcastEventBridge`] fanning events out to any number of receivers
//! - [`SessionEvent`], the connection/pairing notifications collaborators
//!   consume

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::session::SessionState;

/// Connection and pairing notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged {
        state: SessionState,
    },
    /// The core answered `registry:1/info`.
    CoreInfo {
        #[serde(rename = "coreId")]
        core_id: String,
        #[serde(rename = "displayName")]
        display_name: String,
        #[serde(rename = "displayVersion")]
        display_version: String,
    },
    /// The core accepted the registration.
    Registered {
        #[serde(rename = "coreId")]
        core_id: String,
    },
    /// The core selected this extension.
    Paired {
        #[serde(rename = "coreId")]
        core_id: String,
    },
    /// The core dropped the pairing.
    Unpaired {
        #[serde(rename = "coreId")]
        core_id: Option<String>,
    },
    /// The transport went away.
    Disconnected {
        /// Frames received since the connect attempt.
        #[serde(rename = "framesReceived")]
        frames_received: u64,
    },
}
