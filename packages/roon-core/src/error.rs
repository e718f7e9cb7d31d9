//! Centralized error types for the Roon core library.
//!
//! Each subsystem defines its own `thiserror` enum next to the code that
//! raises it ([`DiscoveryError`], [`MooError`], [`StoreError`]). This module
//! gives them machine-readable codes and folds them into [`RoonError`] for
//! callers that drive several subsystems at once.

use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::moo::MooError;
use crate::store::StoreError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::Send(_) => "sood_send_failed",
            Self::FieldTooLong { .. } => "sood_field_too_long",
            Self::NoCoreFound => "no_core_found",
            Self::AmbiguousCore { .. } => "ambiguous_core",
        }
    }
}

impl ErrorCode for MooError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport_failed",
            Self::NotConnected => "not_connected",
            Self::Cancelled => "cancelled",
            Self::SessionReset => "session_reset",
            Self::MalformedFrame(_) => "malformed_frame",
            Self::FrameTooLarge(_) => "frame_too_large",
            Self::Truncated => "truncated_frame",
            Self::Json(_) => "json_error",
            Self::UnexpectedReply { .. } => "unexpected_reply",
            Self::NoHandler(_) => "no_handler",
        }
    }
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "store_io_failed",
            Self::Json(_) => "store_json_failed",
        }
    }
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum RoonError {
    /// Core discovery failed or was ambiguous.
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// A session-level request or handler failed.
    #[error("Session error: {0}")]
    Session(#[from] MooError),

    /// The settings document could not be written.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration values are unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RoonError {
    /// Returns a machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery(e) => e.code(),
            Self::Session(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Configuration(_) => "configuration_error",
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type RoonResult<T> = Result<T, RoonError>;
