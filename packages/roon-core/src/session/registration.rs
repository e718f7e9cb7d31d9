//! Registration handshake and the built-in ping/pairing services.
//!
//! After connecting, the session asks `registry:1/info` for the core id,
//! then sends `registry:1/register` with the extension metadata and the
//! token previously issued by that core. A `Registered` reply may carry a new
//! token, which is persisted only when it differs from the stored one.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Inner, Responder, SessionState};
use crate::config::ExtensionInfo;
use crate::events::SessionEvent;
use crate::moo::{Body, Frame, MooError, Reply, ReplyHandler, SubscriptionKey};
use crate::protocol_constants::{SERVICE_PAIRING, SERVICE_PING, SERVICE_REGISTRY};

// ─────────────────────────────────────────────────────────────────────────────
// Wire and Persisted Types
// ─────────────────────────────────────────────────────────────────────────────

/// Reply body of `registry:1/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreInfo {
    pub core_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub display_version: String,
}

/// Body of a `Registered` reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterReply {
    #[serde(default)]
    pub core_id: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub display_version: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub provided_services: Vec<String>,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    #[serde(flatten)]
    info: &'a ExtensionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

/// Persisted pairing bucket (`RoonState`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingState {
    /// Token issued by each core, keyed by core id.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    /// Core that last paired with us.
    #[serde(default)]
    pub paired_core_id: Option<String>,
}

impl PairingState {
    pub fn token_for(&self, core_id: &str) -> Option<&str> {
        self.tokens.get(core_id).map(String::as_str)
    }

    /// Stores `token` for `core_id`. Returns true if the stored value changed.
    pub fn record_token(&mut self, core_id: &str, token: &str) -> bool {
        if self.token_for(core_id) == Some(token) {
            return false;
        }
        self.tokens.insert(core_id.to_string(), token.to_string());
        true
    }

    /// Sets the paired core. Returns true if the stored value changed.
    pub fn set_paired(&mut self, core_id: Option<String>) -> bool {
        let core_id = core_id.filter(|id| !id.is_empty());
        if self.paired_core_id == core_id {
            return false;
        }
        self.paired_core_id = core_id;
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// Receives the `registry:1/info` COMPLETE and starts registration.
pub(super) struct InfoHandler {
    pub(super) session: Weak<Inner>,
}

#[async_trait]
impl ReplyHandler for InfoHandler {
    async fn on_reply(&self, reply: &Reply) -> Result<(), MooError> {
        let Some(inner) = self.session.upgrade() else {
            return Ok(());
        };
        let info: CoreInfo = reply.json()?;
        log::info!(
            "[Session] Core '{}' ({}) version {}",
            info.display_name,
            info.core_id,
            info.display_version
        );

        *inner.core.write() = Some(info.clone());
        inner.emit(SessionEvent::CoreInfo {
            core_id: info.core_id.clone(),
            display_name: info.display_name,
            display_version: info.display_version,
        });
        inner.set_state(SessionState::Registering);

        let token = inner.pairing.lock().token_for(&info.core_id).map(str::to_string);
        let body = Body::json(&RegisterRequest {
            info: &inner.extension,
            token: token.as_deref(),
        })?;
        let handler = Arc::new(RegisterHandler {
            session: Arc::downgrade(&inner),
        });
        inner
            .send_with_continuation(&format!("{}/register", SERVICE_REGISTRY), body, handler)
            .await?;
        Ok(())
    }
}

/// Receives the register reply, whether sent as COMPLETE or CONTINUE.
pub(super) struct RegisterHandler {
    pub(super) session: Weak<Inner>,
}

#[async_trait]
impl ReplyHandler for RegisterHandler {
    async fn on_reply(&self, reply: &Reply) -> Result<(), MooError> {
        let Some(inner) = self.session.upgrade() else {
            return Ok(());
        };
        if reply.name != "Registered" {
            log::warn!("[Session] Registration answered with '{}'", reply.name);
            return Ok(());
        }

        let registration: RegisterReply = reply.json()?;
        let Some(core_id) = registration.core_id.clone().or_else(|| inner.core_id()) else {
            return Err(MooError::MalformedFrame(
                "Registered reply without a core id".into(),
            ));
        };
        log::info!(
            "[Session] Registered with '{}' ({})",
            registration.display_name,
            core_id
        );

        if let Some(token) = registration.token.as_deref() {
            let snapshot = {
                let mut pairing = inner.pairing.lock();
                pairing.record_token(&core_id, token).then(|| pairing.clone())
            };
            if let Some(snapshot) = snapshot {
                log::debug!("[Session] Storing new token for {}", core_id);
                inner.persist_pairing(&snapshot);
            }
        }

        if inner.state() == SessionState::Registering {
            inner.set_state(SessionState::Unpaired);
        }
        inner.emit(SessionEvent::Registered { core_id });
        Ok(())
    }
}

/// Starts the handshake on a freshly installed transport.
pub(super) async fn begin(inner: &Arc<Inner>) -> Result<(), MooError> {
    let handler = Arc::new(InfoHandler {
        session: Arc::downgrade(inner),
    });
    inner
        .send_with_callback(&format!("{}/info", SERVICE_REGISTRY), Body::Empty, handler)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound Requests
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    /// Handles an inbound REQUEST frame. Failures are logged.
    pub(super) async fn handle_request(&self, request: Frame) {
        let responder = Responder::new(self.outbound.clone(), request.request_id);
        if let Err(e) = self.route_request(&request, responder).await {
            log::error!("[Session] Request {} failed: {}", request.summary(), e);
        }
    }

    async fn route_request(&self, request: &Frame, responder: Responder) -> Result<(), MooError> {
        match (request.service(), request.verb()) {
            (SERVICE_PING, "ping") => responder.complete("Success", Body::Empty).await,
            (SERVICE_PAIRING, "subscribe_pairing") => {
                self.subscribe_pairing(request, &responder).await
            }
            (SERVICE_PAIRING, "unsubscribe_pairing") => {
                self.unsubscribe_pairing(request, &responder).await
            }
            (SERVICE_PAIRING, "get_pairing") => {
                let body = Body::json(&serde_json::json!({ "paired_core_id": self.paired_id() }))?;
                responder.complete("Success", body).await
            }
            (service, _) => {
                let handler = self.services.get(service).map(|h| Arc::clone(h.value()));
                match handler {
                    Some(handler) => handler.handle(request, responder).await,
                    None => Err(MooError::NoHandler(service.to_string())),
                }
            }
        }
    }

    fn paired_id(&self) -> Option<String> {
        self.pairing.lock().paired_core_id.clone()
    }

    /// Records the paired core, persisting only on change.
    fn update_paired(&self, core_id: Option<String>) {
        let snapshot = {
            let mut pairing = self.pairing.lock();
            pairing.set_paired(core_id).then(|| pairing.clone())
        };
        if let Some(snapshot) = snapshot {
            self.persist_pairing(&snapshot);
        }
    }

    async fn subscribe_pairing(&self, request: &Frame, responder: &Responder) -> Result<(), MooError> {
        let key = SubscriptionKey::from_body(&request.body)
            .unwrap_or(SubscriptionKey::Int(request.request_id as i64));
        if !self.pairing_subscribers.subscribe(key.clone(), request.request_id) {
            log::debug!("[Session] Pairing key {} re-subscribed", key);
        }

        let core_id = self.core_id();
        responder
            .send_continue(
                "Subscribed",
                Body::json(&serde_json::json!({ "paired_core_id": core_id }))?,
            )
            .await?;

        self.update_paired(core_id.clone());
        self.set_state(SessionState::Paired);
        self.emit(SessionEvent::Paired {
            core_id: core_id.unwrap_or_default(),
        });
        Ok(())
    }

    async fn unsubscribe_pairing(
        &self,
        request: &Frame,
        responder: &Responder,
    ) -> Result<(), MooError> {
        if let Some(key) = SubscriptionKey::from_body(&request.body) {
            self.pairing_subscribers.unsubscribe(&key);
        }
        responder.complete("Unsubscribed", Body::Empty).await?;

        let previous = self.paired_id();
        self.update_paired(None);
        self.set_state(SessionState::Unpaired);
        self.emit(SessionEvent::Unpaired { core_id: previous });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_token_is_not_a_change() {
        let mut state = PairingState::default();
        assert!(state.record_token("core-1", "tok-a"));
        assert!(!state.record_token("core-1", "tok-a"));
        assert!(state.record_token("core-1", "tok-b"));
        assert!(state.record_token("core-2", "tok-b"));
        assert_eq!(state.token_for("core-1"), Some("tok-b"));
    }

    #[test]
    fn empty_paired_id_means_unpaired() {
        let mut state = PairingState::default();
        assert!(!state.set_paired(Some(String::new())));
        assert!(state.set_paired(Some("core-1".into())));
        assert!(!state.set_paired(Some("core-1".into())));
        assert!(state.set_paired(None));
        assert_eq!(state.paired_core_id, None);
    }

    #[test]
    fn register_body_flattens_metadata_and_token() {
        let info = ExtensionInfo::default();
        let body = serde_json::to_value(RegisterRequest {
            info: &info,
            token: Some("tok-a"),
        })
        .unwrap();
        assert_eq!(body["extension_id"], info.extension_id.as_str());
        assert_eq!(body["token"], "tok-a");
        assert!(body["provided_services"].is_array());

        let without = serde_json::to_value(RegisterRequest {
            info: &info,
            token: None,
        })
        .unwrap();
        assert!(without.get("token").is_none());
    }

    #[test]
    fn persisted_bucket_reads_legacy_empty_fields() {
        let state: PairingState =
            serde_json::from_str(r#"{"tokens":{"core-1":"tok"},"paired_core_id":null}"#).unwrap();
        assert_eq!(state.token_for("core-1"), Some("tok"));
        let empty: PairingState = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, PairingState::default());
    }
}
