//! Zone subscription against the core's `com.roonlabs.transport:2`.
//!
//! [`subscribe_zones`] turns the `Subscribed` / `Changed` pushes of one
//! `subscribe_zones` request into [`ZoneEvent`]s; [`ZoneTable`] folds them
//! into the current set of zones. The event stream ends when the core
//! completes the subscription or the session drops its transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::moo::{Body, MooError, Reply, ReplyHandler, SubscriptionKey};
use crate::protocol_constants::SERVICE_TRANSPORT;
use crate::session::Session;

// ─────────────────────────────────────────────────────────────────────────────
// Zone Model
// ─────────────────────────────────────────────────────────────────────────────

/// Playback state of a zone. States this client does not know map to
/// `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneState {
    Stopped,
    Playing,
    Paused,
    Loading,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One of the `one_line` / `two_line` / `three_line` renderings of the
/// current track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayLines {
    #[serde(default)]
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line3: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    /// Seconds into the track; absent while loading.
    #[serde(default)]
    pub seek_position: Option<i64>,
    /// Track length in seconds; absent for streams.
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub image_key: Option<String>,
    #[serde(default)]
    pub one_line: Option<DisplayLines>,
    #[serde(default)]
    pub two_line: Option<DisplayLines>,
    #[serde(default)]
    pub three_line: Option<DisplayLines>,
}

impl NowPlaying {
    /// Most detailed rendering the core sent.
    pub fn best_lines(&self) -> Option<&DisplayLines> {
        self.three_line
            .as_ref()
            .or(self.two_line.as_ref())
            .or(self.one_line.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub zone_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub state: ZoneState,
    #[serde(default)]
    pub now_playing: Option<NowPlaying>,
}

impl Zone {
    pub fn is_playing(&self) -> bool {
        self.state == ZoneState::Playing
    }
}

/// Seek-only update pushed once per second while a zone plays.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeekChange {
    pub zone_id: String,
    #[serde(default)]
    pub seek_position: Option<i64>,
}

/// Body of a `Changed` push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ZonesUpdate {
    #[serde(default)]
    pub zones_added: Vec<Zone>,
    #[serde(default)]
    pub zones_changed: Vec<Zone>,
    #[serde(default)]
    pub zones_removed: Vec<String>,
    #[serde(default)]
    pub zones_seek_changed: Vec<SeekChange>,
}

#[derive(Debug, Deserialize)]
struct ZonesSnapshot {
    #[serde(default)]
    zones: Vec<Zone>,
}

/// One push on a zone subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneEvent {
    /// Every zone, sent once when the subscription starts.
    Snapshot(Vec<Zone>),
    /// Incremental change.
    Update(ZonesUpdate),
}

// ─────────────────────────────────────────────────────────────────────────────
// Zone Table
// ─────────────────────────────────────────────────────────────────────────────

/// Current zones keyed by zone id.
#[derive(Debug, Default)]
pub struct ZoneTable {
    zones: HashMap<String, Zone>,
}

impl ZoneTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. Returns the ids of zones that were touched.
    pub fn apply(&mut self, event: ZoneEvent) -> Vec<String> {
        match event {
            ZoneEvent::Snapshot(zones) => {
                let mut touched: Vec<String> = self.zones.keys().cloned().collect();
                self.zones.clear();
                for zone in zones {
                    if !touched.contains(&zone.zone_id) {
                        touched.push(zone.zone_id.clone());
                    }
                    self.zones.insert(zone.zone_id.clone(), zone);
                }
                touched
            }
            ZoneEvent::Update(update) => self.apply_update(update),
        }
    }

    fn apply_update(&mut self, update: ZonesUpdate) -> Vec<String> {
        let mut touched = Vec::new();
        for zone_id in update.zones_removed {
            if self.zones.remove(&zone_id).is_some() {
                touched.push(zone_id);
            }
        }
        for zone in update.zones_added.into_iter().chain(update.zones_changed) {
            touched.push(zone.zone_id.clone());
            self.zones.insert(zone.zone_id.clone(), zone);
        }
        for seek in update.zones_seek_changed {
            let Some(zone) = self.zones.get_mut(&seek.zone_id) else {
                continue;
            };
            if let Some(now_playing) = zone.now_playing.as_mut() {
                now_playing.seek_position = seek.seek_position;
                touched.push(seek.zone_id);
            }
        }
        touched
    }

    pub fn get(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.get(zone_id)
    }

    pub fn find_by_name(&self, display_name: &str) -> Option<&Zone> {
        self.zones.values().find(|z| z.display_name == display_name)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn clear(&mut self) {
        self.zones.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription
// ─────────────────────────────────────────────────────────────────────────────

struct ZoneSubscription {
    tx: mpsc::UnboundedSender<ZoneEvent>,
}

impl ZoneSubscription {
    fn decode(reply: &Reply) -> Result<Option<ZoneEvent>, MooError> {
        Ok(match reply.name.as_str() {
            "Subscribed" => Some(ZoneEvent::Snapshot(reply.json::<ZonesSnapshot>()?.zones)),
            "Changed" => Some(ZoneEvent::Update(reply.json()?)),
            "Unsubscribed" => None,
            other => {
                log::warn!("[Transport] Unexpected zone push '{}'", other);
                None
            }
        })
    }
}

#[async_trait]
impl ReplyHandler for ZoneSubscription {
    async fn on_reply(&self, reply: &Reply) -> Result<(), MooError> {
        if let Some(event) = Self::decode(reply)? {
            if self.tx.send(event).is_err() {
                log::debug!("[Transport] Zone receiver dropped");
            }
        }
        Ok(())
    }
}

/// Subscribes to zone changes.
///
/// The first event is a [`ZoneEvent::Snapshot`]. The receiver yields `None`
/// after the transport resets; subscribe again once the session is paired.
pub async fn subscribe_zones(
    session: &Session,
    key: impl Into<SubscriptionKey>,
) -> Result<mpsc::UnboundedReceiver<ZoneEvent>, MooError> {
    let key = key.into();
    let (tx, rx) = mpsc::unbounded_channel();
    let body = Body::json(&serde_json::json!({ "subscription_key": key.to_json() }))?;
    let request_id = session
        .send_subscription(
            &format!("{}/subscribe_zones", SERVICE_TRANSPORT),
            body,
            Arc::new(ZoneSubscription { tx }),
        )
        .await?;
    log::info!("[Transport] Subscribed to zones (key {}, #{})", key, request_id);
    Ok(rx)
}
