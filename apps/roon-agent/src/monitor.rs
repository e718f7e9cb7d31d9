//! Zone following.
//!
//! [`ZoneMonitor`] folds zone events into a table and decides which zone the
//! agent reports; [`run`] drives it from a session and pushes the result to
//! the core through the status service.

use std::fmt;
use std::sync::Arc;

use roon_core::services::{subscribe_zones, DisplayLines, ZoneEvent, ZoneState, ZoneTable};
use roon_core::{Session, SessionEvent, StatusService, Zone};
use tokio::sync::{broadcast, mpsc};

/// Subscription key used for the zone subscription.
const ZONES_SUBSCRIPTION_KEY: i64 = 1;

/// What the agent currently reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowShowing {
    pub zone_id: String,
    pub zone_name: String,
    pub state: ZoneState,
    pub lines: Option<DisplayLines>,
    pub image_key: Option<String>,
}

impl NowShowing {
    fn from_zone(zone: &Zone) -> Self {
        let now_playing = zone.now_playing.as_ref();
        Self {
            zone_id: zone.zone_id.clone(),
            zone_name: zone.display_name.clone(),
            state: zone.state,
            lines: now_playing.and_then(|np| np.best_lines().cloned()),
            image_key: now_playing.and_then(|np| np.image_key.clone()),
        }
    }
}

impl fmt::Display for NowShowing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.zone_name)?;
        match &self.lines {
            Some(lines) => {
                f.write_str(&lines.line1)?;
                if let Some(line2) = &lines.line2 {
                    write!(f, " - {}", line2)?;
                }
            }
            None => f.write_str("nothing playing")?,
        }
        write!(f, " ({:?})", self.state)
    }
}

/// Selects the zone to show from the zones the core reports.
pub struct ZoneMonitor {
    table: ZoneTable,
    monitored: Vec<String>,
    showing: Option<NowShowing>,
}

impl ZoneMonitor {
    /// `monitored` holds zone display names; empty follows every zone.
    pub fn new(monitored: Vec<String>) -> Self {
        Self {
            table: ZoneTable::new(),
            monitored,
            showing: None,
        }
    }

    pub fn showing(&self) -> Option<&NowShowing> {
        self.showing.as_ref()
    }

    fn is_monitored(&self, zone: &Zone) -> bool {
        self.monitored.is_empty() || self.monitored.contains(&zone.display_name)
    }

    /// Monitored zones in configuration order, or by name when following all.
    fn candidates(&self) -> Vec<&Zone> {
        if self.monitored.is_empty() {
            let mut zones: Vec<&Zone> = self.table.zones().collect();
            zones.sort_by(|a, b| a.display_name.cmp(&b.display_name));
            zones
        } else {
            self.monitored
                .iter()
                .filter_map(|name| self.table.find_by_name(name))
                .collect()
        }
    }

    /// A playing monitored zone wins, preferring the one already shown. With
    /// nothing playing the shown zone stays; if it is gone the first
    /// monitored zone takes over.
    fn select(&self) -> Option<&Zone> {
        let shown = self
            .showing
            .as_ref()
            .and_then(|s| self.table.get(&s.zone_id))
            .filter(|z| self.is_monitored(z));

        if let Some(zone) = shown.filter(|z| z.is_playing()) {
            return Some(zone);
        }
        let candidates = self.candidates();
        if let Some(zone) = candidates.iter().copied().find(|z| z.is_playing()) {
            return Some(zone);
        }
        shown.or_else(|| candidates.first().copied())
    }

    /// Applies one zone event. Returns true when what is shown changed.
    pub fn apply(&mut self, event: ZoneEvent) -> bool {
        self.table.apply(event);
        let next = self.select().map(NowShowing::from_zone);
        if next == self.showing {
            return false;
        }
        self.showing = next;
        true
    }

    /// Forgets every zone; the next subscription starts from a snapshot.
    pub fn reset(&mut self) {
        self.table.clear();
    }
}

fn status_line(showing: Option<&NowShowing>) -> (String, bool) {
    match showing {
        Some(showing) => (showing.to_string(), false),
        None => ("No monitored zone available".to_string(), true),
    }
}

async fn next_zone_event(zones: &mut Option<mpsc::UnboundedReceiver<ZoneEvent>>) -> Option<ZoneEvent> {
    match zones {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Follows zones until the session closes.
///
/// Subscribes to zones whenever the core pairs with us and reports the
/// selected zone through `status`.
pub async fn run(session: Session, status: Arc<StatusService>, monitored: Vec<String>) {
    let mut events = session.subscribe_events();
    let mut zones: Option<mpsc::UnboundedReceiver<ZoneEvent>> = None;
    let mut monitor = ZoneMonitor::new(monitored);

    loop {
        tokio::select! {
            _ = session.closed() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Paired { core_id }) => {
                    log::info!("[Monitor] Paired with {}, subscribing to zones", core_id);
                    match subscribe_zones(&session, ZONES_SUBSCRIPTION_KEY).await {
                        Ok(rx) => zones = Some(rx),
                        Err(e) => log::warn!("[Monitor] Zone subscription failed: {}", e),
                    }
                }
                Ok(SessionEvent::Unpaired { .. }) | Ok(SessionEvent::Disconnected { .. }) => {
                    zones = None;
                    monitor.reset();
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("[Monitor] Missed {} session event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = next_zone_event(&mut zones) => match event {
                Some(event) => {
                    if monitor.apply(event) {
                        let (message, is_error) = status_line(monitor.showing());
                        log::info!("[Monitor] {}", message);
                        status.set_status(message, is_error).await;
                    }
                }
                None => {
                    log::debug!("[Monitor] Zone subscription ended");
                    zones = None;
                }
            },
        }
    }
    log::info!("[Monitor] Stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use roon_core::services::{NowPlaying, ZonesUpdate};

    fn zone(id: &str, name: &str, state: ZoneState, title: &str) -> Zone {
        Zone {
            zone_id: id.into(),
            display_name: name.into(),
            state,
            now_playing: Some(NowPlaying {
                two_line: Some(DisplayLines {
                    line1: title.into(),
                    line2: Some("Artist".into()),
                    line3: None,
                }),
                image_key: Some(format!("img-{}", id)),
                ..NowPlaying::default()
            }),
        }
    }

    fn changed(zones: Vec<Zone>) -> ZoneEvent {
        ZoneEvent::Update(ZonesUpdate {
            zones_changed: zones,
            ..ZonesUpdate::default()
        })
    }

    fn shown_name(monitor: &ZoneMonitor) -> Option<&str> {
        monitor.showing().map(|s| s.zone_name.as_str())
    }

    #[test]
    fn playing_monitored_zone_wins() {
        let mut monitor = ZoneMonitor::new(vec!["Kitchen".into(), "Office".into()]);
        assert!(monitor.apply(ZoneEvent::Snapshot(vec![
            zone("1", "Kitchen", ZoneState::Stopped, "A"),
            zone("2", "Office", ZoneState::Playing, "B"),
            zone("3", "Garage", ZoneState::Playing, "C"),
        ])));
        assert_eq!(shown_name(&monitor), Some("Office"));
    }

    #[test]
    fn last_shown_zone_stays_when_playback_stops() {
        let mut monitor = ZoneMonitor::new(vec!["Kitchen".into(), "Office".into()]);
        monitor.apply(ZoneEvent::Snapshot(vec![
            zone("1", "Kitchen", ZoneState::Stopped, "A"),
            zone("2", "Office", ZoneState::Playing, "B"),
        ]));

        assert!(monitor.apply(changed(vec![zone("2", "Office", ZoneState::Paused, "B")])));
        assert_eq!(shown_name(&monitor), Some("Office"));
        assert_eq!(monitor.showing().unwrap().state, ZoneState::Paused);
    }

    #[test]
    fn first_monitored_zone_takes_over_when_shown_zone_is_removed() {
        let mut monitor = ZoneMonitor::new(vec!["Kitchen".into(), "Office".into()]);
        monitor.apply(ZoneEvent::Snapshot(vec![
            zone("1", "Kitchen", ZoneState::Stopped, "A"),
            zone("2", "Office", ZoneState::Playing, "B"),
        ]));

        monitor.apply(ZoneEvent::Update(ZonesUpdate {
            zones_removed: vec!["2".into()],
            ..ZonesUpdate::default()
        }));
        assert_eq!(shown_name(&monitor), Some("Kitchen"));
    }

    #[test]
    fn shown_playing_zone_is_kept_over_another_playing_zone() {
        let mut monitor = ZoneMonitor::new(Vec::new());
        monitor.apply(ZoneEvent::Snapshot(vec![zone("2", "Office", ZoneState::Playing, "B")]));
        monitor.apply(changed(vec![zone("1", "Kitchen", ZoneState::Playing, "A")]));
        assert_eq!(shown_name(&monitor), Some("Office"));
    }

    #[test]
    fn seek_updates_do_not_change_what_is_shown() {
        let mut monitor = ZoneMonitor::new(Vec::new());
        monitor.apply(ZoneEvent::Snapshot(vec![zone("1", "Kitchen", ZoneState::Playing, "A")]));
        let seek = ZoneEvent::Update(ZonesUpdate {
            zones_seek_changed: vec![roon_core::services::transport::SeekChange {
                zone_id: "1".into(),
                seek_position: Some(30),
            }],
            ..ZonesUpdate::default()
        });
        assert!(!monitor.apply(seek));
    }

    #[test]
    fn status_line_describes_the_track() {
        let showing = NowShowing::from_zone(&zone("1", "Kitchen", ZoneState::Playing, "Song"));
        assert_eq!(
            status_line(Some(&showing)),
            ("Kitchen: Song - Artist (Playing)".to_string(), false)
        );
        assert!(status_line(None).1);
    }
}
