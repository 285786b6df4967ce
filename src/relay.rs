//! Bridge from vehicle-link notifications to the rover server channel.
//!
//! [`RelayCore`] keeps exactly one listener per telemetry class registered
//! while a channel session is open. Every notification is gated, encoded and
//! written to that session in one step; anything that cannot go out right
//! away is dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::channel::ChannelSession;
use crate::link::{AttributeEvent, AttributeListener, AttributeValue, ListenerId, VehicleLink};
use crate::rate::{RateGate, RateLimits};
use crate::telemetry::{encode, TelemetryClass, TelemetrySnapshot};

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Tunables for [`RelayCore`].
#[derive(Clone, Debug, PartialEq)]
pub struct RelayOptions {
    pub limits: RateLimits,
    /// Static correction added to every heading, in degrees.
    pub heading_offset_deg: f64,
    /// Link notifications buffered ahead of the dispatch loop.
    pub event_capacity: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            limits: RateLimits::default(),
            heading_offset_deg: 0.0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Result of handling one link notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Throttled,
    /// Position update without a usable GPS fix.
    NoFix,
    NoSession,
    /// Notification was queued under an earlier session.
    Stale,
    EncodeFailed,
    SendFailed,
}

/// Per-session dispatch counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub sent: u64,
    pub throttled: u64,
    pub no_fix: u64,
    pub stale: u64,
    pub encode_failed: u64,
    pub send_failed: u64,
}

#[derive(Clone, Copy, Debug)]
struct ListenerRegistration {
    class: TelemetryClass,
    id: ListenerId,
}

/// Relay between one vehicle link and the current channel session.
pub struct RelayCore<L: VehicleLink> {
    link: Arc<L>,
    gate: RateGate,
    heading_offset_deg: f64,
    session: Option<ChannelSession>,
    registrations: Vec<ListenerRegistration>,
    events_tx: mpsc::Sender<AttributeEvent>,
    events_rx: mpsc::Receiver<AttributeEvent>,
    stats: RelayStats,
}

impl<L: VehicleLink> RelayCore<L> {
    /// Creates a relay whose rate gate counts every class as emitted at `start`.
    pub fn new(link: Arc<L>, options: RelayOptions, start: Instant) -> Self {
        let (events_tx, events_rx) = mpsc::channel(options.event_capacity.max(1));
        Self {
            link,
            gate: RateGate::starting_at(options.limits, start),
            heading_offset_deg: options.heading_offset_deg,
            session: None,
            registrations: Vec::new(),
            events_tx,
            events_rx,
            stats: RelayStats::default(),
        }
    }

    /// Rate gate shared by every session.
    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    /// Counters for the current session.
    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Id of the session listeners are currently registered for.
    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(ChannelSession::id)
    }

    /// Classes with a live listener registration.
    pub fn registered_classes(&self) -> Vec<TelemetryClass> {
        self.registrations
            .iter()
            .map(|registration| registration.class)
            .collect()
    }

    /// Switches to `session`, tearing down the previous registrations first.
    ///
    /// Binding the session that is already bound is a no-op.
    pub fn bind_session(&mut self, session: Option<ChannelSession>) {
        let next_id = session.as_ref().map(ChannelSession::id);
        if next_id == self.session_id() {
            return;
        }

        if let Some(previous) = self.session.take() {
            self.unregister_all();
            debug!(
                event = "relay_session_stats",
                session_id = previous.id(),
                sent = self.stats.sent,
                throttled = self.stats.throttled,
                no_fix = self.stats.no_fix,
                stale = self.stats.stale,
                encode_failed = self.stats.encode_failed,
                send_failed = self.stats.send_failed
            );
            self.stats = RelayStats::default();
        }

        if let Some(session) = session {
            let session_id = session.id();
            self.session = Some(session);
            self.register_all(session_id);
            info!(event = "relay_subscribed", session_id);
        }
    }

    fn register_all(&mut self, generation: u64) {
        for class in TelemetryClass::ALL {
            let listener = AttributeListener::new(generation, self.events_tx.clone());
            let id = self
                .link
                .add_attribute_listener(class.attribute(), listener);
            self.registrations.push(ListenerRegistration { class, id });
        }
    }

    fn unregister_all(&mut self) {
        for registration in self.registrations.drain(..) {
            let attribute = registration.class.attribute();
            if !self.link.remove_attribute_listener(attribute, registration.id) {
                warn!(
                    event = "relay_listener_missing",
                    attribute = attribute.name(),
                    listener_id = registration.id.0
                );
            }
        }
    }

    /// Handles one notification observed at `now`.
    pub fn dispatch(&mut self, event: AttributeEvent, now: Instant) -> DispatchOutcome {
        let Some(session_id) = self.session_id() else {
            return DispatchOutcome::NoSession;
        };
        if event.generation != session_id {
            self.stats.stale += 1;
            return DispatchOutcome::Stale;
        }

        let snapshot = match event.value {
            AttributeValue::GlobalFrame(frame) => {
                let fix = self.link.gps_fix();
                if !fix.is_valid() {
                    self.stats.no_fix += 1;
                    debug!(event = "relay_no_fix", fix = fix.0);
                    return DispatchOutcome::NoFix;
                }
                TelemetrySnapshot::Position {
                    latitude: frame.lat,
                    longitude: frame.lon,
                    fix,
                }
            }
            AttributeValue::Attitude(attitude) => TelemetrySnapshot::Orientation {
                roll: attitude.roll,
                pitch: attitude.pitch,
                yaw: attitude.yaw,
            },
            AttributeValue::Heading(heading) => TelemetrySnapshot::Heading {
                heading: self.corrected_heading(heading),
            },
        };

        let class = snapshot.class();
        if !self.gate.allow(class, now) {
            self.stats.throttled += 1;
            return DispatchOutcome::Throttled;
        }

        let text = match encode(&snapshot) {
            Ok(text) => text,
            Err(err) => {
                self.stats.encode_failed += 1;
                error!(event = "relay_encode_failed", class = %class, error = %err);
                return DispatchOutcome::EncodeFailed;
            }
        };

        let Some(session) = self.session.as_ref() else {
            return DispatchOutcome::NoSession;
        };
        match session.send(text) {
            Ok(()) => {
                self.stats.sent += 1;
                debug!(event = "relay_sent", session_id, snapshot = ?snapshot);
                DispatchOutcome::Sent
            }
            Err(err) => {
                self.stats.send_failed += 1;
                debug!(event = "relay_send_failed", session_id, class = %class, error = %err);
                DispatchOutcome::SendFailed
            }
        }
    }

    fn corrected_heading(&self, heading: f64) -> f64 {
        if self.heading_offset_deg == 0.0 {
            return heading;
        }
        (heading + self.heading_offset_deg).rem_euclid(360.0)
    }

    /// Relays until the session source goes away.
    ///
    /// Every session published on `sessions` gets a fresh set of listener
    /// registrations; the previous set is removed first.
    pub async fn run(mut self, mut sessions: watch::Receiver<Option<ChannelSession>>) {
        let current = sessions.borrow_and_update().clone();
        self.bind_session(current);

        loop {
            tokio::select! {
                changed = sessions.changed() => {
                    if changed.is_err() {
                        self.bind_session(None);
                        info!(event = "relay_stopped");
                        return;
                    }
                    let current = sessions.borrow_and_update().clone();
                    self.bind_session(current);
                }
                Some(event) = self.events_rx.recv() => {
                    self.dispatch(event, Instant::now());
                }
            }
        }
    }
}

impl<L: VehicleLink> Drop for RelayCore<L> {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::link::{Attitude, Attribute, GlobalFrame, SimulatedLink};
    use crate::telemetry::{decode, GpsFix, TelemetryMessage};

    fn open_session(id: u64) -> (ChannelSession, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (ChannelSession::new(id, tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(text);
        }
        out
    }

    fn position(generation: u64, lat: f64, lon: f64) -> AttributeEvent {
        AttributeEvent {
            generation,
            value: AttributeValue::GlobalFrame(GlobalFrame { lat, lon, alt: None }),
        }
    }

    fn orientation(generation: u64, roll: f64, pitch: f64, yaw: f64) -> AttributeEvent {
        AttributeEvent {
            generation,
            value: AttributeValue::Attitude(Attitude { roll, pitch, yaw }),
        }
    }

    fn relay_with(options: RelayOptions) -> (Arc<SimulatedLink>, RelayCore<SimulatedLink>, Instant) {
        let link = Arc::new(SimulatedLink::new("test"));
        let start = Instant::now();
        let relay = RelayCore::new(Arc::clone(&link), options, start);
        (link, relay, start)
    }

    fn listener_counts(link: &SimulatedLink) -> [usize; 3] {
        [
            link.listener_count(Attribute::GlobalFrame),
            link.listener_count(Attribute::Attitude),
            link.listener_count(Attribute::Heading),
        ]
    }

    #[test]
    fn second_gps_fix_inside_interval_is_dropped() {
        let (link, mut relay, start) = relay_with(RelayOptions::default());
        link.set_gps_fix(GpsFix(3));
        let (session, mut rx) = open_session(1);
        relay.bind_session(Some(session));

        let t0 = start + Duration::from_secs(1);
        assert_eq!(relay.dispatch(position(1, 1.0, 2.0), t0), DispatchOutcome::Sent);
        assert_eq!(
            relay.dispatch(position(1, 1.0, 2.0), t0 + Duration::from_millis(50)),
            DispatchOutcome::Throttled
        );

        assert_eq!(drain(&mut rx), vec![r#"{"type":"gps","lat":1.0,"lon":2.0}"#.to_string()]);
    }

    #[test]
    fn orientation_spaced_past_interval_sends_both() {
        let (_link, mut relay, start) = relay_with(RelayOptions::default());
        let (session, mut rx) = open_session(1);
        relay.bind_session(Some(session));

        let t0 = start + Duration::from_secs(1);
        assert_eq!(relay.dispatch(orientation(1, 0.1, 0.2, 0.3), t0), DispatchOutcome::Sent);
        assert_eq!(
            relay.dispatch(
                orientation(1, 0.1, 0.2, 0.3),
                t0 + Duration::from_millis(150)
            ),
            DispatchOutcome::Sent
        );

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        for text in sent {
            assert_eq!(
                decode(&text).expect("decode"),
                TelemetryMessage::Orientation {
                    roll: 0.1,
                    pitch: 0.2,
                    yaw: 0.3
                }
            );
        }
    }

    #[test]
    fn nothing_is_sent_before_first_interval_elapses() {
        let (_link, mut relay, start) = relay_with(RelayOptions::default());
        let (session, mut rx) = open_session(1);
        relay.bind_session(Some(session));

        assert_eq!(
            relay.dispatch(orientation(1, 0.0, 0.0, 0.0), start + Duration::from_millis(20)),
            DispatchOutcome::Throttled
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn position_without_fix_never_touches_gate() {
        let (link, mut relay, start) = relay_with(RelayOptions::default());
        let (session, mut rx) = open_session(1);
        relay.bind_session(Some(session));

        let t0 = start + Duration::from_secs(1);
        for fix in [0, 1] {
            link.set_gps_fix(GpsFix(fix));
            assert_eq!(relay.dispatch(position(1, 5.0, 6.0), t0), DispatchOutcome::NoFix);
        }
        assert_eq!(relay.gate().last_emitted(TelemetryClass::Position), Some(start));
        assert!(drain(&mut rx).is_empty());

        link.set_gps_fix(GpsFix(2));
        assert_eq!(relay.dispatch(position(1, 5.0, 6.0), t0), DispatchOutcome::Sent);
        assert_eq!(relay.stats().no_fix, 2);
    }

    #[test]
    fn heading_offset_wraps_into_compass_range() {
        let options = RelayOptions {
            heading_offset_deg: 10.0,
            ..RelayOptions::default()
        };
        let (_link, mut relay, start) = relay_with(options);
        let (session, mut rx) = open_session(1);
        relay.bind_session(Some(session));

        let event = AttributeEvent {
            generation: 1,
            value: AttributeValue::Heading(355.0),
        };
        assert_eq!(
            relay.dispatch(event, start + Duration::from_secs(1)),
            DispatchOutcome::Sent
        );
        let sent = drain(&mut rx);
        assert_eq!(
            decode(&sent[0]).expect("decode"),
            TelemetryMessage::Heading { heading: 5.0 }
        );
    }

    #[test]
    fn rebinding_keeps_one_listener_per_class() {
        let (link, mut relay, _start) = relay_with(RelayOptions::default());
        assert_eq!(listener_counts(&link), [0, 0, 0]);

        let (first, _first_rx) = open_session(1);
        relay.bind_session(Some(first.clone()));
        relay.bind_session(Some(first));
        assert_eq!(listener_counts(&link), [1, 1, 1]);

        relay.bind_session(None);
        assert_eq!(listener_counts(&link), [0, 0, 0]);
        assert!(relay.registered_classes().is_empty());

        let (second, _second_rx) = open_session(2);
        relay.bind_session(Some(second));
        let (third, _third_rx) = open_session(3);
        relay.bind_session(Some(third));
        assert_eq!(listener_counts(&link), [1, 1, 1]);
        assert_eq!(relay.session_id(), Some(3));
        assert_eq!(relay.registered_classes(), TelemetryClass::ALL.to_vec());
    }

    #[test]
    fn events_from_previous_session_are_discarded() {
        let (_link, mut relay, start) = relay_with(RelayOptions::default());
        let (first, _first_rx) = open_session(1);
        relay.bind_session(Some(first));
        let (second, mut second_rx) = open_session(2);
        relay.bind_session(Some(second));

        let t0 = start + Duration::from_secs(1);
        assert_eq!(relay.dispatch(orientation(1, 0.1, 0.1, 0.1), t0), DispatchOutcome::Stale);
        assert_eq!(relay.dispatch(orientation(2, 0.1, 0.1, 0.1), t0), DispatchOutcome::Sent);
        assert_eq!(drain(&mut second_rx).len(), 1);
    }

    #[test]
    fn closed_session_write_is_contained() {
        let (_link, mut relay, start) = relay_with(RelayOptions::default());
        let (session, rx) = open_session(1);
        relay.bind_session(Some(session));
        drop(rx);

        assert_eq!(
            relay.dispatch(orientation(1, 0.0, 0.0, 0.0), start + Duration::from_secs(1)),
            DispatchOutcome::SendFailed
        );
        assert_eq!(relay.stats().send_failed, 1);
    }

    #[test]
    fn non_finite_snapshot_is_not_sent() {
        let (_link, mut relay, start) = relay_with(RelayOptions::default());
        let (session, mut rx) = open_session(1);
        relay.bind_session(Some(session));

        assert_eq!(
            relay.dispatch(
                orientation(1, f64::NAN, 0.0, 0.0),
                start + Duration::from_secs(1)
            ),
            DispatchOutcome::EncodeFailed
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn no_session_means_no_dispatch() {
        let (_link, mut relay, start) = relay_with(RelayOptions::default());
        assert_eq!(
            relay.dispatch(orientation(1, 0.0, 0.0, 0.0), start + Duration::from_secs(1)),
            DispatchOutcome::NoSession
        );
    }

    #[tokio::test]
    async fn run_follows_published_sessions() {
        let link = Arc::new(SimulatedLink::new("run"));
        link.set_gps_fix(GpsFix(3));
        let options = RelayOptions {
            limits: RateLimits::uniform_hz(1000.0).expect("valid frequency"),
            ..RelayOptions::default()
        };
        let relay = RelayCore::new(Arc::clone(&link), options, Instant::now());
        let (sessions_tx, sessions_rx) = watch::channel(None);
        let task = tokio::spawn(relay.run(sessions_rx));

        let (first, mut first_rx) = open_session(1);
        sessions_tx.send_replace(Some(first));
        wait_for_listeners(&link, [1, 1, 1]).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        link.publish(AttributeValue::Heading(42.0));
        let text = tokio::time::timeout(Duration::from_secs(1), first_rx.recv())
            .await
            .expect("message in time")
            .expect("session open");
        assert_eq!(
            decode(&text).expect("decode"),
            TelemetryMessage::Heading { heading: 42.0 }
        );

        sessions_tx.send_replace(None);
        wait_for_listeners(&link, [0, 0, 0]).await;

        let (second, _second_rx) = open_session(2);
        sessions_tx.send_replace(Some(second));
        wait_for_listeners(&link, [1, 1, 1]).await;

        drop(sessions_tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay stops when session source closes")
            .expect("relay task joins");
        assert_eq!(listener_counts(&link), [0, 0, 0]);
    }

    async fn wait_for_listeners(link: &SimulatedLink, expected: [usize; 3]) {
        for _ in 0..200 {
            if listener_counts(link) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "listener counts stuck at {:?}, expected {:?}",
            listener_counts(link),
            expected
        );
    }
}
