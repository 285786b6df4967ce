//! Simulated autopilot link.
//!
//! `SimulatedLink` keeps attribute values in memory and fans every
//! [`SimulatedLink::publish`] out to the registered listeners, the same way
//! an autopilot link reports attribute changes. It answers `sim://` addresses
//! only.

use std::collections::HashMap;
use std::f64::consts::{PI, TAU};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::link::{
    Attitude, Attribute, AttributeListener, AttributeValue, GlobalFrame, LinkError, ListenerId,
    VehicleLink,
};
use crate::telemetry::GpsFix;

/// Address scheme served by [`SimulatedLink`].
pub const SIM_SCHEME: &str = "sim://";

/// Feed ticks reported without a GPS fix before the fix is acquired.
const FEED_FIX_ACQUIRE_TICKS: u64 = 5;
/// Radius of the synthetic circuit in degrees.
const FEED_RADIUS_DEG: f64 = 0.0002;
/// Time for one synthetic lap.
const FEED_LAP: Duration = Duration::from_secs(60);
/// Fastest feed cadence; `tokio::time::interval` rejects a zero period.
const FEED_MIN_CADENCE: Duration = Duration::from_millis(1);

#[derive(Default)]
struct SimState {
    next_listener_id: u64,
    listeners: HashMap<Attribute, Vec<(ListenerId, AttributeListener)>>,
    location: Option<GlobalFrame>,
    attitude: Option<Attitude>,
    heading: Option<f64>,
    gps_fix: GpsFix,
    parameters: HashMap<String, f64>,
}

/// In-memory vehicle link.
#[derive(Clone)]
pub struct SimulatedLink {
    name: String,
    baud: u32,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedLink {
    /// Creates a link without going through address parsing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            baud: 0,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Name taken from the `sim://` address.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Baud rate given at connect time; zero for links built with [`SimulatedLink::new`].
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Stores `value` and notifies every listener of its attribute.
    ///
    /// Returns how many listeners accepted the notification.
    pub fn publish(&self, value: AttributeValue) -> usize {
        let listeners: Vec<AttributeListener> = {
            let mut state = self.state();
            match value {
                AttributeValue::GlobalFrame(frame) => state.location = Some(frame),
                AttributeValue::Attitude(attitude) => state.attitude = Some(attitude),
                AttributeValue::Heading(heading) => state.heading = Some(heading),
            }
            state
                .listeners
                .get(&value.attribute())
                .map(|entries| entries.iter().map(|(_, listener)| listener.clone()).collect())
                .unwrap_or_default()
        };

        listeners
            .iter()
            .filter(|listener| listener.notify(value))
            .count()
    }

    /// Overrides the reported GPS fix quality.
    pub fn set_gps_fix(&self, fix: GpsFix) {
        self.state().gps_fix = fix;
    }

    /// Number of live registrations for `attribute`.
    pub fn listener_count(&self, attribute: Attribute) -> usize {
        self.state()
            .listeners
            .get(&attribute)
            .map_or(0, Vec::len)
    }

    /// Last value written for parameter `name`.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.state().parameters.get(name).copied()
    }

    /// Drives a synthetic vehicle lapping a small circle around `origin`.
    ///
    /// The first few ticks report no GPS fix. Cadences below one millisecond
    /// are raised to one millisecond.
    pub fn spawn_feed(&self, cadence: Duration, origin: GlobalFrame) -> JoinHandle<()> {
        let cadence = cadence.max(FEED_MIN_CADENCE);
        let link = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            let mut tick: u64 = 0;
            loop {
                ticker.tick().await;
                if tick == FEED_FIX_ACQUIRE_TICKS {
                    link.set_gps_fix(GpsFix(3));
                    debug!(event = "sim_fix_acquired", link = %link.name);
                }
                let elapsed = cadence.saturating_mul(tick.min(u32::MAX as u64) as u32);
                for value in feed_values(origin, elapsed) {
                    link.publish(value);
                }
                tick = tick.wrapping_add(1);
            }
        })
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn feed_values(origin: GlobalFrame, elapsed: Duration) -> [AttributeValue; 3] {
    let angle = TAU * (elapsed.as_secs_f64() / FEED_LAP.as_secs_f64()).fract();
    let frame = GlobalFrame {
        lat: origin.lat + FEED_RADIUS_DEG * angle.cos(),
        lon: origin.lon + FEED_RADIUS_DEG * angle.sin(),
        alt: origin.alt,
    };
    // Counter-clockwise travel: tangent bearing leads the radius by 90 degrees.
    let heading = (angle.to_degrees() + 90.0).rem_euclid(360.0);
    let mut yaw = heading.to_radians();
    if yaw > PI {
        yaw -= TAU;
    }
    let attitude = Attitude {
        roll: 0.05 * (2.0 * angle).sin(),
        pitch: 0.02 * angle.cos(),
        yaw,
    };
    [
        AttributeValue::GlobalFrame(frame),
        AttributeValue::Attitude(attitude),
        AttributeValue::Heading(heading),
    ]
}

impl VehicleLink for SimulatedLink {
    fn connect(address: &str, baud: u32) -> Result<Self, LinkError> {
        let Some(name) = address.strip_prefix(SIM_SCHEME) else {
            return Err(LinkError::UnsupportedAddress(address.to_string()));
        };
        if baud == 0 {
            return Err(LinkError::Handshake {
                address: address.to_string(),
                reason: "baud rate must be > 0".to_string(),
            });
        }

        let mut link = Self::new(if name.is_empty() { "vehicle" } else { name });
        link.baud = baud;
        info!(event = "link_connected", address, baud);
        Ok(link)
    }

    fn configure_parameter(&self, name: &str, value: f64) -> Result<(), LinkError> {
        if !value.is_finite() {
            return Err(LinkError::Parameter {
                name: name.to_string(),
                reason: "value must be finite".to_string(),
            });
        }
        self.state().parameters.insert(name.to_string(), value);
        debug!(event = "link_parameter_set", name, value);
        Ok(())
    }

    fn add_attribute_listener(
        &self,
        attribute: Attribute,
        listener: AttributeListener,
    ) -> ListenerId {
        let mut state = self.state();
        state.next_listener_id += 1;
        let id = ListenerId(state.next_listener_id);
        state
            .listeners
            .entry(attribute)
            .or_default()
            .push((id, listener));
        id
    }

    fn remove_attribute_listener(&self, attribute: Attribute, id: ListenerId) -> bool {
        let mut state = self.state();
        let Some(entries) = state.listeners.get_mut(&attribute) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        before != entries.len()
    }

    fn location(&self) -> Option<GlobalFrame> {
        self.state().location
    }

    fn attitude(&self) -> Option<Attitude> {
        self.state().attitude
    }

    fn heading(&self) -> Option<f64> {
        self.state().heading
    }

    fn gps_fix(&self) -> GpsFix {
        self.state().gps_fix
    }
}
