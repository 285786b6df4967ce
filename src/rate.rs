//! Per-class output throttling.
//!
//! The vehicle link pushes attribute updates at its own cadence, often far
//! above what the rover server needs. [`RateGate`] decides per
//! [`TelemetryClass`] whether an update may be emitted, dropping the rest
//! instead of queueing them.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::telemetry::TelemetryClass;

/// Output frequency is not a finite positive number of messages per second.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
#[error("frequency must be a finite number > 0 Hz, got {0}")]
pub struct InvalidFrequency(pub f64);

/// Minimum spacing between emissions, per class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimits {
    intervals: [Duration; 3],
}

impl RateLimits {
    /// Output rate used when nothing else is configured.
    pub const DEFAULT_HZ: f64 = 10.0;

    /// Applies one frequency to every class.
    pub fn uniform_hz(hz: f64) -> Result<Self, InvalidFrequency> {
        let interval = interval_for_hz(hz)?;
        Ok(Self {
            intervals: [interval; 3],
        })
    }

    /// Overrides the frequency of a single class.
    pub fn with_class_hz(mut self, class: TelemetryClass, hz: f64) -> Result<Self, InvalidFrequency> {
        self.intervals[slot(class)] = interval_for_hz(hz)?;
        Ok(self)
    }

    /// Minimum time between two emissions of `class`.
    pub fn interval(&self, class: TelemetryClass) -> Duration {
        self.intervals[slot(class)]
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            intervals: [Duration::from_millis(100); 3],
        }
    }
}

fn interval_for_hz(hz: f64) -> Result<Duration, InvalidFrequency> {
    if !hz.is_finite() || hz <= 0.0 {
        return Err(InvalidFrequency(hz));
    }
    Duration::try_from_secs_f64(1.0 / hz).map_err(|_| InvalidFrequency(hz))
}

fn slot(class: TelemetryClass) -> usize {
    match class {
        TelemetryClass::Position => 0,
        TelemetryClass::Orientation => 1,
        TelemetryClass::Heading => 2,
    }
}

/// Last-emitted bookkeeping for every telemetry class.
///
/// State only moves forward when [`RateGate::allow`] returns `true`.
#[derive(Clone, Debug)]
pub struct RateGate {
    limits: RateLimits,
    last_emitted: HashMap<TelemetryClass, Instant>,
}

impl RateGate {
    /// Creates a gate where no class has emitted yet.
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            last_emitted: HashMap::new(),
        }
    }

    /// Creates a gate that treats `start` as the last emission of every class.
    pub fn starting_at(limits: RateLimits, start: Instant) -> Self {
        let last_emitted = TelemetryClass::ALL
            .iter()
            .map(|class| (*class, start))
            .collect();
        Self {
            limits,
            last_emitted,
        }
    }

    /// Returns `true` and records `now` when `class` is due for emission.
    pub fn allow(&mut self, class: TelemetryClass, now: Instant) -> bool {
        if let Some(last) = self.last_emitted.get(&class) {
            match last.checked_add(self.limits.interval(class)) {
                Some(next) if now >= next => {}
                _ => return false,
            }
        }
        self.last_emitted.insert(class, now);
        true
    }

    /// Most recent emission recorded for `class`.
    pub fn last_emitted(&self, class: TelemetryClass) -> Option<Instant> {
        self.last_emitted.get(&class).copied()
    }
}
