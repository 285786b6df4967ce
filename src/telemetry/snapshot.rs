use std::fmt;

use crate::link::Attribute;

/// Independently rate-limited telemetry stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TelemetryClass {
    Position,
    Orientation,
    Heading,
}

impl TelemetryClass {
    /// Every class, in registration order.
    pub const ALL: [TelemetryClass; 3] = [
        TelemetryClass::Position,
        TelemetryClass::Orientation,
        TelemetryClass::Heading,
    ];

    /// Vehicle-link attribute whose changes feed this class.
    pub fn attribute(self) -> Attribute {
        match self {
            TelemetryClass::Position => Attribute::GlobalFrame,
            TelemetryClass::Orientation => Attribute::Attitude,
            TelemetryClass::Heading => Attribute::Heading,
        }
    }

    /// Value of the `type` discriminator on the wire.
    pub fn wire_type(self) -> &'static str {
        match self {
            TelemetryClass::Position => "gps",
            TelemetryClass::Orientation => "orientation",
            TelemetryClass::Heading => "heading",
        }
    }
}

impl fmt::Display for TelemetryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_type())
    }
}

/// GPS fix type as reported by the autopilot (0-1 no fix, 2 = 2D, 3 = 3D, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct GpsFix(pub u8);

impl GpsFix {
    /// Lowest fix type that yields a usable position.
    pub const MIN_VALID: GpsFix = GpsFix(2);

    pub fn is_valid(self) -> bool {
        self >= Self::MIN_VALID
    }
}

/// Point-in-time telemetry value for one class.
///
/// All payload fields of a variant are populated together.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TelemetrySnapshot {
    /// Global-frame position in degrees.
    Position {
        latitude: f64,
        longitude: f64,
        fix: GpsFix,
    },
    /// Attitude in radians.
    Orientation { roll: f64, pitch: f64, yaw: f64 },
    /// Compass heading in degrees.
    Heading { heading: f64 },
}

impl TelemetrySnapshot {
    pub fn class(&self) -> TelemetryClass {
        match self {
            TelemetrySnapshot::Position { .. } => TelemetryClass::Position,
            TelemetrySnapshot::Orientation { .. } => TelemetryClass::Orientation,
            TelemetrySnapshot::Heading { .. } => TelemetryClass::Heading,
        }
    }

    /// Returns the first payload field holding a non-finite float, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        fn first_bad<const N: usize>(fields: [(&'static str, f64); N]) -> Option<&'static str> {
            fields
                .into_iter()
                .find_map(|(name, value)| (!value.is_finite()).then_some(name))
        }

        match *self {
            TelemetrySnapshot::Position {
                latitude,
                longitude,
                ..
            } => first_bad([("lat", latitude), ("lon", longitude)]),
            TelemetrySnapshot::Orientation { roll, pitch, yaw } => {
                first_bad([("roll", roll), ("pitch", pitch), ("yaw", yaw)])
            }
            TelemetrySnapshot::Heading { heading } => first_bad([("heading", heading)]),
        }
    }
}
