//! Telemetry data carried from the vehicle link to the rover server.
//!
//! - `snapshot`: telemetry classes and the typed snapshot union.
//! - `proto`: wire messages and the JSON codec.

/// Wire messages understood by the rover server.
pub mod proto;
/// Telemetry classes and snapshots.
pub mod snapshot;

pub use proto::{decode, encode, CodecError, TelemetryMessage};
pub use snapshot::{GpsFix, TelemetryClass, TelemetrySnapshot};
