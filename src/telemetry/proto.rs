use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::snapshot::{TelemetryClass, TelemetrySnapshot};

/// Message sent to the rover server, one per websocket text frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryMessage {
    Gps { lat: f64, lon: f64 },
    Orientation { roll: f64, pitch: f64, yaw: f64 },
    Heading { heading: f64 },
}

impl TelemetryMessage {
    /// Telemetry class this message belongs to.
    pub fn class(&self) -> TelemetryClass {
        match self {
            TelemetryMessage::Gps { .. } => TelemetryClass::Position,
            TelemetryMessage::Orientation { .. } => TelemetryClass::Orientation,
            TelemetryMessage::Heading { .. } => TelemetryClass::Heading,
        }
    }

    /// Parses one websocket text frame.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serializes into one websocket text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl TryFrom<&TelemetrySnapshot> for TelemetryMessage {
    type Error = CodecError;

    fn try_from(snapshot: &TelemetrySnapshot) -> Result<Self, Self::Error> {
        if let Some(field) = snapshot.non_finite_field() {
            return Err(CodecError::NonFinite {
                class: snapshot.class(),
                field,
            });
        }

        Ok(match *snapshot {
            TelemetrySnapshot::Position {
                latitude,
                longitude,
                ..
            } => TelemetryMessage::Gps {
                lat: latitude,
                lon: longitude,
            },
            TelemetrySnapshot::Orientation { roll, pitch, yaw } => {
                TelemetryMessage::Orientation { roll, pitch, yaw }
            }
            TelemetrySnapshot::Heading { heading } => TelemetryMessage::Heading { heading },
        })
    }
}

/// Errors produced while converting snapshots to and from wire text.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot field would serialize as `null`.
    #[error("{class} snapshot has non-finite {field}")]
    NonFinite {
        class: TelemetryClass,
        field: &'static str,
    },
}

/// Encodes a snapshot into its wire text.
///
/// The GPS fix quality gates emission upstream and is not part of the
/// message.
pub fn encode(snapshot: &TelemetrySnapshot) -> Result<String, CodecError> {
    let message = TelemetryMessage::try_from(snapshot)?;
    Ok(message.to_text()?)
}

/// Decodes wire text produced by [`encode`].
pub fn decode(text: &str) -> Result<TelemetryMessage, CodecError> {
    Ok(TelemetryMessage::from_text(text)?)
}
