//! Vehicle telemetry link capability.
//!
//! The relay consumes an autopilot link only through [`VehicleLink`]:
//! parameter writes, attribute accessors, and add/remove of attribute
//! listeners. Listener notifications are delivered as [`AttributeEvent`]
//! messages on a bounded channel owned by the subscriber.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::telemetry::GpsFix;

/// In-process link used for bench runs and tests.
pub mod sim;

pub use sim::SimulatedLink;

/// Observable attribute of the vehicle link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    GlobalFrame,
    Attitude,
    Heading,
}

impl Attribute {
    /// Autopilot-side attribute name.
    pub fn name(self) -> &'static str {
        match self {
            Attribute::GlobalFrame => "location.global_frame",
            Attribute::Attitude => "attitude",
            Attribute::Heading => "heading",
        }
    }
}

/// Global-frame location in degrees, altitude in meters when known.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlobalFrame {
    pub lat: f64,
    pub lon: f64,
    pub alt: Option<f64>,
}

/// Vehicle attitude in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// New value carried by an attribute-change notification.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AttributeValue {
    GlobalFrame(GlobalFrame),
    Attitude(Attitude),
    /// Compass heading in degrees.
    Heading(f64),
}

impl AttributeValue {
    /// Attribute this value was reported under.
    pub fn attribute(&self) -> Attribute {
        match self {
            AttributeValue::GlobalFrame(_) => Attribute::GlobalFrame,
            AttributeValue::Attitude(_) => Attribute::Attitude,
            AttributeValue::Heading(_) => Attribute::Heading,
        }
    }
}

/// Handle returned by [`VehicleLink::add_attribute_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Attribute change delivered to a listener.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttributeEvent {
    /// Generation the receiving listener was registered under.
    pub generation: u64,
    pub value: AttributeValue,
}

/// Subscriber end of an attribute registration.
///
/// Notifications are pushed with `try_send`; a full queue drops the update.
#[derive(Clone, Debug)]
pub struct AttributeListener {
    generation: u64,
    tx: mpsc::Sender<AttributeEvent>,
}

impl AttributeListener {
    /// Creates a listener whose events carry `generation`.
    pub fn new(generation: u64, tx: mpsc::Sender<AttributeEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation stamped on every delivered event.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Delivers `value` to the subscriber.
    ///
    /// Returns `false` once the subscriber has gone away.
    pub fn notify(&self, value: AttributeValue) -> bool {
        let event = AttributeEvent {
            generation: self.generation,
            value,
        };
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Errors produced by a vehicle link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Address scheme is not handled by this link implementation.
    #[error("unsupported link address {0:?}")]
    UnsupportedAddress(String),

    /// Link answered but the handshake could not complete.
    #[error("link handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    /// Autopilot rejected a parameter write.
    #[error("parameter {name} rejected: {reason}")]
    Parameter { name: String, reason: String },
}

/// Capabilities the relay needs from an autopilot connection.
pub trait VehicleLink: Send + Sync + 'static {
    /// Opens the link at `address` using `baud` for serial transports.
    fn connect(address: &str, baud: u32) -> Result<Self, LinkError>
    where
        Self: Sized;

    /// Writes an autopilot parameter.
    fn configure_parameter(&self, name: &str, value: f64) -> Result<(), LinkError>;

    /// Registers `listener` for changes of `attribute`.
    fn add_attribute_listener(
        &self,
        attribute: Attribute,
        listener: AttributeListener,
    ) -> ListenerId;

    /// Removes a registration. Returns `false` if `id` was not registered.
    fn remove_attribute_listener(&self, attribute: Attribute, id: ListenerId) -> bool;

    /// Latest global position, if one has been reported.
    fn location(&self) -> Option<GlobalFrame>;

    /// Latest attitude in radians.
    fn attitude(&self) -> Option<Attitude>;

    /// Compass heading in degrees.
    fn heading(&self) -> Option<f64>;

    /// Current GPS fix quality.
    fn gps_fix(&self) -> GpsFix;
}
