//! Outbound channel to the rover server.
//!
//! - `client`: websocket connect loop with backoff and session publication.
//! - `session`: handle to one live connection.

/// Reconnecting websocket channel.
pub mod client;
/// Per-connection session handle.
pub mod session;

pub use client::{
    ChannelConfig, ChannelError, ChannelStatus, CloseReason, ReconnectingChannel,
    DEFAULT_ENDPOINT,
};
pub use session::ChannelSession;
