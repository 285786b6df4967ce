//! Telemetry relay from a vehicle autopilot link to a rover server.
//!
//! The crate is organized leaves first:
//! - `rate`: per-class output throttling.
//! - `telemetry`: telemetry snapshots and the JSON wire codec.
//! - `link`: vehicle-link capability trait and the simulated link.
//! - `channel`: reconnecting websocket channel and its sessions.
//! - `relay`: bridge that subscribes to the link and writes to the channel.
//! - `config`: deployment settings for the relay binary.
//! - `retry`: backoff and timeout utilities.

/// Outbound websocket channel to the rover server.
pub mod channel;
/// Relay process configuration.
pub mod config;
/// Vehicle telemetry link capability.
pub mod link;
/// Per-class rate limiting.
pub mod rate;
/// Link-to-channel relay core.
pub mod relay;
/// Backoff and timeout helpers.
pub mod retry;
/// Telemetry snapshots and wire messages.
pub mod telemetry;
