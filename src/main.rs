//! rover-relay: forwards rate-limited autopilot telemetry to the rover server.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

use rover_relay::channel::ReconnectingChannel;
use rover_relay::config::{ConfigError, Defaults, ParameterAssignment, RelayConfig};
use rover_relay::link::{LinkError, SimulatedLink, VehicleLink};
use rover_relay::relay::RelayCore;

#[derive(Parser)]
#[command(
    name = "rover-relay",
    about = "Relays vehicle telemetry to the rover server over a websocket"
)]
struct Args {
    /// Vehicle link address (`sim://<name>` for the simulated link).
    #[arg(short, long, default_value = Defaults::LINK_ADDRESS)]
    port: String,

    /// Baud rate of the serial link.
    #[arg(short, long, default_value_t = Defaults::BAUD)]
    baud: u32,

    /// Messages per second for every telemetry class. Also accepted as `--hz`.
    #[arg(long, visible_alias = "hz", default_value_t = Defaults::FREQUENCY_HZ)]
    frequency: f64,

    /// Overrides the GPS message rate.
    #[arg(long)]
    gps_hz: Option<f64>,

    /// Overrides the orientation message rate.
    #[arg(long)]
    orientation_hz: Option<f64>,

    /// Overrides the heading message rate.
    #[arg(long)]
    heading_hz: Option<f64>,

    /// Rover server websocket endpoint.
    #[arg(long, default_value = rover_relay::channel::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Static correction added to every heading, in degrees.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    heading_offset: f64,

    /// Discard telemetry instead of connecting to the rover server.
    #[arg(long)]
    no_transport: bool,

    /// Autopilot parameter written at startup, NAME=VALUE. Repeatable.
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<ParameterAssignment>,

    /// Skip the default COMPASS_ORIENT parameter write.
    #[arg(long)]
    no_default_params: bool,

    /// Reconnect backoff floor in milliseconds.
    #[arg(long, default_value_t = Defaults::RECONNECT_MIN.as_millis() as u64)]
    reconnect_min_ms: u64,

    /// Reconnect backoff ceiling in milliseconds.
    #[arg(long, default_value_t = Defaults::RECONNECT_MAX.as_millis() as u64)]
    reconnect_max_ms: u64,

    /// Connect attempt timeout in milliseconds.
    #[arg(long, default_value_t = Defaults::CONNECT_TIMEOUT.as_millis() as u64)]
    connect_timeout_ms: u64,

    /// Update rate of the simulated link.
    #[arg(long, default_value_t = Defaults::SIM_FEED_HZ)]
    sim_hz: f64,

    /// Log every relayed snapshot.
    #[arg(long)]
    debug: bool,
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        let defaults = RelayConfig::default();
        let mut parameters = if args.no_default_params {
            Vec::new()
        } else {
            defaults.parameters
        };
        parameters.extend(args.params);

        Self {
            link_address: args.port,
            baud: args.baud,
            frequency_hz: args.frequency,
            position_hz: args.gps_hz,
            orientation_hz: args.orientation_hz,
            heading_hz: args.heading_hz,
            endpoint: args.endpoint,
            heading_offset_deg: args.heading_offset,
            no_transport: args.no_transport,
            parameters,
            reconnect_min: Duration::from_millis(args.reconnect_min_ms),
            reconnect_max: Duration::from_millis(args.reconnect_max_ms),
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            sim_feed_hz: args.sim_hz,
            debug: args.debug,
        }
    }
}

#[derive(Debug, Error)]
enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = RelayConfig::from(Args::parse());
    let default_filter = if config.debug {
        "rover_relay=debug"
    } else {
        "rover_relay=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(event = "relay_failed", error = %err);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RelayConfig) -> Result<(), RelayError> {
    config.validate()?;

    info!("waiting for vehicle link on {}", config.link_address);
    let link = Arc::new(SimulatedLink::connect(&config.link_address, config.baud)?);
    for parameter in &config.parameters {
        link.configure_parameter(&parameter.name, parameter.value)?;
        info!(event = "parameter_set", name = %parameter.name, value = parameter.value);
    }
    let feed = link.spawn_feed(config.sim_feed_interval()?, Defaults::SIM_ORIGIN);

    let channel = ReconnectingChannel::spawn(config.channel_config()?);
    let relay = RelayCore::new(Arc::clone(&link), config.relay_options()?, Instant::now());
    info!("relaying telemetry to {}", config.endpoint);

    let outcome = tokio::select! {
        _ = relay.run(channel.sessions()) => Ok(()),
        signal = tokio::signal::ctrl_c() => signal.map_err(RelayError::from),
    };

    info!("shutting down");
    feed.abort();
    channel.shutdown();
    outcome
}
