//! Deployment configuration for the relay binary.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::channel::{ChannelConfig, DEFAULT_ENDPOINT};
use crate::link::GlobalFrame;
use crate::rate::{InvalidFrequency, RateLimits};
use crate::relay::RelayOptions;
use crate::retry::BackoffPolicy;
use crate::telemetry::TelemetryClass;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Defaults;

impl Defaults {
    pub const LINK_ADDRESS: &'static str = "sim://rover";
    pub const BAUD: u32 = 57_600;
    pub const FREQUENCY_HZ: f64 = RateLimits::DEFAULT_HZ;
    pub const RECONNECT_MIN: Duration = Duration::from_millis(500);
    pub const RECONNECT_MAX: Duration = Duration::from_secs(3);
    pub const RECONNECT_JITTER: Duration = Duration::from_millis(100);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// M8N compass modules mounted without a calibration dance need Yaw270.
    pub const COMPASS_ORIENT: (&'static str, f64) = ("COMPASS_ORIENT", 6.0);
    pub const SIM_FEED_HZ: f64 = 50.0;
    pub const SIM_ORIGIN: GlobalFrame = GlobalFrame {
        lat: 43.000_86,
        lon: -78.789_34,
        alt: None,
    };
}

/// Errors produced while validating configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid output frequency: {0}")]
    Frequency(#[from] InvalidFrequency),

    #[error("invalid parameter assignment {0:?}, expected NAME=VALUE")]
    Parameter(String),

    #[error("heading offset must be finite, got {0}")]
    HeadingOffset(f64),

    #[error("reconnect backoff floor {min:?} exceeds ceiling {max:?}")]
    Backoff { min: Duration, max: Duration },

    #[error("endpoint must not be empty")]
    EmptyEndpoint,

    #[error("simulated feed rate {0} Hz is too fast, period rounds to zero")]
    SimFeedRate(f64),
}

/// Autopilot parameter written at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterAssignment {
    pub name: String,
    pub value: f64,
}

impl FromStr for ParameterAssignment {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Parameter(text.to_string());
        let (name, value) = text.split_once('=').ok_or_else(invalid)?;
        let name = name.trim();
        let value: f64 = value.trim().parse().map_err(|_| invalid())?;
        if name.is_empty() || !value.is_finite() {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_string(),
            value,
        })
    }
}

/// Everything a relay process needs to start.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    pub link_address: String,
    pub baud: u32,
    /// Output rate shared by every class without an override.
    pub frequency_hz: f64,
    pub position_hz: Option<f64>,
    pub orientation_hz: Option<f64>,
    pub heading_hz: Option<f64>,
    pub endpoint: String,
    pub heading_offset_deg: f64,
    /// Discard every write instead of connecting.
    pub no_transport: bool,
    pub parameters: Vec<ParameterAssignment>,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub connect_timeout: Duration,
    pub sim_feed_hz: f64,
    pub debug: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let (name, value) = Defaults::COMPASS_ORIENT;
        Self {
            link_address: Defaults::LINK_ADDRESS.to_string(),
            baud: Defaults::BAUD,
            frequency_hz: Defaults::FREQUENCY_HZ,
            position_hz: None,
            orientation_hz: None,
            heading_hz: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            heading_offset_deg: 0.0,
            no_transport: false,
            parameters: vec![ParameterAssignment {
                name: name.to_string(),
                value,
            }],
            reconnect_min: Defaults::RECONNECT_MIN,
            reconnect_max: Defaults::RECONNECT_MAX,
            connect_timeout: Defaults::CONNECT_TIMEOUT,
            sim_feed_hz: Defaults::SIM_FEED_HZ,
            debug: false,
        }
    }
}

impl RelayConfig {
    /// Checks every derived setting without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limits()?;
        self.backoff()?;
        if !self.heading_offset_deg.is_finite() {
            return Err(ConfigError::HeadingOffset(self.heading_offset_deg));
        }
        if !self.no_transport && self.endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        self.sim_feed_interval()?;
        Ok(())
    }

    /// Builds the per-class output limits, applying any overrides.
    pub fn rate_limits(&self) -> Result<RateLimits, ConfigError> {
        let mut limits = RateLimits::uniform_hz(self.frequency_hz)?;
        let overrides = [
            (TelemetryClass::Position, self.position_hz),
            (TelemetryClass::Orientation, self.orientation_hz),
            (TelemetryClass::Heading, self.heading_hz),
        ];
        for (class, hz) in overrides {
            if let Some(hz) = hz {
                limits = limits.with_class_hz(class, hz)?;
            }
        }
        Ok(limits)
    }

    /// Builds the reconnect policy; equal bounds mean a fixed delay.
    pub fn backoff(&self) -> Result<BackoffPolicy, ConfigError> {
        if self.reconnect_min > self.reconnect_max {
            return Err(ConfigError::Backoff {
                min: self.reconnect_min,
                max: self.reconnect_max,
            });
        }
        Ok(BackoffPolicy {
            initial_backoff: self.reconnect_min,
            max_backoff: self.reconnect_max,
            jitter: if self.reconnect_min == self.reconnect_max {
                Duration::ZERO
            } else {
                Defaults::RECONNECT_JITTER
            },
        })
    }

    /// Returns the relay tunables derived from this config.
    pub fn relay_options(&self) -> Result<RelayOptions, ConfigError> {
        Ok(RelayOptions {
            limits: self.rate_limits()?,
            heading_offset_deg: self.heading_offset_deg,
            ..RelayOptions::default()
        })
    }

    /// Returns the rover server channel settings.
    pub fn channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        Ok(ChannelConfig::new(self.endpoint.clone())
            .with_backoff(self.backoff()?)
            .with_connect_timeout(self.connect_timeout)
            .with_discard(self.no_transport))
    }

    /// Cadence of the simulated link's attribute updates.
    pub fn sim_feed_interval(&self) -> Result<Duration, ConfigError> {
        let limits = RateLimits::uniform_hz(self.sim_feed_hz)?;
        let interval = limits.interval(TelemetryClass::Position);
        if interval.is_zero() {
            return Err(ConfigError::SimFeedRate(self.sim_feed_hz));
        }
        Ok(interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = RelayConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.endpoint, "ws://localhost:3001/ardupilot");
        assert_eq!(
            config.parameters,
            vec![ParameterAssignment {
                name: "COMPASS_ORIENT".to_string(),
                value: 6.0,
            }]
        );
    }

    #[test]
    fn per_class_overrides_apply() {
        let config = RelayConfig {
            frequency_hz: 10.0,
            position_hz: Some(0.2),
            ..RelayConfig::default()
        };
        let limits = config.rate_limits().expect("valid limits");
        assert_eq!(
            limits.interval(TelemetryClass::Position),
            Duration::from_secs(5)
        );
        assert_eq!(
            limits.interval(TelemetryClass::Orientation),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn rejects_zero_frequency() {
        let config = RelayConfig {
            heading_hz: Some(0.0),
            ..RelayConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Frequency(InvalidFrequency(0.0)))
        );
    }

    #[test]
    fn rejects_inverted_backoff() {
        let config = RelayConfig {
            reconnect_min: Duration::from_secs(4),
            reconnect_max: Duration::from_secs(1),
            ..RelayConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Backoff { .. })));
    }

    #[test]
    fn equal_backoff_bounds_give_fixed_delay() {
        let config = RelayConfig {
            reconnect_min: Duration::from_secs(3),
            reconnect_max: Duration::from_secs(3),
            ..RelayConfig::default()
        };
        assert_eq!(
            config.backoff().expect("valid backoff"),
            BackoffPolicy::fixed(Duration::from_secs(3))
        );
    }

    #[test]
    fn empty_endpoint_allowed_only_without_transport() {
        let mut config = RelayConfig {
            endpoint: "   ".to_string(),
            ..RelayConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyEndpoint));
        config.no_transport = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_parameter_assignments() {
        let parsed: ParameterAssignment = "COMPASS_ORIENT=6".parse().expect("valid");
        assert_eq!(parsed.name, "COMPASS_ORIENT");
        assert_eq!(parsed.value, 6.0);

        let spaced: ParameterAssignment = " ARMING_CHECK = 0 ".parse().expect("valid");
        assert_eq!(spaced.name, "ARMING_CHECK");

        for bad in ["COMPASS_ORIENT", "=6", "COMPASS_ORIENT=six", "X=inf"] {
            assert!(bad.parse::<ParameterAssignment>().is_err(), "{bad}");
        }
    }

    #[test]
    fn rejects_feed_rate_with_zero_period() {
        let config = RelayConfig {
            sim_feed_hz: 1e10,
            ..RelayConfig::default()
        };
        assert_eq!(config.sim_feed_interval(), Err(ConfigError::SimFeedRate(1e10)));
        assert_eq!(config.validate(), Err(ConfigError::SimFeedRate(1e10)));

        let fast = RelayConfig {
            sim_feed_hz: 1000.0,
            ..RelayConfig::default()
        };
        assert_eq!(fast.sim_feed_interval(), Ok(Duration::from_millis(1)));
    }

    #[test]
    fn channel_config_carries_transport_mode() {
        let config = RelayConfig {
            no_transport: true,
            connect_timeout: Duration::from_secs(2),
            ..RelayConfig::default()
        };
        let channel = config.channel_config().expect("valid");
        assert!(channel.discard);
        assert_eq!(channel.connect_timeout, Duration::from_secs(2));
        assert_eq!(channel.endpoint, DEFAULT_ENDPOINT);
    }
}
