//! Configuration surface.
//!
//! Configuration is an explicit struct passed to the correlator's
//! constructor; there is no process-wide mutable configuration state.

use std::str::FromStr;
use std::time::Duration;

use crate::ConfigError;

/// Correlator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// How long to wait for a response to a specific request before failing
    /// its completion. Not the connection-level timeout of the underlying
    /// transport. Zero disables the deadline.
    pub timeout: Duration,
    /// Delay between timeout sweeps.
    pub sweep_interval: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            sweep_interval: Duration::from_millis(100),
        }
    }
}

/// Supported channel kinds, selected at configuration time.
///
/// Parsing an unknown kind is a fatal configuration error, raised before
/// any connection is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelKind {
    /// Streaming WebSocket connection.
    WebSocket,
}

impl FromStr for ChannelKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "websocket" => Ok(ChannelKind::WebSocket),
            other => Err(ConfigError::UnsupportedChannel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_timeout() {
        let config = CorrelatorConfig::default();
        assert_eq!(config.timeout, Duration::ZERO);
        assert_eq!(config.sweep_interval, Duration::from_millis(100));
    }

    #[test]
    fn unknown_channel_kind_fails_fast() {
        assert_eq!("websocket".parse::<ChannelKind>(), Ok(ChannelKind::WebSocket));
        assert_eq!(
            "carrier-pigeon".parse::<ChannelKind>(),
            Err(ConfigError::UnsupportedChannel("carrier-pigeon".into()))
        );
    }
}
