//! Error types.

use std::fmt;
use std::io;

use crate::ResponseEnvelope;

/// Failure of a single logical request.
///
/// Every per-request failure resolves that request's own completion; none of
/// these terminate the correlator or leak into unrelated call sites.
#[derive(Debug, Clone)]
pub enum CallError {
    /// The respondent answered with a status outside the success range, or
    /// the request timed out (sentinel status). The envelope carries the
    /// same shape as a success, so callers can branch on status alone.
    Status(ResponseEnvelope),
    /// The channel rejected the outbound transmission.
    Transmit(String),
    /// The connection closed before this request resolved.
    ConnectionLost,
}

impl CallError {
    /// The envelope carried by a status failure, if any.
    pub fn envelope(&self) -> Option<&ResponseEnvelope> {
        match self {
            CallError::Status(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Status(envelope) if envelope.is_timeout())
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Status(envelope) if envelope.is_timeout() => {
                write!(f, "request {} timed out", envelope.id)
            }
            CallError::Status(envelope) => {
                write!(f, "request {} failed with status {}", envelope.id, envelope.status)
            }
            CallError::Transmit(reason) => write!(f, "transmit failed: {reason}"),
            CallError::ConnectionLost => f.write_str("connection lost before resolution"),
        }
    }
}

impl std::error::Error for CallError {}

/// Transport-level channel failure.
#[derive(Debug)]
pub enum ChannelError {
    /// The connection is closed.
    Closed,
    Io(io::Error),
    /// Outbound message could not be encoded.
    Codec(serde_json::Error),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Closed => f.write_str("channel closed"),
            ChannelError::Io(e) => write!(f, "channel i/o error: {e}"),
            ChannelError::Codec(e) => write!(f, "channel codec error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Closed => None,
            ChannelError::Io(e) => Some(e),
            ChannelError::Codec(e) => Some(e),
        }
    }
}

/// Fatal configuration error, raised at construction time and never at
/// first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The requested channel kind is not supported.
    UnsupportedChannel(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnsupportedChannel(kind) => {
                write!(f, "unsupported channel kind: {kind:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
