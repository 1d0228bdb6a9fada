//! Error types for the proxy.
//!
//! Only [`ConfigError`] and [`ServerError`] ever reach a caller. Target and
//! relay failures are consumed by the relay session, which turns them into
//! state transitions, an error counter increment and a best-effort error frame
//! to the inbound peer.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Invalid proxy configuration. Fatal to startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field was not provided (or was blank).
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    /// The target URL could not be parsed or has no host.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// The target URL uses a scheme other than ws/wss.
    #[error("unsupported {field} scheme '{scheme}': expected ws or wss")]
    UnsupportedScheme { field: &'static str, scheme: String },

    /// A numeric field is outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// A field has a value that is not acceptable for other reasons.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("failed to load configuration from {source_name}: {reason}")]
    Load { source_name: String, reason: String },
}

impl ConfigError {
    /// Name of the offending field, if the error is about a single field.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::MissingField { field }
            | ConfigError::InvalidUrl { field, .. }
            | ConfigError::UnsupportedScheme { field, .. }
            | ConfigError::OutOfRange { field, .. }
            | ConfigError::InvalidValue { field, .. } => Some(field),
            ConfigError::Load { .. } => None,
        }
    }
}

/// Failure to establish the outbound connection to the target.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetConnectionError {
    /// The dial did not complete within the dial timeout.
    #[error("timed out after {}ms connecting to target", .0.as_millis())]
    Timeout(Duration),

    /// The TCP connect or WebSocket handshake failed.
    #[error("failed to connect to target: {0}")]
    Handshake(String),
}

/// Mid-stream send/receive failure on either leg of a relay.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The WebSocket transport reported an error.
    #[error("websocket transport error: {0}")]
    Transport(String),

    /// The other end of an in-memory leg has gone away.
    #[error("peer has gone away")]
    PeerGone,
}

/// Errors surfaced by [`crate::ProxyServer`].
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("proxy server is already running on {0}")]
    AlreadyRunning(std::net::SocketAddr),

    #[error("listener error: {0}")]
    Io(#[from] io::Error),
}
