//! Connection identifiers.
//!
//! Connection ids use the prefixed format `conn_{ulid}`, e.g.
//! `conn_01HV4Z2WQXKJNM8GPQY6VBKC3D`. ULIDs are time-ordered, so sorting the
//! stats output by id also sorts it by registration time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use ulid::Ulid;

/// Errors produced when parsing a [`ConnectionId`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionIdError {
    #[error("connection id cannot be empty")]
    Empty,

    #[error("connection id must start with '{expected}_', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("invalid ULID in connection id: {0}")]
    InvalidUlid(String),
}

/// Unique identifier of a registered relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(Ulid);

impl ConnectionId {
    pub const PREFIX: &'static str = "conn";

    /// Generates a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = ConnectionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ConnectionIdError::Empty);
        }

        let (prefix, raw) = s.split_once('_').unwrap_or((s, ""));
        if prefix != Self::PREFIX {
            return Err(ConnectionIdError::InvalidPrefix {
                expected: Self::PREFIX,
                actual: prefix.to_string(),
            });
        }

        raw.parse::<Ulid>()
            .map(Self)
            .map_err(|e| ConnectionIdError::InvalidUlid(e.to_string()))
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConnectionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse_agree() {
        let id = ConnectionId::generate();
        let rendered = id.to_string();
        assert!(rendered.starts_with("conn_"));
        assert_eq!(rendered.parse::<ConnectionId>().unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_foreign_prefix() {
        let err = "sess_01HV4Z2WQXKJNM8GPQY6VBKC3D"
            .parse::<ConnectionId>()
            .unwrap_err();
        assert!(matches!(err, ConnectionIdError::InvalidPrefix { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<ConnectionId>(), Err(ConnectionIdError::Empty));
        assert!(matches!(
            "conn_not-a-ulid".parse::<ConnectionId>(),
            Err(ConnectionIdError::InvalidUlid(_))
        ));
        assert!(matches!(
            "conn".parse::<ConnectionId>(),
            Err(ConnectionIdError::InvalidUlid(_))
        ));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_serializes_as_string() {
        let id = ConnectionId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
