//! Proxy configuration.
//!
//! Raw input arrives as a [`ProxyConfigInput`] (from the environment, a JSON
//! file, or built in code) and is turned into an immutable [`ProxyConfig`] by
//! [`ProxyConfigInput::validate`]. Validation is all-or-nothing: a partially
//! valid configuration is never returned.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Default maximum concurrent relayed connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10_000;

/// Default idle timeout before a connection is evicted.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Default number of redial attempts after the target drops a connection.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Default wait between redial attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Default listen host.
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Default health endpoint path.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Path of the stats endpoint. Not configurable.
pub const STATS_PATH: &str = "/stats";

/// Upper bound for every millisecond field (one week).
const MAX_DURATION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Unvalidated configuration, as read from a file or the environment.
///
/// Numeric fields are signed so that negative input can be reported against
/// the field that carried it instead of failing inside the deserializer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProxyConfigInput {
    pub target_url: Option<String>,
    pub listen_host: Option<String>,
    pub listen_port: Option<i64>,
    pub max_connections: Option<i64>,
    pub idle_timeout_ms: Option<i64>,
    pub reconnect_attempts: Option<i64>,
    pub reconnect_delay_ms: Option<i64>,
    pub dial_timeout_ms: Option<i64>,
    pub health_path: Option<String>,
    pub log_level: Option<String>,
}

/// Validated, immutable proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Backend WebSocket endpoint (ws:// or wss://).
    pub target_url: Url,
    /// Host or address to bind.
    pub listen_host: String,
    /// Port to bind (0 = ephemeral).
    pub listen_port: u16,
    /// Maximum concurrent relayed connections.
    pub max_connections: u32,
    /// Idle timeout in milliseconds (0 disables eviction).
    pub idle_timeout_ms: u64,
    /// Redial attempts after the target drops a connection.
    pub reconnect_attempts: u32,
    /// Wait between redial attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Dial timeout in milliseconds (0 = unbounded). Defaults to the idle timeout.
    pub dial_timeout_ms: u64,
    /// Path of the health endpoint.
    pub health_path: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl ProxyConfigInput {
    /// Input with only a target URL set; everything else takes its default.
    pub fn with_target(target_url: impl Into<String>) -> Self {
        Self {
            target_url: Some(target_url.into()),
            ..Self::default()
        }
    }

    /// Read input from `WSRELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read input through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let int = |key: &str, field: &'static str| -> Result<Option<i64>, ConfigError> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<i64>()
                        .map_err(|_| ConfigError::InvalidValue {
                            field,
                            value: raw.clone(),
                            reason: "must be an integer".to_string(),
                        })
                })
                .transpose()
        };

        Ok(Self {
            target_url: lookup("WSRELAY_TARGET_URL"),
            listen_host: lookup("WSRELAY_LISTEN_HOST"),
            listen_port: int("WSRELAY_LISTEN_PORT", "listenPort")?,
            max_connections: int("WSRELAY_MAX_CONNECTIONS", "maxConnections")?,
            idle_timeout_ms: int("WSRELAY_IDLE_TIMEOUT_MS", "idleTimeoutMs")?,
            reconnect_attempts: int("WSRELAY_RECONNECT_ATTEMPTS", "reconnectAttempts")?,
            reconnect_delay_ms: int("WSRELAY_RECONNECT_DELAY_MS", "reconnectDelayMs")?,
            dial_timeout_ms: int("WSRELAY_DIAL_TIMEOUT_MS", "dialTimeoutMs")?,
            health_path: lookup("WSRELAY_HEALTH_PATH"),
            log_level: lookup("WSRELAY_LOG_LEVEL"),
        })
    }

    /// Parse input from camelCase JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Load {
            source_name: "json".to_string(),
            reason: e.to_string(),
        })
    }

    /// Read input from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::Load {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Overlay `other` on top of `self`: fields set in `other` win.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            target_url: other.target_url.or(self.target_url),
            listen_host: other.listen_host.or(self.listen_host),
            listen_port: other.listen_port.or(self.listen_port),
            max_connections: other.max_connections.or(self.max_connections),
            idle_timeout_ms: other.idle_timeout_ms.or(self.idle_timeout_ms),
            reconnect_attempts: other.reconnect_attempts.or(self.reconnect_attempts),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            dial_timeout_ms: other.dial_timeout_ms.or(self.dial_timeout_ms),
            health_path: other.health_path.or(self.health_path),
            log_level: other.log_level.or(self.log_level),
        }
    }

    /// Validate the input into a [`ProxyConfig`].
    pub fn validate(&self) -> Result<ProxyConfig, ConfigError> {
        let target_url = validate_target_url(self.target_url.as_deref())?;

        let listen_host = match self.listen_host.as_deref().map(str::trim) {
            None => DEFAULT_LISTEN_HOST.to_string(),
            Some("") => {
                return Err(ConfigError::InvalidValue {
                    field: "listenHost",
                    value: String::new(),
                    reason: "must not be blank".to_string(),
                })
            }
            Some(host) => host.to_string(),
        };

        let listen_port = ranged(
            "listenPort",
            self.listen_port,
            i64::from(DEFAULT_LISTEN_PORT),
            i64::from(u16::MAX),
        )? as u16;

        let max_connections = ranged(
            "maxConnections",
            self.max_connections,
            i64::from(DEFAULT_MAX_CONNECTIONS),
            i64::from(u32::MAX),
        )? as u32;

        let idle_timeout_ms = ranged(
            "idleTimeoutMs",
            self.idle_timeout_ms,
            DEFAULT_IDLE_TIMEOUT_MS as i64,
            MAX_DURATION_MS,
        )? as u64;

        let reconnect_attempts = ranged(
            "reconnectAttempts",
            self.reconnect_attempts,
            i64::from(DEFAULT_RECONNECT_ATTEMPTS),
            i64::from(u32::MAX),
        )? as u32;

        let reconnect_delay_ms = ranged(
            "reconnectDelayMs",
            self.reconnect_delay_ms,
            DEFAULT_RECONNECT_DELAY_MS as i64,
            MAX_DURATION_MS,
        )? as u64;

        let dial_timeout_ms = ranged(
            "dialTimeoutMs",
            self.dial_timeout_ms,
            idle_timeout_ms as i64,
            MAX_DURATION_MS,
        )? as u64;

        let health_path = validate_health_path(self.health_path.as_deref())?;

        let log_level = self
            .log_level
            .as_deref()
            .map(str::trim)
            .filter(|level| !level.is_empty())
            .unwrap_or("info")
            .to_string();

        Ok(ProxyConfig {
            target_url,
            listen_host,
            listen_port,
            max_connections,
            idle_timeout_ms,
            reconnect_attempts,
            reconnect_delay_ms,
            dial_timeout_ms,
            health_path,
            log_level,
        })
    }
}

impl ProxyConfig {
    /// Load configuration for the binary: optional JSON file named by
    /// `WSRELAY_CONFIG`, overridden by `WSRELAY_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("WSRELAY_CONFIG") {
            Ok(path) => ProxyConfigInput::from_file(path)?,
            Err(_) => ProxyConfigInput::default(),
        };
        file.merge(ProxyConfigInput::from_env()?).validate()
    }

    /// Idle timeout, or `None` when eviction is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Dial timeout, or `None` when dials are unbounded.
    pub fn dial_timeout(&self) -> Option<Duration> {
        (self.dial_timeout_ms > 0).then(|| Duration::from_millis(self.dial_timeout_ms))
    }

    /// Wait between redial attempts.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn validate_target_url(raw: Option<&str>) -> Result<Url, ConfigError> {
    const FIELD: &str = "targetUrl";

    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingField { field: FIELD })?;

    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field: FIELD,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigError::UnsupportedScheme {
            field: FIELD,
            scheme: url.scheme().to_string(),
        });
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl {
            field: FIELD,
            value: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

fn validate_health_path(raw: Option<&str>) -> Result<String, ConfigError> {
    let path = raw.map(str::trim).unwrap_or(DEFAULT_HEALTH_PATH);

    let reason = if !path.starts_with('/') {
        Some("must start with '/'")
    } else if path == STATS_PATH {
        Some("conflicts with the stats endpoint")
    } else if path == "/" {
        Some("must not be the root path")
    } else if path
        .split('/')
        .any(|segment| segment.starts_with([':', '*']) || segment.contains(['{', '}']))
    {
        Some("must be a literal path without captures or wildcards")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidValue {
            field: "healthPath",
            value: path.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(path.to_string()),
    }
}

fn ranged(field: &'static str, value: Option<i64>, default: i64, max: i64) -> Result<i64, ConfigError> {
    let value = value.unwrap_or(default);
    if (0..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min: 0,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    #[test]
    fn test_minimal_config_takes_defaults() {
        let input = ProxyConfigInput {
            target_url: Some("ws://localhost:9000/ws".to_string()),
            listen_port: Some(0),
            ..ProxyConfigInput::default()
        };

        let config = input.validate().unwrap();
        assert_eq!(config.target_url.as_str(), "ws://localhost:9000/ws");
        assert_eq!(config.listen_port, 0);
        assert_eq!(config.listen_host, DEFAULT_LISTEN_HOST);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
        assert_eq!(config.reconnect_attempts, DEFAULT_RECONNECT_ATTEMPTS);
        assert_eq!(config.reconnect_delay_ms, DEFAULT_RECONNECT_DELAY_MS);
        assert_eq!(config.dial_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
        assert_eq!(config.health_path, DEFAULT_HEALTH_PATH);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_fields_are_carried_over() {
        let input = ProxyConfigInput {
            target_url: Some("wss://backend.example.com/socket".to_string()),
            listen_host: Some("127.0.0.1".to_string()),
            listen_port: Some(65535),
            max_connections: Some(5),
            idle_timeout_ms: Some(1500),
            reconnect_attempts: Some(0),
            reconnect_delay_ms: Some(0),
            dial_timeout_ms: Some(250),
            health_path: Some("/healthz".to_string()),
            log_level: Some("debug".to_string()),
        };

        let config = input.validate().unwrap();
        assert_eq!(config.target_url.scheme(), "wss");
        assert_eq!(config.listen_host, "127.0.0.1");
        assert_eq!(config.listen_port, 65535);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.idle_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.reconnect_attempts, 0);
        assert_eq!(config.reconnect_delay(), Duration::ZERO);
        assert_eq!(config.dial_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.health_path, "/healthz");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_zero_idle_timeout_disables_eviction_and_dial_bound() {
        let input = ProxyConfigInput {
            idle_timeout_ms: Some(0),
            ..ProxyConfigInput::with_target("ws://localhost:9000")
        };
        let config = input.validate().unwrap();
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.dial_timeout(), None);
    }

    #[rstest]
    #[case::missing(None)]
    #[case::empty(Some(""))]
    #[case::blank(Some("   "))]
    fn test_missing_target_url_is_rejected(#[case] target: Option<&str>) {
        let input = ProxyConfigInput {
            target_url: target.map(str::to_string),
            ..ProxyConfigInput::default()
        };
        let err = input.validate().unwrap_err();
        assert_eq!(err, ConfigError::MissingField { field: "targetUrl" });
    }

    #[rstest]
    #[case::http("http://localhost:9000")]
    #[case::https("https://localhost:9000")]
    #[case::tcp("tcp://localhost:9000")]
    fn test_non_websocket_scheme_is_rejected(#[case] target: &str) {
        let err = ProxyConfigInput::with_target(target).validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme { .. }));
        assert_eq!(err.field(), Some("targetUrl"));
    }

    #[rstest]
    #[case::not_a_url("localhost:9000")]
    #[case::garbage("ws//nope")]
    #[case::no_host("ws://")]
    fn test_unparseable_target_url_is_rejected(#[case] target: &str) {
        let err = ProxyConfigInput::with_target(target).validate().unwrap_err();
        assert_eq!(err.field(), Some("targetUrl"));
    }

    #[rstest]
    #[case::negative_port("listenPort", ProxyConfigInput { listen_port: Some(-1), ..ProxyConfigInput::with_target("ws://t") })]
    #[case::port_too_large("listenPort", ProxyConfigInput { listen_port: Some(65536), ..ProxyConfigInput::with_target("ws://t") })]
    #[case::negative_max("maxConnections", ProxyConfigInput { max_connections: Some(-5), ..ProxyConfigInput::with_target("ws://t") })]
    #[case::negative_idle("idleTimeoutMs", ProxyConfigInput { idle_timeout_ms: Some(-1), ..ProxyConfigInput::with_target("ws://t") })]
    #[case::negative_attempts("reconnectAttempts", ProxyConfigInput { reconnect_attempts: Some(-2), ..ProxyConfigInput::with_target("ws://t") })]
    #[case::negative_delay("reconnectDelayMs", ProxyConfigInput { reconnect_delay_ms: Some(-100), ..ProxyConfigInput::with_target("ws://t") })]
    #[case::huge_delay("reconnectDelayMs", ProxyConfigInput { reconnect_delay_ms: Some(i64::MAX), ..ProxyConfigInput::with_target("ws://t") })]
    fn test_out_of_range_fields_are_named(#[case] field: &str, #[case] input: ProxyConfigInput) {
        let err = input.validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }), "got {err:?}");
        assert_eq!(err.field(), Some(field));
    }

    #[rstest]
    #[case::relative("health")]
    #[case::stats("/stats")]
    #[case::root("/")]
    #[case::colon_capture("/:x")]
    #[case::brace_capture("/{x}")]
    #[case::wildcard("/*rest")]
    #[case::nested_capture("/health/{id}/live")]
    fn test_bad_health_path_is_rejected(#[case] path: &str) {
        let input = ProxyConfigInput {
            health_path: Some(path.to_string()),
            ..ProxyConfigInput::with_target("ws://localhost:9000")
        };
        let err = input.validate().unwrap_err();
        assert_eq!(err.field(), Some("healthPath"));
    }

    #[test]
    fn test_blank_listen_host_is_rejected() {
        let input = ProxyConfigInput {
            listen_host: Some("  ".to_string()),
            ..ProxyConfigInput::with_target("ws://localhost:9000")
        };
        assert_eq!(input.validate().unwrap_err().field(), Some("listenHost"));
    }

    #[test]
    fn test_from_lookup_reads_all_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WSRELAY_TARGET_URL", "ws://backend:9000/ws"),
            ("WSRELAY_LISTEN_HOST", "127.0.0.1"),
            ("WSRELAY_LISTEN_PORT", "9100"),
            ("WSRELAY_MAX_CONNECTIONS", "42"),
            ("WSRELAY_IDLE_TIMEOUT_MS", "30000"),
            ("WSRELAY_RECONNECT_ATTEMPTS", "5"),
            ("WSRELAY_RECONNECT_DELAY_MS", "250"),
            ("WSRELAY_HEALTH_PATH", "/healthz"),
        ]);

        let input = ProxyConfigInput::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        let config = input.validate().unwrap();
        assert_eq!(config.listen_port, 9100);
        assert_eq!(config.max_connections, 42);
        assert_eq!(config.idle_timeout_ms, 30_000);
        assert_eq!(config.dial_timeout_ms, 30_000);
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay_ms, 250);
        assert_eq!(config.health_path, "/healthz");
    }

    #[test]
    fn test_from_lookup_names_non_integer_field() {
        let err = ProxyConfigInput::from_lookup(|key| {
            (key == "WSRELAY_MAX_CONNECTIONS").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert_eq!(err.field(), Some("maxConnections"));
    }

    #[test]
    fn test_json_input_and_merge() {
        let file = ProxyConfigInput::from_json_str(
            r#"{"targetUrl":"ws://file-target:1/","listenPort":7000,"maxConnections":3}"#,
        )
        .unwrap();
        let env = ProxyConfigInput {
            listen_port: Some(7001),
            ..ProxyConfigInput::default()
        };

        let config = file.merge(env).validate().unwrap();
        assert_eq!(config.target_url.host_str(), Some("file-target"));
        assert_eq!(config.listen_port, 7001);
        assert_eq!(config.max_connections, 3);
    }

    #[test]
    fn test_json_rejects_unknown_fields() {
        let err = ProxyConfigInput::from_json_str(r#"{"targetUrl":"ws://t","bogus":1}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }
}
