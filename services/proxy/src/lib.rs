//! wsrelay proxy library.
//!
//! This crate primarily ships a `wsrelay` binary, but we expose a library
//! surface so the proxy can be embedded and driven from integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod id;
pub mod registry;
pub mod relay;
pub mod server;
pub mod state;
pub mod system;

pub use config::{ProxyConfig, ProxyConfigInput};
pub use error::{ConfigError, RelayError, ServerError, TargetConnectionError};
pub use id::ConnectionId;
pub use registry::{AggregateMetrics, ConnectionRecord, ConnectionRegistry, StatsSnapshot};
pub use server::ProxyServer;
