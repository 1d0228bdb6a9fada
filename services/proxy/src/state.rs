//! Application state shared across request handlers.

use std::sync::Arc;

use tokio::sync::{watch, Semaphore};

use crate::config::ProxyConfig;
use crate::registry::{ConnectionRegistry, SharedRegistry};
use crate::relay::{SessionContext, SessionTable, TargetDialer};

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Arc<ProxyConfig>,
    registry: SharedRegistry,
    sessions: Arc<SessionTable>,
    dialer: Arc<dyn TargetDialer>,
    admission: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        config: Arc<ProxyConfig>,
        registry: SharedRegistry,
        sessions: Arc<SessionTable>,
        dialer: Arc<dyn TargetDialer>,
        admission: Arc<Semaphore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                registry,
                sessions,
                dialer,
                admission,
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Connection slots. One permit is held for each admitted session.
    pub fn admission(&self) -> &Arc<Semaphore> {
        &self.inner.admission
    }

    /// Context handed to each new relay session.
    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            config: Arc::clone(&self.inner.config),
            registry: Arc::clone(&self.inner.registry),
            dialer: Arc::clone(&self.inner.dialer),
            sessions: Arc::clone(&self.inner.sessions),
            shutdown: self.inner.shutdown.clone(),
        }
    }
}
