//! Proxy orchestration.
//!
//! [`ProxyServer`] owns the listening socket, the connection limit, the
//! session table and the eviction worker. It wires the HTTP router to relay
//! sessions and tears everything down on [`ProxyServer::stop`].

mod admission;
mod eviction;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api;
use crate::config::ProxyConfig;
use crate::error::ServerError;
use crate::registry::{ConnectionRegistry, SharedRegistry};
use crate::relay::{SessionTable, TargetDialer, TerminateReason, WebSocketDialer};
use crate::state::AppState;

pub use admission::{admit, Admission};
pub use eviction::EvictionWorker;

/// How long `stop()` waits for sessions and background tasks to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

struct Running {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server: JoinHandle<std::io::Result<()>>,
    eviction: Option<JoinHandle<()>>,
}

/// A WebSocket reverse proxy bound to one listening address.
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    registry: SharedRegistry,
    sessions: Arc<SessionTable>,
    dialer: Arc<dyn TargetDialer>,
    admission: Arc<Semaphore>,
    running: Mutex<Option<Running>>,
}

impl ProxyServer {
    /// Create a server that dials the target over the network.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_dialer(config, Arc::new(WebSocketDialer))
    }

    /// Create a server with a custom target dialer.
    pub fn with_dialer(config: ProxyConfig, dialer: Arc<dyn TargetDialer>) -> Self {
        let permits = config.max_connections as usize;
        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            sessions: Arc::new(SessionTable::new()),
            dialer,
            admission: Arc::new(Semaphore::new(permits)),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Address the listener is bound to, while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Bind the listener and start serving. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(ServerError::AlreadyRunning(current.local_addr));
        }

        let host = self.config.listen_host.as_str();
        let port = self.config.listen_port;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ServerError::Bind {
                host: host.to_string(),
                port,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let state = AppState::new(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.sessions),
            Arc::clone(&self.dialer),
            Arc::clone(&self.admission),
            shutdown_rx.clone(),
        );
        let app = api::create_router(state);

        let server = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.clone();
            async move {
                axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                    info!("HTTP server shutting down");
                })
                .await
            }
        });

        let eviction = self.config.idle_timeout().map(|idle_timeout| {
            let worker = EvictionWorker::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.sessions),
                idle_timeout,
            );
            tokio::spawn(async move { worker.run(shutdown_rx).await })
        });

        info!(
            addr = %local_addr,
            target_url = %self.config.target_url,
            max_connections = self.config.max_connections,
            idle_timeout_ms = self.config.idle_timeout_ms,
            "Proxy listening"
        );

        *running = Some(Running {
            local_addr,
            shutdown_tx,
            server,
            eviction,
        });
        Ok(local_addr)
    }

    /// Stop serving: cancel the eviction loop and every dial or reconnect
    /// wait, close all sessions, then release the listener.
    ///
    /// Idempotent, and a no-op if the server never started.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        info!(addr = %running.local_addr, "Stopping proxy");
        let _ = running.shutdown_tx.send(true);

        let terminated = self.sessions.terminate_all(TerminateReason::Shutdown).await;
        if terminated > 0 {
            info!(sessions = terminated, "Terminating active sessions");
        }

        // Every admitted session holds a slot; holding all of them means none are left.
        let slots = self.config.max_connections;
        match tokio::time::timeout(DRAIN_TIMEOUT, self.admission.acquire_many(slots)).await {
            Ok(Ok(permits)) => drop(permits),
            Ok(Err(e)) => warn!(error = %e, "Connection slots closed while draining"),
            Err(_) => warn!(
                remaining = self.registry.active_count().await,
                "Sessions did not drain in time"
            ),
        }

        if let Some(eviction) = running.eviction {
            if tokio::time::timeout(DRAIN_TIMEOUT, eviction).await.is_err() {
                warn!("Eviction worker did not shut down in time");
            }
        }

        match tokio::time::timeout(DRAIN_TIMEOUT, running.server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "Server error"),
            Ok(Err(e)) => error!(error = %e, "Server task panicked"),
            Err(_) => warn!("HTTP server did not shut down in time"),
        }

        info!("Proxy stopped");
    }
}
