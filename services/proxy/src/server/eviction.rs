use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument};

use crate::registry::ConnectionRegistry;
use crate::relay::{SessionTable, TerminateReason};

/// Periodically evicts idle connections and terminates their sessions.
pub struct EvictionWorker {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<SessionTable>,
    idle_timeout: Duration,
}

impl EvictionWorker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sessions: Arc<SessionTable>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            idle_timeout,
        }
    }

    /// Run one pass every `idle_timeout` until shutdown is signalled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            idle_timeout_ms = self.idle_timeout.as_millis() as u64,
            "Starting eviction worker"
        );

        let mut interval = tokio::time::interval(self.idle_timeout);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_eviction().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Eviction worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One eviction pass. Returns the number of connections evicted.
    pub async fn run_eviction(&self) -> usize {
        let evicted = self.registry.evict_idle(self.idle_timeout).await;

        for id in &evicted {
            if !self.sessions.terminate(id, TerminateReason::Evicted).await {
                info!(connection_id = %id, "Evicted connection had no running session");
            }
        }

        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "Evicted idle connections");
        }
        evicted.len()
    }
}
