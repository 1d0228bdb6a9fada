//! Connection registry and aggregate metrics.
//!
//! The registry is the single source of truth for how many connections are
//! live, how much traffic they carried and how long the proxy has been up.
//! Every operation takes the one lock guarding [`RegistryState`], so counter
//! updates are never lost and a snapshot never observes a half-applied update.
//!
//! Invariants:
//! - `active_connections` equals the number of registered records
//! - `total_connections` never decreases
//! - per-connection counters start at zero and only grow

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::id::ConnectionId;
use crate::system::{HostSampler, MemoryUsage};

/// Direction of a relayed frame, relative to the proxy's client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client to target.
    Inbound,
    /// Target to client.
    Outbound,
}

/// Metadata and counters for one registered relay session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub remote_address: String,
    pub target_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub established_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub inbound_message_count: u64,
    pub outbound_message_count: u64,
    pub inbound_byte_count: u64,
    pub outbound_byte_count: u64,
    /// Monotonic time of last activity; drives eviction.
    #[serde(skip)]
    last_activity: Instant,
}

impl ConnectionRecord {
    fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.last_activity_at = Utc::now();
    }

    /// Time since the last forwarded frame.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

/// Aggregate counters across all connections.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetrics {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub evicted_connections: u64,
    pub reconnects: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub total_errors: u64,
    pub average_latency_ms: f64,
    pub uptime_ms: u64,
    pub memory_usage: MemoryUsage,
    pub cpu_usage_percent: f32,
}

/// Metrics plus the active records, taken in the same critical section.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub metrics: AggregateMetrics,
    pub connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Default)]
struct Counters {
    total_connections: u64,
    rejected_connections: u64,
    evicted_connections: u64,
    reconnects: u64,
    total_messages: u64,
    total_bytes: u64,
    total_errors: u64,
    dial_latency_total: Duration,
    dials: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    records: HashMap<ConnectionId, ConnectionRecord>,
    counters: Counters,
}

/// Shared, internally synchronized connection table.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    started_at: Instant,
    host: HostSampler,
}

/// Shared registry reference.
pub type SharedRegistry = Arc<ConnectionRegistry>;

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            started_at: Instant::now(),
            host: HostSampler::new(),
        }
    }

    /// Register a new connection with zeroed counters.
    pub async fn register(
        &self,
        remote_address: impl Into<String>,
        target_url: impl Into<String>,
        user_agent: Option<String>,
    ) -> ConnectionRecord {
        let now = Utc::now();
        let record = ConnectionRecord {
            id: ConnectionId::generate(),
            remote_address: remote_address.into(),
            target_url: target_url.into(),
            user_agent,
            established_at: now,
            last_activity_at: now,
            inbound_message_count: 0,
            outbound_message_count: 0,
            inbound_byte_count: 0,
            outbound_byte_count: 0,
            last_activity: Instant::now(),
        };

        let mut state = self.state.write().await;
        state.counters.total_connections += 1;
        state.records.insert(record.id, record.clone());

        debug!(
            connection_id = %record.id,
            active_connections = state.records.len(),
            "Connection registered"
        );

        record
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let mut state = self.state.write().await;
        let removed = state.records.remove(id).is_some();
        if removed {
            debug!(
                connection_id = %id,
                active_connections = state.records.len(),
                "Connection unregistered"
            );
        }
        removed
    }

    /// Mark activity and add byte counts.
    pub async fn record_activity(
        &self,
        id: &ConnectionId,
        inbound_bytes: Option<u64>,
        outbound_bytes: Option<u64>,
    ) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let RegistryState { records, counters } = &mut *state;
        let Some(record) = records.get_mut(id) else {
            return;
        };

        record.touch(now);
        if let Some(bytes) = inbound_bytes {
            record.inbound_byte_count += bytes;
            counters.total_bytes += bytes;
        }
        if let Some(bytes) = outbound_bytes {
            record.outbound_byte_count += bytes;
            counters.total_bytes += bytes;
        }
    }

    /// Count one message in the given direction.
    pub async fn record_message(&self, id: &ConnectionId, direction: Direction) {
        let mut state = self.state.write().await;
        let RegistryState { records, counters } = &mut *state;
        let Some(record) = records.get_mut(id) else {
            return;
        };

        match direction {
            Direction::Inbound => record.inbound_message_count += 1,
            Direction::Outbound => record.outbound_message_count += 1,
        }
        counters.total_messages += 1;
    }

    /// Count one forwarded frame: activity, bytes and message in one update.
    pub async fn record_frame(&self, id: &ConnectionId, direction: Direction, bytes: u64) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let RegistryState { records, counters } = &mut *state;
        let Some(record) = records.get_mut(id) else {
            return;
        };

        record.touch(now);
        match direction {
            Direction::Inbound => {
                record.inbound_message_count += 1;
                record.inbound_byte_count += bytes;
            }
            Direction::Outbound => {
                record.outbound_message_count += 1;
                record.outbound_byte_count += bytes;
            }
        }
        counters.total_messages += 1;
        counters.total_bytes += bytes;
    }

    /// Count a target or relay error.
    pub async fn record_error(&self) {
        self.state.write().await.counters.total_errors += 1;
    }

    /// Count a connection rejected by the connection limit.
    pub async fn record_rejection(&self) {
        self.state.write().await.counters.rejected_connections += 1;
    }

    /// Count a successful redial of the target.
    pub async fn record_reconnect(&self) {
        self.state.write().await.counters.reconnects += 1;
    }

    /// Record how long a successful target dial took.
    pub async fn record_dial_latency(&self, latency: Duration) {
        let mut state = self.state.write().await;
        state.counters.dial_latency_total += latency;
        state.counters.dials += 1;
    }

    /// Number of registered connections.
    pub async fn active_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Copy of a single record.
    pub async fn get(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.state.read().await.records.get(id).cloned()
    }

    /// Point-in-time copy of the aggregate metrics.
    pub async fn snapshot(&self) -> AggregateMetrics {
        let metrics = {
            let state = self.state.read().await;
            self.metrics_locked(&state)
        };
        self.with_host_usage(metrics)
    }

    /// Aggregate metrics and active records, ordered by id.
    pub async fn stats(&self) -> StatsSnapshot {
        let (metrics, mut connections) = {
            let state = self.state.read().await;
            let connections: Vec<_> = state.records.values().cloned().collect();
            (self.metrics_locked(&state), connections)
        };
        connections.sort_by_key(|record| record.id);

        StatsSnapshot {
            metrics: self.with_host_usage(metrics),
            connections,
        }
    }

    /// Unregister every connection idle for longer than `idle_timeout`.
    ///
    /// Returns the evicted ids; closing their sockets is up to the caller.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> Vec<ConnectionId> {
        self.evict_idle_at(Instant::now(), idle_timeout).await
    }

    /// [`Self::evict_idle`] against an explicit `now`.
    pub async fn evict_idle_at(&self, now: Instant, idle_timeout: Duration) -> Vec<ConnectionId> {
        let mut state = self.state.write().await;

        let idle: Vec<ConnectionId> = state
            .records
            .values()
            .filter(|record| record.idle_for(now) > idle_timeout)
            .map(|record| record.id)
            .collect();

        for id in &idle {
            state.records.remove(id);
        }
        state.counters.evicted_connections += idle.len() as u64;

        idle
    }

    fn metrics_locked(&self, state: &RegistryState) -> AggregateMetrics {
        let counters = &state.counters;
        let average_latency_ms = if counters.dials == 0 {
            0.0
        } else {
            counters.dial_latency_total.as_secs_f64() * 1000.0 / counters.dials as f64
        };

        AggregateMetrics {
            total_connections: counters.total_connections,
            active_connections: state.records.len() as u64,
            rejected_connections: counters.rejected_connections,
            evicted_connections: counters.evicted_connections,
            reconnects: counters.reconnects,
            total_messages: counters.total_messages,
            total_bytes: counters.total_bytes,
            total_errors: counters.total_errors,
            average_latency_ms,
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            memory_usage: MemoryUsage::default(),
            cpu_usage_percent: 0.0,
        }
    }

    fn with_host_usage(&self, mut metrics: AggregateMetrics) -> AggregateMetrics {
        let usage = self.host.sample();
        metrics.memory_usage = usage.memory;
        metrics.cpu_usage_percent = usage.process_cpu_percent;
        metrics
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
