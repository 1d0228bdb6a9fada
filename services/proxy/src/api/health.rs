//! Health check endpoint.
//!
//! Load balancers use this to stop sending traffic to a proxy that has no
//! free connection slots.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;

use crate::registry::AggregateMetrics;
use crate::state::AppState;
use crate::system::MemoryUsage;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// "healthy" or "unhealthy".
    pub status: String,

    /// Current timestamp (RFC 3339).
    pub timestamp: String,

    pub uptime_ms: u64,
    pub active_connections: u64,
    pub max_connections: u32,
    pub total_connections: u64,

    pub memory_usage: MemoryUsage,
}

impl HealthResponse {
    fn from_metrics(metrics: &AggregateMetrics, max_connections: u32) -> Self {
        let healthy = metrics.active_connections < u64::from(max_connections);
        Self {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            uptime_ms: metrics.uptime_ms,
            active_connections: metrics.active_connections,
            max_connections,
            total_connections: metrics.total_connections,
            memory_usage: metrics.memory_usage,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Healthy iff there is room for another connection. Returns 503 otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.registry().snapshot().await;
    let response = HealthResponse::from_metrics(&metrics, state.config().max_connections);

    if response.is_healthy() {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
