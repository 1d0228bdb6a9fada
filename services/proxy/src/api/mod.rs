//! HTTP routing: observability endpoints plus the WebSocket catch-all.

mod health;
mod stats;
mod upgrade;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::config::STATS_PATH;
use crate::state::AppState;

pub use health::HealthResponse;
pub use upgrade::LANDING_TEXT;

/// Create the router with all routes and middleware.
///
/// The catch-all needs the peer address, so serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router(state: AppState) -> Router {
    let health_path = state.config().health_path.clone();

    Router::new()
        .route(&health_path, get(health::health))
        .route(STATS_PATH, get(stats::stats))
        .fallback(upgrade::upgrade)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
