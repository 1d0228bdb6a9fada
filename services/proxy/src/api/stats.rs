//! Stats endpoint: aggregate metrics plus every active connection.

use axum::{extract::State, Json};

use crate::registry::StatsSnapshot;
use crate::state::AppState;

pub async fn stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.registry().stats().await)
}
