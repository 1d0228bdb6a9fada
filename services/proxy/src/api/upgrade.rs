//! Catch-all handler: WebSocket upgrades become relay sessions.

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use tracing::{info_span, warn, Instrument};

use crate::relay::{CloseReason, Leg, RelaySession};
use crate::server::{admit, Admission};
use crate::state::AppState;

/// Body returned to plain HTTP requests on non-observability paths.
pub const LANDING_TEXT: &str = "wsrelay is running. Connect with a WebSocket client to reach the target.\n";

pub async fn upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        return LANDING_TEXT.into_response();
    };

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    match admit(state.admission()) {
        Admission::Admitted(permit) => {
            let ctx = state.session_context();
            ws.on_upgrade(move |socket| {
                async move {
                    RelaySession::new(ctx, peer.to_string(), user_agent)
                        .run(Leg::from_axum(socket))
                        .await;
                    drop(permit);
                }
                .instrument(info_span!("connection", peer = %peer))
            })
        }
        Admission::Rejected => {
            state.registry().record_rejection().await;
            warn!(
                peer = %peer,
                max_connections = state.config().max_connections,
                "Connection rejected: max connections reached"
            );
            ws.on_upgrade(|socket| async move {
                Leg::from_axum(socket)
                    .close(CloseReason::new(CloseReason::TRY_AGAIN_LATER, "server at capacity"))
                    .await;
            })
        }
    }
}
