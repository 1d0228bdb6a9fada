//! Outbound connections to the target.

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::leg::Leg;
use crate::error::TargetConnectionError;

/// Opens outbound legs to the target.
///
/// The relay session applies the dial timeout and cancellation around this
/// call, so implementations only need to connect.
#[async_trait]
pub trait TargetDialer: Send + Sync + 'static {
    async fn dial(&self, target: &Url) -> Result<Leg, TargetConnectionError>;
}

/// Dials the target with tokio-tungstenite (`native-tls` for `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketDialer;

#[async_trait]
impl TargetDialer for WebSocketDialer {
    async fn dial(&self, target: &Url) -> Result<Leg, TargetConnectionError> {
        let (socket, response) = tokio_tungstenite::connect_async(target.as_str())
            .await
            .map_err(|e| TargetConnectionError::Handshake(e.to_string()))?;

        debug!(
            target_url = %target,
            status = %response.status(),
            "Target handshake complete"
        );

        Ok(Leg::from_tungstenite(socket))
    }
}
