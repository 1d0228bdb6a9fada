//! Per-connection relay state machine.
//!
//! ```text
//! Connecting ──dial ok──▶ Forwarding ──target lost──▶ Reconnecting
//!     │                    │     ▲                        │
//!     │ dial failed        │     └──────redial ok─────────┘
//!     ▼                    ▼                              │ attempts exhausted
//!   Closed ◀───────────────┴──────────────────────────────┘
//! ```
//!
//! One task drives the whole machine, so frames are relayed in order per
//! direction and the retry counter needs no synchronization. Inbound frames are
//! not consumed while dialing; they wait in the transport and are relayed once
//! forwarding (re)starts. A client close seen during a dial or a redial wait
//! ends the session at once. Every suspension point also watches the session's
//! terminate signal and the global shutdown signal.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::dialer::TargetDialer;
use super::leg::{CloseReason, Frame, Leg, LegEvent};
use super::table::{SessionHandle, SessionTable, TerminateReason};
use crate::config::ProxyConfig;
use crate::error::{RelayError, TargetConnectionError};
use crate::id::ConnectionId;
use crate::registry::{ConnectionRegistry, Direction};

/// Everything a session needs from the orchestrator.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ProxyConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub dialer: Arc<dyn TargetDialer>,
    pub sessions: Arc<SessionTable>,
    pub shutdown: watch::Receiver<bool>,
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// The client closed its side.
    ClientClosed,
    /// Reading from or writing to the client failed.
    ClientError(RelayError),
    /// The initial dial failed.
    TargetUnreachable(TargetConnectionError),
    /// The target went away and reconnection is disabled.
    TargetClosed { error: Option<RelayError> },
    /// Every redial attempt failed.
    ReconnectExhausted { attempts: u32 },
    /// Evicted or shut down from outside.
    Terminated(TerminateReason),
}

impl CloseCause {
    /// Error frame for the client, if this cause is a failure it should hear about.
    fn error_frame(&self) -> Option<ErrorFrame> {
        let (code, message) = match self {
            CloseCause::TargetUnreachable(e) => ("TARGET_CONNECTION_FAILED", e.to_string()),
            CloseCause::ReconnectExhausted { attempts } => (
                "TARGET_UNAVAILABLE",
                format!("target connection lost, {attempts} reconnect attempts failed"),
            ),
            CloseCause::TargetClosed { error: Some(e) } => ("RELAY_ERROR", e.to_string()),
            _ => return None,
        };
        Some(ErrorFrame {
            kind: "error",
            code,
            message,
        })
    }

    fn close_reason(&self) -> CloseReason {
        match self {
            CloseCause::ClientClosed | CloseCause::TargetClosed { error: None } => {
                CloseReason::new(CloseReason::NORMAL, "")
            }
            CloseCause::ClientError(_) => CloseReason::new(1011, "relay error"),
            CloseCause::TargetUnreachable(_)
            | CloseCause::ReconnectExhausted { .. }
            | CloseCause::TargetClosed { error: Some(_) } => {
                CloseReason::new(CloseReason::BAD_GATEWAY, "target unavailable")
            }
            CloseCause::Terminated(reason) => {
                CloseReason::new(CloseReason::GOING_AWAY, reason.as_str())
            }
        }
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::ClientClosed => f.write_str("client closed"),
            CloseCause::ClientError(e) => write!(f, "client error: {e}"),
            CloseCause::TargetUnreachable(e) => write!(f, "target unreachable: {e}"),
            CloseCause::TargetClosed { error: None } => f.write_str("target closed"),
            CloseCause::TargetClosed { error: Some(e) } => write!(f, "target failed: {e}"),
            CloseCause::ReconnectExhausted { attempts } => {
                write!(f, "target lost after {attempts} reconnect attempts")
            }
            CloseCause::Terminated(reason) => write!(f, "terminated: {reason}"),
        }
    }
}

/// Final report of a session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Registry id, if the session got as far as registering.
    pub connection_id: Option<ConnectionId>,
    pub cause: CloseCause,
    /// Total redial attempts made over the session's lifetime.
    pub redials: u32,
}

/// Structured error sent to the client before an unrecoverable close.
#[derive(Debug, Serialize)]
struct ErrorFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'static str,
    message: String,
}

enum Transition {
    Forward(Leg),
    Reconnect,
    Close(CloseCause),
}

enum DialError {
    Failed(TargetConnectionError),
    Interrupted(CloseCause),
}

/// A single relayed connection.
pub struct RelaySession {
    ctx: SessionContext,
    remote_address: String,
    user_agent: Option<String>,
    connection_id: Option<ConnectionId>,
    terminate_tx: Arc<watch::Sender<Option<TerminateReason>>>,
    terminate_rx: watch::Receiver<Option<TerminateReason>>,
    shutdown: watch::Receiver<bool>,
    /// Failed redials since the target was last reachable.
    attempts: u32,
    redials: u32,
    /// A client frame is queued while the target is down; stop watching the
    /// client until forwarding takes it.
    inbound_pending: bool,
}

impl RelaySession {
    pub fn new(ctx: SessionContext, remote_address: impl Into<String>, user_agent: Option<String>) -> Self {
        let (terminate_tx, terminate_rx) = watch::channel(None);
        let shutdown = ctx.shutdown.clone();
        Self {
            ctx,
            remote_address: remote_address.into(),
            user_agent,
            connection_id: None,
            terminate_tx: Arc::new(terminate_tx),
            terminate_rx,
            shutdown,
            attempts: 0,
            redials: 0,
            inbound_pending: false,
        }
    }

    /// Drive the session to completion over the given inbound leg.
    pub async fn run(mut self, mut inbound: Leg) -> SessionOutcome {
        let mut next = self.connect(&mut inbound).await;

        let cause = loop {
            next = match next {
                Transition::Forward(outbound) => self.forward(&mut inbound, outbound).await,
                Transition::Reconnect => self.reconnect(&mut inbound).await,
                Transition::Close(cause) => break cause,
            };
        };

        self.close(inbound, cause).await
    }

    async fn connect(&mut self, inbound: &mut Leg) -> Transition {
        let outbound = match self.dial(inbound).await {
            Ok(leg) => leg,
            Err(DialError::Failed(e)) => {
                self.ctx.registry.record_error().await;
                warn!(
                    target_url = %self.ctx.config.target_url,
                    error = %e,
                    "Target connection failed"
                );
                return Transition::Close(CloseCause::TargetUnreachable(e));
            }
            Err(DialError::Interrupted(cause)) => return Transition::Close(cause),
        };

        let record = self
            .ctx
            .registry
            .register(
                self.remote_address.clone(),
                self.ctx.config.target_url.as_str(),
                self.user_agent.clone(),
            )
            .await;
        self.connection_id = Some(record.id);
        self.ctx
            .sessions
            .insert(SessionHandle::new(record.id, Arc::clone(&self.terminate_tx)))
            .await;

        info!(
            connection_id = %record.id,
            target_url = %self.ctx.config.target_url,
            "Relay established"
        );

        Transition::Forward(outbound)
    }

    async fn forward(&mut self, inbound: &mut Leg, mut outbound: Leg) -> Transition {
        let Some(id) = self.connection_id else {
            return Transition::Close(CloseCause::ClientClosed);
        };
        let registry = Arc::clone(&self.ctx.registry);
        self.inbound_pending = false;

        loop {
            tokio::select! {
                reason = terminated(&mut self.terminate_rx, &mut self.shutdown) => {
                    outbound.close(CloseReason::new(CloseReason::GOING_AWAY, reason.as_str())).await;
                    return Transition::Close(CloseCause::Terminated(reason));
                }
                event = inbound.next_event() => match event {
                    Some(Ok(LegEvent::Frame(frame))) => {
                        if let Err(e) = relay_frame(frame, &mut outbound, Direction::Inbound, &registry, &id).await {
                            registry.record_error().await;
                            warn!(connection_id = %id, error = %e, "Failed to send frame to target");
                            return self.target_lost(Some(e));
                        }
                    }
                    Some(Ok(LegEvent::Closed(reason))) => {
                        debug!(connection_id = %id, close = ?reason, "Client closed connection");
                        outbound.close(CloseReason::new(CloseReason::NORMAL, "client closed")).await;
                        return Transition::Close(CloseCause::ClientClosed);
                    }
                    None => {
                        outbound.close(CloseReason::new(CloseReason::NORMAL, "client closed")).await;
                        return Transition::Close(CloseCause::ClientClosed);
                    }
                    Some(Err(e)) => {
                        registry.record_error().await;
                        debug!(connection_id = %id, error = %e, "Client connection error");
                        outbound.close(CloseReason::new(CloseReason::GOING_AWAY, "client error")).await;
                        return Transition::Close(CloseCause::ClientError(e));
                    }
                },
                event = outbound.next_event() => match event {
                    Some(Ok(LegEvent::Frame(frame))) => {
                        if let Err(e) = relay_frame(frame, inbound, Direction::Outbound, &registry, &id).await {
                            registry.record_error().await;
                            debug!(connection_id = %id, error = %e, "Failed to send frame to client");
                            outbound.close(CloseReason::new(CloseReason::GOING_AWAY, "client error")).await;
                            return Transition::Close(CloseCause::ClientError(e));
                        }
                    }
                    Some(Ok(LegEvent::Closed(reason))) => {
                        info!(connection_id = %id, close = ?reason, "Target closed connection");
                        return self.target_lost(None);
                    }
                    None => {
                        info!(connection_id = %id, "Target connection ended");
                        return self.target_lost(None);
                    }
                    Some(Err(e)) => {
                        registry.record_error().await;
                        warn!(connection_id = %id, error = %e, "Target connection error");
                        return self.target_lost(Some(e));
                    }
                },
            }
        }
    }

    fn target_lost(&self, error: Option<RelayError>) -> Transition {
        if self.attempts < self.ctx.config.reconnect_attempts {
            Transition::Reconnect
        } else {
            Transition::Close(CloseCause::TargetClosed { error })
        }
    }

    async fn reconnect(&mut self, inbound: &mut Leg) -> Transition {
        let max_attempts = self.ctx.config.reconnect_attempts;
        let delay = self.ctx.config.reconnect_delay();

        while self.attempts < max_attempts {
            let wait = tokio::time::sleep(delay);
            tokio::pin!(wait);

            loop {
                tokio::select! {
                    _ = &mut wait => break,
                    reason = terminated(&mut self.terminate_rx, &mut self.shutdown) => {
                        return Transition::Close(CloseCause::Terminated(reason));
                    }
                    gone = client_gone(inbound), if !self.inbound_pending => match gone {
                        Some(cause) => return Transition::Close(self.client_left(cause).await),
                        None => self.inbound_pending = true,
                    },
                }
            }

            self.attempts += 1;
            self.redials += 1;

            match self.dial(inbound).await {
                Ok(outbound) => {
                    info!(
                        connection_id = ?self.connection_id,
                        attempt = self.attempts,
                        "Reconnected to target"
                    );
                    self.attempts = 0;
                    self.ctx.registry.record_reconnect().await;
                    return Transition::Forward(outbound);
                }
                Err(DialError::Failed(e)) => {
                    self.ctx.registry.record_error().await;
                    warn!(
                        connection_id = ?self.connection_id,
                        attempt = self.attempts,
                        max_attempts = max_attempts,
                        error = %e,
                        "Target redial failed"
                    );
                }
                Err(DialError::Interrupted(cause)) => return Transition::Close(cause),
            }
        }

        Transition::Close(CloseCause::ReconnectExhausted {
            attempts: max_attempts,
        })
    }

    /// Dial the target, bounded by the dial timeout. Interrupted by
    /// termination or by the client leaving. Queued client frames are left
    /// in place.
    async fn dial(&mut self, inbound: &mut Leg) -> Result<Leg, DialError> {
        let target = self.ctx.config.target_url.clone();
        let dialer = Arc::clone(&self.ctx.dialer);
        let dial_timeout = self.ctx.config.dial_timeout();
        let started = Instant::now();

        let attempt = async {
            match dial_timeout {
                Some(limit) => tokio::time::timeout(limit, dialer.dial(&target))
                    .await
                    .unwrap_or(Err(TargetConnectionError::Timeout(limit))),
                None => dialer.dial(&target).await,
            }
        };
        tokio::pin!(attempt);

        let leg = loop {
            tokio::select! {
                result = &mut attempt => break result.map_err(DialError::Failed)?,
                reason = terminated(&mut self.terminate_rx, &mut self.shutdown) => {
                    return Err(DialError::Interrupted(CloseCause::Terminated(reason)));
                }
                gone = client_gone(inbound), if !self.inbound_pending => match gone {
                    Some(cause) => return Err(DialError::Interrupted(self.client_left(cause).await)),
                    None => self.inbound_pending = true,
                },
            }
        };

        self.ctx
            .registry
            .record_dial_latency(started.elapsed())
            .await;
        Ok(leg)
    }

    async fn client_left(&self, cause: CloseCause) -> CloseCause {
        if matches!(cause, CloseCause::ClientError(_)) {
            self.ctx.registry.record_error().await;
        }
        debug!(
            connection_id = ?self.connection_id,
            cause = %cause,
            "Client left while waiting on the target"
        );
        cause
    }

    async fn close(mut self, mut inbound: Leg, cause: CloseCause) -> SessionOutcome {
        if let Some(frame) = cause.error_frame() {
            if let Ok(payload) = serde_json::to_string(&frame) {
                let _ = inbound.send_frame(Frame::Text(payload)).await;
            }
        }

        if let Some(id) = self.connection_id {
            self.ctx.sessions.remove(&id).await;
            let unregistered = self.ctx.registry.unregister(&id).await;
            debug!(connection_id = %id, unregistered, "Session released");
        }

        inbound.close(cause.close_reason()).await;

        info!(
            connection_id = ?self.connection_id,
            cause = %cause,
            redials = self.redials,
            "Relay session closed"
        );

        SessionOutcome {
            connection_id: self.connection_id,
            cause,
            redials: self.redials,
        }
    }
}

/// Forward one frame from a source leg to `to` and count it against the
/// connection once delivered. Shared by both directions.
async fn relay_frame(
    frame: Frame,
    to: &mut Leg,
    direction: Direction,
    registry: &ConnectionRegistry,
    id: &ConnectionId,
) -> Result<(), RelayError> {
    let bytes = frame.byte_len();
    to.send_frame(frame).await?;
    registry.record_frame(id, direction, bytes).await;
    Ok(())
}

/// Whether the next client event ends the session. `None` means a frame is
/// queued; it is left for forwarding to take.
async fn client_gone(inbound: &mut Leg) -> Option<CloseCause> {
    match inbound.peek().await {
        Some(Ok(LegEvent::Frame(_))) => None,
        Some(Ok(LegEvent::Closed(_))) | None => Some(CloseCause::ClientClosed),
        Some(Err(e)) => Some(CloseCause::ClientError(e.clone())),
    }
}

/// Resolves once the session is told to terminate or the proxy shuts down.
async fn terminated(
    terminate: &mut watch::Receiver<Option<TerminateReason>>,
    shutdown: &mut watch::Receiver<bool>,
) -> TerminateReason {
    tokio::select! {
        reason = terminate.wait_for(Option::is_some) => {
            reason.ok().and_then(|r| *r).unwrap_or(TerminateReason::Shutdown)
        }
        _ = shutdown.wait_for(|stop| *stop) => TerminateReason::Shutdown,
    }
}
