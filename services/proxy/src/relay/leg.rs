//! One side of a relay session.
//!
//! A [`Leg`] pairs a sink of outgoing [`Outgoing`] items with a stream of
//! [`LegEvent`]s. The inbound leg wraps the axum WebSocket accepted from the
//! client, the outbound leg wraps the tokio-tungstenite stream dialed to the
//! target, and [`Leg::pair`] builds an in-memory pair. Ping and pong frames
//! are answered by the transports and never surface here.

use std::fmt;
use std::pin::Pin;

use axum::extract::ws::{self as axum_ws, WebSocket};
use bytes::Bytes;
use futures_util::stream::Peekable;
use futures_util::{future, sink, stream, Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::RelayError;

/// Buffer size of in-memory leg pairs.
const PAIR_BUFFER: usize = 64;

/// A data frame relayed verbatim between legs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Size of the frame payload in bytes. Text is measured by its UTF-8 encoding.
    pub fn byte_len(&self) -> u64 {
        match self {
            Frame::Text(text) => text.len() as u64,
            Frame::Binary(data) => data.len() as u64,
        }
    }
}

/// Close code and reason carried by a WebSocket close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const TRY_AGAIN_LATER: u16 = 1013;
    pub const BAD_GATEWAY: u16 = 1014;

    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Something to write to a leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Frame(Frame),
    Close(CloseReason),
}

/// Something read from a leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegEvent {
    Frame(Frame),
    /// The peer closed the leg, with its close frame if it sent one.
    Closed(Option<CloseReason>),
}

type LegSink = Pin<Box<dyn Sink<Outgoing, Error = RelayError> + Send>>;
type LegStream = Pin<Box<dyn Stream<Item = Result<LegEvent, RelayError>> + Send>>;

/// One side of a relay session.
pub struct Leg {
    sink: LegSink,
    stream: Peekable<LegStream>,
}

impl Leg {
    /// Build a leg from any sink/stream pair.
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Outgoing, Error = RelayError> + Send + 'static,
        St: Stream<Item = Result<LegEvent, RelayError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: (Box::pin(stream) as LegStream).peekable(),
        }
    }

    /// Wrap a WebSocket accepted by axum.
    pub fn from_axum(socket: WebSocket) -> Self {
        let (ws_sink, ws_stream) = socket.split();

        let sink = ws_sink
            .sink_map_err(|e| RelayError::Transport(e.to_string()))
            .with(|item: Outgoing| {
                let message = match item {
                    Outgoing::Frame(Frame::Text(text)) => axum_ws::Message::Text(text.into()),
                    Outgoing::Frame(Frame::Binary(data)) => axum_ws::Message::Binary(data),
                    Outgoing::Close(close) => axum_ws::Message::Close(Some(axum_ws::CloseFrame {
                        code: close.code,
                        reason: close.reason.into(),
                    })),
                };
                future::ready(Ok::<_, RelayError>(message))
            });

        let stream = ws_stream.filter_map(|message| {
            let event = match message {
                Ok(axum_ws::Message::Text(text)) => {
                    Some(Ok(LegEvent::Frame(Frame::Text(text.as_str().to_owned()))))
                }
                Ok(axum_ws::Message::Binary(data)) => Some(Ok(LegEvent::Frame(Frame::Binary(data)))),
                Ok(axum_ws::Message::Close(frame)) => Some(Ok(LegEvent::Closed(frame.map(|f| {
                    CloseReason::new(f.code, f.reason.as_str())
                })))),
                Ok(axum_ws::Message::Ping(_)) | Ok(axum_ws::Message::Pong(_)) => None,
                Err(e) => Some(Err(RelayError::Transport(e.to_string()))),
            };
            future::ready(event)
        });

        Self::new(sink, stream)
    }

    /// Wrap a WebSocket dialed with tokio-tungstenite.
    pub fn from_tungstenite(socket: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        let (ws_sink, ws_stream) = socket.split();

        let sink = ws_sink
            .sink_map_err(|e| RelayError::Transport(e.to_string()))
            .with(|item: Outgoing| {
                let message = match item {
                    Outgoing::Frame(Frame::Text(text)) => Message::Text(text.into()),
                    Outgoing::Frame(Frame::Binary(data)) => Message::Binary(data),
                    Outgoing::Close(close) => Message::Close(Some(CloseFrame {
                        code: CloseCode::from(close.code),
                        reason: close.reason.into(),
                    })),
                };
                future::ready(Ok::<_, RelayError>(message))
            });

        let stream = ws_stream.filter_map(|message| {
            let event = match message {
                Ok(Message::Text(text)) => {
                    Some(Ok(LegEvent::Frame(Frame::Text(text.as_str().to_owned()))))
                }
                Ok(Message::Binary(data)) => Some(Ok(LegEvent::Frame(Frame::Binary(data)))),
                Ok(Message::Close(frame)) => Some(Ok(LegEvent::Closed(frame.map(|f| {
                    CloseReason::new(u16::from(f.code), f.reason.as_str())
                })))),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                Err(e) => Some(Err(RelayError::Transport(e.to_string()))),
            };
            future::ready(event)
        });

        Self::new(sink, stream)
    }

    /// Two connected in-memory legs: what one sends, the other receives.
    ///
    /// Dropping a leg ends the other's stream, which reads as a close.
    pub fn pair() -> (Leg, Leg) {
        let (a_tx, a_rx) = mpsc::channel(PAIR_BUFFER);
        let (b_tx, b_rx) = mpsc::channel(PAIR_BUFFER);
        (channel_leg(a_tx, b_rx), channel_leg(b_tx, a_rx))
    }

    /// Send one item.
    pub async fn send(&mut self, item: Outgoing) -> Result<(), RelayError> {
        self.sink.send(item).await
    }

    /// Send one data frame.
    pub async fn send_frame(&mut self, frame: Frame) -> Result<(), RelayError> {
        self.send(Outgoing::Frame(frame)).await
    }

    /// Next event from the peer. `None` means the transport ended without a close frame.
    pub async fn next_event(&mut self) -> Option<Result<LegEvent, RelayError>> {
        self.stream.next().await
    }

    /// Wait for the next event without consuming it.
    pub async fn peek(&mut self) -> Option<&Result<LegEvent, RelayError>> {
        Pin::new(&mut self.stream).peek().await
    }

    /// Best-effort close: send a close frame and flush. Errors are ignored,
    /// the leg is being released either way.
    pub async fn close(mut self, reason: CloseReason) {
        let _ = self.sink.send(Outgoing::Close(reason)).await;
        let _ = self.sink.close().await;
    }
}

impl fmt::Debug for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leg").finish_non_exhaustive()
    }
}

fn channel_leg(
    tx: mpsc::Sender<Result<LegEvent, RelayError>>,
    rx: mpsc::Receiver<Result<LegEvent, RelayError>>,
) -> Leg {
    let sink = sink::unfold(tx, |tx, item: Outgoing| async move {
        let event = match item {
            Outgoing::Frame(frame) => LegEvent::Frame(frame),
            Outgoing::Close(reason) => LegEvent::Closed(Some(reason)),
        };
        tx.send(Ok(event)).await.map_err(|_| RelayError::PeerGone)?;
        Ok::<_, RelayError>(tx)
    });

    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    });

    Leg::new(sink, stream)
}
