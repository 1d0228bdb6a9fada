//! Bidirectional WebSocket relay.
//!
//! ## Architecture
//!
//! ```text
//! Client ──inbound leg──▶ RelaySession ──outbound leg──▶ Target
//!                             │
//!                     ConnectionRegistry
//! ```
//!
//! A [`RelaySession`] owns both legs and runs as one task. The outbound leg is
//! opened through a [`TargetDialer`] so tests and embedders can substitute the
//! network dial.

mod dialer;
mod leg;
mod session;
mod table;

pub use dialer::{TargetDialer, WebSocketDialer};
pub use leg::{CloseReason, Frame, Leg, LegEvent, Outgoing};
pub use session::{CloseCause, RelaySession, SessionContext, SessionOutcome};
pub use table::{SessionHandle, SessionTable, TerminateReason};
