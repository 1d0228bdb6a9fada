//! Live session handles, keyed by connection id.
//!
//! The orchestrator reaches running sessions through this table: the eviction
//! worker terminates evicted ids and `stop()` terminates everything.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use crate::id::ConnectionId;

/// Why a session was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// Idle longer than the configured timeout.
    Evicted,
    /// The proxy is shutting down.
    Shutdown,
}

impl TerminateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminateReason::Evicted => "idle timeout",
            TerminateReason::Shutdown => "proxy shutting down",
        }
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle used to terminate a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: ConnectionId,
    tx: Arc<watch::Sender<Option<TerminateReason>>>,
}

impl SessionHandle {
    pub(crate) fn new(id: ConnectionId, tx: Arc<watch::Sender<Option<TerminateReason>>>) -> Self {
        Self { id, tx }
    }

    #[cfg(test)]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Ask the session to close both legs and finish. The first reason wins.
    pub fn terminate(&self, reason: TerminateReason) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }
}

/// Table of running, registered sessions.
#[derive(Debug, Default)]
pub struct SessionTable {
    handles: RwLock<HashMap<ConnectionId, SessionHandle>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: SessionHandle) {
        self.handles.write().await.insert(handle.id, handle);
    }

    pub async fn remove(&self, id: &ConnectionId) -> Option<SessionHandle> {
        self.handles.write().await.remove(id)
    }

    /// Terminate one session. Returns `false` if no such session is running.
    pub async fn terminate(&self, id: &ConnectionId, reason: TerminateReason) -> bool {
        match self.handles.read().await.get(id) {
            Some(handle) => {
                handle.terminate(reason);
                true
            }
            None => false,
        }
    }

    /// Terminate every running session. Returns how many were signalled.
    pub async fn terminate_all(&self, reason: TerminateReason) -> usize {
        let handles = self.handles.read().await;
        for handle in handles.values() {
            handle.terminate(reason);
        }
        handles.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, watch::Receiver<Option<TerminateReason>>) {
        let (tx, rx) = watch::channel(None);
        (SessionHandle::new(ConnectionId::generate(), Arc::new(tx)), rx)
    }

    #[tokio::test]
    async fn test_terminate_reaches_session() {
        let table = SessionTable::new();
        let (handle, rx) = handle();
        let id = handle.id();
        table.insert(handle).await;

        assert!(table.terminate(&id, TerminateReason::Evicted).await);
        assert_eq!(*rx.borrow(), Some(TerminateReason::Evicted));
    }

    #[tokio::test]
    async fn test_first_reason_wins() {
        let (handle, rx) = handle();
        handle.terminate(TerminateReason::Evicted);
        handle.terminate(TerminateReason::Shutdown);
        assert_eq!(*rx.borrow(), Some(TerminateReason::Evicted));
    }

    #[tokio::test]
    async fn test_terminate_unknown_id() {
        let table = SessionTable::new();
        assert!(!table.terminate(&ConnectionId::generate(), TerminateReason::Evicted).await);
    }

    #[tokio::test]
    async fn test_terminate_all() {
        let table = SessionTable::new();
        let (a, rx_a) = handle();
        let (b, rx_b) = handle();
        table.insert(a).await;
        table.insert(b).await;

        assert_eq!(table.terminate_all(TerminateReason::Shutdown).await, 2);
        assert_eq!(*rx_a.borrow(), Some(TerminateReason::Shutdown));
        assert_eq!(*rx_b.borrow(), Some(TerminateReason::Shutdown));
        assert_eq!(table.len().await, 2);
    }
}
