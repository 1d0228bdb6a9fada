//! Global connection limit.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Outcome of the connection limit check for one inbound connection.
#[derive(Debug)]
pub enum Admission {
    /// A slot was free. Hold the permit for the lifetime of the session.
    Admitted(OwnedSemaphorePermit),
    /// Every slot is taken. The connection is closed with 1013 and no
    /// session is created.
    Rejected,
}

/// Try to take a connection slot without waiting.
pub fn admit(slots: &Arc<Semaphore>) -> Admission {
    match Arc::clone(slots).try_acquire_owned() {
        Ok(permit) => Admission::Admitted(permit),
        Err(_) => Admission::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_until_limit() {
        let slots = Arc::new(Semaphore::new(2));

        let a = admit(&slots);
        let b = admit(&slots);
        assert!(matches!(a, Admission::Admitted(_)));
        assert!(matches!(b, Admission::Admitted(_)));
        assert!(matches!(admit(&slots), Admission::Rejected));

        drop(a);
        assert!(matches!(admit(&slots), Admission::Admitted(_)));
    }

    #[test]
    fn test_zero_slots_rejects_everything() {
        let slots = Arc::new(Semaphore::new(0));
        assert!(matches!(admit(&slots), Admission::Rejected));
    }
}
