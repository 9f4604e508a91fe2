//! Query cancellation and wall-clock timeout.
//!
//! ## Design
//!
//! One atomic flag shared between the cursor, the host (via
//! [`CancelHandle`]) and every operator. Operators call `check()` at
//! morsel boundaries; after cancellation or deadline expiry the next
//! call returns `Cancelled` and the pull loop unwinds, releasing
//! buffers on the way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};

/// Cooperative cancellation token with an optional deadline.
#[derive(Clone)]
pub struct QueryDeadline {
    cancelled: Arc<AtomicBool>,
    started: Instant,
    timeout: Option<Duration>,
}

impl QueryDeadline {
    pub fn new(timeout: Option<Duration>) -> Self {
        QueryDeadline {
            cancelled: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            timeout,
        }
    }

    /// A deadline that never fires on its own.
    pub fn unbounded() -> Self {
        QueryDeadline::new(None)
    }

    /// Called at morsel boundaries. `Ok(())` means keep pulling.
    pub fn check(&self) -> EngineResult<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }
        if let Some(timeout) = self.timeout {
            if self.started.elapsed() > timeout {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(EngineError::Cancelled);
            }
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// A handle that can cancel this query from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

/// Handle for cancelling a query from another thread.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unbounded_never_fires() {
        let deadline = QueryDeadline::unbounded();
        assert!(deadline.check().is_ok());
        assert!(!deadline.is_cancelled());
    }

    #[test]
    fn test_explicit_cancellation() {
        let deadline = QueryDeadline::unbounded();
        deadline.cancel();
        assert!(matches!(deadline.check(), Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_cancel_handle_reaches_owner() {
        let deadline = QueryDeadline::unbounded();
        let handle = deadline.cancel_handle();
        handle.cancel();
        assert!(deadline.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_deadline_expiry() {
        let deadline = QueryDeadline::new(Some(Duration::from_millis(10)));
        thread::sleep(Duration::from_millis(50));
        assert!(matches!(deadline.check(), Err(EngineError::Cancelled)));
        // Expiry latches.
        assert!(deadline.is_cancelled());
    }
}
