//! Per-query memory budget.
//!
//! Buffering operators (join builds, sorts, group state) register their
//! retained bytes here at morsel boundaries; exceeding the budget fails
//! the query with `OutOfResources` so the cursor can unwind and release.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

/// Shared byte counter with a fixed budget (0 = unlimited).
#[derive(Clone)]
pub struct MemoryTracker {
    used: Arc<AtomicUsize>,
    budget: usize,
}

impl MemoryTracker {
    pub fn new(budget: usize) -> Self {
        MemoryTracker {
            used: Arc::new(AtomicUsize::new(0)),
            budget,
        }
    }

    pub fn unlimited() -> Self {
        MemoryTracker::new(0)
    }

    /// Register `bytes` of newly retained buffers.
    pub fn grow(&self, bytes: usize) -> EngineResult<()> {
        let total = self.used.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if self.budget > 0 && total > self.budget {
            Err(EngineError::OutOfResources(format!(
                "query memory budget exceeded: {total} of {} bytes",
                self.budget
            )))
        } else {
            Ok(())
        }
    }

    /// Release `bytes` previously registered.
    pub fn shrink(&self, bytes: usize) {
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            })
            .ok();
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_fails() {
        let tracker = MemoryTracker::unlimited();
        assert!(tracker.grow(usize::MAX / 2).is_ok());
    }

    #[test]
    fn test_budget_enforced() {
        let tracker = MemoryTracker::new(1000);
        assert!(tracker.grow(600).is_ok());
        assert!(matches!(
            tracker.grow(600),
            Err(EngineError::OutOfResources(_))
        ));
    }

    #[test]
    fn test_shrink_releases() {
        let tracker = MemoryTracker::new(1000);
        tracker.grow(800).expect("within budget");
        tracker.shrink(700);
        assert!(tracker.grow(500).is_ok());
        assert_eq!(tracker.used(), 600);
    }

    #[test]
    fn test_shrink_saturates() {
        let tracker = MemoryTracker::new(0);
        tracker.shrink(100);
        assert_eq!(tracker.used(), 0);
    }
}
