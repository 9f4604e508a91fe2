//! Per-query statistics: rows scanned, optimizer rule applications and
//! per-operator rows/time. Surfaced through `Cursor::statistics()` and
//! `EXPLAIN [ANALYZE]`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Snapshot of one operator's work.
#[derive(Debug, Clone)]
pub struct OperatorStats {
    pub name: String,
    pub rows_out: u64,
    pub elapsed: Duration,
}

/// Snapshot of the whole query.
#[derive(Debug, Clone, Default)]
pub struct QueryStatistics {
    /// `optimization_<strategy>` -> application count.
    pub rule_counters: BTreeMap<String, u64>,
    pub rows_scanned: u64,
    pub rows_produced: u64,
    pub operators: Vec<OperatorStats>,
    pub planning_time: Duration,
    pub execution_time: Duration,
}

/// Shared, thread-safe collector owned by the query context.
#[derive(Clone, Default)]
pub struct StatisticsCollector {
    inner: Arc<Mutex<QueryStatistics>>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one application of an optimizer strategy.
    pub fn count_rule(&self, strategy: &str) {
        let mut inner = self.inner.lock();
        *inner
            .rule_counters
            .entry(format!("optimization_{strategy}"))
            .or_insert(0) += 1;
    }

    pub fn add_rows_scanned(&self, rows: u64) {
        self.inner.lock().rows_scanned += rows;
    }

    pub fn add_rows_produced(&self, rows: u64) {
        self.inner.lock().rows_produced += rows;
    }

    pub fn record_operator(&self, name: &str, rows_out: u64, elapsed: Duration) {
        self.inner.lock().operators.push(OperatorStats {
            name: name.to_string(),
            rows_out,
            elapsed,
        });
    }

    pub fn set_planning_time(&self, elapsed: Duration) {
        self.inner.lock().planning_time = elapsed;
    }

    pub fn set_execution_time(&self, elapsed: Duration) {
        self.inner.lock().execution_time = elapsed;
    }

    pub fn rule_count(&self, strategy: &str) -> u64 {
        self.inner
            .lock()
            .rule_counters
            .get(&format!("optimization_{strategy}"))
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> QueryStatistics {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_counting() {
        let stats = StatisticsCollector::new();
        stats.count_rule("predicate_pushdown");
        stats.count_rule("predicate_pushdown");
        stats.count_rule("constant_folding");
        assert_eq!(stats.rule_count("predicate_pushdown"), 2);
        assert_eq!(stats.rule_count("constant_folding"), 1);
        assert_eq!(stats.rule_count("never_ran"), 0);
    }

    #[test]
    fn test_snapshot_is_decoupled() {
        let stats = StatisticsCollector::new();
        stats.add_rows_scanned(100);
        let snap = stats.snapshot();
        stats.add_rows_scanned(50);
        assert_eq!(snap.rows_scanned, 100);
        assert_eq!(stats.snapshot().rows_scanned, 150);
    }

    #[test]
    fn test_operator_records() {
        let stats = StatisticsCollector::new();
        stats.record_operator("HashJoin", 9, Duration::from_millis(3));
        let snap = stats.snapshot();
        assert_eq!(snap.operators.len(), 1);
        assert_eq!(snap.operators[0].rows_out, 9);
    }
}
