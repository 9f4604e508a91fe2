//! Optional plan cache keyed by SQL text.
//!
//! Off by default; hosts running the same parameterized statements in a
//! tight loop can enable it through the query context. Bounded LRU.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::plan::LogicalPlan;

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// A bounded cache of optimized logical plans keyed by bound SQL text.
pub struct PlanCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    plans: HashMap<String, (LogicalPlan, u64)>,
    clock: u64,
    stats: CacheStats,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        PlanCache {
            inner: Mutex::new(Inner {
                plans: HashMap::new(),
                clock: 0,
                stats: CacheStats::default(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, sql: &str) -> Option<LogicalPlan> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        match inner.plans.get_mut(sql) {
            Some((plan, last_used)) => {
                *last_used = clock;
                let plan = plan.clone();
                inner.stats.hits += 1;
                Some(plan)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, sql: String, plan: LogicalPlan) {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        if inner.plans.len() >= self.capacity && !inner.plans.contains_key(&sql) {
            // Evict the least recently used entry.
            if let Some(oldest) = inner
                .plans
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone())
            {
                inner.plans.remove(&oldest);
            }
        }
        inner.plans.insert(sql, (plan, clock));
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    pub fn len(&self) -> usize {
        self.inner.lock().plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{LogicalPlan, NodeKind, ScanCapabilities};
    use arrow::datatypes::Schema;
    use std::sync::Arc;

    fn dummy_plan() -> LogicalPlan {
        let mut plan = LogicalPlan::new();
        let schema = Arc::new(Schema::empty());
        let id = plan.add_node(
            NodeKind::Scan {
                relation: "t".into(),
                connector: "memory".into(),
                base_schema: schema.clone(),
                projection: None,
                filters: vec![],
                limit: None,
                temporal: None,
                capabilities: ScanCapabilities::default(),
            },
            vec![],
            schema,
            None,
        );
        plan.set_root(id);
        plan
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = PlanCache::new(4);
        assert!(cache.get("SELECT 1").is_none());
        cache.put("SELECT 1".into(), dummy_plan());
        assert!(cache.get("SELECT 1").is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = PlanCache::new(2);
        cache.put("a".into(), dummy_plan());
        cache.put("b".into(), dummy_plan());
        cache.get("a");
        cache.put("c".into(), dummy_plan());
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }
}
