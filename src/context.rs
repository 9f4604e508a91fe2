//! Per-query context.
//!
//! The engine keeps no mutable global state; everything a query needs —
//! connector handles, the optional plan cache, parameters, cancellation,
//! the memory budget and the statistics collector — travels in one
//! `QueryContext` created at cursor construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};

use crate::config::EngineConfig;
use crate::connector::{Connector, ConnectorRegistry};
use crate::error::EngineResult;
use crate::execution::{MemoryTracker, PlanCache, QueryDeadline};
use crate::statistics::StatisticsCollector;
use crate::vector::ScalarValue;

/// Named query parameters bound to `@name` placeholders.
pub type Params = HashMap<String, ScalarValue>;

/// Everything one query execution needs, bundled.
pub struct QueryContext {
    pub config: EngineConfig,
    pub connectors: Arc<ConnectorRegistry>,
    pub params: Params,
    pub stats: StatisticsCollector,
    pub deadline: QueryDeadline,
    pub memory: MemoryTracker,
    pub cache: Option<Arc<PlanCache>>,
    /// "Today" for temporal placeholder resolution (UTC).
    pub today: NaiveDate,
}

impl QueryContext {
    pub fn new(
        config: EngineConfig,
        connectors: Arc<ConnectorRegistry>,
        params: Params,
        cache: Option<Arc<PlanCache>>,
    ) -> Self {
        let timeout = match config.execution.timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let memory = MemoryTracker::new(config.execution.memory_budget_bytes);
        QueryContext {
            config,
            connectors,
            params,
            stats: StatisticsCollector::new(),
            deadline: QueryDeadline::new(timeout),
            memory,
            cache,
            today: Utc::now().date_naive(),
        }
    }

    /// Override "today" (tests pin the clock).
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn connector(&self, name: &str) -> EngineResult<Arc<dyn Connector>> {
        self.connectors.by_name(name)
    }

    /// Cancellation / deadline / budget check at a morsel boundary.
    pub fn checkpoint(&self) -> EngineResult<()> {
        self.deadline.check()
    }
}
