//! # Meridian Query Engine
//!
//! An embedded, serverless-friendly SQL query engine. Meridian reads
//! heterogeneous external data — Parquet files, JSON Lines, in-memory
//! tables — through pluggable connectors and returns result tables
//! through a cursor API. There is no persistent catalog and no write
//! path: every query executes single-process, and the engine is built
//! so each query can run inside an ephemeral, stateless worker.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! SQL text
//!     ↓
//! [Temporal Binder]       → FOR clauses stripped, date ranges bound
//!     ↓
//! [Parser (sqlparser)]    → AST
//!     ↓
//! [Plan Builder]          → logical operator DAG (canonical clause order)
//!     ↓
//! [Optimizer]             → ordered rewrite strategies, counted
//!     ↓
//! [Physical Planner]      → pull-based operators, algorithms chosen
//!     ↓
//! [Cursor pull loop]      → morsels to the consumer
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian::Engine;
//!
//! let engine = Engine::new()?;
//! let mut cursor = engine.execute(
//!     "SELECT name FROM $satellites ORDER BY radius DESC LIMIT 3",
//! )?;
//! for row in cursor.fetch_all()? {
//!     println!("{row:?}");
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `vector` | Typed columnar vectors, Arrow interop, hashing kernels |
//! | `morsel` | Equal-length column batches between operators |
//! | `hashing` | Identity-hash map/set and bloom filter |
//! | `expression` | Expression algebra and the vectorized evaluator |
//! | `temporal` | `FOR` clause binding ahead of the parser |
//! | `plan` | Logical plan arena and the AST lowering |
//! | `optimizer` | Fixed pipeline of rewrite strategies |
//! | `physical` | Pull-based execution operators |
//! | `connector` | Parquet / JSON Lines / in-memory data sources |
//! | `cursor` | Host-facing result iteration |

pub mod config;
pub mod connector;
pub mod context;
pub mod cursor;
pub mod demo;
pub mod error;
pub mod execution;
pub mod expression;
pub mod hashing;
pub mod morsel;
pub mod optimizer;
pub mod physical;
pub mod plan;
pub mod statistics;
pub mod temporal;
pub mod vector;

// Re-export the host-facing surface.
pub use config::EngineConfig;
pub use connector::{
    Capability, Connector, ConnectorRegistry, JsonlConnector, MemoryConnector, ParquetConnector,
};
pub use context::{Params, QueryContext};
pub use cursor::{Cursor, Row, RowExt};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use morsel::Morsel;
pub use statistics::QueryStatistics;
pub use temporal::TemporalRange;
pub use vector::{ScalarValue, Vector};

use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use execution::PlanCache;
use optimizer::Optimizer;
use plan::{builder::build_plan, LogicalPlan, NodeKind};

/// The embedded query engine: connector registry plus configuration.
///
/// Cheap to construct; hosts typically keep one per process and call
/// [`Engine::execute`] per query. All per-query state lives in the
/// cursor it returns.
pub struct Engine {
    config: EngineConfig,
    connectors: ConnectorRegistry,
    memory: Arc<MemoryConnector>,
    cache: Option<Arc<PlanCache>>,
}

impl Engine {
    /// An engine with default configuration and the demo datasets
    /// (`$planets`, `$satellites`, `$astronauts`) registered.
    pub fn new() -> EngineResult<Engine> {
        Engine::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> EngineResult<Engine> {
        let memory = Arc::new(MemoryConnector::new("memory"));
        demo::register(&memory)?;
        let mut connectors = ConnectorRegistry::new();
        connectors.register(memory.clone());
        let cache = match config.execution.plan_cache_entries {
            0 => None,
            entries => Some(Arc::new(PlanCache::new(entries))),
        };
        Ok(Engine {
            config,
            connectors,
            memory,
            cache,
        })
    }

    /// Register an additional data source. Connectors are consulted in
    /// registration order.
    pub fn register_connector(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.register(connector);
    }

    /// Register an in-memory table on the built-in memory connector.
    pub fn register_table(&self, name: &str, batch: RecordBatch) -> EngineResult<()> {
        self.memory.register_table(name, batch)
    }

    /// Execute a query.
    pub fn execute(&self, sql: &str) -> EngineResult<Cursor> {
        self.execute_with_params(sql, Params::new())
    }

    /// Execute a query with `@name` parameters bound.
    pub fn execute_with_params(&self, sql: &str, params: Params) -> EngineResult<Cursor> {
        let has_params = !params.is_empty();
        let context = Arc::new(QueryContext::new(
            self.config.clone(),
            Arc::new(self.connectors.clone()),
            params,
            self.cache.clone(),
        ));
        let planning_started = Instant::now();

        // Temporal binding runs over the raw text, ahead of the parser.
        let bound = temporal::bind(sql, context.today)?;

        let mut plan = match (&self.cache, has_params) {
            (Some(cache), false) => match cache.get(&bound.sql) {
                Some(plan) => plan,
                None => {
                    let plan = self.plan_statement(&bound, &context)?;
                    cache.put(bound.sql.clone(), plan.clone());
                    plan
                }
            },
            _ => self.plan_statement(&bound, &context)?,
        };

        context.stats.set_planning_time(planning_started.elapsed());

        // EXPLAIN is resolved here: the inner plan is lowered (and for
        // ANALYZE also executed) and the rendering becomes the result.
        if let NodeKind::Explain { analyze } = &plan.node(plan.root()).kind {
            let analyze = *analyze;
            let inner_root = plan.node(plan.root()).children[0];
            plan.set_root(inner_root);
            let mut operator = physical::build_physical(&plan, &context)?;
            if analyze {
                let run_started = Instant::now();
                operator.open()?;
                physical::drain(operator.as_mut())?;
                operator.close()?;
                context.stats.set_execution_time(run_started.elapsed());
            }
            let lines =
                physical::explain::render(operator.as_ref(), &context.stats.snapshot(), analyze);
            let result = physical::explain::ExplainResultOperator::new(lines, context.clone())?;
            return Ok(Cursor::new(Box::new(result), context));
        }

        let operator = physical::build_physical(&plan, &context)?;
        Ok(Cursor::new(operator, context))
    }

    /// Bind, parse, lower and optimize one statement.
    fn plan_statement(
        &self,
        bound: &temporal::BoundSql,
        context: &Arc<QueryContext>,
    ) -> EngineResult<LogicalPlan> {
        let statements = Parser::parse_sql(&GenericDialect {}, &bound.sql)?;
        let statement = match statements.as_slice() {
            [statement] => statement,
            [] => return Err(EngineError::Parse("empty statement".into())),
            _ => {
                return Err(EngineError::InvalidInput(
                    "one statement per execute call".into(),
                ))
            }
        };

        let mut plan = build_plan(statement, context, &bound.ranges)?;
        let optimizer = Optimizer::new(&self.config.optimizer);
        optimizer.optimize(&mut plan, &context.stats)?;
        tracing::debug!(nodes = plan.len(), "plan optimized");
        Ok(plan)
    }
}
