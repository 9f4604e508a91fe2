//! Physical operators: the pull-based execution engine.
//!
//! Every operator implements the pull contract `next() ->
//! Option<Morsel>`; `None` is end-of-stream. Operators may buffer (join
//! builds, sorts, group state) and must release those buffers as soon
//! as the stream ends or the operator is closed — including on the
//! cancellation path.
//!
//! ## State machine
//!
//! ```text
//! Created --open()--> Open --next()*--> Exhausted --close()--> Closed
//!                        \--cancel--------------------------/
//! ```
//!
//! Illegal transitions (e.g. `next()` after `close()`) fail with
//! `InvalidState`.

pub mod aggregate;
pub mod distinct;
pub mod explain;
pub mod filter;
pub mod hash_join;
pub mod limit;
pub mod nested_loop_join;
pub mod planner;
pub mod project;
pub mod scan;
pub mod set_ops;
pub mod sort;
pub mod unnest;

pub use planner::build_physical;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::datatypes::SchemaRef;

use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::morsel::Morsel;

/// Operator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Created,
    Open,
    Exhausted,
    Closed,
}

/// The pull contract every operator implements.
pub trait PhysicalOperator: Send {
    fn name(&self) -> &'static str;

    fn schema(&self) -> SchemaRef;

    /// One-line description with physical attributes, for EXPLAIN.
    fn describe(&self) -> String;

    fn children(&self) -> Vec<&dyn PhysicalOperator>;

    /// Transition Created -> Open, recursively opening children.
    fn open(&mut self) -> EngineResult<()>;

    /// Pull the next morsel; `None` is end-of-stream.
    fn next(&mut self) -> EngineResult<Option<Morsel>>;

    /// Release all buffers. Idempotent; also the cancellation path.
    fn close(&mut self) -> EngineResult<()>;

    /// Rows emitted and time spent so far.
    fn metrics(&self) -> (u64, Duration);

    /// Estimated output rows recorded at planning time.
    fn estimated_rows(&self) -> Option<usize> {
        None
    }
}

/// State, metrics and schema shared by every operator implementation.
pub struct OperatorCore {
    pub name: &'static str,
    pub schema: SchemaRef,
    pub state: OperatorState,
    pub rows_out: u64,
    pub elapsed: Duration,
    pub estimated_rows: Option<usize>,
    pub context: Arc<QueryContext>,
}

impl OperatorCore {
    pub fn new(
        name: &'static str,
        schema: SchemaRef,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> OperatorCore {
        OperatorCore {
            name,
            schema,
            state: OperatorState::Created,
            rows_out: 0,
            elapsed: Duration::ZERO,
            estimated_rows,
            context,
        }
    }

    /// Transition into Open; fails unless Created.
    pub fn open(&mut self) -> EngineResult<()> {
        if self.state != OperatorState::Created {
            return Err(EngineError::InvalidState(format!(
                "{}: open() in state {:?}",
                self.name, self.state
            )));
        }
        self.state = OperatorState::Open;
        Ok(())
    }

    /// Start of a `next()` call: state check plus the cooperative
    /// cancellation / deadline checkpoint.
    pub fn begin_next(&mut self) -> EngineResult<Instant> {
        match self.state {
            OperatorState::Open => {}
            OperatorState::Exhausted => {
                return Err(EngineError::InvalidState(format!(
                    "{}: next() after end of stream",
                    self.name
                )))
            }
            state => {
                return Err(EngineError::InvalidState(format!(
                    "{}: next() in state {state:?}",
                    self.name
                )))
            }
        }
        self.context.checkpoint()?;
        Ok(Instant::now())
    }

    /// End of a `next()` call: record metrics and the state change.
    pub fn end_next(
        &mut self,
        started: Instant,
        result: EngineResult<Option<Morsel>>,
    ) -> EngineResult<Option<Morsel>> {
        self.elapsed += started.elapsed();
        match &result {
            Ok(Some(morsel)) => self.rows_out += morsel.num_rows() as u64,
            Ok(None) => self.state = OperatorState::Exhausted,
            Err(_) => self.state = OperatorState::Exhausted,
        }
        result
    }

    /// Transition into Closed (idempotent).
    pub fn close(&mut self) {
        self.state = OperatorState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == OperatorState::Closed
    }
}

/// Drive a pulled stream until end-of-stream, discarding output.
/// EXPLAIN ANALYZE uses this to populate metrics.
pub fn drain(operator: &mut dyn PhysicalOperator) -> EngineResult<u64> {
    let mut rows = 0u64;
    while let Some(morsel) = operator.next()? {
        rows += morsel.num_rows() as u64;
    }
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! A scripted source operator for unit-testing downstream operators.

    use super::*;

    pub struct ValuesOperator {
        core: OperatorCore,
        morsels: Vec<Morsel>,
        cursor: usize,
    }

    impl ValuesOperator {
        pub fn new(schema: SchemaRef, morsels: Vec<Morsel>, context: Arc<QueryContext>) -> Self {
            ValuesOperator {
                core: OperatorCore::new("Values", schema, None, context),
                morsels,
                cursor: 0,
            }
        }
    }

    impl PhysicalOperator for ValuesOperator {
        fn name(&self) -> &'static str {
            "Values"
        }

        fn schema(&self) -> SchemaRef {
            self.core.schema.clone()
        }

        fn describe(&self) -> String {
            format!("Values({} morsels)", self.morsels.len())
        }

        fn children(&self) -> Vec<&dyn PhysicalOperator> {
            vec![]
        }

        fn open(&mut self) -> EngineResult<()> {
            self.core.open()
        }

        fn next(&mut self) -> EngineResult<Option<Morsel>> {
            let started = self.core.begin_next()?;
            let result = if self.cursor < self.morsels.len() {
                self.cursor += 1;
                Ok(Some(self.morsels[self.cursor - 1].clone()))
            } else {
                Ok(None)
            };
            self.core.end_next(started, result)
        }

        fn close(&mut self) -> EngineResult<()> {
            self.core.close();
            Ok(())
        }

        fn metrics(&self) -> (u64, Duration) {
            (self.core.rows_out, self.core.elapsed)
        }
    }

    /// A default context for operator tests.
    pub fn test_context() -> Arc<QueryContext> {
        use crate::config::EngineConfig;
        use crate::connector::ConnectorRegistry;
        Arc::new(QueryContext::new(
            EngineConfig::default(),
            Arc::new(ConnectorRegistry::new()),
            std::collections::HashMap::new(),
            None,
        ))
    }
}
