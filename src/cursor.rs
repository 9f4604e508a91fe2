//! Result cursor: the host-facing end of the pull loop.
//!
//! The cursor owns the physical plan. Fetching drives the pipeline;
//! dropping the cursor cancels execution and releases every operator's
//! state. The error contract is at-most-one-error per cursor: the first
//! failure is delivered once, the stream is closed, and rows already
//! delivered remain valid.

use std::sync::Arc;
use std::time::Instant;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::execution::CancelHandle;
use crate::morsel::{concat_morsels, Morsel};
use crate::physical::PhysicalOperator;
use crate::statistics::QueryStatistics;
use crate::vector::{scalar_at, ScalarValue};

/// One result row, in output column order.
pub type Row = Vec<ScalarValue>;

/// A streaming result handle.
pub struct Cursor {
    root: Box<dyn PhysicalOperator>,
    schema: SchemaRef,
    context: Arc<QueryContext>,
    cancel: CancelHandle,
    started: Instant,
    opened: bool,
    finished: bool,
    errored: bool,
    /// Current morsel and the next row to hand out from it.
    current: Option<(Morsel, usize)>,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("root", &self.root.name())
            .field("opened", &self.opened)
            .field("finished", &self.finished)
            .field("errored", &self.errored)
            .finish()
    }
}

impl Cursor {
    pub(crate) fn new(root: Box<dyn PhysicalOperator>, context: Arc<QueryContext>) -> Cursor {
        let schema = root.schema();
        let cancel = context.deadline.cancel_handle();
        Cursor {
            root,
            schema,
            context,
            cancel,
            started: Instant::now(),
            opened: false,
            finished: false,
            errored: false,
            current: None,
        }
    }

    /// The result schema.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Cancel the running query. Each operator finishes its current
    /// pull, then the next one observes the cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Statistics collected so far (complete once the stream ends).
    pub fn statistics(&self) -> QueryStatistics {
        self.context.stats.snapshot()
    }

    /// Fetch the next morsel from the pipeline.
    pub fn fetch_morsel(&mut self) -> EngineResult<Option<Morsel>> {
        if self.finished {
            return Ok(None);
        }
        if !self.opened {
            if let Err(e) = self.root.open() {
                self.fail();
                return Err(e);
            }
            self.opened = true;
        }
        match self.root.next() {
            Ok(Some(morsel)) => {
                self.context
                    .stats
                    .add_rows_produced(morsel.num_rows() as u64);
                Ok(Some(morsel))
            }
            Ok(None) => {
                self.finish();
                Ok(None)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Fetch one row.
    pub fn fetch_one(&mut self) -> EngineResult<Option<Row>> {
        loop {
            if let Some((morsel, row)) = &mut self.current {
                if *row < morsel.num_rows() {
                    let index = *row;
                    *row += 1;
                    let values = morsel
                        .columns()
                        .iter()
                        .map(|c| scalar_at(c.array().as_ref(), index))
                        .collect::<EngineResult<Row>>()?;
                    return Ok(Some(values));
                }
                self.current = None;
            }
            match self.fetch_morsel()? {
                Some(morsel) => self.current = Some((morsel, 0)),
                None => return Ok(None),
            }
        }
    }

    /// Fetch up to `n` rows.
    pub fn fetch_many(&mut self, n: usize) -> EngineResult<Vec<Row>> {
        let mut rows = Vec::with_capacity(n.min(1024));
        while rows.len() < n {
            match self.fetch_one()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Fetch every remaining row.
    pub fn fetch_all(&mut self) -> EngineResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Drain the remaining stream into one Arrow record batch.
    pub fn to_arrow(&mut self) -> EngineResult<RecordBatch> {
        let mut morsels = Vec::new();
        if let Some((morsel, row)) = self.current.take() {
            if row < morsel.num_rows() {
                morsels.push(morsel.slice(row, morsel.num_rows() - row));
            }
        }
        while let Some(morsel) = self.fetch_morsel()? {
            morsels.push(morsel);
        }
        concat_morsels(&self.schema, &morsels)?.to_record_batch()
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.context
                .stats
                .set_execution_time(self.started.elapsed());
            let _ = self.root.close();
        }
    }

    /// First error closes the stream; rows already delivered stay valid.
    fn fail(&mut self) {
        self.errored = true;
        self.finished = true;
        self.context
            .stats
            .set_execution_time(self.started.elapsed());
        let _ = self.root.close();
    }

    /// Whether an error has already been delivered.
    pub fn is_errored(&self) -> bool {
        self.errored
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        // Destroying the cursor cancels execution and releases all
        // operator state.
        self.cancel.cancel();
        if !self.finished {
            let _ = self.root.close();
        }
    }
}

/// Convenience accessors on fetched rows.
pub trait RowExt {
    fn get_i64(&self, column: usize) -> Option<i64>;
    fn get_f64(&self, column: usize) -> Option<f64>;
    fn get_str(&self, column: usize) -> Option<&str>;
    fn get_bool(&self, column: usize) -> Option<bool>;
}

impl RowExt for Row {
    fn get_i64(&self, column: usize) -> Option<i64> {
        match self.get(column)? {
            ScalarValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    fn get_f64(&self, column: usize) -> Option<f64> {
        match self.get(column)? {
            ScalarValue::Float64(v) => Some(*v),
            ScalarValue::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    fn get_str(&self, column: usize) -> Option<&str> {
        match self.get(column)? {
            ScalarValue::Utf8(v) => Some(v.as_str()),
            _ => None,
        }
    }

    fn get_bool(&self, column: usize) -> Option<bool> {
        match self.get(column)? {
            ScalarValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}
