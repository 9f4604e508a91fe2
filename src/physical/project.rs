//! Projection operator: evaluates the selection list over each input
//! morsel, producing new columns and dropping unreferenced ones.

use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;

use crate::error::EngineResult;
use crate::expression::{evaluate, Expression};
use crate::morsel::Morsel;
use crate::vector::Vector;

use super::{OperatorCore, PhysicalOperator};

pub struct ProjectOperator {
    core: OperatorCore,
    input: Box<dyn PhysicalOperator>,
    exprs: Vec<Expression>,
    display: String,
}

impl ProjectOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        exprs: Vec<Expression>,
        schema: SchemaRef,
        estimated_rows: Option<usize>,
        context: Arc<crate::context::QueryContext>,
    ) -> ProjectOperator {
        let display = exprs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        ProjectOperator {
            core: OperatorCore::new("Project", schema, estimated_rows, context),
            input,
            exprs,
            display,
        }
    }
}

impl PhysicalOperator for ProjectOperator {
    fn name(&self) -> &'static str {
        "Project"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        format!("Project({})", self.display)
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.input.as_ref()]
    }

    fn open(&mut self) -> EngineResult<()> {
        self.core.open()?;
        self.input.open()
    }

    fn next(&mut self) -> EngineResult<Option<Morsel>> {
        let started = self.core.begin_next()?;
        let result = match self.input.next() {
            Err(e) => Err(e),
            Ok(None) => Ok(None),
            Ok(Some(morsel)) => {
                let columns: EngineResult<Vec<Vector>> =
                    self.exprs.iter().map(|e| evaluate(e, &morsel)).collect();
                columns.and_then(|columns| {
                    Morsel::try_new(self.core.schema.clone(), columns).map(Some)
                })
            }
        };
        self.core.end_next(started, result)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.input.close()?;
        self.core.close();
        Ok(())
    }

    fn metrics(&self) -> (u64, Duration) {
        (self.core.rows_out, self.core.elapsed)
    }

    fn estimated_rows(&self) -> Option<usize> {
        self.core.estimated_rows
    }
}
