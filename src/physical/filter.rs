//! Filter operator.
//!
//! Evaluates a boolean predicate into a mask, filters every column, and
//! skips fully-empty morsels (the next non-empty one is returned).

use std::time::Duration;

use arrow::datatypes::SchemaRef;

use crate::error::EngineResult;
use crate::expression::{Expression, PredicateEvaluator};
use crate::morsel::Morsel;

use super::{OperatorCore, PhysicalOperator};

pub struct FilterOperator {
    core: OperatorCore,
    input: Box<dyn PhysicalOperator>,
    evaluator: PredicateEvaluator,
    display: String,
}

impl FilterOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        predicate: Expression,
        estimated_rows: Option<usize>,
        context: std::sync::Arc<crate::context::QueryContext>,
    ) -> FilterOperator {
        let display = predicate.to_string();
        FilterOperator {
            core: OperatorCore::new("Filter", input.schema(), estimated_rows, context),
            input,
            evaluator: PredicateEvaluator::new(predicate),
            display,
        }
    }
}

impl PhysicalOperator for FilterOperator {
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        format!("Filter({})", self.display)
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
        let result = loop {
            match self.input.next() {
                Err(e) => break Err(e),
                Ok(None) => break Ok(None),
                Ok(Some(morsel)) => {
                    let filtered = self
                        .evaluator
                        .evaluate(&morsel)
                        .and_then(|mask| morsel.filter(&mask));
                    match filtered {
                        Err(e) => break Err(e),
                        Ok(kept) if kept.num_rows() == 0 => {}
                        Ok(kept) => break Ok(Some(kept)),
                    }
                }
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

#[cfg(test)]
mod tests {
    use super::super::test_support::{test_context, ValuesOperator};
    use super::*;
    use crate::expression::BinaryOp;
    use crate::morsel::schema_from_fields;
    use crate::vector::{ScalarValue, Vector};
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::DataType;
    use std::sync::Arc;

    fn source() -> (SchemaRef, Vec<Morsel>) {
        let schema = schema_from_fields(vec![("x".to_string(), DataType::Int64, false)]);
        let make = |values: Vec<i64>| {
            Morsel::try_new(
                schema.clone(),
                vec![Vector::new(Arc::new(Int64Array::from(values)) as ArrayRef)],
            )
            .expect("morsel")
        };
        (schema.clone(), vec![make(vec![1, 2, 3]), make(vec![4, 5])])
    }

    #[test]
    fn test_filter_drops_and_skips_empty() {
        let (schema, morsels) = source();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let predicate = Expression::binary(
            BinaryOp::Gt,
            Expression::column("x", 0),
            Expression::Literal(ScalarValue::Int64(3)),
        );
        let mut filter = FilterOperator::new(input, predicate, None, ctx);
        filter.open().expect("open");
        // The first morsel filters to empty and is skipped entirely.
        let out = filter.next().expect("next").expect("some");
        assert_eq!(out.num_rows(), 2);
        assert!(filter.next().expect("next").is_none());
        filter.close().expect("close");
    }

    #[test]
    fn test_next_after_eos_is_invalid() {
        let (schema, _) = source();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, vec![], ctx.clone()));
        let predicate = Expression::Literal(ScalarValue::Boolean(true));
        let mut filter = FilterOperator::new(input, predicate, None, ctx);
        filter.open().expect("open");
        assert!(filter.next().expect("next").is_none());
        assert!(filter.next().is_err());
    }
}
