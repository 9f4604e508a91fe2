//! Limit and Offset operators: cap and skip rows in the stream.

use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;

use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::morsel::Morsel;

use super::{OperatorCore, PhysicalOperator};

pub struct LimitOperator {
    core: OperatorCore,
    input: Box<dyn PhysicalOperator>,
    remaining: usize,
    limit: usize,
}

impl LimitOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        limit: usize,
        context: Arc<QueryContext>,
    ) -> LimitOperator {
        LimitOperator {
            core: OperatorCore::new("Limit", input.schema(), Some(limit), context),
            input,
            remaining: limit,
            limit,
        }
    }
}

impl PhysicalOperator for LimitOperator {
    fn name(&self) -> &'static str {
        "Limit"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        format!("Limit({})", self.limit)
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
        let result = if self.remaining == 0 {
            Ok(None)
        } else {
            match self.input.next() {
                Err(e) => Err(e),
                Ok(None) => Ok(None),
                Ok(Some(morsel)) => {
                    let morsel = if morsel.num_rows() > self.remaining {
                        morsel.slice(0, self.remaining)
                    } else {
                        morsel
                    };
                    self.remaining -= morsel.num_rows();
                    Ok(Some(morsel))
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

pub struct OffsetOperator {
    core: OperatorCore,
    input: Box<dyn PhysicalOperator>,
    to_skip: usize,
    offset: usize,
}

impl OffsetOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        offset: usize,
        context: Arc<QueryContext>,
    ) -> OffsetOperator {
        OffsetOperator {
            core: OperatorCore::new("Offset", input.schema(), None, context),
            input,
            to_skip: offset,
            offset,
        }
    }
}

impl PhysicalOperator for OffsetOperator {
    fn name(&self) -> &'static str {
        "Offset"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        format!("Offset({})", self.offset)
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
                    if self.to_skip >= morsel.num_rows() {
                        self.to_skip -= morsel.num_rows();
                        continue;
                    }
                    let kept = morsel.slice(self.to_skip, morsel.num_rows() - self.to_skip);
                    self.to_skip = 0;
                    break Ok(Some(kept));
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
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{test_context, ValuesOperator};
    use super::*;
    use crate::morsel::schema_from_fields;
    use crate::vector::Vector;
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::DataType;

    fn source(chunks: Vec<Vec<i64>>) -> (SchemaRef, Vec<Morsel>) {
        let schema = schema_from_fields(vec![("x".to_string(), DataType::Int64, false)]);
        let morsels = chunks
            .into_iter()
            .map(|values| {
                Morsel::try_new(
                    schema.clone(),
                    vec![Vector::new(Arc::new(Int64Array::from(values)) as ArrayRef)],
                )
                .expect("morsel")
            })
            .collect();
        (schema, morsels)
    }

    #[test]
    fn test_limit_cuts_mid_morsel() {
        let (schema, morsels) = source(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let mut limit = LimitOperator::new(input, 4, ctx);
        limit.open().expect("open");
        let first = limit.next().expect("next").expect("some");
        assert_eq!(first.num_rows(), 3);
        let second = limit.next().expect("next").expect("some");
        assert_eq!(second.num_rows(), 1);
        assert!(limit.next().expect("next").is_none());
    }

    #[test]
    fn test_offset_skips_across_morsels() {
        let (schema, morsels) = source(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let mut offset = OffsetOperator::new(input, 4, ctx);
        offset.open().expect("open");
        let first = offset.next().expect("next").expect("some");
        assert_eq!(first.num_rows(), 2);
        assert!(offset.next().expect("next").is_none());
    }
}
