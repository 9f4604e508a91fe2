//! Cross-join unnest: expand a list column into one row per element.
//!
//! Surrounding columns are duplicated across the expansion. Empty and
//! NULL lists produce no output unless the OUTER variant is requested,
//! which emits one row with a NULL element. With the distinct flag set
//! (pushed down from an enclosing DISTINCT) duplicate elements within a
//! row expand only once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, Int32Array, ListArray};
use arrow::datatypes::SchemaRef;

use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::morsel::Morsel;
use crate::vector::{kernels, scalar_at, Vector};

use super::{OperatorCore, PhysicalOperator};

pub struct UnnestOperator {
    core: OperatorCore,
    input: Box<dyn PhysicalOperator>,
    column: usize,
    alias: String,
    outer: bool,
    distinct: bool,
}

impl UnnestOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        column: usize,
        alias: String,
        outer: bool,
        distinct: bool,
        schema: SchemaRef,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> UnnestOperator {
        UnnestOperator {
            core: OperatorCore::new("Unnest", schema, estimated_rows, context),
            input,
            column,
            alias,
            outer,
            distinct,
        }
    }

    fn expand(&self, morsel: &Morsel) -> EngineResult<Option<Morsel>> {
        let list = morsel
            .column(self.column)
            .array()
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| {
                EngineError::TypeMismatch(format!(
                    "unnest expects a list column, got {}",
                    morsel.column(self.column).data_type()
                ))
            })?
            .clone();
        let offsets = list.value_offsets();
        let values = list.values();

        // Row replication indices plus element gather indices; a None
        // element index materializes the NULL row of the OUTER variant.
        let mut row_indices: Vec<i32> = Vec::new();
        let mut element_indices: Vec<Option<i32>> = Vec::new();
        for row in 0..morsel.num_rows() {
            let empty = list.is_null(row) || offsets[row] == offsets[row + 1];
            if empty {
                if self.outer {
                    row_indices.push(row as i32);
                    element_indices.push(None);
                }
                continue;
            }
            if self.distinct {
                let mut seen = HashSet::new();
                for position in offsets[row]..offsets[row + 1] {
                    let value = scalar_at(values.as_ref(), position as usize)?;
                    if seen.insert(value) {
                        row_indices.push(row as i32);
                        element_indices.push(Some(position));
                    }
                }
            } else {
                for position in offsets[row]..offsets[row + 1] {
                    row_indices.push(row as i32);
                    element_indices.push(Some(position));
                }
            }
        }

        if row_indices.is_empty() {
            return Ok(None);
        }

        let replicated = morsel.take(&Int32Array::from(row_indices))?;
        let element = kernels::take(
            &Vector::from_arrow(values.clone()),
            &Int32Array::from(element_indices),
        )?;
        let mut columns = replicated.columns().to_vec();
        columns.push(element);
        Ok(Some(Morsel::try_new(self.core.schema.clone(), columns)?))
    }
}

impl PhysicalOperator for UnnestOperator {
    fn name(&self) -> &'static str {
        "Unnest"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        format!(
            "{}Unnest({}{})",
            if self.outer { "Outer" } else { "" },
            self.alias,
            if self.distinct { ", distinct" } else { "" }
        )
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
                Ok(Some(morsel)) => match self.expand(&morsel) {
                    Err(e) => break Err(e),
                    Ok(None) => {}
                    Ok(Some(expanded)) => break Ok(Some(expanded)),
                },
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
    use crate::morsel::schema_from_fields;
    use crate::vector::{vector_from_scalars, ScalarValue};
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field};

    fn source() -> (SchemaRef, Morsel) {
        let schema = schema_from_fields(vec![
            ("name".to_string(), DataType::Utf8, false),
            (
                "tags".to_string(),
                DataType::List(Arc::new(Field::new("item", DataType::Int64, true))),
                true,
            ),
        ]);
        let tags = vector_from_scalars(
            &DataType::List(Arc::new(Field::new("item", DataType::Int64, true))),
            &[
                ScalarValue::List(vec![
                    ScalarValue::Int64(1),
                    ScalarValue::Int64(2),
                    ScalarValue::Int64(1),
                ]),
                ScalarValue::List(vec![]),
                ScalarValue::Null,
                ScalarValue::List(vec![ScalarValue::Int64(9)]),
            ],
        )
        .expect("list");
        let morsel = Morsel::try_new(
            schema.clone(),
            vec![
                Vector::new(Arc::new(StringArray::from(vec!["a", "b", "c", "d"])) as ArrayRef),
                Vector::new(tags),
            ],
        )
        .expect("morsel");
        (schema, morsel)
    }

    fn out_schema(input: &SchemaRef) -> SchemaRef {
        let mut fields: Vec<Field> = input.fields().iter().map(|f| f.as_ref().clone()).collect();
        fields.push(Field::new("tag", DataType::Int64, true));
        Arc::new(arrow::datatypes::Schema::new(fields))
    }

    fn run(outer: bool, distinct: bool) -> Vec<(String, Option<i64>)> {
        let (schema, morsel) = source();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(
            schema.clone(),
            vec![morsel],
            ctx.clone(),
        ));
        let mut op = UnnestOperator::new(
            input,
            1,
            "tag".to_string(),
            outer,
            distinct,
            out_schema(&schema),
            None,
            ctx,
        );
        op.open().expect("open");
        let mut out = Vec::new();
        while let Some(m) = op.next().expect("next") {
            let names = m
                .column(0)
                .array()
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("utf8")
                .clone();
            let tags = m
                .column(2)
                .array()
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("i64")
                .clone();
            for i in 0..m.num_rows() {
                let tag = tags.is_valid(i).then(|| tags.value(i));
                out.push((names.value(i).to_string(), tag));
            }
        }
        op.close().expect("close");
        out
    }

    #[test]
    fn test_inner_unnest_skips_empty() {
        let rows = run(false, false);
        assert_eq!(
            rows,
            vec![
                ("a".to_string(), Some(1)),
                ("a".to_string(), Some(2)),
                ("a".to_string(), Some(1)),
                ("d".to_string(), Some(9)),
            ]
        );
    }

    #[test]
    fn test_outer_unnest_null_rows() {
        let rows = run(true, false);
        assert_eq!(rows.len(), 6);
        assert!(rows.contains(&("b".to_string(), None)));
        assert!(rows.contains(&("c".to_string(), None)));
    }

    #[test]
    fn test_distinct_expansion() {
        let rows = run(false, true);
        assert_eq!(
            rows,
            vec![
                ("a".to_string(), Some(1)),
                ("a".to_string(), Some(2)),
                ("d".to_string(), Some(9)),
            ]
        );
    }
}
