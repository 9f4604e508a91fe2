//! Hash aggregation.
//!
//! For each input morsel the group keys are hashed with the composite
//! mix and probed into a group map whose values are per-aggregate
//! accumulators (COUNT, SUM, MIN, MAX, AVG, ARRAY_AGG and their
//! DISTINCT variants). Hash collisions are resolved by comparing the
//! materialized key values; for grouping purposes NULL keys compare
//! equal. An ORDER BY inside ARRAY_AGG sorts the accumulated values
//! before the list is built.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;

use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::expression::{evaluate, AggregateExpr, AggregateFunction, Expression, SortKey};
use crate::hashing::FlatHashMap;
use crate::morsel::Morsel;
use crate::vector::{hashing, scalar_at, vector_from_scalars, ScalarValue, Vector};

use super::{OperatorCore, PhysicalOperator};

/// Rough per-group memory charge for budget accounting.
const GROUP_BYTES: usize = 160;

struct Accumulator {
    func: AggregateFunction,
    distinct_seen: Option<HashSet<ScalarValue>>,
    count: i64,
    sum_int: i64,
    sum_float: f64,
    saw_float: bool,
    saw_value: bool,
    extreme: Option<ScalarValue>,
    /// ARRAY_AGG payload: (order keys, value).
    collected: Vec<(Vec<ScalarValue>, ScalarValue)>,
}

impl Accumulator {
    fn new(spec: &AggregateExpr) -> Accumulator {
        Accumulator {
            func: spec.func,
            distinct_seen: spec.distinct.then(HashSet::new),
            count: 0,
            sum_int: 0,
            sum_float: 0.0,
            saw_float: false,
            saw_value: false,
            extreme: None,
            collected: Vec::new(),
        }
    }

    fn update(&mut self, value: Option<ScalarValue>, order: Vec<ScalarValue>) {
        // COUNT(*) has no argument and counts every row.
        let Some(value) = value else {
            self.count += 1;
            return;
        };
        if value.is_null() && self.func != AggregateFunction::ArrayAgg {
            return;
        }
        if let Some(seen) = &mut self.distinct_seen {
            if !seen.insert(value.clone()) {
                return;
            }
        }
        match self.func {
            AggregateFunction::Count => self.count += 1,
            AggregateFunction::Sum => {
                match &value {
                    ScalarValue::Int64(v) => self.sum_int += v,
                    ScalarValue::Float64(v) => {
                        self.sum_float += v;
                        self.saw_float = true;
                    }
                    _ => {}
                }
                self.saw_value = true;
            }
            AggregateFunction::Avg => {
                let v = match &value {
                    ScalarValue::Int64(v) => *v as f64,
                    ScalarValue::Float64(v) => *v,
                    _ => return,
                };
                self.sum_float += v;
                self.count += 1;
            }
            AggregateFunction::Min | AggregateFunction::Max => {
                let keep_new = match &self.extreme {
                    None => true,
                    Some(current) => match value.try_cmp(current) {
                        Some(std::cmp::Ordering::Less) => self.func == AggregateFunction::Min,
                        Some(std::cmp::Ordering::Greater) => self.func == AggregateFunction::Max,
                        _ => false,
                    },
                };
                if keep_new {
                    self.extreme = Some(value);
                }
            }
            AggregateFunction::ArrayAgg => self.collected.push((order, value)),
        }
    }

    fn finish(mut self, order_by: &[SortKey]) -> ScalarValue {
        match self.func {
            AggregateFunction::Count => ScalarValue::Int64(self.count),
            AggregateFunction::Sum => {
                if !self.saw_value {
                    ScalarValue::Null
                } else if self.saw_float {
                    ScalarValue::Float64(self.sum_float + self.sum_int as f64)
                } else {
                    ScalarValue::Int64(self.sum_int)
                }
            }
            AggregateFunction::Avg => {
                if self.count == 0 {
                    ScalarValue::Null
                } else {
                    ScalarValue::Float64(self.sum_float / self.count as f64)
                }
            }
            AggregateFunction::Min | AggregateFunction::Max => {
                self.extreme.take().unwrap_or(ScalarValue::Null)
            }
            AggregateFunction::ArrayAgg => {
                if !order_by.is_empty() {
                    // Accumulated values sort before the list is built;
                    // ties keep arrival order (stable sort).
                    self.collected.sort_by(|(a, _), (b, _)| {
                        for ((ka, kb), spec) in a.iter().zip(b.iter()).zip(order_by.iter()) {
                            let ordering = spec.compare_values(ka, kb);
                            if ordering != std::cmp::Ordering::Equal {
                                return ordering;
                            }
                        }
                        std::cmp::Ordering::Equal
                    });
                }
                ScalarValue::List(self.collected.into_iter().map(|(_, v)| v).collect())
            }
        }
    }
}

pub struct HashAggregateOperator {
    core: OperatorCore,
    input: Box<dyn PhysicalOperator>,
    group_exprs: Vec<Expression>,
    aggregates: Vec<AggregateExpr>,
    groups: FlatHashMap,
    group_keys: Vec<Vec<ScalarValue>>,
    accumulators: Vec<Vec<Accumulator>>,
    reserved_bytes: usize,
    aggregated: bool,
    output: VecDeque<Morsel>,
}

impl HashAggregateOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        group_exprs: Vec<Expression>,
        aggregates: Vec<AggregateExpr>,
        schema: SchemaRef,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> HashAggregateOperator {
        HashAggregateOperator {
            core: OperatorCore::new("HashAggregate", schema, estimated_rows, context),
            input,
            group_exprs,
            aggregates,
            groups: FlatHashMap::new(),
            group_keys: Vec::new(),
            accumulators: Vec::new(),
            reserved_bytes: 0,
            aggregated: false,
            output: VecDeque::new(),
        }
    }

    fn consume(&mut self, morsel: &Morsel) -> EngineResult<()> {
        let key_columns = self
            .group_exprs
            .iter()
            .map(|e| evaluate(e, morsel))
            .collect::<EngineResult<Vec<_>>>()?;
        let hashes = if key_columns.is_empty() {
            vec![0u64; morsel.num_rows()]
        } else {
            hashing::hash_rows(&key_columns)?
        };

        // Evaluate aggregate arguments and ARRAY_AGG order keys once
        // per morsel.
        let mut arg_columns: Vec<Option<Vector>> = Vec::with_capacity(self.aggregates.len());
        let mut order_columns: Vec<Vec<Vector>> = Vec::with_capacity(self.aggregates.len());
        for spec in &self.aggregates {
            arg_columns.push(match &spec.arg {
                Some(arg) => Some(evaluate(arg, morsel)?),
                None => None,
            });
            order_columns.push(
                spec.order_by
                    .iter()
                    .map(|k| evaluate(&k.expr, morsel))
                    .collect::<EngineResult<Vec<_>>>()?,
            );
        }

        let groups_before = self.group_keys.len();
        for row in 0..morsel.num_rows() {
            let key: Vec<ScalarValue> = key_columns
                .iter()
                .map(|c| scalar_at(c.array().as_ref(), row))
                .collect::<EngineResult<_>>()?;

            // Probe; equal hashes are verified against the key values.
            let mut group = None;
            for &candidate in self.groups.get(hashes[row]) {
                if self.group_keys[candidate as usize] == key {
                    group = Some(candidate as usize);
                    break;
                }
            }
            let group = match group {
                Some(g) => g,
                None => {
                    let g = self.group_keys.len();
                    self.groups.insert(hashes[row], g as i64);
                    self.group_keys.push(key);
                    self.accumulators
                        .push(self.aggregates.iter().map(Accumulator::new).collect());
                    g
                }
            };

            for i in 0..self.aggregates.len() {
                let value = match &arg_columns[i] {
                    Some(column) => Some(scalar_at(column.array().as_ref(), row)?),
                    None => None,
                };
                let order: Vec<ScalarValue> = order_columns[i]
                    .iter()
                    .map(|c| scalar_at(c.array().as_ref(), row))
                    .collect::<EngineResult<_>>()?;
                self.accumulators[group][i].update(value, order);
            }
        }

        let new_groups = self.group_keys.len() - groups_before;
        if new_groups > 0 {
            let bytes = new_groups * GROUP_BYTES;
            self.core.context.memory.grow(bytes)?;
            self.reserved_bytes += bytes;
        }
        Ok(())
    }

    fn emit(&mut self) -> EngineResult<()> {
        // A global aggregate over zero rows still emits one row.
        if self.group_exprs.is_empty() && self.group_keys.is_empty() {
            self.group_keys.push(Vec::new());
            self.accumulators
                .push(self.aggregates.iter().map(Accumulator::new).collect());
        }

        let schema = self.core.schema.clone();
        let group_width = self.group_exprs.len();
        let batch_rows = self.core.context.config.execution.morsel_rows.max(1);

        let group_keys = std::mem::take(&mut self.group_keys);
        let mut accumulators = std::mem::take(&mut self.accumulators);

        let mut start = 0;
        while start < group_keys.len() {
            let end = (start + batch_rows).min(group_keys.len());
            let mut columns: Vec<Vector> = Vec::with_capacity(schema.fields().len());
            for (i, field) in schema.fields().iter().take(group_width).enumerate() {
                let values: Vec<ScalarValue> = group_keys[start..end]
                    .iter()
                    .map(|k| k[i].clone())
                    .collect();
                columns.push(Vector::new(vector_from_scalars(
                    field.data_type(),
                    &values,
                )?));
            }
            for (i, spec) in self.aggregates.iter().enumerate() {
                let field = schema.field(group_width + i);
                let values: Vec<ScalarValue> = accumulators[start..end]
                    .iter_mut()
                    .map(|accs| {
                        let acc = std::mem::replace(&mut accs[i], Accumulator::new(spec));
                        acc.finish(&spec.order_by)
                    })
                    .collect();
                columns.push(Vector::new(vector_from_scalars(
                    field.data_type(),
                    &values,
                )?));
            }
            self.output
                .push_back(Morsel::try_new(schema.clone(), columns)?);
            start = end;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.groups = FlatHashMap::new();
        self.group_keys = Vec::new();
        self.accumulators = Vec::new();
        if self.reserved_bytes > 0 {
            self.core.context.memory.shrink(self.reserved_bytes);
            self.reserved_bytes = 0;
        }
        self.output.clear();
    }
}

impl PhysicalOperator for HashAggregateOperator {
    fn name(&self) -> &'static str {
        "HashAggregate"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        let groups: Vec<String> = self.group_exprs.iter().map(ToString::to_string).collect();
        let aggs: Vec<String> = self
            .aggregates
            .iter()
            .map(|a| Expression::Aggregate(a.clone()).to_string())
            .collect();
        format!(
            "HashAggregate(group=[{}], aggs=[{}])",
            groups.join(", "),
            aggs.join(", ")
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
        let result = (|| {
            if !self.aggregated {
                while let Some(morsel) = self.input.next()? {
                    self.core.context.checkpoint()?;
                    self.consume(&morsel)?;
                }
                self.emit()?;
                self.aggregated = true;
            }
            match self.output.pop_front() {
                Some(morsel) => Ok(Some(morsel)),
                None => {
                    self.release();
                    Ok(None)
                }
            }
        })();
        self.core.end_next(started, result)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.release();
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
    use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
    use arrow::datatypes::DataType;

    fn source() -> (SchemaRef, Vec<Morsel>) {
        let schema = schema_from_fields(vec![
            ("g".to_string(), DataType::Int64, true),
            ("v".to_string(), DataType::Float64, true),
        ]);
        let make = |g: Vec<Option<i64>>, v: Vec<Option<f64>>| {
            Morsel::try_new(
                schema.clone(),
                vec![
                    Vector::new(Arc::new(Int64Array::from(g)) as ArrayRef),
                    Vector::new(Arc::new(Float64Array::from(v)) as ArrayRef),
                ],
            )
            .expect("morsel")
        };
        (
            schema.clone(),
            vec![
                make(
                    vec![Some(1), Some(2), Some(1)],
                    vec![Some(10.0), Some(20.0), Some(30.0)],
                ),
                make(vec![Some(2), None], vec![None, Some(5.0)]),
            ],
        )
    }

    fn agg(func: AggregateFunction, column: usize, distinct: bool) -> AggregateExpr {
        AggregateExpr {
            func,
            arg: Some(Box::new(Expression::column("v", column))),
            distinct,
            order_by: vec![],
        }
    }

    fn out_schema() -> SchemaRef {
        schema_from_fields(vec![
            ("g".to_string(), DataType::Int64, true),
            ("cnt".to_string(), DataType::Int64, false),
            ("total".to_string(), DataType::Float64, true),
        ])
    }

    #[test]
    fn test_grouped_count_and_sum() {
        let (schema, morsels) = source();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let mut op = HashAggregateOperator::new(
            input,
            vec![Expression::column("g", 0)],
            vec![
                agg(AggregateFunction::Count, 1, false),
                agg(AggregateFunction::Sum, 1, false),
            ],
            out_schema(),
            None,
            ctx,
        );
        op.open().expect("open");
        let mut rows = 0;
        let mut found_null_group = false;
        while let Some(m) = op.next().expect("next") {
            rows += m.num_rows();
            let g = m.column(0);
            for i in 0..m.num_rows() {
                if !g.is_valid(i) {
                    found_null_group = true;
                }
            }
        }
        // Groups: 1, 2, NULL — NULL keys group together.
        assert_eq!(rows, 3);
        assert!(found_null_group);
        op.close().expect("close");
    }

    #[test]
    fn test_count_skips_nulls() {
        let (schema, morsels) = source();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let out = schema_from_fields(vec![("cnt".to_string(), DataType::Int64, false)]);
        let mut op = HashAggregateOperator::new(
            input,
            vec![],
            vec![agg(AggregateFunction::Count, 1, false)],
            out,
            None,
            ctx,
        );
        op.open().expect("open");
        let m = op.next().expect("next").expect("one row");
        let counts = m
            .column(0)
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        // 4 non-null v values out of 5 rows.
        assert_eq!(counts.value(0), 4);
        op.close().expect("close");
    }

    #[test]
    fn test_global_aggregate_over_empty_input() {
        let schema = schema_from_fields(vec![("v".to_string(), DataType::Float64, true)]);
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, vec![], ctx.clone()));
        let out = schema_from_fields(vec![
            ("cnt".to_string(), DataType::Int64, false),
            ("total".to_string(), DataType::Float64, true),
        ]);
        let mut op = HashAggregateOperator::new(
            input,
            vec![],
            vec![
                AggregateExpr {
                    func: AggregateFunction::Count,
                    arg: None,
                    distinct: false,
                    order_by: vec![],
                },
                agg(AggregateFunction::Sum, 0, false),
            ],
            out,
            None,
            ctx,
        );
        op.open().expect("open");
        let m = op.next().expect("next").expect("one row");
        assert_eq!(m.num_rows(), 1);
        let counts = m
            .column(0)
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        assert_eq!(counts.value(0), 0);
        assert_eq!(m.column(1).null_count(), 1);
        op.close().expect("close");
    }

    #[test]
    fn test_distinct_count() {
        let schema = schema_from_fields(vec![("v".to_string(), DataType::Int64, true)]);
        let ctx = test_context();
        let morsel = Morsel::try_new(
            schema.clone(),
            vec![Vector::new(
                Arc::new(Int64Array::from(vec![1, 1, 2, 2, 3])) as ArrayRef
            )],
        )
        .expect("morsel");
        let input = Box::new(ValuesOperator::new(schema, vec![morsel], ctx.clone()));
        let out = schema_from_fields(vec![("cnt".to_string(), DataType::Int64, false)]);
        let mut op = HashAggregateOperator::new(
            input,
            vec![],
            vec![AggregateExpr {
                func: AggregateFunction::Count,
                arg: Some(Box::new(Expression::column("v", 0))),
                distinct: true,
                order_by: vec![],
            }],
            out,
            None,
            ctx,
        );
        op.open().expect("open");
        let m = op.next().expect("next").expect("one row");
        let counts = m
            .column(0)
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        assert_eq!(counts.value(0), 3);
        op.close().expect("close");
    }
}
