//! Sort operators.
//!
//! [`SortOperator`] collects its whole input and applies a stable sort
//! under the ORDER BY comparator. [`TopKSortOperator`] is the fused
//! Sort+Limit form: a bounded heap keyed by the sort tuple keeps only
//! the first `k = OFFSET + LIMIT` rows under the comparator, evicting
//! the worst entry once the heap exceeds k. Both are stable: ties break
//! by arrival order.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use arrow::array::Int32Array;
use arrow::datatypes::SchemaRef;

use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::expression::{evaluate, SortKey};
use crate::morsel::{concat_morsels, Morsel};
use crate::vector::{scalar_at, vector_from_scalars, ScalarValue, Vector};

use super::{OperatorCore, PhysicalOperator};

fn compare_key_rows(a: &[ScalarValue], b: &[ScalarValue], specs: &[SortKey]) -> Ordering {
    for ((ka, kb), spec) in a.iter().zip(b.iter()).zip(specs.iter()) {
        let ordering = spec.compare_values(ka, kb);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn describe_keys(keys: &[SortKey]) -> String {
    keys.iter()
        .map(|k| format!("{} {}", k.expr, if k.ascending { "ASC" } else { "DESC" }))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Full sort
// ============================================================================

pub struct SortOperator {
    core: OperatorCore,
    input: Box<dyn PhysicalOperator>,
    keys: Vec<SortKey>,
    output: VecDeque<Morsel>,
    sorted: bool,
    reserved_bytes: usize,
}

impl SortOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        keys: Vec<SortKey>,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> SortOperator {
        SortOperator {
            core: OperatorCore::new("Sort", input.schema(), estimated_rows, context),
            input,
            keys,
            output: VecDeque::new(),
            sorted: false,
            reserved_bytes: 0,
        }
    }

    fn sort_all(&mut self) -> EngineResult<()> {
        let mut morsels = Vec::new();
        while let Some(morsel) = self.input.next()? {
            self.core.context.checkpoint()?;
            let bytes = morsel.memory_size();
            self.core.context.memory.grow(bytes)?;
            self.reserved_bytes += bytes;
            morsels.push(morsel);
        }
        let schema = self.core.schema.clone();
        let all = concat_morsels(&schema, &morsels)?;
        drop(morsels);
        if all.num_rows() == 0 {
            return Ok(());
        }

        let key_columns = self
            .keys
            .iter()
            .map(|k| evaluate(&k.expr, &all))
            .collect::<EngineResult<Vec<_>>>()?;
        let mut key_rows: Vec<Vec<ScalarValue>> = Vec::with_capacity(all.num_rows());
        for row in 0..all.num_rows() {
            key_rows.push(
                key_columns
                    .iter()
                    .map(|c| scalar_at(c.array().as_ref(), row))
                    .collect::<EngineResult<_>>()?,
            );
        }

        let mut order: Vec<usize> = (0..all.num_rows()).collect();
        // Stable: ties keep arrival order.
        order.sort_by(|&a, &b| compare_key_rows(&key_rows[a], &key_rows[b], &self.keys));

        let batch_rows = self.core.context.config.execution.morsel_rows.max(1);
        for chunk in order.chunks(batch_rows) {
            let indices = Int32Array::from(chunk.iter().map(|&i| i as i32).collect::<Vec<i32>>());
            self.output.push_back(all.take(&indices)?);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.output.clear();
        if self.reserved_bytes > 0 {
            self.core.context.memory.shrink(self.reserved_bytes);
            self.reserved_bytes = 0;
        }
    }
}

impl PhysicalOperator for SortOperator {
    fn name(&self) -> &'static str {
        "Sort"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        format!("Sort(by=[{}])", describe_keys(&self.keys))
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
            if !self.sorted {
                self.sort_all()?;
                self.sorted = true;
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

// ============================================================================
// Fused top-k heap sort
// ============================================================================

struct HeapEntry {
    keys: Vec<ScalarValue>,
    /// Arrival ordinal; the stable tie-breaker.
    ordinal: u64,
    row: Vec<ScalarValue>,
    specs: Arc<Vec<SortKey>>,
}

impl HeapEntry {
    fn rank(&self, other: &Self) -> Ordering {
        compare_key_rows(&self.keys, &other.keys, &self.specs)
            .then(self.ordinal.cmp(&other.ordinal))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ordinal == other.ordinal
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: the worst row under the comparator sits on top.
        self.rank(other)
    }
}

pub struct TopKSortOperator {
    core: OperatorCore,
    input: Box<dyn PhysicalOperator>,
    keys: Arc<Vec<SortKey>>,
    k: usize,
    heap: BinaryHeap<HeapEntry>,
    next_ordinal: u64,
    output: VecDeque<Morsel>,
    drained: bool,
}

impl TopKSortOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        keys: Vec<SortKey>,
        k: usize,
        context: Arc<QueryContext>,
    ) -> TopKSortOperator {
        TopKSortOperator {
            core: OperatorCore::new("HeapSort", input.schema(), Some(k), context),
            input,
            keys: Arc::new(keys),
            k,
            heap: BinaryHeap::new(),
            next_ordinal: 0,
            output: VecDeque::new(),
            drained: false,
        }
    }

    fn consume(&mut self, morsel: &Morsel) -> EngineResult<()> {
        if self.k == 0 {
            return Ok(());
        }
        let key_columns = self
            .keys
            .iter()
            .map(|k| evaluate(&k.expr, morsel))
            .collect::<EngineResult<Vec<_>>>()?;
        for row in 0..morsel.num_rows() {
            let keys: Vec<ScalarValue> = key_columns
                .iter()
                .map(|c| scalar_at(c.array().as_ref(), row))
                .collect::<EngineResult<_>>()?;
            let entry = HeapEntry {
                keys,
                ordinal: self.next_ordinal,
                row: (0..morsel.num_columns())
                    .map(|c| scalar_at(morsel.column(c).array().as_ref(), row))
                    .collect::<EngineResult<_>>()?,
                specs: self.keys.clone(),
            };
            self.next_ordinal += 1;

            if self.heap.len() < self.k {
                self.heap.push(entry);
            } else if let Some(worst) = self.heap.peek() {
                if entry.rank(worst) == Ordering::Less {
                    self.heap.pop();
                    self.heap.push(entry);
                }
            }
        }
        Ok(())
    }

    /// Drain the heap into sorted output morsels.
    fn emit(&mut self) -> EngineResult<()> {
        let mut entries: Vec<HeapEntry> = std::mem::take(&mut self.heap).into_vec();
        entries.sort_by(HeapEntry::rank);

        let schema = self.core.schema.clone();
        let batch_rows = self.core.context.config.execution.morsel_rows.max(1);
        for chunk in entries.chunks(batch_rows) {
            let mut columns: Vec<Vector> = Vec::with_capacity(schema.fields().len());
            for (i, field) in schema.fields().iter().enumerate() {
                let values: Vec<ScalarValue> = chunk.iter().map(|e| e.row[i].clone()).collect();
                columns.push(Vector::new(vector_from_scalars(
                    field.data_type(),
                    &values,
                )?));
            }
            self.output
                .push_back(Morsel::try_new(schema.clone(), columns)?);
        }
        Ok(())
    }
}

impl PhysicalOperator for TopKSortOperator {
    fn name(&self) -> &'static str {
        "HeapSort"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        format!("HeapSort(k={}, by=[{}])", self.k, describe_keys(&self.keys))
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
            if !self.drained {
                while let Some(morsel) = self.input.next()? {
                    self.core.context.checkpoint()?;
                    self.consume(&morsel)?;
                }
                self.emit()?;
                self.drained = true;
            }
            match self.output.pop_front() {
                Some(morsel) => Ok(Some(morsel)),
                None => Ok(None),
            }
        })();
        self.core.end_next(started, result)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.heap.clear();
        self.output.clear();
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
    use crate::expression::Expression;
    use crate::morsel::schema_from_fields;
    use arrow::array::{Array, ArrayRef, Int64Array, StringArray};
    use arrow::datatypes::DataType;

    fn source() -> (SchemaRef, Vec<Morsel>) {
        let schema = schema_from_fields(vec![
            ("name".to_string(), DataType::Utf8, false),
            ("size".to_string(), DataType::Int64, true),
        ]);
        let make = |names: Vec<&str>, sizes: Vec<Option<i64>>| {
            Morsel::try_new(
                schema.clone(),
                vec![
                    Vector::new(Arc::new(StringArray::from(names)) as ArrayRef),
                    Vector::new(Arc::new(Int64Array::from(sizes)) as ArrayRef),
                ],
            )
            .expect("morsel")
        };
        (
            schema.clone(),
            vec![
                make(vec!["a", "b", "c"], vec![Some(5), Some(9), None]),
                make(vec!["d", "e"], vec![Some(7), Some(9)]),
            ],
        )
    }

    fn key(ascending: bool) -> SortKey {
        SortKey {
            expr: Expression::column("size", 1),
            ascending,
            nulls_first: false,
        }
    }

    fn names_of(morsels: &[Morsel]) -> Vec<String> {
        morsels
            .iter()
            .flat_map(|m| {
                let strings = m
                    .column(0)
                    .array()
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .expect("utf8")
                    .clone();
                (0..strings.len())
                    .map(move |i| strings.value(i).to_string())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_full_sort_stable_desc() {
        let (schema, morsels) = source();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let mut sort = SortOperator::new(input, vec![key(false)], None, ctx);
        sort.open().expect("open");
        let mut out = Vec::new();
        while let Some(m) = sort.next().expect("next") {
            out.push(m);
        }
        // DESC, nulls last: 9(b), 9(e), 7, 5, null.
        // b arrives before e, stable on the tie.
        assert_eq!(names_of(&out), vec!["b", "e", "d", "a", "c"]);
        sort.close().expect("close");
    }

    #[test]
    fn test_topk_matches_full_sort_prefix() {
        let (schema, morsels) = source();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let mut topk = TopKSortOperator::new(input, vec![key(false)], 3, ctx);
        topk.open().expect("open");
        let mut out = Vec::new();
        while let Some(m) = topk.next().expect("next") {
            out.push(m);
        }
        assert_eq!(names_of(&out), vec!["b", "e", "d"]);
        topk.close().expect("close");
    }

    #[test]
    fn test_topk_zero() {
        let (schema, morsels) = source();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let mut topk = TopKSortOperator::new(input, vec![key(true)], 0, ctx);
        topk.open().expect("open");
        assert!(topk.next().expect("next").is_none());
    }

    #[test]
    fn test_asc_nulls_last_default() {
        let (schema, morsels) = source();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let mut sort = SortOperator::new(
            input,
            vec![SortKey {
                expr: Expression::column("size", 1),
                ascending: true,
                nulls_first: false,
            }],
            None,
            ctx,
        );
        sort.open().expect("open");
        let mut out = Vec::new();
        while let Some(m) = sort.next().expect("next") {
            out.push(m);
        }
        assert_eq!(names_of(&out), vec!["a", "d", "b", "e", "c"]);
        sort.close().expect("close");
    }
}
