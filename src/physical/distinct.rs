//! Distinct operator.
//!
//! Streaming: each row is emitted the first time its tuple is seen.
//! A [`FlatHashSet`] gives the one-pass fast path — a freshly inserted
//! hash cannot have been seen before — and a [`FlatHashMap`] keeps the
//! kept-row ids per hash so colliding rows are verified by tuple
//! equality (NULLs compare equal for DISTINCT purposes).

use std::sync::Arc;
use std::time::Duration;

use arrow::array::Int32Array;
use arrow::datatypes::SchemaRef;

use crate::context::QueryContext;
use crate::error::EngineResult;
use crate::hashing::{FlatHashMap, FlatHashSet};
use crate::morsel::Morsel;
use crate::vector::{hashing, kernels, Vector};

use super::{OperatorCore, PhysicalOperator};

pub struct DistinctOperator {
    core: OperatorCore,
    input: Box<dyn PhysicalOperator>,
    set: FlatHashSet,
    /// hash -> kept global row ids, for collision verification.
    map: FlatHashMap,
    /// Kept rows, buffered for equality checks against later input.
    kept: Vec<Vec<Vector>>,
    kept_offsets: Vec<usize>,
    kept_rows: usize,
    reserved_bytes: usize,
}

impl DistinctOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> DistinctOperator {
        DistinctOperator {
            core: OperatorCore::new("Distinct", input.schema(), estimated_rows, context),
            input,
            set: FlatHashSet::new(),
            map: FlatHashMap::new(),
            kept: Vec::new(),
            kept_offsets: vec![0],
            kept_rows: 0,
            reserved_bytes: 0,
        }
    }

    fn locate(&self, global: usize) -> (usize, usize) {
        // kept_offsets is sorted; find the buffered morsel holding the row.
        let chunk = match self.kept_offsets.binary_search(&global) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (chunk, global - self.kept_offsets[chunk])
    }

    fn process(&mut self, morsel: &Morsel) -> EngineResult<Option<Morsel>> {
        let hashes = hashing::hash_rows(morsel.columns())?;

        // Fast path: hashes inserted fresh are definitely new tuples.
        let mut fresh: Vec<usize> = Vec::new();
        self.set.find_new_indices(&hashes, &mut fresh);
        let fresh_flags = {
            let mut flags = vec![false; morsel.num_rows()];
            for &i in &fresh {
                flags[i] = true;
            }
            flags
        };

        let mut keep: Vec<i32> = Vec::new();
        for row in 0..morsel.num_rows() {
            let is_new = if fresh_flags[row] {
                true
            } else {
                // The hash was seen: verify against every kept row with
                // the same hash, and against rows kept earlier in this
                // very morsel.
                let mut duplicate = false;
                for &candidate in self.map.get(hashes[row]) {
                    let (chunk, local) = self.locate(candidate as usize);
                    if kernels::rows_equal(
                        &self.kept[chunk],
                        local,
                        morsel.columns(),
                        row,
                        kernels::NullEquality::NullsEqual,
                    )? {
                        duplicate = true;
                        break;
                    }
                }
                if !duplicate {
                    for &earlier in &keep {
                        if hashes[earlier as usize] == hashes[row]
                            && kernels::rows_equal(
                                morsel.columns(),
                                earlier as usize,
                                morsel.columns(),
                                row,
                                kernels::NullEquality::NullsEqual,
                            )?
                        {
                            duplicate = true;
                            break;
                        }
                    }
                }
                !duplicate
            };
            if is_new {
                keep.push(row as i32);
            }
        }

        if keep.is_empty() {
            return Ok(None);
        }
        let kept = morsel.take(&Int32Array::from(keep.clone()))?;

        // Register the kept rows for future verification.
        for (position, &row) in keep.iter().enumerate() {
            self.map
                .insert(hashes[row as usize], (self.kept_rows + position) as i64);
        }
        self.kept_rows += kept.num_rows();
        self.kept_offsets.push(self.kept_rows);
        let bytes = kept.memory_size();
        self.core.context.memory.grow(bytes)?;
        self.reserved_bytes += bytes;
        self.kept.push(kept.columns().to_vec());

        Ok(Some(kept))
    }

    fn release(&mut self) {
        self.set = FlatHashSet::new();
        self.map = FlatHashMap::new();
        self.kept.clear();
        self.kept_offsets = vec![0];
        self.kept_rows = 0;
        if self.reserved_bytes > 0 {
            self.core.context.memory.shrink(self.reserved_bytes);
            self.reserved_bytes = 0;
        }
    }
}

impl PhysicalOperator for DistinctOperator {
    fn name(&self) -> &'static str {
        "Distinct"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        "Distinct".to_string()
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
                Ok(None) => {
                    self.release();
                    break Ok(None);
                }
                Ok(Some(morsel)) => match self.process(&morsel) {
                    Err(e) => break Err(e),
                    Ok(None) => {}
                    Ok(Some(kept)) => break Ok(Some(kept)),
                },
            }
        };
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
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::DataType;

    fn run_distinct(chunks: Vec<Vec<Option<i64>>>) -> usize {
        let schema = schema_from_fields(vec![("x".to_string(), DataType::Int64, true)]);
        let morsels: Vec<Morsel> = chunks
            .into_iter()
            .map(|values| {
                Morsel::try_new(
                    schema.clone(),
                    vec![Vector::new(Arc::new(Int64Array::from(values)) as ArrayRef)],
                )
                .expect("morsel")
            })
            .collect();
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, morsels, ctx.clone()));
        let mut distinct = DistinctOperator::new(input, None, ctx);
        distinct.open().expect("open");
        let mut total = 0;
        while let Some(m) = distinct.next().expect("next") {
            total += m.num_rows();
        }
        distinct.close().expect("close");
        total
    }

    #[test]
    fn test_duplicates_within_morsel() {
        assert_eq!(run_distinct(vec![vec![Some(1), Some(1), Some(2)]]), 2);
    }

    #[test]
    fn test_duplicates_across_morsels() {
        assert_eq!(
            run_distinct(vec![vec![Some(1), Some(2)], vec![Some(2), Some(3)]]),
            3
        );
    }

    #[test]
    fn test_nulls_compare_equal() {
        assert_eq!(run_distinct(vec![vec![None, None, Some(1)]]), 2);
    }

    #[test]
    fn test_first_occurrence_kept() {
        let schema = schema_from_fields(vec![("x".to_string(), DataType::Int64, false)]);
        let morsel = Morsel::try_new(
            schema.clone(),
            vec![Vector::new(
                Arc::new(Int64Array::from(vec![3, 1, 3, 2, 1])) as ArrayRef
            )],
        )
        .expect("morsel");
        let ctx = test_context();
        let input = Box::new(ValuesOperator::new(schema, vec![morsel], ctx.clone()));
        let mut distinct = DistinctOperator::new(input, None, ctx);
        distinct.open().expect("open");
        let out = distinct.next().expect("next").expect("some");
        let values = out
            .column(0)
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        assert_eq!(values.values().as_ref(), &[3, 1, 2]);
    }
}
