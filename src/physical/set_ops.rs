//! Set operations: UNION ALL, INTERSECT, EXCEPT.
//!
//! Columns match positionally. UNION ALL is a plain concatenation of
//! streams, preserving the first argument's order; distinct UNION is
//! lowered as Distinct over the concatenation. INTERSECT and EXCEPT
//! hash the right side's keyset once, then stream the left side with
//! set semantics (output deduplicated, NULLs comparing equal).

use std::sync::Arc;
use std::time::Duration;

use arrow::array::Int32Array;
use arrow::datatypes::SchemaRef;

use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::hashing::{FlatHashMap, FlatHashSet};
use crate::morsel::{concat_morsels, Morsel};
use crate::plan::SetOpKind;
use crate::vector::{hashing, kernels, Vector};

use super::{OperatorCore, PhysicalOperator};

// ============================================================================
// UNION ALL
// ============================================================================

pub struct UnionAllOperator {
    core: OperatorCore,
    inputs: Vec<Box<dyn PhysicalOperator>>,
    cursor: usize,
}

impl UnionAllOperator {
    pub fn new(
        inputs: Vec<Box<dyn PhysicalOperator>>,
        schema: SchemaRef,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> UnionAllOperator {
        UnionAllOperator {
            core: OperatorCore::new("UnionAll", schema, estimated_rows, context),
            inputs,
            cursor: 0,
        }
    }
}

impl PhysicalOperator for UnionAllOperator {
    fn name(&self) -> &'static str {
        "UnionAll"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        format!("UnionAll({} inputs)", self.inputs.len())
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        self.inputs.iter().map(AsRef::as_ref).collect()
    }

    fn open(&mut self) -> EngineResult<()> {
        self.core.open()?;
        for input in &mut self.inputs {
            input.open()?;
        }
        Ok(())
    }

    fn next(&mut self) -> EngineResult<Option<Morsel>> {
        let started = self.core.begin_next()?;
        let result = loop {
            if self.cursor >= self.inputs.len() {
                break Ok(None);
            }
            match self.inputs[self.cursor].next() {
                Err(e) => break Err(e),
                Ok(Some(morsel)) => {
                    // Positional compatibility was checked at plan time;
                    // re-badge under the set operation's schema.
                    let morsel =
                        Morsel::try_new(self.core.schema.clone(), morsel.columns().to_vec())?;
                    break Ok(Some(morsel));
                }
                Ok(None) => self.cursor += 1,
            }
        };
        self.core.end_next(started, result)
    }

    fn close(&mut self) -> EngineResult<()> {
        for input in &mut self.inputs {
            input.close()?;
        }
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
// INTERSECT / EXCEPT
// ============================================================================

struct SideIndex {
    set: FlatHashSet,
    map: FlatHashMap,
    rows: Morsel,
}

impl SideIndex {
    fn build(rows: Morsel) -> EngineResult<SideIndex> {
        let hashes = hashing::hash_rows(rows.columns())?;
        let mut set = FlatHashSet::with_capacity(rows.num_rows());
        let mut map = FlatHashMap::with_capacity(rows.num_rows());
        for (row, &hash) in hashes.iter().enumerate() {
            set.insert(hash);
            map.insert(hash, row as i64);
        }
        Ok(SideIndex { set, map, rows })
    }

    /// Verified membership: the hash gate first, raw tuples decide.
    fn contains(&self, columns: &[Vector], row: usize, hash: u64) -> EngineResult<bool> {
        if !self.set.contains(hash) {
            return Ok(false);
        }
        for &candidate in self.map.get(hash) {
            if kernels::rows_equal(
                self.rows.columns(),
                candidate as usize,
                columns,
                row,
                kernels::NullEquality::NullsEqual,
            )? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn memory_size(&self) -> usize {
        self.rows.memory_size() + self.set.memory_size() + self.map.memory_size()
    }
}

pub struct HashSetOpOperator {
    core: OperatorCore,
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    kind: SetOpKind,
    right_index: Option<SideIndex>,
    /// Dedup of emitted rows (set semantics).
    emitted: Option<SideIndexBuilder>,
    reserved_bytes: usize,
}

/// Growable variant of [`SideIndex`] for the emitted-row dedup.
struct SideIndexBuilder {
    set: FlatHashSet,
    map: FlatHashMap,
    kept: Vec<Vec<Vector>>,
    offsets: Vec<usize>,
    total: usize,
}

impl SideIndexBuilder {
    fn new() -> SideIndexBuilder {
        SideIndexBuilder {
            set: FlatHashSet::new(),
            map: FlatHashMap::new(),
            kept: Vec::new(),
            offsets: vec![0],
            total: 0,
        }
    }

    fn contains(&self, columns: &[Vector], row: usize, hash: u64) -> EngineResult<bool> {
        if !self.set.contains(hash) {
            return Ok(false);
        }
        for &candidate in self.map.get(hash) {
            let global = candidate as usize;
            let chunk = match self.offsets.binary_search(&global) {
                Ok(i) => i,
                Err(i) => i - 1,
            };
            let local = global - self.offsets[chunk];
            if kernels::rows_equal(
                &self.kept[chunk],
                local,
                columns,
                row,
                kernels::NullEquality::NullsEqual,
            )? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn register(&mut self, morsel: &Morsel, rows: &[i32], hashes: &[u64]) {
        for (position, &row) in rows.iter().enumerate() {
            let hash = hashes[row as usize];
            self.set.insert(hash);
            self.map.insert(hash, (self.total + position) as i64);
        }
        self.total += rows.len();
        self.offsets.push(self.total);
        self.kept.push(morsel.columns().to_vec());
    }
}

impl HashSetOpOperator {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        kind: SetOpKind,
        schema: SchemaRef,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> EngineResult<HashSetOpOperator> {
        if kind == SetOpKind::Union {
            return Err(EngineError::Internal(
                "UNION lowers to concatenation, not set algebra".into(),
            ));
        }
        Ok(HashSetOpOperator {
            core: OperatorCore::new("HashSetOp", schema, estimated_rows, context),
            left,
            right,
            kind,
            right_index: None,
            emitted: None,
            reserved_bytes: 0,
        })
    }

    fn build_right(&mut self) -> EngineResult<()> {
        let mut morsels = Vec::new();
        while let Some(morsel) = self.right.next()? {
            morsels.push(morsel);
        }
        let schema = self.right.schema();
        let rows = concat_morsels(&schema, &morsels)?;
        let index = SideIndex::build(rows)?;
        self.reserved_bytes = index.memory_size();
        self.core.context.memory.grow(self.reserved_bytes)?;
        self.right_index = Some(index);
        self.emitted = Some(SideIndexBuilder::new());
        Ok(())
    }

    fn process(&mut self, morsel: &Morsel) -> EngineResult<Option<Morsel>> {
        let hashes = hashing::hash_rows(morsel.columns())?;
        let right = self
            .right_index
            .as_ref()
            .ok_or_else(|| EngineError::Internal("probe before build".into()))?;
        let emitted = self
            .emitted
            .as_mut()
            .ok_or_else(|| EngineError::Internal("probe before build".into()))?;

        let mut keep: Vec<i32> = Vec::new();
        for row in 0..morsel.num_rows() {
            let in_right = right.contains(morsel.columns(), row, hashes[row])?;
            let selected = match self.kind {
                SetOpKind::Intersect => in_right,
                SetOpKind::Except => !in_right,
                SetOpKind::Union => false,
            };
            if !selected {
                continue;
            }
            // Set semantics: emit each distinct tuple once.
            if emitted.contains(morsel.columns(), row, hashes[row])? {
                continue;
            }
            let mut duplicate_in_batch = false;
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
                    duplicate_in_batch = true;
                    break;
                }
            }
            if !duplicate_in_batch {
                keep.push(row as i32);
            }
        }

        if keep.is_empty() {
            return Ok(None);
        }
        let kept = morsel.take(&Int32Array::from(keep))?;
        let kept = Morsel::try_new(self.core.schema.clone(), kept.columns().to_vec())?;
        let kept_rows: Vec<i32> = (0..kept.num_rows() as i32).collect();
        let kept_hashes = hashing::hash_rows(kept.columns())?;
        emitted.register(&kept, &kept_rows, &kept_hashes);
        Ok(Some(kept))
    }

    fn release(&mut self) {
        self.right_index = None;
        self.emitted = None;
        if self.reserved_bytes > 0 {
            self.core.context.memory.shrink(self.reserved_bytes);
            self.reserved_bytes = 0;
        }
    }
}

impl PhysicalOperator for HashSetOpOperator {
    fn name(&self) -> &'static str {
        "HashSetOp"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        format!("HashSetOp[{}]", self.kind.label())
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }

    fn open(&mut self) -> EngineResult<()> {
        self.core.open()?;
        self.left.open()?;
        self.right.open()
    }

    fn next(&mut self) -> EngineResult<Option<Morsel>> {
        let started = self.core.begin_next()?;
        let result = (|| {
            if self.right_index.is_none() {
                self.build_right()?;
            }
            loop {
                match self.left.next()? {
                    None => {
                        self.release();
                        return Ok(None);
                    }
                    Some(morsel) => {
                        if let Some(kept) = self.process(&morsel)? {
                            return Ok(Some(kept));
                        }
                    }
                }
            }
        })();
        self.core.end_next(started, result)
    }

    fn close(&mut self) -> EngineResult<()> {
        self.release();
        self.left.close()?;
        self.right.close()?;
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

    fn side(values: Vec<i64>) -> (SchemaRef, Morsel) {
        let schema = schema_from_fields(vec![("x".to_string(), DataType::Int64, false)]);
        let morsel = Morsel::try_new(
            schema.clone(),
            vec![Vector::new(Arc::new(Int64Array::from(values)) as ArrayRef)],
        )
        .expect("morsel");
        (schema, morsel)
    }

    fn run_setop(kind: SetOpKind, left: Vec<i64>, right: Vec<i64>) -> Vec<i64> {
        let ctx = test_context();
        let (ls, lm) = side(left);
        let (rs, rm) = side(right);
        let mut op = HashSetOpOperator::new(
            Box::new(ValuesOperator::new(ls.clone(), vec![lm], ctx.clone())),
            Box::new(ValuesOperator::new(rs, vec![rm], ctx.clone())),
            kind,
            ls,
            None,
            ctx,
        )
        .expect("operator");
        op.open().expect("open");
        let mut out = Vec::new();
        while let Some(m) = op.next().expect("next") {
            let ints = m
                .column(0)
                .array()
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("i64")
                .clone();
            out.extend(ints.values().iter().copied());
        }
        op.close().expect("close");
        out
    }

    #[test]
    fn test_intersect() {
        assert_eq!(
            run_setop(SetOpKind::Intersect, vec![1, 2, 2, 3], vec![2, 3, 4]),
            vec![2, 3]
        );
    }

    #[test]
    fn test_except() {
        assert_eq!(
            run_setop(SetOpKind::Except, vec![1, 2, 2, 3], vec![2]),
            vec![1, 3]
        );
    }

    #[test]
    fn test_union_all_preserves_first_order() {
        let ctx = test_context();
        let (ls, lm) = side(vec![1, 2]);
        let (_, rm) = side(vec![3]);
        let mut op = UnionAllOperator::new(
            vec![
                Box::new(ValuesOperator::new(ls.clone(), vec![lm], ctx.clone())),
                Box::new(ValuesOperator::new(ls.clone(), vec![rm], ctx.clone())),
            ],
            ls,
            None,
            ctx,
        );
        op.open().expect("open");
        let mut out = Vec::new();
        while let Some(m) = op.next().expect("next") {
            let ints = m
                .column(0)
                .array()
                .as_any()
                .downcast_ref::<Int64Array>()
                .expect("i64")
                .clone();
            out.extend(ints.values().iter().copied());
        }
        assert_eq!(out, vec![1, 2, 3]);
    }
}
