//! Nested loop join.
//!
//! Chosen when one side is very small or the condition is not a pure
//! equijoin; also executes CROSS joins. The right side is buffered
//! once; the left side streams, and the full predicate is evaluated per
//! (outer, inner) pair — vectorized one outer row at a time. Rows whose
//! join keys are NULL are filtered out of either side up front wherever
//! the join kind allows (they can never match).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{new_null_array, BooleanArray, Int32Array};
use arrow::compute::kernels::boolean::and_kleene;
use arrow::compute::not;
use arrow::datatypes::SchemaRef;

use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::expression::{evaluate_mask, BinaryOp, Expression};
use crate::morsel::{concat_morsels, Morsel};
use crate::plan::{join_schema, JoinKind};
use crate::vector::{kernels, Vector};

use super::{OperatorCore, PhysicalOperator};

pub struct NestedLoopJoinOperator {
    core: OperatorCore,
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    kind: JoinKind,
    /// Key expressions used only for the up-front null filtering.
    left_keys: Vec<Expression>,
    right_keys: Vec<Expression>,
    /// Full predicate over the combined row, equi keys included.
    predicate: Option<Expression>,
    inner: Option<Morsel>,
    inner_bytes: usize,
    buffered: bool,
    pending: VecDeque<Morsel>,
    outer_done: bool,
}

impl NestedLoopJoinOperator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        kind: JoinKind,
        on: Vec<(Expression, Expression)>,
        residual: Option<Expression>,
        schema: SchemaRef,
        estimated_rows: Option<usize>,
        context: Arc<QueryContext>,
    ) -> EngineResult<NestedLoopJoinOperator> {
        match kind {
            JoinKind::Inner
            | JoinKind::Cross
            | JoinKind::LeftOuter
            | JoinKind::LeftSemi
            | JoinKind::LeftAnti => {}
            other => {
                return Err(EngineError::Unsupported(format!(
                    "{} joins require an equality condition",
                    other.label()
                )))
            }
        }

        // Fold the equi pairs into the combined-row predicate.
        let left_len = left.schema().fields().len();
        let mut conjuncts: Vec<Expression> = on
            .iter()
            .map(|(l, r)| {
                Expression::binary(
                    BinaryOp::Eq,
                    l.clone(),
                    r.clone().shift_columns(left_len as i64),
                )
            })
            .collect();
        conjuncts.extend(residual);
        let predicate = Expression::conjunction(conjuncts);

        Ok(NestedLoopJoinOperator {
            core: OperatorCore::new("NestedLoopJoin", schema, estimated_rows, context),
            left,
            right,
            kind,
            left_keys: on.iter().map(|(l, _)| l.clone()).collect(),
            right_keys: on.iter().map(|(_, r)| r.clone()).collect(),
            predicate,
            inner: None,
            inner_bytes: 0,
            buffered: false,
            pending: VecDeque::new(),
            outer_done: false,
        })
    }

    /// Buffer the inner (right) side, dropping NULL-key rows when the
    /// join kind permits (they can never satisfy an equality).
    fn buffer_inner(&mut self) -> EngineResult<()> {
        let mut morsels = Vec::new();
        while let Some(morsel) = self.right.next()? {
            morsels.push(morsel);
        }
        let schema = self.right.schema();
        let mut inner = concat_morsels(&schema, &morsels)?;
        if !self.right_keys.is_empty() {
            inner = filter_null_keys(&inner, &self.right_keys)?;
        }
        self.inner_bytes = inner.memory_size();
        self.core.context.memory.grow(self.inner_bytes)?;
        self.inner = Some(inner);
        self.buffered = true;
        Ok(())
    }

    /// The schema used for combined predicate evaluation. Matches the
    /// output schema except for semi/anti joins, whose output is
    /// left-only.
    fn combined_schema(&self, outer: &Morsel, inner: &Morsel) -> SchemaRef {
        if self.kind.left_only() {
            join_schema(JoinKind::Inner, &outer.schema(), &inner.schema())
        } else {
            self.core.schema.clone()
        }
    }

    fn process_outer(&mut self, outer: &Morsel) -> EngineResult<()> {
        let inner = self
            .inner
            .clone()
            .ok_or_else(|| EngineError::Internal("probe before buffering".into()))?;
        let inner_rows = inner.num_rows();

        // Inner and semi joins can drop NULL-key outer rows up front;
        // outer and anti joins must keep them (they emit unmatched).
        let outer = if matches!(self.kind, JoinKind::Inner | JoinKind::LeftSemi)
            && !self.left_keys.is_empty()
        {
            filter_null_keys(outer, &self.left_keys)?
        } else {
            outer.clone()
        };

        let combined_schema = self.combined_schema(&outer, &inner);
        let mut kept_rows: Vec<i32> = Vec::new();

        for row in 0..outer.num_rows() {
            let survivors = if inner_rows == 0 {
                None
            } else {
                let indices = Int32Array::from(vec![row as i32; inner_rows]);
                let replicated = outer.take(&indices)?;
                let mut columns = replicated.columns().to_vec();
                columns.extend(inner.columns().iter().cloned());
                let combined = Morsel::try_new(combined_schema.clone(), columns)?;
                let kept = match &self.predicate {
                    None => combined,
                    Some(predicate) => {
                        let mask = kernels::normalize_mask(&evaluate_mask(predicate, &combined)?);
                        combined.filter(&mask)?
                    }
                };
                (kept.num_rows() > 0).then_some(kept)
            };
            let matched = survivors.is_some();

            match self.kind {
                JoinKind::Inner | JoinKind::Cross => {
                    if let Some(kept) = survivors {
                        self.pending.push_back(kept);
                    }
                }
                JoinKind::LeftOuter => {
                    if let Some(kept) = survivors {
                        self.pending.push_back(kept);
                    } else {
                        // Unmatched outer row with a null-filled inner side.
                        let one = outer.slice(row, 1);
                        let mut columns = one.columns().to_vec();
                        for field in inner.schema().fields() {
                            columns.push(Vector::new(new_null_array(field.data_type(), 1)));
                        }
                        self.pending
                            .push_back(Morsel::try_new(self.core.schema.clone(), columns)?);
                    }
                }
                JoinKind::LeftSemi => {
                    if matched {
                        kept_rows.push(row as i32);
                    }
                }
                JoinKind::LeftAnti => {
                    if !matched {
                        kept_rows.push(row as i32);
                    }
                }
                _ => {}
            }
        }

        if self.kind.left_only() && !kept_rows.is_empty() {
            self.pending
                .push_back(outer.take(&Int32Array::from(kept_rows))?);
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.inner.take().is_some() {
            self.core.context.memory.shrink(self.inner_bytes);
            self.inner_bytes = 0;
        }
        self.pending.clear();
    }
}

/// Keep the rows where every key expression evaluates non-null.
fn filter_null_keys(morsel: &Morsel, keys: &[Expression]) -> EngineResult<Morsel> {
    let mut mask: Option<BooleanArray> = None;
    for key in keys {
        let value = crate::expression::evaluate(key, morsel)?;
        let defined = not(&kernels::is_null(&value)?)?;
        mask = Some(match mask {
            None => defined,
            Some(prev) => and_kleene(&prev, &defined)?,
        });
    }
    match mask {
        Some(mask) => morsel.filter(&kernels::normalize_mask(&mask)),
        None => Ok(morsel.clone()),
    }
}

impl PhysicalOperator for NestedLoopJoinOperator {
    fn name(&self) -> &'static str {
        "NestedLoopJoin"
    }

    fn schema(&self) -> SchemaRef {
        self.core.schema.clone()
    }

    fn describe(&self) -> String {
        let mut s = format!("NestedLoopJoin[{}]", self.kind.label());
        if let Some(predicate) = &self.predicate {
            s.push_str(&format!(" filter={predicate}"));
        }
        s
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
            if !self.buffered {
                self.buffer_inner()?;
            }
            loop {
                if let Some(morsel) = self.pending.pop_front() {
                    if morsel.num_rows() > 0 {
                        return Ok(Some(morsel));
                    }
                    continue;
                }
                if self.outer_done {
                    self.release();
                    return Ok(None);
                }
                match self.left.next()? {
                    None => self.outer_done = true,
                    Some(outer) => self.process_outer(&outer)?,
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

    fn table(name: &str, values: Vec<Option<i64>>) -> (SchemaRef, Morsel) {
        let schema = schema_from_fields(vec![(name.to_string(), DataType::Int64, true)]);
        let morsel = Morsel::try_new(
            schema.clone(),
            vec![Vector::new(Arc::new(Int64Array::from(values)) as ArrayRef)],
        )
        .expect("morsel");
        (schema, morsel)
    }

    fn run(mut op: NestedLoopJoinOperator) -> usize {
        op.open().expect("open");
        let mut total = 0;
        while let Some(m) = op.next().expect("next") {
            total += m.num_rows();
        }
        op.close().expect("close");
        total
    }

    #[test]
    fn test_cross_join_cardinality() {
        let ctx = test_context();
        let (ls, lm) = table("a", vec![Some(1), Some(2), Some(3)]);
        let (rs, rm) = table("b", vec![Some(10), Some(20)]);
        let schema = join_schema(JoinKind::Cross, &ls, &rs);
        let op = NestedLoopJoinOperator::new(
            Box::new(ValuesOperator::new(ls, vec![lm], ctx.clone())),
            Box::new(ValuesOperator::new(rs, vec![rm], ctx.clone())),
            JoinKind::Cross,
            vec![],
            None,
            schema,
            None,
            ctx,
        )
        .expect("operator");
        assert_eq!(run(op), 6);
    }

    #[test]
    fn test_non_equi_predicate() {
        let ctx = test_context();
        let (ls, lm) = table("a", vec![Some(1), Some(5)]);
        let (rs, rm) = table("b", vec![Some(2), Some(4)]);
        let schema = join_schema(JoinKind::Inner, &ls, &rs);
        // a < b
        let predicate = Expression::binary(
            BinaryOp::Lt,
            Expression::column("a", 0),
            Expression::column("b", 1),
        );
        let op = NestedLoopJoinOperator::new(
            Box::new(ValuesOperator::new(ls, vec![lm], ctx.clone())),
            Box::new(ValuesOperator::new(rs, vec![rm], ctx.clone())),
            JoinKind::Inner,
            vec![],
            Some(predicate),
            schema,
            None,
            ctx,
        )
        .expect("operator");
        // (1,2), (1,4) match; 5 matches nothing.
        assert_eq!(run(op), 2);
    }

    #[test]
    fn test_null_keys_prefiltered() {
        let ctx = test_context();
        let (ls, lm) = table("a", vec![Some(1), None]);
        let (rs, rm) = table("b", vec![Some(1), None]);
        let schema = join_schema(JoinKind::Inner, &ls, &rs);
        let op = NestedLoopJoinOperator::new(
            Box::new(ValuesOperator::new(ls, vec![lm], ctx.clone())),
            Box::new(ValuesOperator::new(rs, vec![rm], ctx.clone())),
            JoinKind::Inner,
            vec![(Expression::column("a", 0), Expression::column("b", 0))],
            None,
            schema,
            None,
            ctx,
        )
        .expect("operator");
        assert_eq!(run(op), 1);
    }

    #[test]
    fn test_left_outer_emits_unmatched() {
        let ctx = test_context();
        let (ls, lm) = table("a", vec![Some(1), Some(9)]);
        let (rs, rm) = table("b", vec![Some(1)]);
        let schema = join_schema(JoinKind::LeftOuter, &ls, &rs);
        let op = NestedLoopJoinOperator::new(
            Box::new(ValuesOperator::new(ls, vec![lm], ctx.clone())),
            Box::new(ValuesOperator::new(rs, vec![rm], ctx.clone())),
            JoinKind::LeftOuter,
            vec![(Expression::column("a", 0), Expression::column("b", 0))],
            None,
            schema,
            None,
            ctx,
        )
        .expect("operator");
        assert_eq!(run(op), 2);
    }
}
