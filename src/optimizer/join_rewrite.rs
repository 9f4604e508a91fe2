//! Join optimization.
//!
//! Two rewrites:
//! - a `Filter` carrying cross-side equality conjuncts above a CROSS
//!   join turns the join into an INNER join on those keys;
//! - an INNER join whose right input is estimated smaller swaps its
//!   children so the smaller side is built (the build side is always
//!   the left child), restoring column order with a projection. Ties
//!   keep the syntactic left side.

use super::RewriteStrategy;
use crate::error::EngineResult;
use crate::expression::{BinaryOp, Expression};
use crate::plan::{join_schema, JoinKind, LogicalPlan, NodeId, NodeKind};

pub struct JoinRewrite;

impl RewriteStrategy for JoinRewrite {
    fn name(&self) -> &'static str {
        "join_rewrite"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        if cross_to_inner(plan, node)? {
            return Ok(true);
        }
        build_side_swap(plan, node)
    }
}

/// `Filter(a.x = b.y) over Join[CROSS]` becomes `Join[INNER] on x = y`.
fn cross_to_inner(plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
    let NodeKind::Filter { predicate } = &plan.node(node).kind else {
        return Ok(false);
    };
    let child = plan.node(node).children[0];
    let NodeKind::Join {
        kind: JoinKind::Cross,
        on,
        filter,
    } = &plan.node(child).kind
    else {
        return Ok(false);
    };
    debug_assert!(on.is_empty());
    let existing_filter = filter.clone();

    let left = plan.node(child).children[0];
    let left_len = plan.node(left).schema.fields().len();
    let right = plan.node(child).children[1];

    let mut pairs = Vec::new();
    let mut residual = Vec::new();
    for conjunct in predicate.clone().split_conjunction() {
        match equi_pair(&conjunct, left_len) {
            Some(pair) => pairs.push(pair),
            None => residual.push(conjunct),
        }
    }
    if pairs.is_empty() {
        return Ok(false);
    }

    let mut filters: Vec<Expression> = existing_filter.into_iter().collect();
    filters.extend(residual);
    let schema = plan.node(child).schema.clone();
    let estimate = plan
        .node(left)
        .estimated_rows
        .zip(plan.node(right).estimated_rows)
        .map(|(l, r)| l.max(r));
    let node_ref = plan.node_mut(node);
    node_ref.kind = NodeKind::Join {
        kind: JoinKind::Inner,
        on: pairs,
        filter: Expression::conjunction(filters),
    };
    node_ref.children = vec![left, right];
    node_ref.schema = schema;
    node_ref.estimated_rows = estimate;
    Ok(true)
}

fn equi_pair(conjunct: &Expression, left_len: usize) -> Option<(Expression, Expression)> {
    let Expression::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = conjunct
    else {
        return None;
    };
    let side = |e: &Expression| {
        let columns = e.referenced_columns();
        if columns.is_empty() {
            None
        } else if columns.iter().all(|&c| c < left_len) {
            Some(0)
        } else if columns.iter().all(|&c| c >= left_len) {
            Some(1)
        } else {
            None
        }
    };
    match (side(left), side(right)) {
        (Some(0), Some(1)) => Some((
            left.as_ref().clone(),
            right.as_ref().clone().shift_columns(-(left_len as i64)),
        )),
        (Some(1), Some(0)) => Some((
            right.as_ref().clone(),
            left.as_ref().clone().shift_columns(-(left_len as i64)),
        )),
        _ => None,
    }
}

/// Swap INNER join children when the right side is estimated smaller,
/// so the hash table is built over fewer rows.
fn build_side_swap(plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
    let NodeKind::Join {
        kind: JoinKind::Inner,
        on,
        filter,
    } = &plan.node(node).kind
    else {
        return Ok(false);
    };
    let left = plan.node(node).children[0];
    let right = plan.node(node).children[1];
    let (Some(left_rows), Some(right_rows)) = (
        plan.node(left).estimated_rows,
        plan.node(right).estimated_rows,
    ) else {
        return Ok(false);
    };
    // Strictly smaller: on a tie the syntactic left side is built.
    if right_rows >= left_rows {
        return Ok(false);
    }

    let on: Vec<(Expression, Expression)> =
        on.iter().map(|(l, r)| (r.clone(), l.clone())).collect();
    let left_len = plan.node(left).schema.fields().len();
    let right_len = plan.node(right).schema.fields().len();
    let filter = filter.clone().map(|f| {
        f.transform(&mut |e| match e {
            Expression::Column { name, index } => {
                let index = if index < left_len {
                    index + right_len
                } else {
                    index - left_len
                };
                Expression::Column { name, index }
            }
            other => other,
        })
    });

    let left_schema = plan.node(left).schema.clone();
    let right_schema = plan.node(right).schema.clone();
    let swapped_schema = join_schema(JoinKind::Inner, &right_schema, &left_schema);
    let estimate = plan.node(node).estimated_rows;
    let join = plan.add_node(
        NodeKind::Join {
            kind: JoinKind::Inner,
            on,
            filter,
        },
        vec![right, left],
        swapped_schema.clone(),
        estimate,
    );

    // Restore the original column order above the swapped join.
    let original_schema = plan.node(node).schema.clone();
    let mut exprs = Vec::with_capacity(left_len + right_len);
    let mut names = Vec::with_capacity(left_len + right_len);
    for i in 0..left_len {
        let name = swapped_schema.field(right_len + i).name().clone();
        exprs.push(Expression::column(name.clone(), right_len + i));
        names.push(name);
    }
    for i in 0..right_len {
        let name = swapped_schema.field(i).name().clone();
        exprs.push(Expression::column(name.clone(), i));
        names.push(name);
    }
    let node_ref = plan.node_mut(node);
    node_ref.kind = NodeKind::Project { exprs, names };
    node_ref.children = vec![join];
    node_ref.schema = original_schema;
    Ok(true)
}
