//! Lowering the optimized logical plan into physical operators.
//!
//! The DAG shape is preserved one-to-one; each node picks a concrete
//! algorithm and the choice is recorded in the operator's EXPLAIN
//! description. Joins take the hash path when an equality key exists
//! and both sides are (estimated) large; a side at or below the nested
//! loop threshold, or the absence of equi keys, selects the nested loop
//! algorithm. The build side is the left child — the optimizer has
//! already arranged for it to be the smaller input.

use std::sync::Arc;

use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::plan::{JoinKind, LogicalPlan, NodeId, NodeKind, SetOpKind};

use super::aggregate::HashAggregateOperator;
use super::distinct::DistinctOperator;
use super::filter::FilterOperator;
use super::hash_join::HashJoinOperator;
use super::limit::{LimitOperator, OffsetOperator};
use super::nested_loop_join::NestedLoopJoinOperator;
use super::project::ProjectOperator;
use super::scan::ScanOperator;
use super::set_ops::{HashSetOpOperator, UnionAllOperator};
use super::sort::{SortOperator, TopKSortOperator};
use super::unnest::UnnestOperator;
use super::PhysicalOperator;

/// Build the physical operator tree for `plan`.
pub fn build_physical(
    plan: &LogicalPlan,
    context: &Arc<QueryContext>,
) -> EngineResult<Box<dyn PhysicalOperator>> {
    build_node(plan, plan.root(), context)
}

#[allow(clippy::too_many_lines)]
fn build_node(
    plan: &LogicalPlan,
    node: NodeId,
    context: &Arc<QueryContext>,
) -> EngineResult<Box<dyn PhysicalOperator>> {
    let logical = plan.node(node);
    let schema = logical.schema.clone();
    let estimated = logical.estimated_rows;

    let operator: Box<dyn PhysicalOperator> = match &logical.kind {
        NodeKind::Scan {
            relation,
            connector,
            base_schema,
            projection,
            filters,
            limit,
            temporal,
            capabilities,
        } => {
            let handle = context.connector(connector)?;
            let units = handle.list_units(relation, temporal.as_ref())?;
            Box::new(ScanOperator::new(
                relation.clone(),
                handle,
                units,
                base_schema.fields().len(),
                projection.clone(),
                filters.clone(),
                *limit,
                *temporal,
                *capabilities,
                schema,
                estimated,
                context.clone(),
            )?)
        }
        NodeKind::Filter { predicate } => {
            let input = build_node(plan, logical.children[0], context)?;
            Box::new(FilterOperator::new(
                input,
                predicate.clone(),
                estimated,
                context.clone(),
            ))
        }
        NodeKind::Project { exprs, .. } => {
            let input = build_node(plan, logical.children[0], context)?;
            Box::new(ProjectOperator::new(
                input,
                exprs.clone(),
                schema,
                estimated,
                context.clone(),
            ))
        }
        NodeKind::Join { kind, on, filter } => {
            let left_estimate = plan.node(logical.children[0]).estimated_rows;
            let right_estimate = plan.node(logical.children[1]).estimated_rows;
            let left = build_node(plan, logical.children[0], context)?;
            let right = build_node(plan, logical.children[1], context)?;

            let threshold = context.config.execution.joins.nested_loop_threshold;
            let tiny_side = [left_estimate, right_estimate]
                .iter()
                .flatten()
                .any(|&rows| rows <= threshold);
            let use_nested_loop = on.is_empty()
                || *kind == JoinKind::Cross
                || (tiny_side && *kind != JoinKind::FullOuter);

            if use_nested_loop {
                Box::new(NestedLoopJoinOperator::new(
                    left,
                    right,
                    *kind,
                    on.clone(),
                    filter.clone(),
                    schema,
                    estimated,
                    context.clone(),
                )?)
            } else {
                Box::new(HashJoinOperator::new(
                    left,
                    right,
                    *kind,
                    on.clone(),
                    filter.clone(),
                    schema,
                    estimated,
                    context.clone(),
                )?)
            }
        }
        NodeKind::Aggregate {
            group_by,
            aggregates,
            ..
        } => {
            let input = build_node(plan, logical.children[0], context)?;
            Box::new(HashAggregateOperator::new(
                input,
                group_by.clone(),
                aggregates.clone(),
                schema,
                estimated,
                context.clone(),
            ))
        }
        NodeKind::Sort { keys, fetch } => {
            let input = build_node(plan, logical.children[0], context)?;
            match fetch {
                Some(k) => Box::new(TopKSortOperator::new(
                    input,
                    keys.clone(),
                    *k,
                    context.clone(),
                )),
                None => Box::new(SortOperator::new(
                    input,
                    keys.clone(),
                    estimated,
                    context.clone(),
                )),
            }
        }
        NodeKind::Limit { limit } => {
            let input = build_node(plan, logical.children[0], context)?;
            Box::new(LimitOperator::new(input, *limit, context.clone()))
        }
        NodeKind::Offset { offset } => {
            let input = build_node(plan, logical.children[0], context)?;
            Box::new(OffsetOperator::new(input, *offset, context.clone()))
        }
        NodeKind::Distinct => {
            let input = build_node(plan, logical.children[0], context)?;
            Box::new(DistinctOperator::new(input, estimated, context.clone()))
        }
        NodeKind::SetOp { op, all } => {
            let left = build_node(plan, logical.children[0], context)?;
            let right = build_node(plan, logical.children[1], context)?;
            match (op, all) {
                (SetOpKind::Union, true) => Box::new(UnionAllOperator::new(
                    vec![left, right],
                    schema,
                    estimated,
                    context.clone(),
                )),
                (SetOpKind::Union, false) => {
                    // UNION = Distinct over the concatenation.
                    let concat = Box::new(UnionAllOperator::new(
                        vec![left, right],
                        schema,
                        estimated,
                        context.clone(),
                    ));
                    Box::new(DistinctOperator::new(concat, estimated, context.clone()))
                }
                (kind, false) => Box::new(HashSetOpOperator::new(
                    left,
                    right,
                    *kind,
                    schema,
                    estimated,
                    context.clone(),
                )?),
                (kind, true) => {
                    return Err(EngineError::Unsupported(format!("{} ALL", kind.label())))
                }
            }
        }
        // Logical bookkeeping nodes: no physical counterpart.
        NodeKind::SubqueryAlias { .. } | NodeKind::Cte { .. } => {
            build_node(plan, logical.children[0], context)?
        }
        NodeKind::Unnest {
            column,
            alias,
            outer,
            distinct,
        } => {
            let input = build_node(plan, logical.children[0], context)?;
            Box::new(UnnestOperator::new(
                input,
                *column,
                alias.clone(),
                *outer,
                *distinct,
                schema,
                estimated,
                context.clone(),
            ))
        }
        NodeKind::Explain { .. } => {
            return Err(EngineError::Internal(
                "EXPLAIN nodes are handled before physical planning".into(),
            ))
        }
    };
    Ok(operator)
}
