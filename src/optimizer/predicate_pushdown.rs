//! Predicate pushdown.
//!
//! Filters move past projections and subquery aliases, into the side of
//! a join they reference, and finally into the scan itself when the
//! connector advertises filter pushdown — so the connector can reduce
//! the bytes read.

use std::collections::HashMap;

use super::RewriteStrategy;
use crate::error::EngineResult;
use crate::expression::Expression;
use crate::plan::{JoinKind, LogicalPlan, NodeId, NodeKind};

pub struct PredicatePushdown;

impl RewriteStrategy for PredicatePushdown {
    fn name(&self) -> &'static str {
        "predicate_pushdown"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        let NodeKind::Filter { predicate } = &plan.node(node).kind else {
            return Ok(false);
        };
        let predicate = predicate.clone();
        let child = plan.node(node).children[0];

        match plan.node(child).kind.clone() {
            NodeKind::Project { exprs, names } => {
                // Only move past pass-through column references.
                let mut mapping: HashMap<usize, usize> = HashMap::new();
                for index in predicate.referenced_columns() {
                    match exprs.get(index) {
                        Some(Expression::Column {
                            index: source_index,
                            ..
                        }) => {
                            mapping.insert(index, *source_index);
                        }
                        _ => return Ok(false),
                    }
                }
                let below = plan.node(child).children[0];
                let below_schema = plan.node(below).schema.clone();
                let below_estimate = plan.node(below).estimated_rows;
                let remapped = predicate.remap_columns(&mapping);
                let new_filter = plan.add_node(
                    NodeKind::Filter {
                        predicate: remapped,
                    },
                    vec![below],
                    below_schema,
                    below_estimate.map(|n| (n / 3).max(1)),
                );
                let project_schema = plan.node(child).schema.clone();
                let node_ref = plan.node_mut(node);
                node_ref.kind = NodeKind::Project { exprs, names };
                node_ref.children = vec![new_filter];
                node_ref.schema = project_schema;
                Ok(true)
            }
            NodeKind::SubqueryAlias { alias } => self.swap_through(
                plan,
                node,
                child,
                predicate,
                NodeKind::SubqueryAlias { alias },
            ),
            NodeKind::Cte { name } => {
                self.swap_through(plan, node, child, predicate, NodeKind::Cte { name })
            }
            NodeKind::Join { kind, .. } => {
                let left = plan.node(child).children[0];
                let left_len = plan.node(left).schema.fields().len();
                let columns = predicate.referenced_columns();
                if columns.is_empty() {
                    return Ok(false);
                }
                let all_left = columns.iter().all(|&c| c < left_len);
                let all_right = columns.iter().all(|&c| c >= left_len);

                let push_left = all_left
                    && matches!(
                        kind,
                        JoinKind::Inner
                            | JoinKind::Cross
                            | JoinKind::LeftOuter
                            | JoinKind::LeftSemi
                            | JoinKind::LeftAnti
                    );
                let push_right = all_right && matches!(kind, JoinKind::Inner | JoinKind::Cross);
                if !push_left && !push_right {
                    return Ok(false);
                }

                let (slot, shifted) = if push_left {
                    (0, predicate)
                } else {
                    (1, predicate.shift_columns(-(left_len as i64)))
                };
                let target = plan.node(child).children[slot];
                let target_schema = plan.node(target).schema.clone();
                let target_estimate = plan.node(target).estimated_rows;
                let new_filter = plan.add_node(
                    NodeKind::Filter { predicate: shifted },
                    vec![target],
                    target_schema,
                    target_estimate.map(|n| (n / 3).max(1)),
                );
                plan.set_child(child, slot, new_filter);
                // The original filter dissolves into the join.
                let join = plan.node(child).clone();
                *plan.node_mut(node) = join;
                Ok(true)
            }
            NodeKind::Scan {
                relation,
                connector,
                base_schema,
                projection,
                mut filters,
                limit,
                temporal,
                capabilities,
            } => {
                // Only connectors that interpret predicates take them.
                // Limit-annotated scans keep their filter above: the
                // limit would otherwise apply before the predicate.
                if limit.is_some() {
                    return Ok(false);
                }
                // The scan still exposes its base schema at this stage
                // (projection pushdown runs later), so indices line up.
                if projection.is_some() {
                    return Ok(false);
                }
                if !capabilities.filters {
                    return Ok(false);
                }
                filters.push(predicate);
                let scan_schema = plan.node(child).schema.clone();
                let scan_estimate = plan.node(child).estimated_rows;
                let node_ref = plan.node_mut(node);
                node_ref.kind = NodeKind::Scan {
                    relation,
                    connector,
                    base_schema,
                    projection,
                    filters,
                    limit,
                    temporal,
                    capabilities,
                };
                node_ref.children = vec![];
                node_ref.schema = scan_schema;
                node_ref.estimated_rows = scan_estimate.map(|n| (n / 3).max(1));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl PredicatePushdown {
    /// Swap a filter with a schema-preserving wrapper node.
    fn swap_through(
        &self,
        plan: &mut LogicalPlan,
        node: NodeId,
        child: NodeId,
        predicate: Expression,
        wrapper: NodeKind,
    ) -> EngineResult<bool> {
        let below = plan.node(child).children[0];
        let below_schema = plan.node(below).schema.clone();
        let below_estimate = plan.node(below).estimated_rows;
        let new_filter = plan.add_node(
            NodeKind::Filter { predicate },
            vec![below],
            below_schema,
            below_estimate.map(|n| (n / 3).max(1)),
        );
        let schema = plan.node(child).schema.clone();
        let node_ref = plan.node_mut(node);
        node_ref.kind = wrapper;
        node_ref.children = vec![new_filter];
        node_ref.schema = schema;
        Ok(true)
    }
}
