//! Projection pushdown.
//!
//! One top-down pass computes, for every node, the set of output
//! columns its ancestors actually read, and annotates each scan with
//! the minimal base-column set. Schema-preserving operators between a
//! shrunken scan and the next schema-defining operator (Project,
//! Aggregate) have their expressions remapped on the way back up.

use std::collections::{BTreeSet, HashMap};

use arrow::datatypes::{Field, Schema, SchemaRef};
use std::sync::Arc;

use super::RewriteStrategy;
use crate::error::{EngineError, EngineResult};
use crate::expression::{Expression, SortKey};
use crate::plan::{join_schema, LogicalPlan, NodeId, NodeKind};

pub struct ProjectionPushdown;

impl RewriteStrategy for ProjectionPushdown {
    fn name(&self) -> &'static str {
        "projection_pushdown"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        // Whole-plan pass, rooted once.
        if node != plan.root() {
            return Ok(false);
        }
        let all: BTreeSet<usize> = (0..plan.node(node).schema.fields().len()).collect();
        let mut mutated = false;
        push(plan, node, &all, &mut mutated)?;
        Ok(mutated)
    }
}

/// Mapping from a shrunken child: `retained[new] = old`.
type Mapping = Option<Vec<usize>>;

fn mapping_table(mapping: &[usize]) -> HashMap<usize, usize> {
    mapping
        .iter()
        .enumerate()
        .map(|(new, &old)| (old, new))
        .collect()
}

fn remap(expr: Expression, mapping: &[usize]) -> Expression {
    expr.remap_columns(&mapping_table(mapping))
}

#[allow(clippy::too_many_lines)]
fn push(
    plan: &mut LogicalPlan,
    node: NodeId,
    required: &BTreeSet<usize>,
    mutated: &mut bool,
) -> EngineResult<Mapping> {
    let kind = plan.node(node).kind.clone();
    match kind {
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
            if projection.is_some() {
                return Ok(None);
            }
            let width = plan.node(node).schema.fields().len();
            let mut retained: Vec<usize> = required.iter().copied().collect();
            if retained.is_empty() {
                // Keep one column so row counts survive (COUNT(*)).
                retained.push(0);
            }
            if retained.len() == width {
                return Ok(None);
            }
            let fields: Vec<Field> = retained
                .iter()
                .map(|&i| base_schema.field(i).clone())
                .collect();
            let schema: SchemaRef = Arc::new(Schema::new(fields));
            let node_ref = plan.node_mut(node);
            node_ref.kind = NodeKind::Scan {
                relation,
                connector,
                base_schema,
                projection: Some(retained.clone()),
                filters,
                limit,
                temporal,
                capabilities,
            };
            node_ref.schema = schema;
            *mutated = true;
            Ok(Some(retained))
        }
        NodeKind::Filter { predicate } => {
            let mut child_req = required.clone();
            child_req.extend(predicate.referenced_columns());
            let child = plan.node(node).children[0];
            let mapping = push(plan, child, &child_req, mutated)?;
            if let Some(mapping) = &mapping {
                let child_schema = plan.node(child).schema.clone();
                let node_ref = plan.node_mut(node);
                node_ref.kind = NodeKind::Filter {
                    predicate: remap(predicate, mapping),
                };
                node_ref.schema = child_schema;
            }
            Ok(mapping)
        }
        NodeKind::Sort { keys, fetch } => {
            let mut child_req = required.clone();
            for key in &keys {
                child_req.extend(key.expr.referenced_columns());
            }
            let child = plan.node(node).children[0];
            let mapping = push(plan, child, &child_req, mutated)?;
            if let Some(mapping) = &mapping {
                let remapped: Vec<SortKey> = keys
                    .into_iter()
                    .map(|k| SortKey {
                        expr: remap(k.expr, mapping),
                        ascending: k.ascending,
                        nulls_first: k.nulls_first,
                    })
                    .collect();
                let child_schema = plan.node(child).schema.clone();
                let node_ref = plan.node_mut(node);
                node_ref.kind = NodeKind::Sort {
                    keys: remapped,
                    fetch,
                };
                node_ref.schema = child_schema;
            }
            Ok(mapping)
        }
        NodeKind::Project { exprs, names } => {
            let mut child_req = BTreeSet::new();
            for expr in &exprs {
                child_req.extend(expr.referenced_columns());
            }
            let child = plan.node(node).children[0];
            let mapping = push(plan, child, &child_req, mutated)?;
            if let Some(mapping) = &mapping {
                let remapped: Vec<Expression> =
                    exprs.into_iter().map(|e| remap(e, mapping)).collect();
                plan.node_mut(node).kind = NodeKind::Project {
                    exprs: remapped,
                    names,
                };
            }
            Ok(None)
        }
        NodeKind::Aggregate {
            group_by,
            aggregates,
            names,
        } => {
            let mut child_req = BTreeSet::new();
            for expr in &group_by {
                child_req.extend(expr.referenced_columns());
            }
            for agg in &aggregates {
                if let Some(arg) = &agg.arg {
                    child_req.extend(arg.referenced_columns());
                }
                for key in &agg.order_by {
                    child_req.extend(key.expr.referenced_columns());
                }
            }
            let child = plan.node(node).children[0];
            let mapping = push(plan, child, &child_req, mutated)?;
            if let Some(mapping) = &mapping {
                let group_by: Vec<Expression> =
                    group_by.into_iter().map(|e| remap(e, mapping)).collect();
                let aggregates = aggregates
                    .into_iter()
                    .map(|mut agg| {
                        agg.arg = agg.arg.map(|a| Box::new(remap(*a, mapping)));
                        agg.order_by = agg
                            .order_by
                            .into_iter()
                            .map(|k| SortKey {
                                expr: remap(k.expr, mapping),
                                ascending: k.ascending,
                                nulls_first: k.nulls_first,
                            })
                            .collect();
                        agg
                    })
                    .collect();
                plan.node_mut(node).kind = NodeKind::Aggregate {
                    group_by,
                    aggregates,
                    names,
                };
            }
            Ok(None)
        }
        NodeKind::Join { kind, on, filter } => {
            let left = plan.node(node).children[0];
            let right = plan.node(node).children[1];
            let left_old_len = plan.node(left).schema.fields().len();
            let right_old_len = plan.node(right).schema.fields().len();

            let mut left_req: BTreeSet<usize> = required
                .iter()
                .copied()
                .filter(|&c| c < left_old_len)
                .collect();
            let mut right_req: BTreeSet<usize> = required
                .iter()
                .copied()
                .filter(|&c| c >= left_old_len)
                .map(|c| c - left_old_len)
                .collect();
            for (l, r) in &on {
                left_req.extend(l.referenced_columns());
                right_req.extend(r.referenced_columns());
            }
            if let Some(f) = &filter {
                for c in f.referenced_columns() {
                    if c < left_old_len {
                        left_req.insert(c);
                    } else {
                        right_req.insert(c - left_old_len);
                    }
                }
            }

            let ml = push(plan, left, &left_req, mutated)?;
            let mr = push(plan, right, &right_req, mutated)?;
            if ml.is_none() && mr.is_none() {
                return Ok(None);
            }
            let left_map = ml.unwrap_or_else(|| (0..left_old_len).collect());
            let right_map = mr.unwrap_or_else(|| (0..right_old_len).collect());

            let left_new_len = left_map.len();
            let on: Vec<(Expression, Expression)> = on
                .into_iter()
                .map(|(l, r)| (remap(l, &left_map), remap(r, &right_map)))
                .collect();
            let filter = filter.map(|f| {
                let left_table = mapping_table(&left_map);
                let right_table = mapping_table(&right_map);
                f.transform(&mut |e| match e {
                    Expression::Column { name, index } => {
                        let index = if index < left_old_len {
                            left_table.get(&index).copied().unwrap_or(index)
                        } else {
                            right_table
                                .get(&(index - left_old_len))
                                .map_or(index, |&n| n + left_new_len)
                        };
                        Expression::Column { name, index }
                    }
                    other => other,
                })
            });

            let left_schema = plan.node(left).schema.clone();
            let right_schema = plan.node(right).schema.clone();
            let schema = join_schema(kind, &left_schema, &right_schema);
            let node_ref = plan.node_mut(node);
            node_ref.kind = NodeKind::Join { kind, on, filter };
            node_ref.schema = schema;

            // Combined mapping for ancestors, in the old output space.
            if kind.left_only() {
                return Ok(Some(left_map));
            }
            let mut combined = left_map;
            combined.extend(right_map.iter().map(|&old| old + left_old_len));
            Ok(Some(combined))
        }
        NodeKind::Unnest {
            column,
            alias,
            outer,
            distinct,
        } => {
            let child = plan.node(node).children[0];
            let child_old_len = plan.node(child).schema.fields().len();
            let mut child_req: BTreeSet<usize> = required
                .iter()
                .copied()
                .filter(|&c| c < child_old_len)
                .collect();
            child_req.insert(column);
            let mapping = push(plan, child, &child_req, mutated)?;
            let Some(mapping) = mapping else {
                return Ok(None);
            };
            let table = mapping_table(&mapping);
            let new_column = *table
                .get(&column)
                .ok_or_else(|| EngineError::Internal("unnest column pruned away".into()))?;
            let child_schema = plan.node(child).schema.clone();
            let mut fields: Vec<Field> = child_schema
                .fields()
                .iter()
                .map(|f| f.as_ref().clone())
                .collect();
            let element = plan.node(node).schema.clone();
            fields.push(element.field(element.fields().len() - 1).clone());
            let schema: SchemaRef = Arc::new(Schema::new(fields));
            let node_ref = plan.node_mut(node);
            node_ref.kind = NodeKind::Unnest {
                column: new_column,
                alias,
                outer,
                distinct,
            };
            node_ref.schema = schema;
            let mut combined = mapping;
            combined.push(child_old_len);
            Ok(Some(combined))
        }
        NodeKind::Distinct | NodeKind::SetOp { .. } => {
            // Row-equality operators need every column of their inputs.
            for slot in 0..plan.node(node).children.len() {
                let child = plan.node(node).children[slot];
                let full: BTreeSet<usize> = (0..plan.node(child).schema.fields().len()).collect();
                push(plan, child, &full, mutated)?;
            }
            Ok(None)
        }
        NodeKind::Limit { .. }
        | NodeKind::Offset { .. }
        | NodeKind::SubqueryAlias { .. }
        | NodeKind::Cte { .. } => {
            let child = plan.node(node).children[0];
            let mapping = push(plan, child, required, mutated)?;
            if mapping.is_some() {
                let child_schema = plan.node(child).schema.clone();
                plan.node_mut(node).schema = child_schema;
            }
            Ok(mapping)
        }
        NodeKind::Explain { .. } => {
            let child = plan.node(node).children[0];
            let full: BTreeSet<usize> = (0..plan.node(child).schema.fields().len()).collect();
            push(plan, child, &full, mutated)?;
            Ok(None)
        }
    }
}
