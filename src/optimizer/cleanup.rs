//! Cleanup pass.
//!
//! Runs last: combines adjacent filters back into one conjunction,
//! orders conjuncts so cheap comparisons run before expensive matchers,
//! folds constants a second time to absorb earlier rewrites, and drops
//! redundant identity projections.

use super::constant_folding;
use super::RewriteStrategy;
use crate::error::EngineResult;
use crate::expression::Expression;
use crate::plan::{LogicalPlan, NodeId, NodeKind};

pub struct Cleanup;

impl RewriteStrategy for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        if combine_adjacent_filters(plan, node)? {
            return Ok(true);
        }
        if order_predicates(plan, node)? {
            return Ok(true);
        }
        if refold(plan, node)? {
            return Ok(true);
        }
        remove_identity_projection(plan, node)
    }
}

/// `Filter(a) over Filter(b)` becomes `Filter(a AND b)`.
fn combine_adjacent_filters(plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
    let NodeKind::Filter { predicate } = &plan.node(node).kind else {
        return Ok(false);
    };
    let child = plan.node(node).children[0];
    let NodeKind::Filter {
        predicate: child_predicate,
    } = &plan.node(child).kind
    else {
        return Ok(false);
    };
    let combined = Expression::and(predicate.clone(), child_predicate.clone());
    let below = plan.node(child).children[0];
    let node_ref = plan.node_mut(node);
    node_ref.kind = NodeKind::Filter {
        predicate: combined,
    };
    node_ref.children = vec![below];
    Ok(true)
}

/// Order AND chains by estimated evaluation cost, cheap first.
fn order_predicates(plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
    let NodeKind::Filter { predicate } = &plan.node(node).kind else {
        return Ok(false);
    };
    let parts = predicate.clone().split_conjunction();
    if parts.len() < 2 {
        return Ok(false);
    }
    let mut ordered = parts.clone();
    ordered.sort_by_key(predicate_cost);
    if ordered == parts {
        return Ok(false);
    }
    let combined = Expression::conjunction(ordered).unwrap_or_else(|| predicate.clone());
    plan.node_mut(node).kind = NodeKind::Filter {
        predicate: combined,
    };
    Ok(true)
}

/// Relative cost rank: scalar comparisons, then IN lists, then pattern
/// matchers and function calls.
fn predicate_cost(expr: &Expression) -> u32 {
    match expr {
        Expression::Binary { .. } => 0,
        Expression::Unary { .. } => 0,
        Expression::InList { .. } => 1,
        Expression::Like { .. } => 2,
        Expression::Case { .. } | Expression::ScalarFn { .. } => 3,
        _ => 4,
    }
}

/// A second folding pass over the whole node.
fn refold(plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
    constant_folding::ConstantFolding.apply(plan, node)
}

/// Drop a projection that reproduces its child's columns verbatim.
fn remove_identity_projection(plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
    // Inspect the child of `node` so the dropped node's parent edge is
    // ours to rewrite.
    for slot in 0..plan.node(node).children.len() {
        let child = plan.node(node).children[slot];
        let NodeKind::Project { exprs, names } = &plan.node(child).kind else {
            continue;
        };
        let below = plan.node(child).children[0];
        let below_schema = plan.node(below).schema.clone();
        if exprs.len() != below_schema.fields().len() {
            continue;
        }
        let identity = exprs
            .iter()
            .enumerate()
            .all(|(i, e)| matches!(e, Expression::Column { index, .. } if *index == i))
            && names
                .iter()
                .zip(below_schema.fields().iter())
                .all(|(n, f)| n == f.name());
        if identity {
            plan.set_child(node, slot, below);
            return Ok(true);
        }
    }
    // The root itself cannot be dropped this way; identity projections
    // at the root are harmless.
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::BinaryOp;
    use crate::plan::ScanCapabilities;
    use crate::vector::ScalarValue;
    use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    fn scan(plan: &mut LogicalPlan) -> NodeId {
        plan.add_node(
            NodeKind::Scan {
                relation: "t".into(),
                connector: "memory".into(),
                base_schema: schema(),
                projection: None,
                filters: vec![],
                limit: None,
                temporal: None,
                capabilities: ScanCapabilities::default(),
            },
            vec![],
            schema(),
            Some(100),
        )
    }

    #[test]
    fn test_adjacent_filters_combine() {
        let mut plan = LogicalPlan::new();
        let base = scan(&mut plan);
        let inner = plan.add_node(
            NodeKind::Filter {
                predicate: Expression::column("a", 0),
            },
            vec![base],
            schema(),
            None,
        );
        let outer = plan.add_node(
            NodeKind::Filter {
                predicate: Expression::column("name", 1),
            },
            vec![inner],
            schema(),
            None,
        );
        plan.set_root(outer);
        assert!(combine_adjacent_filters(&mut plan, outer).expect("apply"));
        assert_eq!(plan.node(outer).children[0], base);
    }

    #[test]
    fn test_cheap_predicates_first() {
        let mut plan = LogicalPlan::new();
        let base = scan(&mut plan);
        let like = Expression::Like {
            expr: Box::new(Expression::column("name", 1)),
            pattern: Box::new(Expression::Literal(ScalarValue::Utf8("G%".into()))),
            negated: false,
            case_insensitive: false,
        };
        let cheap = Expression::binary(
            BinaryOp::Eq,
            Expression::column("a", 0),
            Expression::Literal(ScalarValue::Int64(1)),
        );
        let filter = plan.add_node(
            NodeKind::Filter {
                predicate: Expression::and(like.clone(), cheap.clone()),
            },
            vec![base],
            schema(),
            None,
        );
        plan.set_root(filter);
        assert!(order_predicates(&mut plan, filter).expect("apply"));
        let NodeKind::Filter { predicate } = &plan.node(filter).kind else {
            panic!("expected filter");
        };
        let parts = predicate.clone().split_conjunction();
        assert_eq!(parts[0], cheap);
        assert_eq!(parts[1], like);
    }

    #[test]
    fn test_identity_projection_removed() {
        let mut plan = LogicalPlan::new();
        let base = scan(&mut plan);
        let project = plan.add_node(
            NodeKind::Project {
                exprs: vec![Expression::column("a", 0), Expression::column("name", 1)],
                names: vec!["a".into(), "name".into()],
            },
            vec![base],
            schema(),
            None,
        );
        let limit = plan.add_node(NodeKind::Limit { limit: 5 }, vec![project], schema(), None);
        plan.set_root(limit);
        assert!(remove_identity_projection(&mut plan, limit).expect("apply"));
        assert_eq!(plan.node(limit).children[0], base);
    }
}
