//! Conjunction splitting.
//!
//! `Filter(a AND b AND c)` becomes a stack of single-predicate filters
//! so later strategies can move each predicate independently.

use super::RewriteStrategy;
use crate::error::EngineResult;
use crate::expression::{BinaryOp, Expression};
use crate::plan::{LogicalPlan, NodeId, NodeKind};

pub struct SplitConjunctions;

impl RewriteStrategy for SplitConjunctions {
    fn name(&self) -> &'static str {
        "split_conjunctions"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        let NodeKind::Filter { predicate } = &plan.node(node).kind else {
            return Ok(false);
        };
        if !matches!(
            predicate,
            Expression::Binary {
                op: BinaryOp::And,
                ..
            }
        ) {
            return Ok(false);
        }

        let predicate = predicate.clone();
        let child = plan.node(node).children[0];
        let schema = plan.node(node).schema.clone();
        let estimate = plan.node(child).estimated_rows;

        let mut parts = predicate.split_conjunction();
        // The topmost filter keeps the first conjunct; the rest stack
        // beneath it in order.
        let first = parts.remove(0);
        let mut below = child;
        for part in parts.into_iter().rev() {
            below = plan.add_node(
                NodeKind::Filter { predicate: part },
                vec![below],
                schema.clone(),
                estimate.map(|n| (n / 3).max(1)),
            );
        }
        let node_ref = plan.node_mut(node);
        node_ref.kind = NodeKind::Filter { predicate: first };
        node_ref.children = vec![below];
        Ok(true)
    }
}
