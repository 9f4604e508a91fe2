//! Operator fusion: Sort + Limit into a bounded heap sort.
//!
//! `Limit(n)` (optionally over `Offset(m)`) over an unfused `Sort`
//! annotates the sort with `fetch = m + n`, so execution keeps a top-k
//! heap instead of materializing the full input. The Limit and Offset
//! nodes stay: they still cap and skip the heap's drained output.

use super::RewriteStrategy;
use crate::error::EngineResult;
use crate::plan::{LogicalPlan, NodeId, NodeKind};

pub struct OperatorFusion;

impl RewriteStrategy for OperatorFusion {
    fn name(&self) -> &'static str {
        "operator_fusion"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        let NodeKind::Limit { limit } = plan.node(node).kind else {
            return Ok(false);
        };
        let mut below = plan.node(node).children[0];
        let mut skip = 0usize;
        if let NodeKind::Offset { offset } = plan.node(below).kind {
            skip = offset;
            below = plan.node(below).children[0];
        }
        let NodeKind::Sort { keys, fetch } = &plan.node(below).kind else {
            return Ok(false);
        };
        let k = skip.saturating_add(limit);
        if fetch.is_some_and(|existing| existing <= k) {
            return Ok(false);
        }
        let keys = keys.clone();
        let estimate = plan.node(below).estimated_rows.map(|n| n.min(k));
        let node_ref = plan.node_mut(below);
        node_ref.kind = NodeKind::Sort {
            keys,
            fetch: Some(k),
        };
        node_ref.estimated_rows = estimate;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Expression, SortKey};
    use crate::plan::ScanCapabilities;
    use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)]))
    }

    fn sorted_plan(offset: Option<usize>, limit: usize) -> (LogicalPlan, NodeId) {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(
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
            Some(1000),
        );
        let sort = plan.add_node(
            NodeKind::Sort {
                keys: vec![SortKey {
                    expr: Expression::column("x", 0),
                    ascending: false,
                    nulls_first: true,
                }],
                fetch: None,
            },
            vec![scan],
            schema(),
            Some(1000),
        );
        let mut below = sort;
        if let Some(offset) = offset {
            below = plan.add_node(NodeKind::Offset { offset }, vec![below], schema(), None);
        }
        let limit_node = plan.add_node(NodeKind::Limit { limit }, vec![below], schema(), None);
        plan.set_root(limit_node);
        (plan, sort)
    }

    #[test]
    fn test_sort_limit_fuses() {
        let (mut plan, sort) = sorted_plan(None, 3);
        {
            let root = plan.root();
            assert!(OperatorFusion.apply(&mut plan, root).expect("apply"));
        }
        assert!(matches!(
            plan.node(sort).kind,
            NodeKind::Sort { fetch: Some(3), .. }
        ));
        // Second application is a no-op.
        {
            let root = plan.root();
            assert!(!OperatorFusion.apply(&mut plan, root).expect("apply"));
        }
    }

    #[test]
    fn test_offset_adds_to_k() {
        let (mut plan, sort) = sorted_plan(Some(10), 5);
        {
            let root = plan.root();
            assert!(OperatorFusion.apply(&mut plan, root).expect("apply"));
        }
        assert!(matches!(
            plan.node(sort).kind,
            NodeKind::Sort {
                fetch: Some(15),
                ..
            }
        ));
    }
}
