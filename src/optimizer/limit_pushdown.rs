//! Limit pushdown.
//!
//! Limits move below projections and annotate scans so connectors that
//! honor limit pushdown stop reading early. A scan with filters the
//! connector does not evaluate keeps its limit above (cutting rows
//! before the predicate would change results).

use super::RewriteStrategy;
use crate::error::EngineResult;
use crate::plan::{LogicalPlan, NodeId, NodeKind};

pub struct LimitPushdown;

impl RewriteStrategy for LimitPushdown {
    fn name(&self) -> &'static str {
        "limit_pushdown"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        let NodeKind::Limit { limit } = plan.node(node).kind else {
            return Ok(false);
        };
        let child = plan.node(node).children[0];

        match plan.node(child).kind.clone() {
            // Projections do not change row counts: swap.
            NodeKind::Project { exprs, names } => {
                let below = plan.node(child).children[0];
                let below_schema = plan.node(below).schema.clone();
                let below_estimate = plan.node(below).estimated_rows;
                let new_limit = plan.add_node(
                    NodeKind::Limit { limit },
                    vec![below],
                    below_schema,
                    Some(below_estimate.map_or(limit, |n| n.min(limit))),
                );
                let project_schema = plan.node(child).schema.clone();
                let estimate = plan.node(node).estimated_rows;
                let node_ref = plan.node_mut(node);
                node_ref.kind = NodeKind::Project { exprs, names };
                node_ref.children = vec![new_limit];
                node_ref.schema = project_schema;
                node_ref.estimated_rows = estimate;
                Ok(true)
            }
            NodeKind::Scan {
                relation,
                connector,
                base_schema,
                projection,
                filters,
                limit: scan_limit,
                temporal,
                capabilities,
            } => {
                // Respect connector-side filters only; operator-side
                // filters run after the read, so a scan limit would cut
                // rows before filtering.
                if !filters.is_empty() && !capabilities.filters {
                    return Ok(false);
                }
                if scan_limit.is_some_and(|existing| existing <= limit) {
                    return Ok(false);
                }
                let new_limit = Some(scan_limit.map_or(limit, |existing| existing.min(limit)));
                plan.node_mut(child).kind = NodeKind::Scan {
                    relation,
                    connector,
                    base_schema,
                    projection,
                    filters,
                    limit: new_limit,
                    temporal,
                    capabilities,
                };
                let estimate = plan.node(child).estimated_rows;
                plan.node_mut(child).estimated_rows =
                    Some(estimate.map_or(limit, |n| n.min(limit)));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
