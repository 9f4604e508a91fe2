//! Distinct pushdown into UNNEST.
//!
//! `Distinct over Project(element) over Unnest` marks the unnest to
//! deduplicate elements during expansion, shrinking the stream the
//! outer Distinct has to absorb. The outer Distinct stays: per-row
//! element dedup does not imply global uniqueness.

use super::RewriteStrategy;
use crate::error::EngineResult;
use crate::expression::Expression;
use crate::plan::{LogicalPlan, NodeId, NodeKind};

pub struct DistinctPushdown;

impl RewriteStrategy for DistinctPushdown {
    fn name(&self) -> &'static str {
        "distinct_pushdown"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        if !matches!(plan.node(node).kind, NodeKind::Distinct) {
            return Ok(false);
        }
        let project = plan.node(node).children[0];
        let NodeKind::Project { exprs, .. } = &plan.node(project).kind else {
            return Ok(false);
        };
        // The projection must read only the unnested element column.
        let [Expression::Column { index, .. }] = exprs.as_slice() else {
            return Ok(false);
        };
        let element_index = *index;

        let unnest = plan.node(project).children[0];
        let NodeKind::Unnest {
            column,
            alias,
            outer,
            distinct,
        } = &plan.node(unnest).kind
        else {
            return Ok(false);
        };
        if *distinct {
            return Ok(false);
        }
        // The element column is the last output of the unnest.
        let element_position = plan.node(unnest).schema.fields().len() - 1;
        if element_index != element_position {
            return Ok(false);
        }

        let rewritten = NodeKind::Unnest {
            column: *column,
            alias: alias.clone(),
            outer: *outer,
            distinct: true,
        };
        plan.node_mut(unnest).kind = rewritten;
        Ok(true)
    }
}
