//! Predicate rewrites.
//!
//! `STARTS_WITH(col, 'x')` becomes `col LIKE 'x%'` so the scan-side
//! matcher sees one canonical prefix form (ANY/ALL comparisons are
//! already normalized to IN lists at plan build).

use super::RewriteStrategy;
use crate::error::EngineResult;
use crate::expression::{Expression, ScalarFunction};
use crate::plan::{LogicalPlan, NodeId, NodeKind};
use crate::vector::ScalarValue;

pub struct PredicateRewrite;

impl RewriteStrategy for PredicateRewrite {
    fn name(&self) -> &'static str {
        "predicate_rewrite"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        let NodeKind::Filter { predicate } = &plan.node(node).kind else {
            return Ok(false);
        };
        let mut mutated = false;
        let rewritten = predicate.clone().transform(&mut |e| match rewrite(&e) {
            Some(next) => {
                mutated = true;
                next
            }
            None => e,
        });
        if mutated {
            plan.node_mut(node).kind = NodeKind::Filter {
                predicate: rewritten,
            };
        }
        Ok(mutated)
    }
}

fn rewrite(expr: &Expression) -> Option<Expression> {
    let Expression::ScalarFn {
        func: ScalarFunction::StartsWith,
        args,
    } = expr
    else {
        return None;
    };
    let [value, Expression::Literal(ScalarValue::Utf8(prefix))] = args.as_slice() else {
        return None;
    };
    // A prefix containing LIKE wildcards cannot be rewritten verbatim.
    if prefix.contains('%') || prefix.contains('_') {
        return None;
    }
    Some(Expression::Like {
        expr: Box::new(value.clone()),
        pattern: Box::new(Expression::Literal(ScalarValue::Utf8(format!("{prefix}%")))),
        negated: false,
        case_insensitive: false,
    })
}
