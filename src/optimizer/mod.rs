//! Rule-based plan optimizer.
//!
//! A fixed, ordered pipeline of rewrite strategies applied top-down.
//! Each strategy is idempotent; after a strategy mutates a node the
//! pass restarts over the (rewritten) plan until it reports a fixpoint.
//! Every application increments a per-strategy counter exposed through
//! EXPLAIN.
//!
//! ## Pipeline
//!
//! 1. Expression simplification: constant folding, boolean
//!    simplification, conjunction splitting
//! 2. Predicate optimization: rewrites, pushdown past Project/Join and
//!    into Scan
//! 3. Projection pushdown: minimal column sets annotated onto scans
//! 4. Join optimization: CROSS + equi-filter to INNER, build-side choice
//! 5. Specialization: distinct-into-unnest, Sort+Limit fusion, limit
//!    pushdown
//! 6. Cleanup: filter combination, predicate ordering, a second folding
//!    pass, redundant projection removal

mod cleanup;
mod constant_folding;
mod distinct_pushdown;
mod join_rewrite;
mod limit_pushdown;
mod operator_fusion;
mod predicate_pushdown;
mod predicate_rewrite;
mod projection_pushdown;
mod split_conjunctions;

use crate::config::OptimizerConfig;
use crate::error::EngineResult;
use crate::plan::{LogicalPlan, NodeId};
use crate::statistics::StatisticsCollector;

/// One rewrite strategy, applied with `node` as the pattern root.
pub trait RewriteStrategy {
    fn name(&self) -> &'static str;

    /// Attempt the rewrite; return whether the plan was mutated.
    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool>;
}

/// The fixed strategy pipeline.
pub struct Optimizer {
    strategies: Vec<Box<dyn RewriteStrategy>>,
}

/// Upper bound on rewrites per strategy; a correct, idempotent strategy
/// converges far earlier.
const MAX_APPLICATIONS: usize = 10_000;

impl Optimizer {
    pub fn new(config: &OptimizerConfig) -> Optimizer {
        let mut strategies: Vec<Box<dyn RewriteStrategy>> = Vec::new();
        strategies.push(Box::new(constant_folding::ConstantFolding));
        strategies.push(Box::new(split_conjunctions::SplitConjunctions));
        strategies.push(Box::new(predicate_rewrite::PredicateRewrite));
        if config.enable_predicate_pushdown {
            strategies.push(Box::new(predicate_pushdown::PredicatePushdown));
        }
        if config.enable_projection_pushdown {
            strategies.push(Box::new(projection_pushdown::ProjectionPushdown));
        }
        strategies.push(Box::new(join_rewrite::JoinRewrite));
        strategies.push(Box::new(distinct_pushdown::DistinctPushdown));
        if config.enable_operator_fusion {
            strategies.push(Box::new(operator_fusion::OperatorFusion));
        }
        if config.enable_limit_pushdown {
            strategies.push(Box::new(limit_pushdown::LimitPushdown));
        }
        strategies.push(Box::new(cleanup::Cleanup));
        Optimizer { strategies }
    }

    /// Run the pipeline to a fixpoint per strategy, in order.
    pub fn optimize(
        &self,
        plan: &mut LogicalPlan,
        stats: &StatisticsCollector,
    ) -> EngineResult<()> {
        for strategy in &self.strategies {
            let mut applications = 0;
            loop {
                let mut mutated = false;
                let ids = reachable_top_down(plan);
                for id in ids {
                    if strategy.apply(plan, id)? {
                        stats.count_rule(strategy.name());
                        applications += 1;
                        mutated = true;
                        break;
                    }
                }
                if !mutated || applications >= MAX_APPLICATIONS {
                    break;
                }
            }
            if applications > 0 {
                tracing::debug!(
                    strategy = strategy.name(),
                    applications,
                    "rewrite strategy applied"
                );
            }
        }
        plan.validate()?;
        Ok(())
    }
}

/// Reachable node ids, parents before children.
fn reachable_top_down(plan: &LogicalPlan) -> Vec<NodeId> {
    let mut out = Vec::new();
    plan.visit_top_down(|id| out.push(id));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::expression::{BinaryOp, Expression};
    use crate::plan::{NodeKind, ScanCapabilities, SetOpKind};
    use crate::vector::ScalarValue;
    use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
    use std::sync::Arc;

    fn scan_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    fn plan_with_filter(predicate: Expression) -> LogicalPlan {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(
            NodeKind::Scan {
                relation: "t".into(),
                connector: "memory".into(),
                base_schema: scan_schema(),
                projection: None,
                filters: vec![],
                limit: None,
                temporal: None,
                capabilities: ScanCapabilities::default(),
            },
            vec![],
            scan_schema(),
            Some(100),
        );
        let filter = plan.add_node(
            NodeKind::Filter { predicate },
            vec![scan],
            scan_schema(),
            Some(33),
        );
        plan.set_root(filter);
        plan
    }

    #[test]
    fn test_pipeline_counts_applications() {
        // 1 + 1 = 2 folds to a literal; the filter collapses.
        let predicate = Expression::binary(
            BinaryOp::Eq,
            Expression::column("id", 0),
            Expression::binary(
                BinaryOp::Plus,
                Expression::Literal(ScalarValue::Int64(1)),
                Expression::Literal(ScalarValue::Int64(1)),
            ),
        );
        let mut plan = plan_with_filter(predicate);
        let stats = StatisticsCollector::new();
        let optimizer = Optimizer::new(&OptimizerConfig::default());
        optimizer.optimize(&mut plan, &stats).expect("optimize");
        assert!(stats.rule_count("constant_folding") >= 1);
    }

    #[test]
    fn test_union_all_not_rewritten() {
        let mut plan = LogicalPlan::new();
        let a = plan.add_node(
            NodeKind::Scan {
                relation: "a".into(),
                connector: "memory".into(),
                base_schema: scan_schema(),
                projection: None,
                filters: vec![],
                limit: None,
                temporal: None,
                capabilities: ScanCapabilities::default(),
            },
            vec![],
            scan_schema(),
            Some(10),
        );
        let b = plan.add_node(
            NodeKind::Scan {
                relation: "b".into(),
                connector: "memory".into(),
                base_schema: scan_schema(),
                projection: None,
                filters: vec![],
                limit: None,
                temporal: None,
                capabilities: ScanCapabilities::default(),
            },
            vec![],
            scan_schema(),
            Some(10),
        );
        let union = plan.add_node(
            NodeKind::SetOp {
                op: SetOpKind::Union,
                all: true,
            },
            vec![a, b],
            scan_schema(),
            Some(20),
        );
        plan.set_root(union);

        let stats = StatisticsCollector::new();
        let optimizer = Optimizer::new(&OptimizerConfig::default());
        optimizer.optimize(&mut plan, &stats).expect("optimize");
        assert!(matches!(
            plan.node(plan.root()).kind,
            NodeKind::SetOp { all: true, .. }
        ));
    }
}
