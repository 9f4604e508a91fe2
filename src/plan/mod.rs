//! Logical query plans.
//!
//! A plan is a DAG of operator nodes stored in an arena and addressed by
//! stable integer ids; edges are `(parent, child, slot)` with the slot
//! given by the child's position in the parent's child list. Ownership is
//! the arena's alone, so graph rewrites never fight the borrow checker.
//!
//! Invariants: exactly one root; every leaf is a `Scan`; edge multiplicity
//! matches operator arity; every column reference in a node's expressions
//! resolves into its children's output schemas.

pub mod builder;

use std::fmt::Write as _;
use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::error::{EngineError, EngineResult};
use crate::expression::{AggregateExpr, Expression, SortKey};
use crate::temporal::TemporalRange;

/// Stable node identifier into the plan arena.
pub type NodeId = usize;

/// Join kinds. `RightOuter` is normalized away at build time (swapped
/// into a `LeftOuter` plus a column-reordering projection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftSemi,
    LeftAnti,
    Cross,
}

impl JoinKind {
    pub fn label(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::LeftOuter => "LEFT OUTER",
            JoinKind::RightOuter => "RIGHT OUTER",
            JoinKind::FullOuter => "FULL OUTER",
            JoinKind::LeftSemi => "LEFT SEMI",
            JoinKind::LeftAnti => "LEFT ANTI",
            JoinKind::Cross => "CROSS",
        }
    }

    /// Whether the join output contains only left-side columns.
    pub fn left_only(self) -> bool {
        matches!(self, JoinKind::LeftSemi | JoinKind::LeftAnti)
    }
}

/// Set operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

impl SetOpKind {
    pub fn label(self) -> &'static str {
        match self {
            SetOpKind::Union => "UNION",
            SetOpKind::Intersect => "INTERSECT",
            SetOpKind::Except => "EXCEPT",
        }
    }
}

/// Connector pushdown capabilities captured on the scan at build time,
/// so the optimizer can decide without a registry round trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanCapabilities {
    pub projection: bool,
    pub filters: bool,
    pub limit: bool,
}

/// Operator node kinds.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Leaf: read a relation through a connector.
    Scan {
        relation: String,
        connector: String,
        /// Full connector schema before any projection pushdown.
        base_schema: SchemaRef,
        /// Base-schema column positions to read; `None` = all.
        projection: Option<Vec<usize>>,
        /// Predicates pushed into the connector, bound to the base schema.
        filters: Vec<Expression>,
        limit: Option<usize>,
        temporal: Option<TemporalRange>,
        capabilities: ScanCapabilities,
    },
    Project {
        exprs: Vec<Expression>,
        names: Vec<String>,
    },
    Filter {
        predicate: Expression,
    },
    Join {
        kind: JoinKind,
        /// Equi-key pairs: left expression bound to the left child's
        /// schema, right expression bound to the right child's schema.
        on: Vec<(Expression, Expression)>,
        /// Residual predicate bound to the concatenated schema.
        filter: Option<Expression>,
    },
    Aggregate {
        group_by: Vec<Expression>,
        aggregates: Vec<AggregateExpr>,
        /// Output names: group columns first, then aggregate columns.
        names: Vec<String>,
    },
    Sort {
        keys: Vec<SortKey>,
        /// Set by Sort+Limit fusion: keep only the first `fetch` rows.
        fetch: Option<usize>,
    },
    Limit {
        limit: usize,
    },
    Offset {
        offset: usize,
    },
    Distinct,
    SetOp {
        op: SetOpKind,
        all: bool,
    },
    SubqueryAlias {
        alias: String,
    },
    Cte {
        name: String,
    },
    /// Expand a list column into one row per element.
    Unnest {
        /// Input column holding the list.
        column: usize,
        /// Output name of the element column.
        alias: String,
        /// Emit one null-element row for empty/null lists.
        outer: bool,
        /// Deduplicate elements during expansion (distinct pushdown).
        distinct: bool,
    },
    Explain {
        analyze: bool,
    },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Scan { .. } => "Scan",
            NodeKind::Project { .. } => "Project",
            NodeKind::Filter { .. } => "Filter",
            NodeKind::Join { .. } => "Join",
            NodeKind::Aggregate { .. } => "Aggregate",
            NodeKind::Sort { .. } => "Sort",
            NodeKind::Limit { .. } => "Limit",
            NodeKind::Offset { .. } => "Offset",
            NodeKind::Distinct => "Distinct",
            NodeKind::SetOp { .. } => "SetOp",
            NodeKind::SubqueryAlias { .. } => "SubqueryAlias",
            NodeKind::Cte { .. } => "Cte",
            NodeKind::Unnest { .. } => "Unnest",
            NodeKind::Explain { .. } => "Explain",
        }
    }

    /// Expected child count; `None` means one-or-more (union).
    pub fn arity(&self) -> Option<usize> {
        match self {
            NodeKind::Scan { .. } => Some(0),
            NodeKind::Join { .. } | NodeKind::SetOp { .. } => Some(2),
            _ => Some(1),
        }
    }
}

/// One arena slot: kind, child edges, output schema and a row estimate.
#[derive(Debug, Clone)]
pub struct LogicalNode {
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    pub schema: SchemaRef,
    pub estimated_rows: Option<usize>,
}

/// The plan arena.
#[derive(Debug, Clone)]
pub struct LogicalPlan {
    nodes: Vec<LogicalNode>,
    root: NodeId,
}

impl LogicalPlan {
    pub fn new() -> LogicalPlan {
        LogicalPlan {
            nodes: Vec::new(),
            root: 0,
        }
    }

    pub fn add_node(
        &mut self,
        kind: NodeKind,
        children: Vec<NodeId>,
        schema: SchemaRef,
        estimated_rows: Option<usize>,
    ) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(LogicalNode {
            kind,
            children,
            schema,
            estimated_rows,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &LogicalNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut LogicalNode {
        &mut self.nodes[id]
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = id;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn schema(&self) -> SchemaRef {
        self.nodes[self.root].schema.clone()
    }

    /// Replace a child edge of `parent`.
    pub fn set_child(&mut self, parent: NodeId, slot: usize, child: NodeId) {
        self.nodes[parent].children[slot] = child;
    }

    /// Check structural invariants; used by tests and after optimization.
    pub fn validate(&self) -> EngineResult<()> {
        if self.nodes.is_empty() {
            return Err(EngineError::Internal("empty plan".into()));
        }
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if id >= self.nodes.len() {
                return Err(EngineError::Internal(format!(
                    "plan references missing node {id}"
                )));
            }
            if seen[id] {
                continue;
            }
            seen[id] = true;
            let node = &self.nodes[id];
            if let Some(arity) = node.kind.arity() {
                if node.children.len() != arity {
                    return Err(EngineError::Internal(format!(
                        "{} node has {} children, expected {arity}",
                        node.kind.label(),
                        node.children.len()
                    )));
                }
            }
            if node.children.is_empty() && !matches!(node.kind, NodeKind::Scan { .. }) {
                return Err(EngineError::Internal(format!(
                    "leaf node is a {}, expected Scan",
                    node.kind.label()
                )));
            }
            stack.extend(node.children.iter().copied());
        }
        Ok(())
    }

    /// Pretty print the reachable plan tree for debugging and tests.
    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        self.print_node(self.root, 0, &mut out);
        out
    }

    fn print_node(&self, id: NodeId, indent: usize, out: &mut String) {
        let node = &self.nodes[id];
        let prefix = "  ".repeat(indent);
        let detail = describe_node(node);
        let _ = writeln!(out, "{prefix}{detail}");
        for &child in &node.children {
            self.print_node(child, indent + 1, out);
        }
    }

    /// Visit reachable nodes top-down (parents before children).
    pub fn visit_top_down(&self, mut f: impl FnMut(NodeId)) {
        let mut stack = vec![self.root];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(id) = stack.pop() {
            if seen[id] {
                continue;
            }
            seen[id] = true;
            f(id);
            stack.extend(self.nodes[id].children.iter().copied());
        }
    }
}

impl Default for LogicalPlan {
    fn default() -> Self {
        Self::new()
    }
}

/// Render one node for the plan dump.
pub fn describe_node(node: &LogicalNode) -> String {
    let rows = node
        .estimated_rows
        .map_or_else(|| "?".to_string(), |r| r.to_string());
    match &node.kind {
        NodeKind::Scan {
            relation,
            projection,
            filters,
            limit,
            temporal,
            ..
        } => {
            let mut s = format!("Scan({relation})");
            if projection.is_some() {
                // The node schema is already the projected schema.
                let names: Vec<&str> = node
                    .schema
                    .fields()
                    .iter()
                    .map(|f| f.name().as_str())
                    .collect();
                let _ = write!(s, " columns={names:?}");
            }
            if !filters.is_empty() {
                let rendered: Vec<String> = filters.iter().map(ToString::to_string).collect();
                let _ = write!(s, " filter=({})", rendered.join(" AND "));
            }
            if let Some(limit) = limit {
                let _ = write!(s, " limit={limit}");
            }
            if let Some(t) = temporal {
                let _ = write!(s, " for={}..{}", t.start, t.end);
            }
            let _ = write!(s, " rows={rows}");
            s
        }
        NodeKind::Project { exprs, names } => {
            let cols: Vec<String> = exprs
                .iter()
                .zip(names.iter())
                .map(|(e, n)| {
                    let rendered = e.to_string();
                    if &rendered == n {
                        rendered
                    } else {
                        format!("{rendered} AS {n}")
                    }
                })
                .collect();
            format!("Project({})", cols.join(", "))
        }
        NodeKind::Filter { predicate } => format!("Filter({predicate})"),
        NodeKind::Join { kind, on, filter } => {
            let mut s = format!("Join[{}]", kind.label());
            if !on.is_empty() {
                let pairs: Vec<String> = on.iter().map(|(l, r)| format!("{l} = {r}")).collect();
                let _ = write!(s, " on={}", pairs.join(" AND "));
            }
            if let Some(f) = filter {
                let _ = write!(s, " filter={f}");
            }
            s
        }
        NodeKind::Aggregate {
            group_by,
            aggregates,
            ..
        } => {
            let groups: Vec<String> = group_by.iter().map(ToString::to_string).collect();
            let aggs: Vec<String> = aggregates
                .iter()
                .map(|a| Expression::Aggregate(a.clone()).to_string())
                .collect();
            format!(
                "Aggregate(group=[{}], aggs=[{}])",
                groups.join(", "),
                aggs.join(", ")
            )
        }
        NodeKind::Sort { keys, fetch } => {
            let rendered: Vec<String> = keys
                .iter()
                .map(|k| format!("{} {}", k.expr, if k.ascending { "ASC" } else { "DESC" }))
                .collect();
            match fetch {
                Some(k) => format!("HeapSort(k={k}, by=[{}])", rendered.join(", ")),
                None => format!("Sort(by=[{}])", rendered.join(", ")),
            }
        }
        NodeKind::Limit { limit } => format!("Limit({limit})"),
        NodeKind::Offset { offset } => format!("Offset({offset})"),
        NodeKind::Distinct => "Distinct".to_string(),
        NodeKind::SetOp { op, all } => {
            format!("{}{}", op.label(), if *all { " ALL" } else { "" })
        }
        NodeKind::SubqueryAlias { alias } => format!("SubqueryAlias({alias})"),
        NodeKind::Cte { name } => format!("Cte({name})"),
        NodeKind::Unnest {
            alias,
            outer,
            distinct,
            ..
        } => format!(
            "{}Unnest({alias}{})",
            if *outer { "Outer" } else { "" },
            if *distinct { ", distinct" } else { "" }
        ),
        NodeKind::Explain { analyze } => {
            format!("Explain{}", if *analyze { " Analyze" } else { "" })
        }
    }
}

// ============================================================================
// Schema helpers shared by builder and optimizer
// ============================================================================

/// Output schema of a join over the given child schemas.
pub fn join_schema(kind: JoinKind, left: &SchemaRef, right: &SchemaRef) -> SchemaRef {
    if kind.left_only() {
        return left.clone();
    }
    let left_nullable = matches!(kind, JoinKind::RightOuter | JoinKind::FullOuter);
    let right_nullable = matches!(kind, JoinKind::LeftOuter | JoinKind::FullOuter);
    let mut fields: Vec<Field> = Vec::with_capacity(left.fields().len() + right.fields().len());
    for f in left.fields() {
        let f = f.as_ref().clone();
        fields.push(if left_nullable {
            f.with_nullable(true)
        } else {
            f
        });
    }
    for f in right.fields() {
        let f = f.as_ref().clone();
        fields.push(if right_nullable {
            f.with_nullable(true)
        } else {
            f
        });
    }
    Arc::new(Schema::new(fields))
}

/// Crude cardinality estimates used for build-side choice and EXPLAIN.
pub fn estimate_rows(kind: &NodeKind, children: &[Option<usize>]) -> Option<usize> {
    let child = |i: usize| children.get(i).copied().flatten();
    match kind {
        NodeKind::Scan { .. } => None, // set by the builder from unit hints
        NodeKind::Filter { .. } => child(0).map(|n| (n / 3).max(1)),
        NodeKind::Project { .. }
        | NodeKind::SubqueryAlias { .. }
        | NodeKind::Cte { .. }
        | NodeKind::Explain { .. } => child(0),
        NodeKind::Join { kind, .. } => match kind {
            JoinKind::Cross => match (child(0), child(1)) {
                (Some(l), Some(r)) => Some(l.saturating_mul(r)),
                _ => None,
            },
            JoinKind::LeftSemi | JoinKind::LeftAnti => child(0),
            _ => match (child(0), child(1)) {
                (Some(l), Some(r)) => Some(l.max(r)),
                _ => None,
            },
        },
        NodeKind::Aggregate { group_by, .. } => {
            if group_by.is_empty() {
                Some(1)
            } else {
                child(0).map(|n| (n / 10).max(1))
            }
        }
        NodeKind::Sort { fetch, .. } => match fetch {
            Some(k) => child(0).map(|n| n.min(*k)),
            None => child(0),
        },
        NodeKind::Limit { limit } => Some(child(0).map_or(*limit, |n| n.min(*limit))),
        NodeKind::Offset { offset } => child(0).map(|n| n.saturating_sub(*offset)),
        NodeKind::Distinct => child(0).map(|n| (n / 2).max(1)),
        NodeKind::SetOp { op, .. } => match op {
            SetOpKind::Union => match (child(0), child(1)) {
                (Some(l), Some(r)) => Some(l + r),
                _ => None,
            },
            _ => child(0),
        },
        NodeKind::Unnest { .. } => child(0).map(|n| n.saturating_mul(4)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;

    fn scan_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    fn scan_node(plan: &mut LogicalPlan) -> NodeId {
        plan.add_node(
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
        )
    }

    #[test]
    fn test_validate_accepts_simple_plan() {
        let mut plan = LogicalPlan::new();
        let scan = scan_node(&mut plan);
        let filter = plan.add_node(
            NodeKind::Filter {
                predicate: Expression::column("id", 0),
            },
            vec![scan],
            scan_schema(),
            Some(33),
        );
        plan.set_root(filter);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_arity() {
        let mut plan = LogicalPlan::new();
        let scan = scan_node(&mut plan);
        let join = plan.add_node(
            NodeKind::Join {
                kind: JoinKind::Inner,
                on: vec![],
                filter: None,
            },
            vec![scan],
            scan_schema(),
            None,
        );
        plan.set_root(join);
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_left_outer_join_schema_nullable_right() {
        let schema = join_schema(JoinKind::LeftOuter, &scan_schema(), &scan_schema());
        assert!(!schema.field(0).is_nullable());
        assert!(schema.field(2).is_nullable());
    }

    #[test]
    fn test_semi_join_schema_is_left_only() {
        let schema = join_schema(JoinKind::LeftSemi, &scan_schema(), &scan_schema());
        assert_eq!(schema.fields().len(), 2);
    }

    #[test]
    fn test_estimates() {
        assert_eq!(
            estimate_rows(&NodeKind::Limit { limit: 10 }, &[Some(100)]),
            Some(10)
        );
        assert_eq!(
            estimate_rows(
                &NodeKind::Join {
                    kind: JoinKind::Cross,
                    on: vec![],
                    filter: None
                },
                &[Some(10), Some(20)]
            ),
            Some(200)
        );
    }

    #[test]
    fn test_pretty_print_contains_labels() {
        let mut plan = LogicalPlan::new();
        let scan = scan_node(&mut plan);
        let limit = plan.add_node(
            NodeKind::Limit { limit: 5 },
            vec![scan],
            scan_schema(),
            Some(5),
        );
        plan.set_root(limit);
        let printed = plan.pretty_print();
        assert!(printed.contains("Limit(5)"));
        assert!(printed.contains("Scan(t)"));
    }
}
