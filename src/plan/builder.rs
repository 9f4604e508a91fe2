//! Lowering the parsed SQL AST into a logical plan.
//!
//! The builder walks the sqlparser AST, binds every name against the
//! producing operator's output schema, and emits nodes in canonical
//! clause order: FROM, WHERE, GROUP BY, HAVING, SELECT, DISTINCT,
//! ORDER BY, OFFSET, LIMIT — regardless of the SQL surface order.
//!
//! ORDER BY keys that reference pre-projection columns are carried as
//! hidden projection columns and trimmed after the sort; aggregate calls
//! in SELECT/HAVING/ORDER BY are extracted into one Aggregate node and
//! rewritten into column references over its output.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use sqlparser::ast::{
    self, BinaryOperator, CastKind, DateTimeField, Distinct, Expr as SqlExpr, Function,
    FunctionArg, FunctionArgExpr, FunctionArgumentClause, FunctionArguments, GroupByExpr, Ident,
    JoinConstraint, JoinOperator, ObjectName, OrderByExpr, Query, Select, SelectItem, SetExpr,
    SetOperator, SetQuantifier, Statement, TableFactor, TableWithJoins, UnaryOperator, Value,
};

use super::{
    estimate_rows, join_schema, JoinKind, LogicalPlan, NodeId, NodeKind, ScanCapabilities,
    SetOpKind,
};
use crate::connector::Capability;
use crate::context::QueryContext;
use crate::error::{EngineError, EngineResult};
use crate::expression::{
    coerce_binary, functions, AggregateExpr, AggregateFunction, BinaryOp, Expression,
    ScalarFunction, SortKey, UnaryOp,
};
use crate::temporal::TemporalRange;
use crate::vector::{ElementType, ScalarValue};

/// Build a logical plan from one parsed statement.
pub fn build_plan(
    statement: &Statement,
    context: &QueryContext,
    temporal: &HashMap<String, TemporalRange>,
) -> EngineResult<LogicalPlan> {
    let mut builder = PlanBuilder {
        plan: LogicalPlan::new(),
        context,
        temporal,
        ctes: HashMap::new(),
    };
    let root = builder.plan_statement(statement)?;
    builder.plan.set_root(root);
    builder.plan.validate()?;
    Ok(builder.plan)
}

// ============================================================================
// Name scopes
// ============================================================================

/// Column qualifiers parallel to a node's output schema.
#[derive(Debug, Clone)]
struct Scope {
    qualifiers: Vec<Option<String>>,
    schema: SchemaRef,
}

impl Scope {
    fn new(schema: SchemaRef, qualifier: Option<String>) -> Scope {
        Scope {
            qualifiers: vec![qualifier; schema.fields().len()],
            schema,
        }
    }

    fn merge(left: &Scope, right: &Scope, schema: SchemaRef) -> Scope {
        let mut qualifiers = left.qualifiers.clone();
        qualifiers.extend(right.qualifiers.iter().cloned());
        Scope { qualifiers, schema }
    }

    fn len(&self) -> usize {
        self.schema.fields().len()
    }

    fn field_name(&self, i: usize) -> &str {
        self.schema.field(i).name()
    }

    /// Resolve a possibly-qualified column name. Unquoted names match
    /// case-insensitively.
    fn resolve(&self, qualifier: Option<&Ident>, column: &Ident) -> EngineResult<usize> {
        let matches_name = |field: &str| {
            if column.quote_style.is_some() {
                field == column.value
            } else {
                field.eq_ignore_ascii_case(&column.value)
            }
        };
        let matches_qualifier = |q: &Option<String>| match qualifier {
            None => true,
            Some(wanted) => q
                .as_deref()
                .is_some_and(|have| have.eq_ignore_ascii_case(&wanted.value)),
        };
        let mut found: Option<usize> = None;
        for i in 0..self.len() {
            if matches_name(self.field_name(i)) && matches_qualifier(&self.qualifiers[i]) {
                if found.is_some() {
                    return Err(EngineError::UnresolvedName(format!(
                        "column reference '{}' is ambiguous",
                        render_name(qualifier, column)
                    )));
                }
                found = Some(i);
            }
        }
        found.ok_or_else(|| {
            EngineError::UnresolvedName(format!(
                "column '{}' does not exist",
                render_name(qualifier, column)
            ))
        })
    }
}

fn render_name(qualifier: Option<&Ident>, column: &Ident) -> String {
    match qualifier {
        Some(q) => format!("{}.{}", q.value, column.value),
        None => column.value.clone(),
    }
}

// ============================================================================
// Builder
// ============================================================================

struct PlanBuilder<'a> {
    plan: LogicalPlan,
    context: &'a QueryContext,
    temporal: &'a HashMap<String, TemporalRange>,
    ctes: HashMap<String, Query>,
}

impl PlanBuilder<'_> {
    fn plan_statement(&mut self, statement: &Statement) -> EngineResult<NodeId> {
        match statement {
            Statement::Query(query) => {
                let (node, _) = self.plan_query(query)?;
                Ok(node)
            }
            Statement::Explain {
                analyze, statement, ..
            } => {
                let Statement::Query(query) = statement.as_ref() else {
                    return Err(EngineError::Unsupported(
                        "EXPLAIN supports queries only".into(),
                    ));
                };
                let (inner, _) = self.plan_query(query)?;
                let schema: SchemaRef =
                    Arc::new(Schema::new(vec![Field::new("plan", DataType::Utf8, false)]));
                Ok(self.plan.add_node(
                    NodeKind::Explain { analyze: *analyze },
                    vec![inner],
                    schema,
                    None,
                ))
            }
            other => Err(EngineError::Unsupported(format!(
                "statement is not supported by this engine: {}",
                statement_label(other)
            ))),
        }
    }

    fn plan_query(&mut self, query: &Query) -> EngineResult<(NodeId, Scope)> {
        // Register CTEs for the duration of this query.
        let mut registered = Vec::new();
        if let Some(with) = &query.with {
            if with.recursive {
                return Err(EngineError::Unsupported(
                    "recursive common table expressions".into(),
                ));
            }
            for cte in &with.cte_tables {
                let name = cte.alias.name.value.to_lowercase();
                self.ctes.insert(name.clone(), cte.query.as_ref().clone());
                registered.push(name);
            }
        }

        let order = query
            .order_by
            .as_ref()
            .map(|o| o.exprs.as_slice())
            .unwrap_or(&[]);
        let limit = query
            .limit
            .as_ref()
            .map(|e| self.literal_usize(e, "LIMIT"))
            .transpose()?;
        let offset = query
            .offset
            .as_ref()
            .map(|o| self.literal_usize(&o.value, "OFFSET"))
            .transpose()?;

        let result = match query.body.as_ref() {
            SetExpr::Select(select) => self.plan_select(select, order, limit, offset),
            SetExpr::Query(inner) => {
                let (node, scope) = self.plan_query(inner)?;
                self.apply_order_limit_offset(node, scope, order, limit, offset)
            }
            SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => {
                let (node, scope) = self.plan_set_operation(op, set_quantifier, left, right)?;
                self.apply_order_limit_offset(node, scope, order, limit, offset)
            }
            other => Err(EngineError::Unsupported(format!(
                "query body is not supported: {}",
                body_label(other)
            ))),
        };

        for name in registered {
            self.ctes.remove(&name);
        }
        result
    }

    fn plan_set_operation(
        &mut self,
        op: &SetOperator,
        quantifier: &SetQuantifier,
        left: &SetExpr,
        right: &SetExpr,
    ) -> EngineResult<(NodeId, Scope)> {
        let (left_node, left_scope) = self.plan_set_expr(left)?;
        let (right_node, right_scope) = self.plan_set_expr(right)?;

        let left_schema = left_scope.schema.clone();
        let right_schema = right_scope.schema.clone();
        if !crate::morsel::schemas_compatible(&left_schema, &right_schema) {
            return Err(EngineError::TypeMismatch(format!(
                "set operation inputs disagree: {} column(s) vs {}",
                left_schema.fields().len(),
                right_schema.fields().len()
            )));
        }

        let all = match quantifier {
            SetQuantifier::All => true,
            SetQuantifier::None | SetQuantifier::Distinct => false,
            other => {
                return Err(EngineError::Unsupported(format!(
                    "set quantifier {other} is not supported"
                )))
            }
        };
        let kind = match op {
            SetOperator::Union => SetOpKind::Union,
            SetOperator::Intersect => SetOpKind::Intersect,
            SetOperator::Except => SetOpKind::Except,
        };
        // Distinct set semantics require comparable columns.
        if !all || kind != SetOpKind::Union {
            for field in left_schema.fields() {
                if !ElementType::from_arrow(field.data_type()).is_comparable() {
                    return Err(EngineError::Unsupported(format!(
                        "{} cannot compare column '{}' of type {}",
                        kind.label(),
                        field.name(),
                        field.data_type()
                    )));
                }
            }
        }

        // Output nullability is the union of both inputs'.
        let fields: Vec<Field> = left_schema
            .fields()
            .iter()
            .zip(right_schema.fields().iter())
            .map(|(l, r)| {
                l.as_ref()
                    .clone()
                    .with_nullable(l.is_nullable() || r.is_nullable())
            })
            .collect();
        let schema: SchemaRef = Arc::new(Schema::new(fields));
        let node = self.add(
            NodeKind::SetOp { op: kind, all },
            vec![left_node, right_node],
            schema.clone(),
        );
        Ok((node, Scope::new(schema, None)))
    }

    fn plan_set_expr(&mut self, body: &SetExpr) -> EngineResult<(NodeId, Scope)> {
        match body {
            SetExpr::Select(select) => self.plan_select(select, &[], None, None),
            SetExpr::Query(query) => self.plan_query(query),
            SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => self.plan_set_operation(op, set_quantifier, left, right),
            other => Err(EngineError::Unsupported(format!(
                "query body is not supported: {}",
                body_label(other)
            ))),
        }
    }

    // ------------------------------------------------------------------
    // SELECT
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn plan_select(
        &mut self,
        select: &Select,
        order: &[OrderByExpr],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> EngineResult<(NodeId, Scope)> {
        // FROM
        let (mut node, scope) = self.plan_from(&select.from)?;

        // WHERE: IN-subquery conjuncts become semi/anti joins, the rest
        // stays one Filter (the optimizer splits conjunctions later).
        if let Some(selection) = &select.selection {
            let conjuncts = split_sql_conjunction(selection);
            let mut residual: Vec<Expression> = Vec::new();
            for conjunct in conjuncts {
                if let SqlExpr::InSubquery {
                    expr,
                    subquery,
                    negated,
                } = conjunct
                {
                    node = self.plan_in_subquery(node, &scope, expr, subquery, *negated)?;
                } else {
                    residual.push(self.resolve(conjunct, &scope, false)?);
                }
            }
            if let Some(predicate) = Expression::conjunction(residual) {
                let schema = self.plan.node(node).schema.clone();
                node = self.add(NodeKind::Filter { predicate }, vec![node], schema);
            }
        }

        // SELECT list, resolved over the FROM scope (aggregates allowed).
        let mut select_exprs: Vec<(Expression, String)> = Vec::new();
        for item in &select.projection {
            self.resolve_select_item(item, &scope, &mut select_exprs)?;
        }
        if select_exprs.is_empty() {
            return Err(EngineError::InvalidInput("empty SELECT list".into()));
        }

        let having = select
            .having
            .as_ref()
            .map(|h| self.resolve(h, &scope, true))
            .transpose()?;

        // GROUP BY items: ordinals and select aliases resolve into the
        // select list, anything else is an expression over FROM.
        let group_exprs = self.resolve_group_by(&select.group_by, &select_exprs, &scope)?;

        // ORDER BY keys resolve against select aliases/ordinals first,
        // then the pre-projection scope.
        let mut order_keys: Vec<(OrderTarget, bool, Option<bool>)> = Vec::new();
        for item in order {
            let target = self.resolve_order_target(item, &select_exprs, &scope)?;
            order_keys.push((target, item.asc.unwrap_or(true), item.nulls_first));
        }

        let has_aggregates = !group_exprs.is_empty()
            || select_exprs.iter().any(|(e, _)| e.has_aggregates())
            || having.as_ref().is_some_and(Expression::has_aggregates)
            || order_keys.iter().any(|(t, _, _)| match t {
                OrderTarget::Expr(e) => e.has_aggregates(),
                OrderTarget::Output(_) => false,
            });

        // Select and sort expressions are re-bound after (possible)
        // aggregation.
        let mut select_bound: Vec<(Expression, String)>;
        let mut order_bound: Vec<(OrderTarget, bool, Option<bool>)>;

        if has_aggregates {
            let mut aggregates: Vec<AggregateExpr> = Vec::new();
            for (expr, _) in &select_exprs {
                collect_aggregates(expr, &mut aggregates);
            }
            if let Some(h) = &having {
                collect_aggregates(h, &mut aggregates);
            }
            for (target, _, _) in &order_keys {
                if let OrderTarget::Expr(e) = target {
                    collect_aggregates(e, &mut aggregates);
                }
            }

            let input_schema = self.plan.node(node).schema.clone();
            let mut names = Vec::new();
            let mut fields = Vec::new();
            for expr in &group_exprs {
                let name = expr.to_string();
                fields.push(expr.to_field(&name, input_schema.as_ref())?);
                names.push(name);
            }
            for agg in &aggregates {
                let rendered = Expression::Aggregate(agg.clone());
                let name = rendered.to_string();
                fields.push(rendered.to_field(&name, input_schema.as_ref())?);
                names.push(name);
            }
            let agg_schema: SchemaRef = Arc::new(Schema::new(fields));

            node = self.add(
                NodeKind::Aggregate {
                    group_by: group_exprs.clone(),
                    aggregates: aggregates.clone(),
                    names: names.clone(),
                },
                vec![node],
                agg_schema.clone(),
            );

            // HAVING runs over the aggregate output.
            if let Some(h) = having {
                let rewritten = rewrite_over_aggregate(h, &group_exprs, &aggregates, &names)?;
                node = self.add(
                    NodeKind::Filter {
                        predicate: rewritten,
                    },
                    vec![node],
                    agg_schema,
                );
            }

            select_bound = Vec::with_capacity(select_exprs.len());
            for (expr, name) in select_exprs {
                let rewritten = rewrite_over_aggregate(expr, &group_exprs, &aggregates, &names)?;
                select_bound.push((rewritten, name));
            }
            order_bound = Vec::with_capacity(order_keys.len());
            for (target, asc, nulls_first) in order_keys {
                let target = match target {
                    OrderTarget::Expr(e) => OrderTarget::Expr(rewrite_over_aggregate(
                        e,
                        &group_exprs,
                        &aggregates,
                        &names,
                    )?),
                    output => output,
                };
                order_bound.push((target, asc, nulls_first));
            }
        } else {
            if having.is_some() {
                return Err(EngineError::InvalidInput(
                    "HAVING requires GROUP BY or aggregates".into(),
                ));
            }
            select_bound = select_exprs;
            order_bound = order_keys;
        }

        // SELECT expressions become a Project.
        let input_schema = self.plan.node(node).schema.clone();
        let mut exprs: Vec<Expression> = Vec::with_capacity(select_bound.len());
        let mut names: Vec<String> = Vec::with_capacity(select_bound.len());
        for (expr, name) in select_bound {
            exprs.push(expr);
            names.push(name);
        }

        // Hidden sort columns: ORDER BY expressions that are not in the
        // output extend the projection and are trimmed after the sort.
        let visible = exprs.len();
        let mut sort_keys: Vec<SortKey> = Vec::new();
        for (target, ascending, nulls_first) in order_bound {
            let index = match target {
                OrderTarget::Output(i) => i,
                OrderTarget::Expr(e) => {
                    if let Some(i) = exprs.iter().position(|candidate| candidate == &e) {
                        i
                    } else {
                        if select.distinct.is_some() {
                            return Err(EngineError::InvalidInput(
                                "with DISTINCT, ORDER BY expressions must appear in the SELECT list"
                                    .into(),
                            ));
                        }
                        exprs.push(e);
                        names.push(format!("__sort_{}", exprs.len() - visible));
                        exprs.len() - 1
                    }
                }
            };
            sort_keys.push(SortKey {
                expr: Expression::column(names[index].clone(), index),
                ascending,
                // Default null placement follows direction: last for ASC,
                // first for DESC.
                nulls_first: nulls_first.unwrap_or(!ascending),
            });
        }

        let mut fields = Vec::with_capacity(exprs.len());
        for (expr, name) in exprs.iter().zip(names.iter()) {
            fields.push(expr.to_field(name, input_schema.as_ref())?);
        }
        let project_schema: SchemaRef = Arc::new(Schema::new(fields));
        node = self.add(
            NodeKind::Project {
                exprs: exprs.clone(),
                names: names.clone(),
            },
            vec![node],
            project_schema.clone(),
        );

        // DISTINCT
        if let Some(distinct) = &select.distinct {
            match distinct {
                Distinct::Distinct => {
                    for field in project_schema.fields() {
                        if !ElementType::from_arrow(field.data_type()).is_comparable() {
                            return Err(EngineError::Unsupported(format!(
                                "DISTINCT cannot compare column '{}' of type {}",
                                field.name(),
                                field.data_type()
                            )));
                        }
                    }
                    node = self.add(NodeKind::Distinct, vec![node], project_schema.clone());
                }
                Distinct::On(_) => {
                    return Err(EngineError::Unsupported("DISTINCT ON".into()));
                }
            }
        }

        // ORDER BY, OFFSET, LIMIT.
        if !sort_keys.is_empty() {
            let schema = self.plan.node(node).schema.clone();
            for key in &sort_keys {
                let Expression::Column { index, .. } = &key.expr else {
                    continue;
                };
                let field = schema.field(*index);
                if !ElementType::from_arrow(field.data_type()).is_comparable() {
                    return Err(EngineError::Unsupported(format!(
                        "ORDER BY cannot compare column '{}' of type {}",
                        field.name(),
                        field.data_type()
                    )));
                }
            }
            node = self.add(
                NodeKind::Sort {
                    keys: sort_keys,
                    fetch: None,
                },
                vec![node],
                schema,
            );
        }
        if let Some(offset) = offset {
            let schema = self.plan.node(node).schema.clone();
            node = self.add(NodeKind::Offset { offset }, vec![node], schema);
        }
        if let Some(limit) = limit {
            let schema = self.plan.node(node).schema.clone();
            node = self.add(NodeKind::Limit { limit }, vec![node], schema);
        }

        // Trim hidden sort columns.
        if exprs.len() > visible {
            let trimmed: Vec<Expression> = (0..visible)
                .map(|i| Expression::column(names[i].clone(), i))
                .collect();
            let trimmed_names: Vec<String> = names[..visible].to_vec();
            let fields: Vec<Field> = (0..visible)
                .map(|i| project_schema.field(i).clone())
                .collect();
            let schema: SchemaRef = Arc::new(Schema::new(fields));
            node = self.add(
                NodeKind::Project {
                    exprs: trimmed,
                    names: trimmed_names,
                },
                vec![node],
                schema,
            );
        }

        let out_schema = self.plan.node(node).schema.clone();
        Ok((node, Scope::new(out_schema, None)))
    }

    fn resolve_select_item(
        &mut self,
        item: &SelectItem,
        scope: &Scope,
        out: &mut Vec<(Expression, String)>,
    ) -> EngineResult<()> {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                let resolved = self.resolve(expr, scope, true)?;
                let name = match expr {
                    SqlExpr::Identifier(ident) => ident.value.clone(),
                    SqlExpr::CompoundIdentifier(parts) => parts
                        .last()
                        .map(|i| i.value.clone())
                        .unwrap_or_else(|| resolved.to_string()),
                    _ => resolved.to_string(),
                };
                out.push((resolved, name));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                let resolved = self.resolve(expr, scope, true)?;
                out.push((resolved, alias.value.clone()));
            }
            SelectItem::Wildcard(_) => {
                for i in 0..scope.len() {
                    out.push((
                        Expression::column(scope.field_name(i), i),
                        scope.field_name(i).to_string(),
                    ));
                }
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let qualifier = object_tail(name);
                let mut matched = false;
                for i in 0..scope.len() {
                    if scope.qualifiers[i]
                        .as_deref()
                        .is_some_and(|q| q.eq_ignore_ascii_case(&qualifier))
                    {
                        out.push((
                            Expression::column(scope.field_name(i), i),
                            scope.field_name(i).to_string(),
                        ));
                        matched = true;
                    }
                }
                if !matched {
                    return Err(EngineError::UnresolvedName(format!(
                        "unknown table or alias '{qualifier}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_group_by(
        &mut self,
        group_by: &GroupByExpr,
        select_exprs: &[(Expression, String)],
        scope: &Scope,
    ) -> EngineResult<Vec<Expression>> {
        let items = match group_by {
            GroupByExpr::Expressions(items, modifiers) => {
                if !modifiers.is_empty() {
                    return Err(EngineError::Unsupported("GROUP BY modifiers".into()));
                }
                items
            }
            GroupByExpr::All(_) => {
                return Err(EngineError::Unsupported("GROUP BY ALL".into()));
            }
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            // Ordinals and select aliases point into the select list.
            if let SqlExpr::Value(Value::Number(n, _)) = item {
                let ordinal: usize = n.parse().map_err(|_| {
                    EngineError::InvalidInput(format!("bad GROUP BY ordinal '{n}'"))
                })?;
                let (expr, _) = select_exprs.get(ordinal.wrapping_sub(1)).ok_or_else(|| {
                    EngineError::InvalidInput(format!("GROUP BY ordinal {ordinal} is out of range"))
                })?;
                out.push(expr.clone());
                continue;
            }
            if let SqlExpr::Identifier(ident) = item {
                if scope.resolve(None, ident).is_err() {
                    if let Some((expr, _)) = select_exprs
                        .iter()
                        .find(|(_, name)| name.eq_ignore_ascii_case(&ident.value))
                    {
                        out.push(expr.clone());
                        continue;
                    }
                }
            }
            let resolved = self.resolve(item, scope, false)?;
            out.push(resolved);
        }
        Ok(out)
    }

    fn resolve_order_target(
        &mut self,
        item: &OrderByExpr,
        select_exprs: &[(Expression, String)],
        scope: &Scope,
    ) -> EngineResult<OrderTarget> {
        if let SqlExpr::Value(Value::Number(n, _)) = &item.expr {
            let ordinal: usize = n
                .parse()
                .map_err(|_| EngineError::InvalidInput(format!("bad ORDER BY ordinal '{n}'")))?;
            if ordinal == 0 || ordinal > select_exprs.len() {
                return Err(EngineError::InvalidInput(format!(
                    "ORDER BY ordinal {ordinal} is out of range"
                )));
            }
            return Ok(OrderTarget::Output(ordinal - 1));
        }
        if let SqlExpr::Identifier(ident) = &item.expr {
            if let Some(i) = select_exprs
                .iter()
                .position(|(_, name)| name.eq_ignore_ascii_case(&ident.value))
            {
                return Ok(OrderTarget::Output(i));
            }
        }
        let resolved = self.resolve(&item.expr, scope, true)?;
        Ok(OrderTarget::Expr(resolved))
    }

    // ------------------------------------------------------------------
    // FROM
    // ------------------------------------------------------------------

    fn plan_from(&mut self, from: &[TableWithJoins]) -> EngineResult<(NodeId, Scope)> {
        let mut iter = from.iter();
        let first = iter
            .next()
            .ok_or_else(|| EngineError::Unsupported("SELECT without a FROM clause".into()))?;
        let (mut node, mut scope) = self.plan_table_with_joins(first)?;
        // Comma-separated FROM items are cross joins.
        for item in iter {
            let (right_node, right_scope) = self.plan_table_with_joins(item)?;
            let schema = join_schema(JoinKind::Cross, &scope.schema, &right_scope.schema);
            node = self.add(
                NodeKind::Join {
                    kind: JoinKind::Cross,
                    on: vec![],
                    filter: None,
                },
                vec![node, right_node],
                schema.clone(),
            );
            scope = Scope::merge(&scope, &right_scope, schema);
        }
        Ok((node, scope))
    }

    fn plan_table_with_joins(&mut self, twj: &TableWithJoins) -> EngineResult<(NodeId, Scope)> {
        let (mut node, mut scope) = self.plan_table_factor(&twj.relation)?;
        for join in &twj.joins {
            // UNNEST in join position expands a list column of the
            // left side.
            if let TableFactor::UNNEST {
                alias, array_exprs, ..
            } = &join.relation
            {
                let outer = matches!(join.join_operator, JoinOperator::LeftOuter(_));
                (node, scope) =
                    self.plan_unnest(node, &scope, array_exprs, alias.as_ref(), outer)?;
                continue;
            }

            let (right_node, right_scope) = self.plan_table_factor(&join.relation)?;
            (node, scope) =
                self.plan_join(node, scope, right_node, right_scope, &join.join_operator)?;
        }
        Ok((node, scope))
    }

    fn plan_join(
        &mut self,
        left: NodeId,
        left_scope: Scope,
        right: NodeId,
        right_scope: Scope,
        operator: &JoinOperator,
    ) -> EngineResult<(NodeId, Scope)> {
        let (kind, constraint) = match operator {
            JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
            JoinOperator::LeftOuter(c) => (JoinKind::LeftOuter, Some(c)),
            JoinOperator::RightOuter(c) => (JoinKind::RightOuter, Some(c)),
            JoinOperator::FullOuter(c) => (JoinKind::FullOuter, Some(c)),
            JoinOperator::LeftSemi(c) => (JoinKind::LeftSemi, Some(c)),
            JoinOperator::LeftAnti(c) => (JoinKind::LeftAnti, Some(c)),
            JoinOperator::CrossJoin => (JoinKind::Cross, None),
            other => {
                return Err(EngineError::Unsupported(format!(
                    "join type is not supported: {other:?}"
                )))
            }
        };

        let combined_schema = join_schema(
            if kind == JoinKind::RightOuter {
                JoinKind::RightOuter
            } else {
                kind
            },
            &left_scope.schema,
            &right_scope.schema,
        );
        let combined_scope = if kind.left_only() {
            left_scope.clone()
        } else {
            Scope::merge(&left_scope, &right_scope, combined_schema.clone())
        };

        // Resolve the ON condition over both sides and split it into
        // equi pairs and a residual predicate.
        let mut on: Vec<(Expression, Expression)> = Vec::new();
        let mut residual: Vec<Expression> = Vec::new();
        let left_len = left_scope.len();
        if let Some(constraint) = constraint {
            match constraint {
                JoinConstraint::On(condition) => {
                    let full_scope = Scope::merge(
                        &left_scope,
                        &right_scope,
                        join_schema(JoinKind::Inner, &left_scope.schema, &right_scope.schema),
                    );
                    let resolved = self.resolve(condition, &full_scope, false)?;
                    for conjunct in resolved.split_conjunction() {
                        match split_equi_pair(&conjunct, left_len) {
                            Some((l, r)) => {
                                let lt = l.data_type(left_scope.schema.as_ref())?;
                                let rt = r.data_type(right_scope.schema.as_ref())?;
                                if lt != rt {
                                    return Err(EngineError::TypeMismatch(format!(
                                        "join keys {l} ({lt}) and {r} ({rt}) differ in type; \
                                         add an explicit CAST"
                                    )));
                                }
                                on.push((l, r));
                            }
                            None => residual.push(conjunct),
                        }
                    }
                }
                JoinConstraint::Using(columns) => {
                    for column in columns {
                        let li = left_scope.resolve(None, column)?;
                        let ri = right_scope.resolve(None, column)?;
                        let l = Expression::column(left_scope.field_name(li), li);
                        let r = Expression::column(right_scope.field_name(ri), ri);
                        let lt = l.data_type(left_scope.schema.as_ref())?;
                        let rt = r.data_type(right_scope.schema.as_ref())?;
                        if lt != rt {
                            return Err(EngineError::TypeMismatch(format!(
                                "USING column '{}' differs in type across sides",
                                column.value
                            )));
                        }
                        on.push((l, r));
                    }
                }
                JoinConstraint::Natural => {
                    return Err(EngineError::Unsupported("NATURAL joins".into()));
                }
                JoinConstraint::None => {}
            }
        }

        if kind.left_only() && !residual.is_empty() {
            return Err(EngineError::Unsupported(
                "semi/anti joins require pure equality conditions".into(),
            ));
        }
        let filter = Expression::conjunction(residual);

        // RIGHT OUTER is built as a swapped LEFT OUTER plus a projection
        // restoring the original column order.
        if kind == JoinKind::RightOuter {
            let swapped_on: Vec<(Expression, Expression)> =
                on.into_iter().map(|(l, r)| (r, l)).collect();
            let swapped_filter = filter.map(|f| {
                // Remap: left block moves after the right block.
                let right_len = right_scope.len();
                f.transform(&mut |e| match e {
                    Expression::Column { name, index } => {
                        let index = if index < left_len {
                            index + right_len
                        } else {
                            index - left_len
                        };
                        Expression::Column { name, index }
                    }
                    other => other,
                })
            });
            let swapped_schema =
                join_schema(JoinKind::LeftOuter, &right_scope.schema, &left_scope.schema);
            let join = self.add(
                NodeKind::Join {
                    kind: JoinKind::LeftOuter,
                    on: swapped_on,
                    filter: swapped_filter,
                },
                vec![right, left],
                swapped_schema.clone(),
            );
            // Reorder back to left ++ right.
            let right_len = right_scope.len();
            let mut exprs = Vec::with_capacity(left_len + right_len);
            let mut names = Vec::with_capacity(left_len + right_len);
            for i in 0..left_len {
                let name = swapped_schema.field(right_len + i).name().clone();
                exprs.push(Expression::column(name.clone(), right_len + i));
                names.push(name);
            }
            for i in 0..right_len {
                let name = swapped_schema.field(i).name().clone();
                exprs.push(Expression::column(name.clone(), i));
                names.push(name);
            }
            let node = self.add(
                NodeKind::Project { exprs, names },
                vec![join],
                combined_schema.clone(),
            );
            return Ok((node, combined_scope));
        }

        let node = self.add(
            NodeKind::Join { kind, on, filter },
            vec![left, right],
            combined_schema,
        );
        Ok((node, combined_scope))
    }

    fn plan_unnest(
        &mut self,
        left: NodeId,
        left_scope: &Scope,
        array_exprs: &[SqlExpr],
        alias: Option<&ast::TableAlias>,
        outer: bool,
    ) -> EngineResult<(NodeId, Scope)> {
        let [array_expr] = array_exprs else {
            return Err(EngineError::Unsupported(
                "UNNEST takes exactly one array expression".into(),
            ));
        };
        let resolved = self.resolve(array_expr, left_scope, false)?;

        // Non-column expressions are materialized first.
        let (input, column) = match &resolved {
            Expression::Column { index, .. } => (left, *index),
            _ => {
                let schema = left_scope.schema.clone();
                let mut exprs: Vec<Expression> = (0..left_scope.len())
                    .map(|i| Expression::column(left_scope.field_name(i), i))
                    .collect();
                let mut names: Vec<String> = (0..left_scope.len())
                    .map(|i| left_scope.field_name(i).to_string())
                    .collect();
                exprs.push(resolved.clone());
                names.push("__unnest_input".to_string());
                let mut fields: Vec<Field> =
                    schema.fields().iter().map(|f| f.as_ref().clone()).collect();
                fields.push(resolved.to_field("__unnest_input", schema.as_ref())?);
                let extended: SchemaRef = Arc::new(Schema::new(fields));
                let node = self.add(NodeKind::Project { exprs, names }, vec![left], extended);
                (node, left_scope.len())
            }
        };

        let input_schema = self.plan.node(input).schema.clone();
        let DataType::List(element_field) = input_schema.field(column).data_type() else {
            return Err(EngineError::TypeMismatch(format!(
                "UNNEST expects a list column, got {}",
                input_schema.field(column).data_type()
            )));
        };
        let element_name = alias.map_or_else(
            || "unnest".to_string(),
            |a| {
                a.columns
                    .first()
                    .map_or_else(|| a.name.value.clone(), |c| c.value.clone())
            },
        );

        let mut fields: Vec<Field> = input_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields.push(Field::new(
            &element_name,
            element_field.data_type().clone(),
            true,
        ));
        let schema: SchemaRef = Arc::new(Schema::new(fields));
        let node = self.add(
            NodeKind::Unnest {
                column,
                alias: element_name.clone(),
                outer,
                distinct: false,
            },
            vec![input],
            schema.clone(),
        );
        let mut qualifiers = vec![None; input_schema.fields().len()];
        qualifiers.push(alias.map(|a| a.name.value.clone()));
        // Input columns keep their old qualifiers.
        let mut scope = Scope { qualifiers, schema };
        for (i, q) in left_scope.qualifiers.iter().enumerate() {
            scope.qualifiers[i] = q.clone();
        }
        Ok((node, scope))
    }

    fn plan_table_factor(&mut self, factor: &TableFactor) -> EngineResult<(NodeId, Scope)> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let relation = object_tail(name);
                let qualifier = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| relation.trim_start_matches('$').to_string());

                // CTE reference?
                if let Some(cte_query) = self.ctes.get(&relation.to_lowercase()).cloned() {
                    let (node, scope) = self.plan_query(&cte_query)?;
                    let schema = scope.schema.clone();
                    let node = self.add(
                        NodeKind::Cte {
                            name: relation.to_lowercase(),
                        },
                        vec![node],
                        schema.clone(),
                    );
                    return Ok((node, Scope::new(schema, Some(qualifier))));
                }

                self.plan_scan(&relation, qualifier)
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let (node, scope) = self.plan_query(subquery)?;
                let qualifier = alias.as_ref().map(|a| a.name.value.clone());
                let schema = scope.schema.clone();
                let node = self.add(
                    NodeKind::SubqueryAlias {
                        alias: qualifier.clone().unwrap_or_else(|| "subquery".to_string()),
                    },
                    vec![node],
                    schema.clone(),
                );
                Ok((node, Scope::new(schema, qualifier)))
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.plan_table_with_joins(table_with_joins),
            TableFactor::UNNEST { .. } => Err(EngineError::Unsupported(
                "UNNEST requires a left-hand table to draw rows from".into(),
            )),
            other => Err(EngineError::Unsupported(format!(
                "table factor is not supported: {other}"
            ))),
        }
    }

    fn plan_scan(&mut self, relation: &str, qualifier: String) -> EngineResult<(NodeId, Scope)> {
        let normalized = relation.to_lowercase();
        let connector = self.context.connectors.resolve(&normalized)?;
        let base_schema = connector.probe_schema(&normalized)?;

        // Explicit FOR clause, or the implied FOR TODAY contract for
        // temporally partitioned connectors.
        let temporal = match self.temporal.get(&normalized) {
            Some(range) => Some(*range),
            None if connector.supports(Capability::TemporalPartitioning) => {
                Some(TemporalRange::single(self.context.today))
            }
            None => None,
        };

        let units = connector.list_units(&normalized, temporal.as_ref())?;
        let estimated_rows: Option<usize> = units.iter().map(|u| u.rows).sum();
        let capabilities = ScanCapabilities {
            projection: connector.supports(Capability::ProjectionPushdown),
            filters: connector.supports(Capability::FilterPushdown),
            limit: connector.supports(Capability::LimitPushdown),
        };

        let node = self.plan.add_node(
            NodeKind::Scan {
                relation: normalized,
                connector: connector.name().to_string(),
                base_schema: base_schema.clone(),
                projection: None,
                filters: vec![],
                limit: None,
                temporal,
                capabilities,
            },
            vec![],
            base_schema.clone(),
            estimated_rows,
        );
        Ok((node, Scope::new(base_schema, Some(qualifier))))
    }

    fn plan_in_subquery(
        &mut self,
        left: NodeId,
        scope: &Scope,
        expr: &SqlExpr,
        subquery: &Query,
        negated: bool,
    ) -> EngineResult<NodeId> {
        let probe = self.resolve(expr, scope, false)?;
        let (sub_node, sub_scope) = self.plan_query(subquery)?;
        if sub_scope.len() != 1 {
            return Err(EngineError::InvalidInput(format!(
                "IN subquery must produce one column, got {}",
                sub_scope.len()
            )));
        }
        let mut sub_expr = Expression::column(sub_scope.field_name(0), 0);
        let lt = probe.data_type(scope.schema.as_ref())?;
        let rt = sub_expr.data_type(sub_scope.schema.as_ref())?;
        if lt != rt {
            sub_expr = Expression::Cast {
                expr: Box::new(sub_expr),
                data_type: lt,
                safe: false,
            };
        }
        let kind = if negated {
            JoinKind::LeftAnti
        } else {
            JoinKind::LeftSemi
        };
        let schema = scope.schema.clone();
        Ok(self.add(
            NodeKind::Join {
                kind,
                on: vec![(probe, sub_expr)],
                filter: None,
            },
            vec![left, sub_node],
            schema,
        ))
    }

    fn apply_order_limit_offset(
        &mut self,
        mut node: NodeId,
        scope: Scope,
        order: &[OrderByExpr],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> EngineResult<(NodeId, Scope)> {
        if !order.is_empty() {
            let mut keys = Vec::with_capacity(order.len());
            for item in order {
                // Set operations and nested queries sort by output
                // columns only.
                let index = match &item.expr {
                    SqlExpr::Value(Value::Number(n, _)) => {
                        let ordinal: usize = n.parse().map_err(|_| {
                            EngineError::InvalidInput(format!("bad ORDER BY ordinal '{n}'"))
                        })?;
                        if ordinal == 0 || ordinal > scope.len() {
                            return Err(EngineError::InvalidInput(format!(
                                "ORDER BY ordinal {ordinal} is out of range"
                            )));
                        }
                        ordinal - 1
                    }
                    SqlExpr::Identifier(ident) => scope.resolve(None, ident)?,
                    other => {
                        return Err(EngineError::InvalidInput(format!(
                            "ORDER BY over a set operation must name an output column, got {other}"
                        )))
                    }
                };
                keys.push(SortKey {
                    expr: Expression::column(scope.field_name(index), index),
                    ascending: item.asc.unwrap_or(true),
                    nulls_first: item.nulls_first.unwrap_or(!item.asc.unwrap_or(true)),
                });
            }
            let schema = self.plan.node(node).schema.clone();
            node = self.add(NodeKind::Sort { keys, fetch: None }, vec![node], schema);
        }
        if let Some(offset) = offset {
            let schema = self.plan.node(node).schema.clone();
            node = self.add(NodeKind::Offset { offset }, vec![node], schema);
        }
        if let Some(limit) = limit {
            let schema = self.plan.node(node).schema.clone();
            node = self.add(NodeKind::Limit { limit }, vec![node], schema);
        }
        Ok((node, scope))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn resolve(
        &mut self,
        expr: &SqlExpr,
        scope: &Scope,
        allow_aggregates: bool,
    ) -> EngineResult<Expression> {
        let schema = scope.schema.clone();
        let resolved = match expr {
            SqlExpr::Identifier(ident) => {
                // "@name" identifiers are bound parameters.
                if ident.value.starts_with('@') {
                    let key = &ident.value[1..];
                    let value = self.context.params.get(key).ok_or_else(|| {
                        EngineError::UnresolvedName(format!("parameter '@{key}' is not bound"))
                    })?;
                    return Ok(Expression::Literal(value.clone()));
                }
                let index = scope.resolve(None, ident)?;
                Expression::column(scope.field_name(index), index)
            }
            SqlExpr::CompoundIdentifier(parts) => {
                let [qualifier, column] = parts.as_slice() else {
                    return Err(EngineError::Unsupported(format!(
                        "deeply qualified name {}",
                        parts
                            .iter()
                            .map(|i| i.value.clone())
                            .collect::<Vec<_>>()
                            .join(".")
                    )));
                };
                let index = scope.resolve(Some(qualifier), column)?;
                Expression::column(scope.field_name(index), index)
            }
            SqlExpr::Value(value) => Expression::Literal(literal_value(value)?),
            SqlExpr::TypedString { data_type, value } => typed_string_literal(data_type, value)?,
            SqlExpr::BinaryOp { left, op, right } => {
                let l = self.resolve(left, scope, allow_aggregates)?;
                let r = self.resolve(right, scope, allow_aggregates)?;
                match binary_operator(op)? {
                    MappedBinary::Op(op) => coerce_binary(op, l, r, schema.as_ref())?,
                    MappedBinary::Concat => Expression::ScalarFn {
                        func: ScalarFunction::Concat,
                        args: vec![l, r],
                    },
                }
            }
            SqlExpr::UnaryOp { op, expr } => {
                let inner = self.resolve(expr, scope, allow_aggregates)?;
                match op {
                    UnaryOperator::Not => Expression::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(inner),
                    },
                    UnaryOperator::Minus => match inner {
                        // Fold the sign into numeric literals.
                        Expression::Literal(ScalarValue::Int64(v)) => {
                            Expression::Literal(ScalarValue::Int64(-v))
                        }
                        Expression::Literal(ScalarValue::Float64(v)) => {
                            Expression::Literal(ScalarValue::Float64(-v))
                        }
                        other => Expression::Unary {
                            op: UnaryOp::Negate,
                            expr: Box::new(other),
                        },
                    },
                    UnaryOperator::Plus => inner,
                    other => {
                        return Err(EngineError::Unsupported(format!("unary operator {other}")))
                    }
                }
            }
            SqlExpr::IsNull(e) => unary(UnaryOp::IsNull, self.resolve(e, scope, allow_aggregates)?),
            SqlExpr::IsNotNull(e) => unary(
                UnaryOp::IsNotNull,
                self.resolve(e, scope, allow_aggregates)?,
            ),
            SqlExpr::IsTrue(e) => unary(UnaryOp::IsTrue, self.resolve(e, scope, allow_aggregates)?),
            SqlExpr::IsNotTrue(e) => unary(
                UnaryOp::IsNotTrue,
                self.resolve(e, scope, allow_aggregates)?,
            ),
            SqlExpr::IsFalse(e) => {
                unary(UnaryOp::IsFalse, self.resolve(e, scope, allow_aggregates)?)
            }
            SqlExpr::IsNotFalse(e) => unary(
                UnaryOp::IsNotFalse,
                self.resolve(e, scope, allow_aggregates)?,
            ),
            SqlExpr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let value = self.resolve(expr, scope, allow_aggregates)?;
                let low = self.resolve(low, scope, allow_aggregates)?;
                let high = self.resolve(high, scope, allow_aggregates)?;
                let lower = coerce_binary(BinaryOp::GtEq, value.clone(), low, schema.as_ref())?;
                let upper = coerce_binary(BinaryOp::LtEq, value, high, schema.as_ref())?;
                let both = Expression::and(lower, upper);
                if *negated {
                    Expression::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(both),
                    }
                } else {
                    both
                }
            }
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let value = self.resolve(expr, scope, allow_aggregates)?;
                let items = list
                    .iter()
                    .map(|i| self.resolve(i, scope, allow_aggregates))
                    .collect::<EngineResult<Vec<_>>>()?;
                Expression::InList {
                    expr: Box::new(value),
                    list: items,
                    negated: *negated,
                }
            }
            SqlExpr::InSubquery { .. } => {
                return Err(EngineError::Unsupported(
                    "IN (SELECT ...) is only supported as a top-level WHERE conjunct".into(),
                ))
            }
            SqlExpr::Like {
                negated,
                expr,
                pattern,
                ..
            } => self.resolve_like(expr, pattern, *negated, false, scope, allow_aggregates)?,
            SqlExpr::ILike {
                negated,
                expr,
                pattern,
                ..
            } => self.resolve_like(expr, pattern, *negated, true, scope, allow_aggregates)?,
            SqlExpr::Cast {
                kind,
                expr,
                data_type,
                ..
            } => {
                let inner = self.resolve(expr, scope, allow_aggregates)?;
                let target = arrow_type_of(data_type)?;
                let safe = matches!(kind, CastKind::TryCast | CastKind::SafeCast);
                Expression::Cast {
                    expr: Box::new(inner),
                    data_type: target,
                    safe,
                }
            }
            SqlExpr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                let operand = operand
                    .as_ref()
                    .map(|o| self.resolve(o, scope, allow_aggregates))
                    .transpose()?;
                let mut whens = Vec::with_capacity(conditions.len());
                for (condition, result) in conditions.iter().zip(results.iter()) {
                    let mut when = self.resolve(condition, scope, allow_aggregates)?;
                    // The simple form compares the operand to each WHEN.
                    if let Some(op) = &operand {
                        when = coerce_binary(BinaryOp::Eq, op.clone(), when, schema.as_ref())?;
                    }
                    let then = self.resolve(result, scope, allow_aggregates)?;
                    whens.push((when, then));
                }
                let else_expr = else_result
                    .as_ref()
                    .map(|e| self.resolve(e, scope, allow_aggregates))
                    .transpose()?
                    .map(Box::new);
                Expression::Case { whens, else_expr }
            }
            SqlExpr::Extract { field, expr, .. } => {
                let inner = self.resolve(expr, scope, allow_aggregates)?;
                let func = match field {
                    DateTimeField::Year => ScalarFunction::Year,
                    DateTimeField::Month => ScalarFunction::Month,
                    DateTimeField::Day => ScalarFunction::Day,
                    other => {
                        return Err(EngineError::Unsupported(format!(
                            "EXTRACT({other} FROM ...)"
                        )))
                    }
                };
                Expression::ScalarFn {
                    func,
                    args: vec![inner],
                }
            }
            SqlExpr::Substring {
                expr,
                substring_from,
                substring_for,
                ..
            } => {
                let mut args = vec![self.resolve(expr, scope, allow_aggregates)?];
                if let Some(from) = substring_from {
                    args.push(self.resolve(from, scope, allow_aggregates)?);
                } else {
                    args.push(Expression::Literal(ScalarValue::Int64(1)));
                }
                if let Some(count) = substring_for {
                    args.push(self.resolve(count, scope, allow_aggregates)?);
                }
                functions::validate_arity(ScalarFunction::Substring, args.len())?;
                Expression::ScalarFn {
                    func: ScalarFunction::Substring,
                    args,
                }
            }
            SqlExpr::Trim { expr, .. } => Expression::ScalarFn {
                func: ScalarFunction::Trim,
                args: vec![self.resolve(expr, scope, allow_aggregates)?],
            },
            SqlExpr::Function(function) => {
                self.resolve_function(function, scope, allow_aggregates)?
            }
            SqlExpr::Nested(inner) => self.resolve(inner, scope, allow_aggregates)?,
            SqlExpr::AnyOp {
                left,
                compare_op,
                right,
                ..
            } => self.resolve_any_all(left, compare_op, right, scope, allow_aggregates, false)?,
            SqlExpr::AllOp {
                left,
                compare_op,
                right,
            } => self.resolve_any_all(left, compare_op, right, scope, allow_aggregates, true)?,
            SqlExpr::Subquery(_) | SqlExpr::Exists { .. } => {
                return Err(EngineError::Unsupported(
                    "scalar subqueries and EXISTS".into(),
                ))
            }
            other => {
                return Err(EngineError::Unsupported(format!(
                    "expression is not supported: {other}"
                )))
            }
        };
        if !allow_aggregates {
            if let Expression::Aggregate(_) = &resolved {
                return Err(EngineError::InvalidInput(
                    "aggregate functions are not allowed here".into(),
                ));
            }
        }
        Ok(resolved)
    }

    fn resolve_like(
        &mut self,
        expr: &SqlExpr,
        pattern: &SqlExpr,
        negated: bool,
        case_insensitive: bool,
        scope: &Scope,
        allow_aggregates: bool,
    ) -> EngineResult<Expression> {
        let value = self.resolve(expr, scope, allow_aggregates)?;
        let pattern = self.resolve(pattern, scope, allow_aggregates)?;
        Ok(Expression::Like {
            expr: Box::new(value),
            pattern: Box::new(pattern),
            negated,
            case_insensitive,
        })
    }

    /// `x = ANY (a, b)` becomes `x IN (a, b)`; `x <> ALL (...)` becomes
    /// `x NOT IN (...)`.
    fn resolve_any_all(
        &mut self,
        left: &SqlExpr,
        compare_op: &BinaryOperator,
        right: &SqlExpr,
        scope: &Scope,
        allow_aggregates: bool,
        is_all: bool,
    ) -> EngineResult<Expression> {
        let SqlExpr::Tuple(items) = right else {
            return Err(EngineError::Unsupported(
                "ANY/ALL is supported over literal tuples only".into(),
            ));
        };
        let negated = match (compare_op, is_all) {
            (BinaryOperator::Eq, false) => false,
            (BinaryOperator::NotEq, true) => true,
            _ => {
                return Err(EngineError::Unsupported(format!(
                    "{compare_op} {} (...) is not supported",
                    if is_all { "ALL" } else { "ANY" }
                )))
            }
        };
        let value = self.resolve(left, scope, allow_aggregates)?;
        let list = items
            .iter()
            .map(|i| self.resolve(i, scope, allow_aggregates))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Expression::InList {
            expr: Box::new(value),
            list,
            negated,
        })
    }

    fn resolve_function(
        &mut self,
        function: &Function,
        scope: &Scope,
        allow_aggregates: bool,
    ) -> EngineResult<Expression> {
        if function.over.is_some() {
            return Err(EngineError::Unsupported("window functions".into()));
        }
        let name = object_tail(&function.name);

        let (args, distinct, order_by, has_wildcard) = match &function.args {
            FunctionArguments::None => (Vec::new(), false, Vec::new(), false),
            FunctionArguments::Subquery(_) => {
                return Err(EngineError::Unsupported(
                    "subquery function arguments".into(),
                ))
            }
            FunctionArguments::List(list) => {
                let distinct = matches!(
                    list.duplicate_treatment,
                    Some(ast::DuplicateTreatment::Distinct)
                );
                let mut order_by = Vec::new();
                for clause in &list.clauses {
                    match clause {
                        FunctionArgumentClause::OrderBy(keys) => {
                            for key in keys {
                                let expr = self.resolve(&key.expr, scope, false)?;
                                let ascending = key.asc.unwrap_or(true);
                                order_by.push(SortKey {
                                    expr,
                                    ascending,
                                    nulls_first: key.nulls_first.unwrap_or(!ascending),
                                });
                            }
                        }
                        other => {
                            return Err(EngineError::Unsupported(format!(
                                "function argument clause: {other}"
                            )))
                        }
                    }
                }
                let mut exprs = Vec::new();
                let mut has_wildcard = false;
                for arg in &list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                            exprs.push(self.resolve(e, scope, allow_aggregates)?);
                        }
                        FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {
                            has_wildcard = true;
                        }
                        other => {
                            return Err(EngineError::Unsupported(format!(
                                "function argument form: {other}"
                            )))
                        }
                    }
                }
                (exprs, distinct, order_by, has_wildcard)
            }
        };

        if let Some(func) = AggregateFunction::from_name(&name) {
            if !allow_aggregates {
                return Err(EngineError::InvalidInput(
                    "aggregate functions are not allowed here".into(),
                ));
            }
            let arg = if has_wildcard {
                if func != AggregateFunction::Count {
                    return Err(EngineError::InvalidInput(format!(
                        "{name}(*) is not defined"
                    )));
                }
                None
            } else {
                let mut args = args;
                if args.len() != 1 {
                    return Err(EngineError::InvalidInput(format!(
                        "{name} takes exactly one argument"
                    )));
                }
                Some(Box::new(args.remove(0)))
            };
            if !order_by.is_empty() && func != AggregateFunction::ArrayAgg {
                return Err(EngineError::Unsupported(format!(
                    "ORDER BY inside {name}(...)"
                )));
            }
            return Ok(Expression::Aggregate(AggregateExpr {
                func,
                arg,
                distinct,
                order_by,
            }));
        }

        // TRY_CAST/SAFE_CAST arrive as functions in some dialects.
        if name.eq_ignore_ascii_case("SAFE_CAST") || name.eq_ignore_ascii_case("TRY_CAST") {
            return Err(EngineError::Unsupported(
                "SAFE_CAST(x AS t) must use the cast syntax".into(),
            ));
        }

        let func = ScalarFunction::from_name(&name).ok_or_else(|| {
            EngineError::UnresolvedName(format!("function '{name}' does not exist"))
        })?;
        if distinct || has_wildcard || !order_by.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "{name} does not accept DISTINCT, * or ORDER BY"
            )));
        }
        functions::validate_arity(func, args.len())?;
        let args = coerce_function_args(func, args, scope.schema.as_ref())?;
        Ok(Expression::ScalarFn { func, args })
    }

    fn literal_usize(&mut self, expr: &SqlExpr, clause: &str) -> EngineResult<usize> {
        match expr {
            SqlExpr::Value(Value::Number(n, _)) => n.parse().map_err(|_| {
                EngineError::InvalidInput(format!("{clause} expects a non-negative integer"))
            }),
            other => Err(EngineError::InvalidInput(format!(
                "{clause} expects a literal integer, got {other}"
            ))),
        }
    }

    fn add(&mut self, kind: NodeKind, children: Vec<NodeId>, schema: SchemaRef) -> NodeId {
        let estimates: Vec<Option<usize>> = children
            .iter()
            .map(|&c| self.plan.node(c).estimated_rows)
            .collect();
        let estimated = estimate_rows(&kind, &estimates);
        self.plan.add_node(kind, children, schema, estimated)
    }
}

// ============================================================================
// Helpers
// ============================================================================

enum OrderTarget {
    /// A select-list output column.
    Output(usize),
    /// An expression over the pre-projection scope.
    Expr(Expression),
}

fn unary(op: UnaryOp, expr: Expression) -> Expression {
    Expression::Unary {
        op,
        expr: Box::new(expr),
    }
}

enum MappedBinary {
    Op(BinaryOp),
    Concat,
}

fn binary_operator(op: &BinaryOperator) -> EngineResult<MappedBinary> {
    let mapped = match op {
        BinaryOperator::Plus => BinaryOp::Plus,
        BinaryOperator::Minus => BinaryOp::Minus,
        BinaryOperator::Multiply => BinaryOp::Multiply,
        BinaryOperator::Divide => BinaryOp::Divide,
        BinaryOperator::Modulo => BinaryOp::Modulo,
        BinaryOperator::Eq => BinaryOp::Eq,
        BinaryOperator::NotEq => BinaryOp::NotEq,
        BinaryOperator::Lt => BinaryOp::Lt,
        BinaryOperator::LtEq => BinaryOp::LtEq,
        BinaryOperator::Gt => BinaryOp::Gt,
        BinaryOperator::GtEq => BinaryOp::GtEq,
        BinaryOperator::And => BinaryOp::And,
        BinaryOperator::Or => BinaryOp::Or,
        BinaryOperator::StringConcat => return Ok(MappedBinary::Concat),
        other => return Err(EngineError::Unsupported(format!("binary operator {other}"))),
    };
    Ok(MappedBinary::Op(mapped))
}

fn literal_value(value: &Value) -> EngineResult<ScalarValue> {
    match value {
        Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(ScalarValue::Int64(i))
            } else {
                n.parse::<f64>()
                    .map(ScalarValue::Float64)
                    .map_err(|_| EngineError::Parse(format!("bad numeric literal '{n}'")))
            }
        }
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
            Ok(ScalarValue::Utf8(s.clone()))
        }
        Value::Boolean(b) => Ok(ScalarValue::Boolean(*b)),
        Value::Null => Ok(ScalarValue::Null),
        other => Err(EngineError::Unsupported(format!(
            "literal form {other} is not supported"
        ))),
    }
}

fn typed_string_literal(data_type: &ast::DataType, value: &str) -> EngineResult<Expression> {
    match data_type {
        ast::DataType::Date => {
            let date = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map_err(|_| EngineError::InvalidInput(format!("bad DATE literal '{value}'")))?;
            let days = (date - chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default())
                .num_days() as i32;
            Ok(Expression::Literal(ScalarValue::Date32(days)))
        }
        other => Err(EngineError::Unsupported(format!(
            "typed literal {other} '{value}'"
        ))),
    }
}

/// Map a SQL type name to an Arrow type. The string fallback keeps the
/// mapping stable across parser versions.
fn arrow_type_of(data_type: &ast::DataType) -> EngineResult<DataType> {
    let rendered = data_type.to_string().to_ascii_uppercase();
    let mapped = match rendered.as_str() {
        "BOOLEAN" | "BOOL" => DataType::Boolean,
        "TINYINT" => DataType::Int8,
        "SMALLINT" => DataType::Int16,
        "INT" | "INTEGER" => DataType::Int64,
        "BIGINT" => DataType::Int64,
        "REAL" | "FLOAT" | "FLOAT4" => DataType::Float32,
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => DataType::Float64,
        "DATE" => DataType::Date32,
        "TIMESTAMP" => DataType::Timestamp(TimeUnit::Microsecond, None),
        other => {
            if other.starts_with("VARCHAR")
                || other.starts_with("CHAR")
                || other == "TEXT"
                || other == "STRING"
            {
                DataType::Utf8
            } else if other.starts_with("DECIMAL") || other.starts_with("NUMERIC") {
                return Err(EngineError::Unsupported(
                    "arbitrary-precision decimals".into(),
                ));
            } else {
                return Err(EngineError::Unsupported(format!("SQL type {other}")));
            }
        }
    };
    Ok(mapped)
}

/// Numeric scalar functions take 64-bit arguments; narrower inputs are
/// widened with inserted casts.
fn coerce_function_args(
    func: ScalarFunction,
    args: Vec<Expression>,
    schema: &Schema,
) -> EngineResult<Vec<Expression>> {
    let numeric = matches!(
        func,
        ScalarFunction::Abs
            | ScalarFunction::Ceil
            | ScalarFunction::Floor
            | ScalarFunction::Round
            | ScalarFunction::Sqrt
    );
    if !numeric {
        return Ok(args);
    }
    args.into_iter()
        .map(|arg| {
            let widened = match arg.data_type(schema)? {
                DataType::Int8 | DataType::Int16 | DataType::Int32 => Some(DataType::Int64),
                DataType::Float32 => Some(DataType::Float64),
                _ => None,
            };
            Ok(match widened {
                Some(data_type) => Expression::Cast {
                    expr: Box::new(arg),
                    data_type,
                    safe: false,
                },
                None => arg,
            })
        })
        .collect()
}

fn split_sql_conjunction(expr: &SqlExpr) -> Vec<&SqlExpr> {
    match expr {
        SqlExpr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut parts = split_sql_conjunction(left);
            parts.extend(split_sql_conjunction(right));
            parts
        }
        SqlExpr::Nested(inner) => split_sql_conjunction(inner),
        other => vec![other],
    }
}

/// Recognize `left_col = right_col` across the join boundary. Returns
/// the pair normalized to (left-bound, right-bound with local indices).
fn split_equi_pair(conjunct: &Expression, left_len: usize) -> Option<(Expression, Expression)> {
    let Expression::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = conjunct
    else {
        return None;
    };
    let side_of = |e: &Expression| {
        let columns = e.referenced_columns();
        if columns.is_empty() {
            return None;
        }
        if columns.iter().all(|&c| c < left_len) {
            Some(0)
        } else if columns.iter().all(|&c| c >= left_len) {
            Some(1)
        } else {
            None
        }
    };
    match (side_of(left), side_of(right)) {
        (Some(0), Some(1)) => Some((
            left.as_ref().clone(),
            right.as_ref().clone().shift_columns(-(left_len as i64)),
        )),
        (Some(1), Some(0)) => Some((
            right.as_ref().clone(),
            left.as_ref().clone().shift_columns(-(left_len as i64)),
        )),
        _ => None,
    }
}

fn collect_aggregates(expr: &Expression, out: &mut Vec<AggregateExpr>) {
    expr.visit(&mut |e| {
        if let Expression::Aggregate(agg) = e {
            if !out.contains(agg) {
                out.push(agg.clone());
            }
        }
    });
}

/// Rewrite an expression over the aggregate node's output: group
/// expressions and aggregate calls become column references; any other
/// column reference is an error.
fn rewrite_over_aggregate(
    expr: Expression,
    group_exprs: &[Expression],
    aggregates: &[AggregateExpr],
    names: &[String],
) -> EngineResult<Expression> {
    if let Some(i) = group_exprs.iter().position(|g| g == &expr) {
        return Ok(Expression::column(names[i].clone(), i));
    }
    if let Expression::Aggregate(agg) = &expr {
        let i = aggregates
            .iter()
            .position(|a| a == agg)
            .ok_or_else(|| EngineError::Internal("aggregate was not collected".into()))?;
        let index = group_exprs.len() + i;
        return Ok(Expression::column(names[index].clone(), index));
    }
    match expr {
        Expression::Column { name, .. } => Err(EngineError::UnresolvedName(format!(
            "column '{name}' must appear in GROUP BY or inside an aggregate"
        ))),
        Expression::Literal(_) => Ok(expr),
        Expression::ScalarFn { func, args } => Ok(Expression::ScalarFn {
            func,
            args: args
                .into_iter()
                .map(|a| rewrite_over_aggregate(a, group_exprs, aggregates, names))
                .collect::<EngineResult<Vec<_>>>()?,
        }),
        Expression::Binary { op, left, right } => Ok(Expression::Binary {
            op,
            left: Box::new(rewrite_over_aggregate(
                *left,
                group_exprs,
                aggregates,
                names,
            )?),
            right: Box::new(rewrite_over_aggregate(
                *right,
                group_exprs,
                aggregates,
                names,
            )?),
        }),
        Expression::Unary { op, expr } => Ok(Expression::Unary {
            op,
            expr: Box::new(rewrite_over_aggregate(
                *expr,
                group_exprs,
                aggregates,
                names,
            )?),
        }),
        Expression::Case { whens, else_expr } => Ok(Expression::Case {
            whens: whens
                .into_iter()
                .map(|(w, t)| {
                    Ok((
                        rewrite_over_aggregate(w, group_exprs, aggregates, names)?,
                        rewrite_over_aggregate(t, group_exprs, aggregates, names)?,
                    ))
                })
                .collect::<EngineResult<Vec<_>>>()?,
            else_expr: else_expr
                .map(|e| rewrite_over_aggregate(*e, group_exprs, aggregates, names).map(Box::new))
                .transpose()?,
        }),
        Expression::InList {
            expr,
            list,
            negated,
        } => Ok(Expression::InList {
            expr: Box::new(rewrite_over_aggregate(
                *expr,
                group_exprs,
                aggregates,
                names,
            )?),
            list: list
                .into_iter()
                .map(|i| rewrite_over_aggregate(i, group_exprs, aggregates, names))
                .collect::<EngineResult<Vec<_>>>()?,
            negated,
        }),
        Expression::Cast {
            expr,
            data_type,
            safe,
        } => Ok(Expression::Cast {
            expr: Box::new(rewrite_over_aggregate(
                *expr,
                group_exprs,
                aggregates,
                names,
            )?),
            data_type,
            safe,
        }),
        Expression::Like {
            expr,
            pattern,
            negated,
            case_insensitive,
        } => Ok(Expression::Like {
            expr: Box::new(rewrite_over_aggregate(
                *expr,
                group_exprs,
                aggregates,
                names,
            )?),
            pattern: Box::new(rewrite_over_aggregate(
                *pattern,
                group_exprs,
                aggregates,
                names,
            )?),
            negated,
            case_insensitive,
        }),
        Expression::Aggregate(_) => unreachable!("handled above"),
    }
}

fn object_tail(name: &ObjectName) -> String {
    name.0.last().map(|i| i.value.clone()).unwrap_or_default()
}

fn statement_label(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::CreateTable { .. } => "CREATE TABLE",
        Statement::Drop { .. } => "DROP",
        _ => "statement",
    }
}

fn body_label(body: &SetExpr) -> &'static str {
    match body {
        SetExpr::Values(_) => "VALUES",
        SetExpr::Insert(_) => "INSERT",
        SetExpr::Table(_) => "TABLE",
        _ => "query body",
    }
}
