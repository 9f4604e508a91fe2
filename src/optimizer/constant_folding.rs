//! Constant folding and boolean simplification.
//!
//! Reduces literal subtrees once at plan time, applies the arithmetic
//! identities `x*0 -> 0`, `x*1 -> x`, `x+0 -> x`, collapses boolean
//! operators against literals, and pushes NOT inward (De Morgan). The
//! evaluator assumes folded input at runtime.

use super::RewriteStrategy;
use crate::error::EngineResult;
use crate::expression::{BinaryOp, Expression, UnaryOp};
use crate::plan::{LogicalPlan, NodeId, NodeKind};
use crate::vector::ScalarValue;

pub struct ConstantFolding;

impl RewriteStrategy for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant_folding"
    }

    fn apply(&self, plan: &mut LogicalPlan, node: NodeId) -> EngineResult<bool> {
        let mut mutated = false;
        let kind = &mut plan.node_mut(node).kind;
        match kind {
            NodeKind::Filter { predicate } => {
                let folded = fold(predicate.clone(), &mut mutated);
                *predicate = folded;
            }
            NodeKind::Project { exprs, .. } => {
                for expr in exprs.iter_mut() {
                    *expr = fold(expr.clone(), &mut mutated);
                }
            }
            NodeKind::Join { on, filter, .. } => {
                for (l, r) in on.iter_mut() {
                    *l = fold(l.clone(), &mut mutated);
                    *r = fold(r.clone(), &mut mutated);
                }
                if let Some(f) = filter {
                    *f = fold(f.clone(), &mut mutated);
                }
            }
            NodeKind::Aggregate {
                group_by,
                aggregates,
                ..
            } => {
                for expr in group_by.iter_mut() {
                    *expr = fold(expr.clone(), &mut mutated);
                }
                for agg in aggregates.iter_mut() {
                    if let Some(arg) = &mut agg.arg {
                        *arg = Box::new(fold(arg.as_ref().clone(), &mut mutated));
                    }
                }
            }
            NodeKind::Scan { filters, .. } => {
                for expr in filters.iter_mut() {
                    *expr = fold(expr.clone(), &mut mutated);
                }
            }
            _ => {}
        }
        Ok(mutated)
    }
}

/// Fold one expression bottom-up. Sets `mutated` when anything changed.
pub fn fold(expr: Expression, mutated: &mut bool) -> Expression {
    expr.transform(&mut |e| {
        let folded = fold_once(&e);
        if let Some(folded) = folded {
            *mutated = true;
            folded
        } else {
            e
        }
    })
}

#[allow(clippy::too_many_lines)]
fn fold_once(expr: &Expression) -> Option<Expression> {
    match expr {
        Expression::Binary { op, left, right } => {
            // Literal-literal reduction.
            if let (Expression::Literal(l), Expression::Literal(r)) =
                (left.as_ref(), right.as_ref())
            {
                if let Some(value) = eval_literal_binary(*op, l, r) {
                    return Some(Expression::Literal(value));
                }
            }
            // Arithmetic identities.
            match op {
                BinaryOp::Multiply => {
                    if is_int_literal(right, 0) || is_int_literal(left, 0) {
                        return Some(Expression::Literal(ScalarValue::Int64(0)));
                    }
                    if is_int_literal(right, 1) {
                        return Some(left.as_ref().clone());
                    }
                    if is_int_literal(left, 1) {
                        return Some(right.as_ref().clone());
                    }
                }
                BinaryOp::Plus => {
                    if is_int_literal(right, 0) {
                        return Some(left.as_ref().clone());
                    }
                    if is_int_literal(left, 0) {
                        return Some(right.as_ref().clone());
                    }
                }
                BinaryOp::Minus => {
                    if is_int_literal(right, 0) {
                        return Some(left.as_ref().clone());
                    }
                }
                BinaryOp::Divide => {
                    if is_int_literal(right, 1) {
                        return Some(left.as_ref().clone());
                    }
                }
                BinaryOp::And => {
                    if is_bool_literal(left, false) || is_bool_literal(right, false) {
                        return Some(Expression::Literal(ScalarValue::Boolean(false)));
                    }
                    if is_bool_literal(left, true) {
                        return Some(right.as_ref().clone());
                    }
                    if is_bool_literal(right, true) {
                        return Some(left.as_ref().clone());
                    }
                }
                BinaryOp::Or => {
                    if is_bool_literal(left, true) || is_bool_literal(right, true) {
                        return Some(Expression::Literal(ScalarValue::Boolean(true)));
                    }
                    if is_bool_literal(left, false) {
                        return Some(right.as_ref().clone());
                    }
                    if is_bool_literal(right, false) {
                        return Some(left.as_ref().clone());
                    }
                }
                _ => {}
            }
            None
        }
        Expression::Unary { op, expr: inner } => match (op, inner.as_ref()) {
            // NOT over literals and double negation.
            (UnaryOp::Not, Expression::Literal(ScalarValue::Boolean(b))) => {
                Some(Expression::Literal(ScalarValue::Boolean(!b)))
            }
            (
                UnaryOp::Not,
                Expression::Unary {
                    op: UnaryOp::Not,
                    expr,
                },
            ) => Some(expr.as_ref().clone()),
            // De Morgan: push NOT into conjunctions and disjunctions.
            (
                UnaryOp::Not,
                Expression::Binary {
                    op: BinaryOp::And,
                    left,
                    right,
                },
            ) => Some(Expression::binary(
                BinaryOp::Or,
                negate(left.as_ref().clone()),
                negate(right.as_ref().clone()),
            )),
            (
                UnaryOp::Not,
                Expression::Binary {
                    op: BinaryOp::Or,
                    left,
                    right,
                },
            ) => Some(Expression::binary(
                BinaryOp::And,
                negate(left.as_ref().clone()),
                negate(right.as_ref().clone()),
            )),
            (UnaryOp::Negate, Expression::Literal(ScalarValue::Int64(v))) => {
                Some(Expression::Literal(ScalarValue::Int64(-v)))
            }
            (UnaryOp::Negate, Expression::Literal(ScalarValue::Float64(v))) => {
                Some(Expression::Literal(ScalarValue::Float64(-v)))
            }
            (UnaryOp::IsNull, Expression::Literal(v)) => {
                Some(Expression::Literal(ScalarValue::Boolean(v.is_null())))
            }
            (UnaryOp::IsNotNull, Expression::Literal(v)) => {
                Some(Expression::Literal(ScalarValue::Boolean(!v.is_null())))
            }
            _ => None,
        },
        Expression::Case { whens, else_expr } => {
            // A literally-true first branch decides the whole CASE.
            match whens.first() {
                Some((condition, then)) if is_bool_literal_expr(condition, true) => {
                    Some(then.clone())
                }
                Some((condition, _)) if is_bool_literal_expr(condition, false) => {
                    let mut remaining = whens.clone();
                    remaining.remove(0);
                    if remaining.is_empty() {
                        Some(
                            else_expr
                                .as_ref()
                                .map_or(Expression::Literal(ScalarValue::Null), |e| {
                                    e.as_ref().clone()
                                }),
                        )
                    } else {
                        Some(Expression::Case {
                            whens: remaining,
                            else_expr: else_expr.clone(),
                        })
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn negate(expr: Expression) -> Expression {
    Expression::Unary {
        op: UnaryOp::Not,
        expr: Box::new(expr),
    }
}

fn is_int_literal(expr: &Expression, value: i64) -> bool {
    matches!(expr, Expression::Literal(ScalarValue::Int64(v)) if *v == value)
}

fn is_bool_literal(expr: &Expression, value: bool) -> bool {
    matches!(expr, Expression::Literal(ScalarValue::Boolean(v)) if *v == value)
}

fn is_bool_literal_expr(expr: &Expression, value: bool) -> bool {
    is_bool_literal(expr, value)
}

/// Evaluate a binary operator over two literals. NULL operands follow
/// SQL semantics: arithmetic and comparisons yield NULL.
fn eval_literal_binary(
    op: BinaryOp,
    left: &ScalarValue,
    right: &ScalarValue,
) -> Option<ScalarValue> {
    use ScalarValue::{Boolean, Float64, Int64, Null, Utf8};

    if left.is_null() || right.is_null() {
        return match op {
            // Kleene: false AND NULL = false, true OR NULL = true.
            BinaryOp::And if is_false(left) || is_false(right) => Some(Boolean(false)),
            BinaryOp::Or if is_true(left) || is_true(right) => Some(Boolean(true)),
            _ => Some(Null),
        };
    }

    match op {
        BinaryOp::Plus
        | BinaryOp::Minus
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Modulo => match (left, right) {
            (Int64(a), Int64(b)) => {
                let value = match op {
                    BinaryOp::Plus => a.checked_add(*b)?,
                    BinaryOp::Minus => a.checked_sub(*b)?,
                    BinaryOp::Multiply => a.checked_mul(*b)?,
                    BinaryOp::Divide => a.checked_div(*b)?,
                    _ => a.checked_rem(*b)?,
                };
                Some(Int64(value))
            }
            (Float64(a), Float64(b)) => {
                let value = match op {
                    BinaryOp::Plus => a + b,
                    BinaryOp::Minus => a - b,
                    BinaryOp::Multiply => a * b,
                    BinaryOp::Divide => a / b,
                    _ => a % b,
                };
                Some(Float64(value))
            }
            _ => None,
        },
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Utf8(a), Utf8(b)) => a.cmp(b),
                _ => left.try_cmp(right)?,
            };
            let result = match op {
                BinaryOp::Eq => ordering.is_eq(),
                BinaryOp::NotEq => !ordering.is_eq(),
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Some(Boolean(result))
        }
        BinaryOp::And | BinaryOp::Or => match (left, right) {
            (Boolean(a), Boolean(b)) => Some(Boolean(if op == BinaryOp::And {
                *a && *b
            } else {
                *a || *b
            })),
            _ => None,
        },
    }
}

fn is_true(v: &ScalarValue) -> bool {
    matches!(v, ScalarValue::Boolean(true))
}

fn is_false(v: &ScalarValue) -> bool {
    matches!(v, ScalarValue::Boolean(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    fn lit(v: i64) -> Expression {
        Expression::Literal(ScalarValue::Int64(v))
    }

    #[test]
    fn test_literal_arithmetic() {
        let mut mutated = false;
        let folded = fold(
            Expression::binary(BinaryOp::Plus, lit(1), lit(2)),
            &mut mutated,
        );
        assert!(mutated);
        assert_eq!(folded, lit(3));
    }

    #[test]
    fn test_multiply_by_zero_and_one() {
        let mut mutated = false;
        let x = Expression::column("x", 0);
        assert_eq!(
            fold(
                Expression::binary(BinaryOp::Multiply, x.clone(), lit(0)),
                &mut mutated
            ),
            lit(0)
        );
        assert_eq!(
            fold(
                Expression::binary(BinaryOp::Multiply, x.clone(), lit(1)),
                &mut mutated
            ),
            x.clone()
        );
        assert_eq!(
            fold(
                Expression::binary(BinaryOp::Plus, x.clone(), lit(0)),
                &mut mutated
            ),
            x
        );
    }

    #[test]
    fn test_de_morgan() {
        let mut mutated = false;
        let a = Expression::column("a", 0);
        let b = Expression::column("b", 1);
        let folded = fold(negate(Expression::and(a.clone(), b.clone())), &mut mutated);
        assert_eq!(
            folded,
            Expression::binary(BinaryOp::Or, negate(a), negate(b))
        );
    }

    #[test]
    fn test_nested_fold() {
        // (2 * 3) + (10 / 2) -> 11
        let mut mutated = false;
        let folded = fold(
            Expression::binary(
                BinaryOp::Plus,
                Expression::binary(BinaryOp::Multiply, lit(2), lit(3)),
                Expression::binary(BinaryOp::Divide, lit(10), lit(2)),
            ),
            &mut mutated,
        );
        assert_eq!(folded, lit(11));
    }

    #[test]
    fn test_null_propagation() {
        let mut mutated = false;
        let folded = fold(
            Expression::binary(
                BinaryOp::Plus,
                Expression::Literal(ScalarValue::Null),
                lit(1),
            ),
            &mut mutated,
        );
        assert_eq!(folded, Expression::Literal(ScalarValue::Null));
    }

    #[test]
    fn test_folding_preserves_evaluation() {
        use crate::expression::evaluate;
        use crate::morsel::{schema_from_fields, Morsel};
        use crate::vector::Vector;
        use arrow::array::{ArrayRef, Int64Array};
        use arrow::datatypes::DataType;
        use std::sync::Arc;

        let schema = schema_from_fields(vec![("x".to_string(), DataType::Int64, true)]);
        let morsel = Morsel::try_new(
            schema,
            vec![Vector::new(
                Arc::new(Int64Array::from(vec![Some(1), None, Some(-4)])) as ArrayRef,
            )],
        )
        .expect("morsel");

        // x * 1 + (2 * 3) over every row equals its folded form.
        let expr = Expression::binary(
            BinaryOp::Plus,
            Expression::binary(BinaryOp::Multiply, Expression::column("x", 0), lit(1)),
            Expression::binary(BinaryOp::Multiply, lit(2), lit(3)),
        );
        let mut mutated = false;
        let folded = fold(expr.clone(), &mut mutated);
        assert!(mutated);

        let raw = evaluate(&expr, &morsel).expect("eval");
        let reduced = evaluate(&folded, &morsel).expect("eval");
        let a = raw
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        let b = reduced
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        for i in 0..3 {
            assert_eq!(a.is_valid(i), b.is_valid(i));
            if a.is_valid(i) {
                assert_eq!(a.value(i), b.value(i));
            }
        }
    }

    #[test]
    fn test_fold_is_stable() {
        // Folding a fixpoint expression reports no mutation.
        let expr = Expression::binary(BinaryOp::Eq, Expression::column("x", 0), lit(3));
        let mut mutated = false;
        let folded = fold(expr.clone(), &mut mutated);
        assert!(!mutated);
        assert_eq!(folded, expr);
    }
}
