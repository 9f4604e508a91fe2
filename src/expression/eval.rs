//! Expression evaluation over morsels.
//!
//! One morsel in, one vector out, same length. Three-valued logic
//! throughout: arithmetic on NULL yields NULL, AND/OR follow Kleene
//! truth tables, the IS family produces pure booleans. The optimizer has
//! already folded constants; the evaluator assumes no folding is needed.
//!
//! Inside `TRY(...)` the evaluator runs in safe mode: division by zero
//! and failed casts produce NULL instead of aborting the query.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Scalar, StringArray};
use arrow::compute::kernels::boolean::{and_kleene, not, or_kleene};
use arrow::compute::kernels::cmp;
use arrow::compute::kernels::numeric;
use arrow::compute::kernels::zip::zip;
use arrow::compute::{cast_with_options, nullif, CastOptions};
use arrow::datatypes::DataType;

use super::{BinaryOp, Expression, ScalarFunction, UnaryOp};
use crate::error::{EngineError, EngineResult};
use crate::morsel::Morsel;
use crate::vector::{kernels, ScalarValue, Vector};

/// Evaluation mode. `safe` is set inside `TRY(...)` and `TRY_CAST`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext {
    pub safe: bool,
}

/// Evaluate `expr` over `morsel`, producing a vector of the same length.
pub fn evaluate(expr: &Expression, morsel: &Morsel) -> EngineResult<Vector> {
    eval(expr, morsel, EvalContext::default())
}

/// Evaluate a boolean predicate into a three-valued mask.
pub fn evaluate_mask(expr: &Expression, morsel: &Morsel) -> EngineResult<BooleanArray> {
    let vector = evaluate(expr, morsel)?;
    as_boolean(&vector)
}

fn eval(expr: &Expression, morsel: &Morsel, ctx: EvalContext) -> EngineResult<Vector> {
    let len = morsel.num_rows();
    match expr {
        Expression::Literal(value) => {
            let data_type = value.data_type();
            Ok(Vector::new(value.to_array(&data_type, len)?))
        }
        Expression::Column { index, name } => {
            if *index >= morsel.num_columns() {
                return Err(EngineError::Internal(format!(
                    "column {name} (#{index}) out of range at evaluation time"
                )));
            }
            Ok(morsel.column(*index).clone())
        }
        Expression::Binary { op, left, right } => eval_binary(*op, left, right, morsel, ctx),
        Expression::Unary { op, expr } => eval_unary(*op, expr, morsel, ctx),
        Expression::ScalarFn { func, args } => {
            if *func == ScalarFunction::Try {
                let arg = args.first().ok_or_else(|| {
                    EngineError::InvalidInput("TRY takes exactly one argument".into())
                })?;
                return eval(arg, morsel, EvalContext { safe: true });
            }
            let inputs = args
                .iter()
                .map(|a| eval(a, morsel, ctx))
                .collect::<EngineResult<Vec<_>>>()?;
            super::functions::evaluate_scalar_fn(*func, &inputs, len)
        }
        Expression::Aggregate(_) => Err(EngineError::Internal(
            "aggregate expression reached the scalar evaluator".into(),
        )),
        Expression::Case { whens, else_expr } => {
            let result_type = expr.data_type(morsel.schema().as_ref())?;
            let mut result: ArrayRef = match else_expr {
                Some(e) => eval(e, morsel, ctx)?.to_arrow(),
                None => ScalarValue::Null.to_array(&result_type, len)?,
            };
            // Last-to-first so the earliest matching WHEN wins.
            for (when, then) in whens.iter().rev() {
                let mask = kernels::normalize_mask(&evaluate_mask_ctx(when, morsel, ctx)?);
                let value = eval(then, morsel, ctx)?.to_arrow();
                result = zip(&mask, &value, &result)?;
            }
            Ok(Vector::new(result))
        }
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let value = eval(expr, morsel, ctx)?;
            let mut acc: Option<BooleanArray> = None;
            for item in list {
                let item_vec = eval(item, morsel, ctx)?;
                let mask = kernels::compare(kernels::CompareOp::Eq, &value, &item_vec)?;
                acc = Some(match acc {
                    Some(prev) => or_kleene(&prev, &mask)?,
                    None => mask,
                });
            }
            let mask = match acc {
                Some(m) => m,
                None => BooleanArray::from(vec![false; len]),
            };
            let mask = if *negated { not(&mask)? } else { mask };
            Ok(Vector::new(Arc::new(mask)))
        }
        Expression::Cast {
            expr,
            data_type,
            safe,
        } => {
            let value = eval(expr, morsel, ctx)?;
            cast_vector(&value, data_type, *safe || ctx.safe)
        }
        Expression::Like {
            expr,
            pattern,
            negated,
            case_insensitive,
        } => eval_like(expr, pattern, *negated, *case_insensitive, morsel, ctx),
    }
}

fn evaluate_mask_ctx(
    expr: &Expression,
    morsel: &Morsel,
    ctx: EvalContext,
) -> EngineResult<BooleanArray> {
    let vector = eval(expr, morsel, ctx)?;
    as_boolean(&vector)
}

fn as_boolean(vector: &Vector) -> EngineResult<BooleanArray> {
    vector
        .array()
        .as_any()
        .downcast_ref::<BooleanArray>()
        .cloned()
        .ok_or_else(|| {
            EngineError::TypeMismatch(format!(
                "expected a boolean expression, got {}",
                vector.data_type()
            ))
        })
}

fn eval_binary(
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    morsel: &Morsel,
    ctx: EvalContext,
) -> EngineResult<Vector> {
    match op {
        BinaryOp::And => {
            let l = evaluate_mask_ctx(left, morsel, ctx)?;
            // Short-circuit: a mask of all false decides the conjunction.
            if l.null_count() == 0 && l.true_count() == 0 {
                return Ok(Vector::new(Arc::new(l)));
            }
            let r = evaluate_mask_ctx(right, morsel, ctx)?;
            Ok(Vector::new(Arc::new(and_kleene(&l, &r)?)))
        }
        BinaryOp::Or => {
            let l = evaluate_mask_ctx(left, morsel, ctx)?;
            if l.null_count() == 0 && l.true_count() == l.len() {
                return Ok(Vector::new(Arc::new(l)));
            }
            let r = evaluate_mask_ctx(right, morsel, ctx)?;
            Ok(Vector::new(Arc::new(or_kleene(&l, &r)?)))
        }
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => {
            let l = eval(left, morsel, ctx)?;
            let r = eval(right, morsel, ctx)?;
            let compare_op = match op {
                BinaryOp::Eq => kernels::CompareOp::Eq,
                BinaryOp::NotEq => kernels::CompareOp::NotEq,
                BinaryOp::Lt => kernels::CompareOp::Lt,
                BinaryOp::LtEq => kernels::CompareOp::LtEq,
                BinaryOp::Gt => kernels::CompareOp::Gt,
                _ => kernels::CompareOp::GtEq,
            };
            Ok(Vector::new(Arc::new(kernels::compare(compare_op, &l, &r)?)))
        }
        BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply => {
            let l = eval(left, morsel, ctx)?.to_arrow();
            let r = eval(right, morsel, ctx)?.to_arrow();
            let result = match op {
                BinaryOp::Plus => numeric::add(&l, &r),
                BinaryOp::Minus => numeric::sub(&l, &r),
                _ => numeric::mul(&l, &r),
            }?;
            Ok(Vector::new(result))
        }
        BinaryOp::Divide | BinaryOp::Modulo => {
            let l = eval(left, morsel, ctx)?.to_arrow();
            let r = eval(right, morsel, ctx)?.to_arrow();
            let r = if ctx.safe { nullify_zeros(&r)? } else { r };
            let result = match op {
                BinaryOp::Divide => numeric::div(&l, &r),
                _ => numeric::rem(&l, &r),
            }
            .map_err(|e| EngineError::InvalidInput(format!("arithmetic error: {e}")))?;
            Ok(Vector::new(result))
        }
    }
}

/// Replace zero divisor slots with NULL so safe division yields NULL.
fn nullify_zeros(divisor: &ArrayRef) -> EngineResult<ArrayRef> {
    let zero = match divisor.data_type() {
        DataType::Int64 => ScalarValue::Int64(0),
        DataType::Float64 => ScalarValue::Float64(0.0),
        _ => return Ok(divisor.clone()),
    };
    let zero_array = zero.to_array(divisor.data_type(), 1)?;
    let mask = cmp::eq(divisor, &Scalar::new(zero_array))?;
    let mask = kernels::normalize_mask(&mask);
    Ok(nullif(divisor, &mask)?)
}

fn eval_unary(
    op: UnaryOp,
    expr: &Expression,
    morsel: &Morsel,
    ctx: EvalContext,
) -> EngineResult<Vector> {
    match op {
        UnaryOp::Not => {
            let mask = evaluate_mask_ctx(expr, morsel, ctx)?;
            Ok(Vector::new(Arc::new(not(&mask)?)))
        }
        UnaryOp::Negate => {
            let value = eval(expr, morsel, ctx)?;
            Ok(Vector::new(numeric::neg(value.array().as_ref())?))
        }
        UnaryOp::IsNull => {
            let value = eval(expr, morsel, ctx)?;
            Ok(Vector::new(Arc::new(kernels::is_null(&value)?)))
        }
        UnaryOp::IsNotNull => {
            let value = eval(expr, morsel, ctx)?;
            let mask = kernels::is_null(&value)?;
            Ok(Vector::new(Arc::new(not(&mask)?)))
        }
        // The IS TRUE family reads the values buffer and validity bitmap
        // directly: one pass, never null.
        UnaryOp::IsTrue | UnaryOp::IsNotTrue | UnaryOp::IsFalse | UnaryOp::IsNotFalse => {
            let mask = evaluate_mask_ctx(expr, morsel, ctx)?;
            let values: Vec<bool> = (0..mask.len())
                .map(|i| {
                    let defined = mask.is_valid(i);
                    match op {
                        UnaryOp::IsTrue => defined && mask.value(i),
                        UnaryOp::IsNotTrue => !(defined && mask.value(i)),
                        UnaryOp::IsFalse => defined && !mask.value(i),
                        _ => !(defined && !mask.value(i)),
                    }
                })
                .collect();
            Ok(Vector::new(Arc::new(BooleanArray::from(values))))
        }
    }
}

/// Cast a vector, honoring safe (NULL-on-failure) semantics.
pub fn cast_vector(vector: &Vector, data_type: &DataType, safe: bool) -> EngineResult<Vector> {
    let options = CastOptions {
        safe,
        ..CastOptions::default()
    };
    let result = cast_with_options(vector.array().as_ref(), data_type, &options)
        .map_err(|e| EngineError::InvalidInput(format!("cast to {data_type} failed: {e}")))?;
    Ok(Vector::new(result))
}

fn eval_like(
    expr: &Expression,
    pattern: &Expression,
    negated: bool,
    case_insensitive: bool,
    morsel: &Morsel,
    ctx: EvalContext,
) -> EngineResult<Vector> {
    let Expression::Literal(ScalarValue::Utf8(pattern_text)) = pattern else {
        return Err(EngineError::Unsupported(
            "LIKE requires a string literal pattern".into(),
        ));
    };
    let regex = compile_like_pattern(pattern_text, case_insensitive)?;
    let value = eval(expr, morsel, ctx)?;
    let strings = value
        .array()
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| {
            EngineError::TypeMismatch(format!(
                "LIKE requires a string operand, got {}",
                value.data_type()
            ))
        })?;
    let mask: BooleanArray = strings
        .iter()
        .map(|s| s.map(|s| regex.is_match(s) != negated))
        .collect();
    Ok(Vector::new(Arc::new(mask)))
}

/// Translate a SQL LIKE pattern into an anchored regex.
pub fn compile_like_pattern(pattern: &str, case_insensitive: bool) -> EngineResult<regex::Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    if case_insensitive {
        out.push_str("(?i)");
    }
    out.push('^');
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c if "\\.+*?()|[]{}^$".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    regex::Regex::new(&out)
        .map_err(|e| EngineError::InvalidInput(format!("bad LIKE pattern '{pattern}': {e}")))
}

// ============================================================================
// Compiled predicates
// ============================================================================

/// A pre-compiled filter predicate.
///
/// The common shapes `col = literal AND col = literal` and
/// `col IN (literal list)` dispatch to fused kernels that skip the
/// general tree walk on every morsel.
pub struct PredicateEvaluator {
    compiled: CompiledPredicate,
}

enum CompiledPredicate {
    /// `col = lit AND col = lit` fused into two scalar comparisons
    EqPair {
        left_col: usize,
        left_value: ScalarValue,
        right_col: usize,
        right_value: ScalarValue,
    },
    /// `col IN (literals)` fused into a chain of scalar comparisons
    InLiterals {
        col: usize,
        values: Vec<ScalarValue>,
    },
    General(Expression),
}

impl PredicateEvaluator {
    pub fn new(predicate: Expression) -> PredicateEvaluator {
        let compiled = Self::compile(&predicate).unwrap_or(CompiledPredicate::General(predicate));
        PredicateEvaluator { compiled }
    }

    fn compile(predicate: &Expression) -> Option<CompiledPredicate> {
        match predicate {
            Expression::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let (lc, lv) = as_col_eq_literal(left)?;
                let (rc, rv) = as_col_eq_literal(right)?;
                Some(CompiledPredicate::EqPair {
                    left_col: lc,
                    left_value: lv,
                    right_col: rc,
                    right_value: rv,
                })
            }
            Expression::InList {
                expr,
                list,
                negated: false,
            } => {
                let Expression::Column { index, .. } = expr.as_ref() else {
                    return None;
                };
                let values: Option<Vec<ScalarValue>> = list
                    .iter()
                    .map(|item| match item {
                        Expression::Literal(v) if !v.is_null() => Some(v.clone()),
                        _ => None,
                    })
                    .collect();
                Some(CompiledPredicate::InLiterals {
                    col: *index,
                    values: values?,
                })
            }
            _ => None,
        }
    }

    /// Evaluate the predicate into a three-valued mask.
    pub fn evaluate(&self, morsel: &Morsel) -> EngineResult<BooleanArray> {
        match &self.compiled {
            CompiledPredicate::EqPair {
                left_col,
                left_value,
                right_col,
                right_value,
            } => {
                let l = scalar_eq(morsel.column(*left_col), left_value)?;
                let r = scalar_eq(morsel.column(*right_col), right_value)?;
                Ok(and_kleene(&l, &r)?)
            }
            CompiledPredicate::InLiterals { col, values } => {
                let column = morsel.column(*col);
                let mut acc: Option<BooleanArray> = None;
                for value in values {
                    let mask = scalar_eq(column, value)?;
                    acc = Some(match acc {
                        Some(prev) => or_kleene(&prev, &mask)?,
                        None => mask,
                    });
                }
                Ok(acc.unwrap_or_else(|| BooleanArray::from(vec![false; morsel.num_rows()])))
            }
            CompiledPredicate::General(expr) => evaluate_mask(expr, morsel),
        }
    }
}

fn as_col_eq_literal(expr: &Expression) -> Option<(usize, ScalarValue)> {
    let Expression::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = expr
    else {
        return None;
    };
    match (left.as_ref(), right.as_ref()) {
        (Expression::Column { index, .. }, Expression::Literal(v)) if !v.is_null() => {
            Some((*index, v.clone()))
        }
        (Expression::Literal(v), Expression::Column { index, .. }) if !v.is_null() => {
            Some((*index, v.clone()))
        }
        _ => None,
    }
}

fn scalar_eq(column: &Vector, value: &ScalarValue) -> EngineResult<BooleanArray> {
    let literal = value.to_array(column.data_type(), 1).or_else(|_| {
        // Fall back to the literal's own type when the column type cannot
        // hold it; arrow rejects the comparison below if truly mismatched.
        value.to_array(&value.data_type(), 1)
    })?;
    Ok(cmp::eq(column.array(), &Scalar::new(literal))?)
}
