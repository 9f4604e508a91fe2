//! Scalar and aggregate expression trees.
//!
//! Expressions are a tagged union evaluated by variant dispatch — no
//! inheritance, no runtime lookup. Column references are bound by
//! position against the producing operator's output schema at plan build
//! time; the optimizer remaps indices when it moves expressions across
//! operators.

pub mod eval;
pub mod functions;

pub use eval::{evaluate, evaluate_mask, PredicateEvaluator};

use std::fmt;

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};

use crate::error::{EngineError, EngineResult};
use crate::vector::ScalarValue;

// ============================================================================
// Operators and functions
// ============================================================================

/// Binary operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Plus
                | BinaryOp::Minus
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
        )
    }

    /// The operator with its comparison sides swapped (a < b == b > a).
    pub fn swapped(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::LtEq => BinaryOp::GtEq,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::GtEq => BinaryOp::LtEq,
            other => other,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        };
        write!(f, "{s}")
    }
}

/// Unary operator kinds. The IS family compiles to direct mask operations
/// and always produces a non-null boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    IsNull,
    IsNotNull,
    IsTrue,
    IsNotTrue,
    IsFalse,
    IsNotFalse,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Not => "NOT",
            UnaryOp::Negate => "-",
            UnaryOp::IsNull => "IS NULL",
            UnaryOp::IsNotNull => "IS NOT NULL",
            UnaryOp::IsTrue => "IS TRUE",
            UnaryOp::IsNotTrue => "IS NOT TRUE",
            UnaryOp::IsFalse => "IS FALSE",
            UnaryOp::IsNotFalse => "IS NOT FALSE",
        };
        write!(f, "{s}")
    }
}

/// Built-in scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    Abs,
    Ceil,
    Floor,
    Round,
    Sqrt,
    Upper,
    Lower,
    Length,
    Trim,
    Substring,
    StartsWith,
    EndsWith,
    Concat,
    Coalesce,
    NullIf,
    Greatest,
    Least,
    Year,
    Month,
    Day,
    DateTrunc,
    /// TRY(expr): recoverable evaluation failures become NULL
    Try,
}

impl ScalarFunction {
    /// Resolve a (case-insensitive) SQL function name.
    pub fn from_name(name: &str) -> Option<ScalarFunction> {
        let resolved = match name.to_ascii_uppercase().as_str() {
            "ABS" => ScalarFunction::Abs,
            "CEIL" | "CEILING" => ScalarFunction::Ceil,
            "FLOOR" => ScalarFunction::Floor,
            "ROUND" => ScalarFunction::Round,
            "SQRT" => ScalarFunction::Sqrt,
            "UPPER" => ScalarFunction::Upper,
            "LOWER" => ScalarFunction::Lower,
            "LENGTH" | "CHAR_LENGTH" | "CHARACTER_LENGTH" => ScalarFunction::Length,
            "TRIM" => ScalarFunction::Trim,
            "SUBSTRING" | "SUBSTR" => ScalarFunction::Substring,
            "STARTS_WITH" => ScalarFunction::StartsWith,
            "ENDS_WITH" => ScalarFunction::EndsWith,
            "CONCAT" => ScalarFunction::Concat,
            "COALESCE" => ScalarFunction::Coalesce,
            "NULLIF" => ScalarFunction::NullIf,
            "GREATEST" => ScalarFunction::Greatest,
            "LEAST" => ScalarFunction::Least,
            "YEAR" => ScalarFunction::Year,
            "MONTH" => ScalarFunction::Month,
            "DAY" => ScalarFunction::Day,
            "DATE_TRUNC" => ScalarFunction::DateTrunc,
            "TRY" => ScalarFunction::Try,
            _ => return None,
        };
        Some(resolved)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarFunction::Abs => "ABS",
            ScalarFunction::Ceil => "CEIL",
            ScalarFunction::Floor => "FLOOR",
            ScalarFunction::Round => "ROUND",
            ScalarFunction::Sqrt => "SQRT",
            ScalarFunction::Upper => "UPPER",
            ScalarFunction::Lower => "LOWER",
            ScalarFunction::Length => "LENGTH",
            ScalarFunction::Trim => "TRIM",
            ScalarFunction::Substring => "SUBSTRING",
            ScalarFunction::StartsWith => "STARTS_WITH",
            ScalarFunction::EndsWith => "ENDS_WITH",
            ScalarFunction::Concat => "CONCAT",
            ScalarFunction::Coalesce => "COALESCE",
            ScalarFunction::NullIf => "NULLIF",
            ScalarFunction::Greatest => "GREATEST",
            ScalarFunction::Least => "LEAST",
            ScalarFunction::Year => "YEAR",
            ScalarFunction::Month => "MONTH",
            ScalarFunction::Day => "DAY",
            ScalarFunction::DateTrunc => "DATE_TRUNC",
            ScalarFunction::Try => "TRY",
        }
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    ArrayAgg,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<AggregateFunction> {
        let resolved = match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunction::Count),
            "SUM" => Some(AggregateFunction::Sum),
            "MIN" => Some(AggregateFunction::Min),
            "MAX" => Some(AggregateFunction::Max),
            "AVG" => Some(AggregateFunction::Avg),
            "ARRAY_AGG" => Some(AggregateFunction::ArrayAgg),
            _ => None,
        };
        resolved
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::ArrayAgg => "ARRAY_AGG",
        }
    }
}

/// One aggregate call: function, optional argument (`None` = `COUNT(*)`),
/// DISTINCT flag and the optional ORDER BY applied to accumulated values
/// before the final function.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub func: AggregateFunction,
    pub arg: Option<Box<Expression>>,
    pub distinct: bool,
    pub order_by: Vec<SortKey>,
}

/// A sort key: expression, direction and null placement.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expression,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl SortKey {
    /// Compare two evaluated key values under this key's direction and
    /// null placement. Null placement is absolute: it is not reversed
    /// by a descending direction.
    pub fn compare_values(
        &self,
        a: &crate::vector::ScalarValue,
        b: &crate::vector::ScalarValue,
    ) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if self.nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if self.nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {
                let ordering = a.try_cmp(b).unwrap_or(Ordering::Equal);
                if self.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            }
        }
    }
}

// ============================================================================
// Expression tree
// ============================================================================

/// A scalar (or, before extraction, aggregate) expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(ScalarValue),
    /// A column of the input morsel, bound by position.
    Column {
        name: String,
        index: usize,
    },
    ScalarFn {
        func: ScalarFunction,
        args: Vec<Expression>,
    },
    Aggregate(AggregateExpr),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Case {
        whens: Vec<(Expression, Expression)>,
        else_expr: Option<Box<Expression>>,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Cast {
        expr: Box<Expression>,
        data_type: DataType,
        safe: bool,
    },
    Like {
        expr: Box<Expression>,
        pattern: Box<Expression>,
        negated: bool,
        case_insensitive: bool,
    },
}

impl Expression {
    pub fn literal(value: ScalarValue) -> Expression {
        Expression::Literal(value)
    }

    pub fn column(name: impl Into<String>, index: usize) -> Expression {
        Expression::Column {
            name: name.into(),
            index,
        }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Expression {
        Expression::binary(BinaryOp::And, left, right)
    }

    /// Conjoin a list of predicates; `None` when the list is empty.
    pub fn conjunction(mut predicates: Vec<Expression>) -> Option<Expression> {
        let first = if predicates.is_empty() {
            return None;
        } else {
            predicates.remove(0)
        };
        Some(predicates.into_iter().fold(first, Expression::and))
    }

    /// Split a predicate on top-level ANDs.
    pub fn split_conjunction(self) -> Vec<Expression> {
        match self {
            Expression::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut parts = left.split_conjunction();
                parts.extend(right.split_conjunction());
                parts
            }
            other => vec![other],
        }
    }

    /// Visit every node of the tree, parents before children.
    pub fn visit(&self, f: &mut impl FnMut(&Expression)) {
        f(self);
        match self {
            Expression::Literal(_) | Expression::Column { .. } => {}
            Expression::ScalarFn { args, .. } => {
                for arg in args {
                    arg.visit(f);
                }
            }
            Expression::Aggregate(agg) => {
                if let Some(arg) = &agg.arg {
                    arg.visit(f);
                }
                for key in &agg.order_by {
                    key.expr.visit(f);
                }
            }
            Expression::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expression::Unary { expr, .. } => expr.visit(f),
            Expression::Case { whens, else_expr } => {
                for (when, then) in whens {
                    when.visit(f);
                    then.visit(f);
                }
                if let Some(e) = else_expr {
                    e.visit(f);
                }
            }
            Expression::InList { expr, list, .. } => {
                expr.visit(f);
                for item in list {
                    item.visit(f);
                }
            }
            Expression::Cast { expr, .. } => expr.visit(f),
            Expression::Like { expr, pattern, .. } => {
                expr.visit(f);
                pattern.visit(f);
            }
        }
    }

    /// Rewrite the tree bottom-up.
    pub fn transform(self, f: &mut impl FnMut(Expression) -> Expression) -> Expression {
        let rebuilt = match self {
            Expression::Literal(_) | Expression::Column { .. } => self,
            Expression::ScalarFn { func, args } => Expression::ScalarFn {
                func,
                args: args.into_iter().map(|a| a.transform(f)).collect(),
            },
            Expression::Aggregate(agg) => Expression::Aggregate(AggregateExpr {
                func: agg.func,
                arg: agg.arg.map(|a| Box::new(a.transform(f))),
                distinct: agg.distinct,
                order_by: agg
                    .order_by
                    .into_iter()
                    .map(|k| SortKey {
                        expr: k.expr.transform(f),
                        ascending: k.ascending,
                        nulls_first: k.nulls_first,
                    })
                    .collect(),
            }),
            Expression::Binary { op, left, right } => Expression::Binary {
                op,
                left: Box::new(left.transform(f)),
                right: Box::new(right.transform(f)),
            },
            Expression::Unary { op, expr } => Expression::Unary {
                op,
                expr: Box::new(expr.transform(f)),
            },
            Expression::Case { whens, else_expr } => Expression::Case {
                whens: whens
                    .into_iter()
                    .map(|(w, t)| (w.transform(f), t.transform(f)))
                    .collect(),
                else_expr: else_expr.map(|e| Box::new(e.transform(f))),
            },
            Expression::InList {
                expr,
                list,
                negated,
            } => Expression::InList {
                expr: Box::new(expr.transform(f)),
                list: list.into_iter().map(|i| i.transform(f)).collect(),
                negated,
            },
            Expression::Cast {
                expr,
                data_type,
                safe,
            } => Expression::Cast {
                expr: Box::new(expr.transform(f)),
                data_type,
                safe,
            },
            Expression::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => Expression::Like {
                expr: Box::new(expr.transform(f)),
                pattern: Box::new(pattern.transform(f)),
                negated,
                case_insensitive,
            },
        };
        f(rebuilt)
    }

    /// Collect the column indices this expression reads.
    pub fn referenced_columns(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Expression::Column { index, .. } = e {
                if !out.contains(index) {
                    out.push(*index);
                }
            }
        });
        out
    }

    /// Remap column indices through `mapping` (old index -> new index).
    /// References outside the mapping are left untouched.
    pub fn remap_columns(self, mapping: &std::collections::HashMap<usize, usize>) -> Expression {
        self.transform(&mut |e| match e {
            Expression::Column { name, index } => {
                let index = mapping.get(&index).copied().unwrap_or(index);
                Expression::Column { name, index }
            }
            other => other,
        })
    }

    /// Shift every column index by a signed delta (join side adjustment).
    pub fn shift_columns(self, delta: i64) -> Expression {
        self.transform(&mut |e| match e {
            Expression::Column { name, index } => Expression::Column {
                name,
                index: (index as i64 + delta) as usize,
            },
            other => other,
        })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expression::Literal(_))
    }

    pub fn has_aggregates(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, Expression::Aggregate(_)) {
                found = true;
            }
        });
        found
    }

    // ------------------------------------------------------------------
    // Type derivation
    // ------------------------------------------------------------------

    /// The Arrow type this expression produces over `input`.
    pub fn data_type(&self, input: &Schema) -> EngineResult<DataType> {
        let result = match self {
            Expression::Literal(v) => v.data_type(),
            Expression::Column { index, name } => input
                .fields()
                .get(*index)
                .map(|f| f.data_type().clone())
                .ok_or_else(|| {
                    EngineError::Internal(format!("column {name} (#{index}) out of range"))
                })?,
            Expression::ScalarFn { func, args } => functions::return_type(*func, args, input)?,
            Expression::Aggregate(agg) => aggregate_return_type(agg, input)?,
            Expression::Binary { op, left, right } => {
                if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
                    DataType::Boolean
                } else {
                    numeric_supertype(&left.data_type(input)?, &right.data_type(input)?)?
                }
            }
            Expression::Unary { op, expr } => match op {
                UnaryOp::Negate => expr.data_type(input)?,
                _ => DataType::Boolean,
            },
            Expression::Case { whens, else_expr } => {
                let mut data_type = DataType::Null;
                for (_, then) in whens {
                    let t = then.data_type(input)?;
                    if t != DataType::Null {
                        data_type = t;
                        break;
                    }
                }
                if data_type == DataType::Null {
                    if let Some(e) = else_expr {
                        data_type = e.data_type(input)?;
                    }
                }
                data_type
            }
            Expression::InList { .. } | Expression::Like { .. } => DataType::Boolean,
            Expression::Cast { data_type, .. } => data_type.clone(),
        };
        Ok(result)
    }

    /// Whether the expression can produce NULL over `input`.
    pub fn nullable(&self, input: &Schema) -> bool {
        match self {
            Expression::Literal(v) => v.is_null(),
            Expression::Column { index, .. } => {
                input.fields().get(*index).is_none_or(|f| f.is_nullable())
            }
            Expression::Unary { op, .. } => matches!(op, UnaryOp::Not | UnaryOp::Negate),
            Expression::Aggregate(agg) => !matches!(agg.func, AggregateFunction::Count),
            _ => true,
        }
    }

    /// A field describing this expression's output, named `name`.
    pub fn to_field(&self, name: &str, input: &Schema) -> EngineResult<Field> {
        Ok(Field::new(
            name,
            self.data_type(input)?,
            self.nullable(input),
        ))
    }
}

fn aggregate_return_type(agg: &AggregateExpr, input: &Schema) -> EngineResult<DataType> {
    let arg_type = match &agg.arg {
        Some(arg) => arg.data_type(input)?,
        None => DataType::Null,
    };
    let result = match agg.func {
        AggregateFunction::Count => DataType::Int64,
        AggregateFunction::Sum => match arg_type {
            DataType::Float32 | DataType::Float64 => DataType::Float64,
            _ => DataType::Int64,
        },
        AggregateFunction::Min | AggregateFunction::Max => arg_type,
        AggregateFunction::Avg => DataType::Float64,
        AggregateFunction::ArrayAgg => {
            DataType::List(std::sync::Arc::new(Field::new("item", arg_type, true)))
        }
    };
    Ok(result)
}

/// Common numeric supertype for binary arithmetic.
pub fn numeric_supertype(left: &DataType, right: &DataType) -> EngineResult<DataType> {
    use DataType::*;
    let rank = |t: &DataType| match t {
        Int8 | Int16 | Int32 | Int64 | Boolean => Some(0),
        Float32 | Float64 => Some(1),
        Date32 => Some(2),
        Timestamp(TimeUnit::Microsecond, _) => Some(3),
        Null => Some(4),
        _ => None,
    };
    match (rank(left), rank(right)) {
        (Some(0), Some(0)) => Ok(Int64),
        (Some(0 | 1), Some(0 | 1)) => Ok(Float64),
        (Some(4), _) => Ok(right.clone()),
        (_, Some(4)) => Ok(left.clone()),
        (Some(a), Some(b)) if a == b && left == right => Ok(left.clone()),
        _ => Err(EngineError::TypeMismatch(format!(
            "no arithmetic supertype for {left} and {right}"
        ))),
    }
}

/// Insert casts so both sides of an arithmetic or comparison operator
/// share one type. Comparisons between identical types pass through.
pub fn coerce_binary(
    op: BinaryOp,
    left: Expression,
    right: Expression,
    input: &Schema,
) -> EngineResult<Expression> {
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        return Ok(Expression::binary(op, left, right));
    }
    let lt = left.data_type(input)?;
    let rt = right.data_type(input)?;
    if lt == rt {
        return Ok(Expression::binary(op, left, right));
    }
    // String literals compared against temporal columns cast to the
    // column's type ('1950-01-01' against a date column).
    if op.is_comparison() {
        let temporal = |t: &DataType| {
            matches!(
                t,
                DataType::Date32 | DataType::Timestamp(TimeUnit::Microsecond, _)
            )
        };
        if lt == DataType::Utf8 && temporal(&rt) {
            return Ok(Expression::binary(op, cast_to(left, &lt, &rt), right));
        }
        if rt == DataType::Utf8 && temporal(&lt) {
            return Ok(Expression::binary(op, left, cast_to(right, &rt, &lt)));
        }
    }
    let target = numeric_supertype(&lt, &rt).map_err(|_| {
        EngineError::TypeMismatch(format!(
            "cannot apply {op} to operands of type {lt} and {rt}"
        ))
    })?;
    let left = cast_to(left, &lt, &target);
    let right = cast_to(right, &rt, &target);
    Ok(Expression::binary(op, left, right))
}

fn cast_to(expr: Expression, from: &DataType, to: &DataType) -> Expression {
    if from == to {
        expr
    } else {
        Expression::Cast {
            expr: Box::new(expr),
            data_type: to.clone(),
            safe: false,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{v}"),
            Expression::Column { name, .. } => write!(f, "{name}"),
            Expression::ScalarFn { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expression::Aggregate(agg) => {
                write!(f, "{}(", agg.func.name())?;
                if agg.distinct {
                    write!(f, "DISTINCT ")?;
                }
                match &agg.arg {
                    Some(arg) => write!(f, "{arg}")?,
                    None => write!(f, "*")?,
                }
                write!(f, ")")
            }
            Expression::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            Expression::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "NOT {expr}"),
                UnaryOp::Negate => write!(f, "-{expr}"),
                other => write!(f, "{expr} {other}"),
            },
            Expression::Case { whens, else_expr } => {
                write!(f, "CASE")?;
                for (when, then) in whens {
                    write!(f, " WHEN {when} THEN {then}")?;
                }
                if let Some(e) = else_expr {
                    write!(f, " ELSE {e}")?;
                }
                write!(f, " END")
            }
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "{expr} {}IN (", if *negated { "NOT " } else { "" })?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Expression::Cast {
                expr,
                data_type,
                safe,
            } => {
                let name = if *safe { "TRY_CAST" } else { "CAST" };
                write!(f, "{name}({expr} AS {data_type})")
            }
            Expression::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let op = match (negated, case_insensitive) {
                    (false, false) => "LIKE",
                    (true, false) => "NOT LIKE",
                    (false, true) => "ILIKE",
                    (true, true) => "NOT ILIKE",
                };
                write!(f, "{expr} {op} {pattern}")
            }
        }
    }
}
