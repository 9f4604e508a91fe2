//! Built-in scalar function implementations.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::compute::kernels::zip::zip;
use arrow::compute::{is_not_null, nullif};
use arrow::datatypes::{DataType, Schema, TimeUnit};
use chrono::{DateTime, Datelike, NaiveDate};

use super::{numeric_supertype, Expression, ScalarFunction};
use crate::error::{EngineError, EngineResult};
use crate::vector::{
    kernels, scalar_at, vector_from_scalars, ScalarValue, StringVectorBuilder, Vector,
};

/// Days between 0001-01-01 (CE) and the Unix epoch.
const UNIX_EPOCH_FROM_CE: i32 = 719_163;

/// Accepted argument counts per function.
pub fn validate_arity(func: ScalarFunction, argc: usize) -> EngineResult<()> {
    let ok = match func {
        ScalarFunction::Abs
        | ScalarFunction::Ceil
        | ScalarFunction::Floor
        | ScalarFunction::Sqrt
        | ScalarFunction::Upper
        | ScalarFunction::Lower
        | ScalarFunction::Length
        | ScalarFunction::Trim
        | ScalarFunction::Year
        | ScalarFunction::Month
        | ScalarFunction::Day
        | ScalarFunction::Try => argc == 1,
        ScalarFunction::Round => argc == 1 || argc == 2,
        ScalarFunction::Substring => argc == 2 || argc == 3,
        ScalarFunction::StartsWith
        | ScalarFunction::EndsWith
        | ScalarFunction::NullIf
        | ScalarFunction::DateTrunc => argc == 2,
        ScalarFunction::Concat
        | ScalarFunction::Coalesce
        | ScalarFunction::Greatest
        | ScalarFunction::Least => argc >= 1,
    };
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!(
            "{} does not take {argc} argument(s)",
            func.name()
        )))
    }
}

/// Result type of a scalar function call.
pub fn return_type(
    func: ScalarFunction,
    args: &[Expression],
    input: &Schema,
) -> EngineResult<DataType> {
    let arg_type = |i: usize| -> EngineResult<DataType> {
        args.get(i)
            .ok_or_else(|| {
                EngineError::InvalidInput(format!("{} is missing argument {i}", func.name()))
            })?
            .data_type(input)
    };
    let result = match func {
        ScalarFunction::Abs | ScalarFunction::Ceil | ScalarFunction::Floor => arg_type(0)?,
        ScalarFunction::Round => {
            // With an explicit digit count the result is always a float.
            if args.len() == 2 {
                DataType::Float64
            } else {
                arg_type(0)?
            }
        }
        ScalarFunction::Sqrt => DataType::Float64,
        ScalarFunction::Upper
        | ScalarFunction::Lower
        | ScalarFunction::Trim
        | ScalarFunction::Substring
        | ScalarFunction::Concat => DataType::Utf8,
        ScalarFunction::Length => DataType::Int64,
        ScalarFunction::StartsWith | ScalarFunction::EndsWith => DataType::Boolean,
        ScalarFunction::Coalesce => {
            let mut data_type = DataType::Null;
            for i in 0..args.len() {
                let t = arg_type(i)?;
                if t != DataType::Null {
                    data_type = t;
                    break;
                }
            }
            data_type
        }
        ScalarFunction::NullIf => arg_type(0)?,
        ScalarFunction::Greatest | ScalarFunction::Least => {
            let mut data_type = arg_type(0)?;
            for i in 1..args.len() {
                data_type = numeric_supertype(&data_type, &arg_type(i)?)
                    .unwrap_or_else(|_| data_type.clone());
            }
            data_type
        }
        ScalarFunction::Year | ScalarFunction::Month | ScalarFunction::Day => DataType::Int64,
        ScalarFunction::DateTrunc => arg_type(1)?,
        ScalarFunction::Try => arg_type(0)?,
    };
    Ok(result)
}

/// Evaluate a scalar function over fully-evaluated argument vectors.
pub fn evaluate_scalar_fn(
    func: ScalarFunction,
    args: &[Vector],
    len: usize,
) -> EngineResult<Vector> {
    validate_arity(func, args.len())?;
    match func {
        ScalarFunction::Abs => numeric_unary(&args[0], i64::abs, f64::abs),
        ScalarFunction::Ceil => numeric_unary(&args[0], |v| v, f64::ceil),
        ScalarFunction::Floor => numeric_unary(&args[0], |v| v, f64::floor),
        ScalarFunction::Sqrt => {
            let floats = to_f64(&args[0])?;
            let out: Float64Array = floats.iter().map(|v| v.map(f64::sqrt)).collect();
            Ok(Vector::new(Arc::new(out)))
        }
        ScalarFunction::Round => {
            if args.len() == 1 {
                numeric_unary(&args[0], |v| v, f64::round)
            } else {
                let values = to_f64(&args[0])?;
                let digits = to_i64(&args[1])?;
                let out: Float64Array = values
                    .iter()
                    .zip(digits.iter())
                    .map(|(v, d)| match (v, d) {
                        (Some(v), Some(d)) => {
                            let scale = 10f64.powi(d as i32);
                            Some((v * scale).round() / scale)
                        }
                        _ => None,
                    })
                    .collect();
                Ok(Vector::new(Arc::new(out)))
            }
        }
        ScalarFunction::Upper => string_unary(&args[0], |s| s.to_uppercase()),
        ScalarFunction::Lower => string_unary(&args[0], |s| s.to_lowercase()),
        ScalarFunction::Trim => string_unary(&args[0], |s| s.trim().to_string()),
        ScalarFunction::Length => {
            let strings = as_strings(&args[0])?;
            let out: Int64Array = strings
                .iter()
                .map(|s| s.map(|s| s.chars().count() as i64))
                .collect();
            Ok(Vector::new(Arc::new(out)))
        }
        ScalarFunction::Substring => {
            let strings = as_strings(&args[0])?;
            let from = to_i64(&args[1])?;
            let take = if args.len() == 3 {
                Some(to_i64(&args[2])?)
            } else {
                None
            };
            let mut builder = StringVectorBuilder::with_capacity(len, 0);
            for i in 0..strings.len() {
                let length = take.as_ref().map(|t| (t.is_null(i), t.value(i)));
                if strings.is_null(i) || from.is_null(i) || matches!(length, Some((true, _))) {
                    builder.append_null();
                    continue;
                }
                let s = strings.value(i);
                // SQL is 1-based; positions before 1 consume the count.
                let start = from.value(i);
                let count = length.map(|(_, c)| c);
                builder.append(&substring_chars(s, start, count))?;
            }
            Ok(builder.finish())
        }
        ScalarFunction::StartsWith => string_predicate(&args[0], &args[1], |s, p| s.starts_with(p)),
        ScalarFunction::EndsWith => string_predicate(&args[0], &args[1], |s, p| s.ends_with(p)),
        ScalarFunction::Concat => {
            let strings = args
                .iter()
                .map(as_strings)
                .collect::<EngineResult<Vec<_>>>()?;
            let mut builder = StringVectorBuilder::with_capacity(len, 0);
            'rows: for i in 0..len {
                let mut joined = String::new();
                for part in &strings {
                    if part.is_null(i) {
                        builder.append_null();
                        continue 'rows;
                    }
                    joined.push_str(part.value(i));
                }
                builder.append(&joined)?;
            }
            Ok(builder.finish())
        }
        ScalarFunction::Coalesce => {
            let mut result: Option<ArrayRef> = None;
            // Later arguments fill the slots still null after earlier ones.
            for arg in args.iter().rev() {
                let array = arg.to_arrow();
                result = Some(match result {
                    None => array,
                    Some(prev) => {
                        let defined = is_not_null(array.as_ref())?;
                        zip(&defined, &array, &prev)?
                    }
                });
            }
            result
                .map(Vector::new)
                .ok_or_else(|| EngineError::InvalidInput("COALESCE needs arguments".into()))
        }
        ScalarFunction::NullIf => {
            let mask = kernels::compare(kernels::CompareOp::Eq, &args[0], &args[1])?;
            let mask = kernels::normalize_mask(&mask);
            Ok(Vector::new(nullif(args[0].array().as_ref(), &mask)?))
        }
        ScalarFunction::Greatest => extremum(args, len, true),
        ScalarFunction::Least => extremum(args, len, false),
        ScalarFunction::Year => date_part(&args[0], |d| i64::from(d.year())),
        ScalarFunction::Month => date_part(&args[0], |d| i64::from(d.month())),
        ScalarFunction::Day => date_part(&args[0], |d| i64::from(d.day())),
        ScalarFunction::DateTrunc => date_trunc(&args[0], &args[1]),
        ScalarFunction::Try => Err(EngineError::Internal(
            "TRY is rewritten before function dispatch".into(),
        )),
    }
}

fn substring_chars(s: &str, start: i64, count: Option<i64>) -> String {
    // Characters, not bytes. `start` is 1-based; a start before 1 eats
    // into the requested count, matching the standard.
    let (skip, take) = match count {
        Some(count) => {
            let end = start + count.max(0);
            let begin = start.max(1);
            (begin - 1, (end - begin).max(0))
        }
        None => ((start.max(1)) - 1, i64::MAX),
    };
    s.chars()
        .skip(skip as usize)
        .take(take.min(i64::from(u32::MAX)) as usize)
        .collect()
}

fn numeric_unary(
    arg: &Vector,
    int_fn: impl Fn(i64) -> i64,
    float_fn: impl Fn(f64) -> f64,
) -> EngineResult<Vector> {
    match arg.data_type() {
        DataType::Int64 => {
            let ints = arg
                .array()
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| EngineError::Internal("int64 downcast failed".into()))?;
            let out: Int64Array = ints.iter().map(|v| v.map(&int_fn)).collect();
            Ok(Vector::new(Arc::new(out)))
        }
        DataType::Float64 => {
            let floats = to_f64(arg)?;
            let out: Float64Array = floats.iter().map(|v| v.map(&float_fn)).collect();
            Ok(Vector::new(Arc::new(out)))
        }
        other => Err(EngineError::TypeMismatch(format!(
            "numeric function applied to column of type {other}"
        ))),
    }
}

fn string_unary(arg: &Vector, f: impl Fn(&str) -> String) -> EngineResult<Vector> {
    let strings = as_strings(arg)?;
    let mut builder = StringVectorBuilder::with_capacity(strings.len(), 0);
    for value in strings.iter() {
        match value {
            Some(s) => builder.append(&f(s))?,
            None => builder.append_null(),
        }
    }
    Ok(builder.finish())
}

fn string_predicate(
    value: &Vector,
    probe: &Vector,
    f: impl Fn(&str, &str) -> bool,
) -> EngineResult<Vector> {
    let values = as_strings(value)?;
    let probes = as_strings(probe)?;
    let out: BooleanArray = values
        .iter()
        .zip(probes.iter())
        .map(|(v, p)| match (v, p) {
            (Some(v), Some(p)) => Some(f(v, p)),
            _ => None,
        })
        .collect();
    Ok(Vector::new(Arc::new(out)))
}

fn extremum(args: &[Vector], len: usize, greatest: bool) -> EngineResult<Vector> {
    // Row-wise with null skipping: NULL arguments are ignored, an
    // all-NULL row stays NULL.
    let target = args
        .iter()
        .map(Vector::data_type)
        .try_fold(DataType::Null, |acc, t| {
            if acc == DataType::Null {
                Ok(t.clone())
            } else if *t == DataType::Null {
                Ok(acc)
            } else {
                numeric_supertype(&acc, t)
            }
        })?;
    let mut rows = Vec::with_capacity(len);
    for i in 0..len {
        let mut best: Option<ScalarValue> = None;
        for arg in args {
            let value = scalar_at(arg.array().as_ref(), i)?;
            if value.is_null() {
                continue;
            }
            best = Some(match best {
                None => value,
                Some(current) => {
                    let keep_new = match value.try_cmp(&current) {
                        Some(std::cmp::Ordering::Greater) => greatest,
                        Some(std::cmp::Ordering::Less) => !greatest,
                        _ => false,
                    };
                    if keep_new {
                        value
                    } else {
                        current
                    }
                }
            });
        }
        rows.push(best.unwrap_or(ScalarValue::Null));
    }
    Ok(Vector::new(vector_from_scalars(&target, &rows)?))
}

fn date_part(arg: &Vector, part: impl Fn(NaiveDate) -> i64) -> EngineResult<Vector> {
    match arg.data_type() {
        DataType::Date32 => {
            let dates = arg
                .array()
                .as_any()
                .downcast_ref::<Date32Array>()
                .ok_or_else(|| EngineError::Internal("date32 downcast failed".into()))?;
            let out: Int64Array = dates
                .iter()
                .map(|v| {
                    v.and_then(|days| {
                        NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_FROM_CE + days).map(&part)
                    })
                })
                .collect();
            Ok(Vector::new(Arc::new(out)))
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let timestamps = arg
                .array()
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(|| EngineError::Internal("timestamp downcast failed".into()))?;
            let out: Int64Array = timestamps
                .iter()
                .map(|v| {
                    v.and_then(DateTime::<chrono::Utc>::from_timestamp_micros)
                        .map(|dt| part(dt.date_naive()))
                })
                .collect();
            Ok(Vector::new(Arc::new(out)))
        }
        other => Err(EngineError::TypeMismatch(format!(
            "date function applied to column of type {other}"
        ))),
    }
}

fn date_trunc(part: &Vector, value: &Vector) -> EngineResult<Vector> {
    let parts = as_strings(part)?;
    let dates = value
        .array()
        .as_any()
        .downcast_ref::<Date32Array>()
        .ok_or_else(|| {
            EngineError::TypeMismatch(format!(
                "DATE_TRUNC expects a date column, got {}",
                value.data_type()
            ))
        })?;
    let out: Date32Array = (0..dates.len())
        .map(|i| {
            if parts.is_null(i) || dates.is_null(i) {
                return Ok(None);
            }
            let date = NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_FROM_CE + dates.value(i))
                .ok_or_else(|| EngineError::InvalidInput("date out of range".into()))?;
            let truncated = match parts.value(i).to_ascii_lowercase().as_str() {
                "year" => NaiveDate::from_ymd_opt(date.year(), 1, 1),
                "month" => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
                "day" => Some(date),
                other => {
                    return Err(EngineError::InvalidInput(format!(
                        "DATE_TRUNC does not understand '{other}'"
                    )))
                }
            }
            .ok_or_else(|| EngineError::InvalidInput("date out of range".into()))?;
            Ok(Some(truncated.num_days_from_ce() - UNIX_EPOCH_FROM_CE))
        })
        .collect::<EngineResult<_>>()?;
    Ok(Vector::new(Arc::new(out)))
}

fn as_strings(vector: &Vector) -> EngineResult<&StringArray> {
    vector
        .array()
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| {
            EngineError::TypeMismatch(format!(
                "expected a string column, got {}",
                vector.data_type()
            ))
        })
}

fn to_f64(vector: &Vector) -> EngineResult<Float64Array> {
    match vector.data_type() {
        DataType::Float64 => Ok(vector
            .array()
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| EngineError::Internal("float64 downcast failed".into()))?
            .clone()),
        DataType::Int64 => {
            let ints = vector
                .array()
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| EngineError::Internal("int64 downcast failed".into()))?;
            Ok(ints.iter().map(|v| v.map(|x| x as f64)).collect())
        }
        other => Err(EngineError::TypeMismatch(format!(
            "expected a numeric column, got {other}"
        ))),
    }
}

fn to_i64(vector: &Vector) -> EngineResult<Int64Array> {
    match vector.data_type() {
        DataType::Int64 => Ok(vector
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| EngineError::Internal("int64 downcast failed".into()))?
            .clone()),
        other => Err(EngineError::TypeMismatch(format!(
            "expected an integer column, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_vec(values: Vec<Option<i64>>) -> Vector {
        Vector::new(Arc::new(Int64Array::from(values)))
    }

    fn str_vec(values: Vec<Option<&str>>) -> Vector {
        Vector::new(Arc::new(StringArray::from(values)))
    }

    #[test]
    fn test_abs() {
        let v = evaluate_scalar_fn(
            ScalarFunction::Abs,
            &[int_vec(vec![Some(-5), None, Some(3)])],
            3,
        )
        .expect("abs");
        let out = v
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        assert_eq!(out.value(0), 5);
        assert!(out.is_null(1));
        assert_eq!(out.value(2), 3);
    }

    #[test]
    fn test_upper_and_length() {
        let v = evaluate_scalar_fn(
            ScalarFunction::Upper,
            &[str_vec(vec![Some("earth"), None])],
            2,
        )
        .expect("upper");
        let out = v
            .array()
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8");
        assert_eq!(out.value(0), "EARTH");
        assert!(out.is_null(1));

        let v = evaluate_scalar_fn(
            ScalarFunction::Length,
            &[str_vec(vec![Some("moon"), Some("")])],
            2,
        )
        .expect("length");
        let out = v
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        assert_eq!(out.value(0), 4);
        assert_eq!(out.value(1), 0);
    }

    #[test]
    fn test_substring_one_based() {
        let v = evaluate_scalar_fn(
            ScalarFunction::Substring,
            &[
                str_vec(vec![Some("mercury")]),
                int_vec(vec![Some(2)]),
                int_vec(vec![Some(3)]),
            ],
            1,
        )
        .expect("substring");
        let out = v
            .array()
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8");
        assert_eq!(out.value(0), "erc");
    }

    #[test]
    fn test_coalesce_takes_first_defined() {
        let v = evaluate_scalar_fn(
            ScalarFunction::Coalesce,
            &[
                int_vec(vec![None, Some(2), None]),
                int_vec(vec![Some(10), Some(20), None]),
                int_vec(vec![Some(100), Some(200), Some(300)]),
            ],
            3,
        )
        .expect("coalesce");
        let out = v
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        assert_eq!(out.value(0), 10);
        assert_eq!(out.value(1), 2);
        assert_eq!(out.value(2), 300);
    }

    #[test]
    fn test_nullif() {
        let v = evaluate_scalar_fn(
            ScalarFunction::NullIf,
            &[
                int_vec(vec![Some(1), Some(2)]),
                int_vec(vec![Some(1), Some(9)]),
            ],
            2,
        )
        .expect("nullif");
        assert!(!v.is_valid(0));
        assert!(v.is_valid(1));
    }

    #[test]
    fn test_greatest_skips_nulls() {
        let v = evaluate_scalar_fn(
            ScalarFunction::Greatest,
            &[int_vec(vec![Some(1), None]), int_vec(vec![None, None])],
            2,
        )
        .expect("greatest");
        let out = v
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        assert_eq!(out.value(0), 1);
        assert!(out.is_null(1));
    }

    #[test]
    fn test_year_of_date32() {
        // 2020-03-14 is day 18335 since the epoch.
        let dates = Vector::new(Arc::new(Date32Array::from(vec![Some(18335), None])));
        let v = evaluate_scalar_fn(ScalarFunction::Year, &[dates], 2).expect("year");
        let out = v
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("i64");
        assert_eq!(out.value(0), 2020);
        assert!(out.is_null(1));
    }

    #[test]
    fn test_date_trunc_month() {
        let parts = str_vec(vec![Some("month")]);
        let dates = Vector::new(Arc::new(Date32Array::from(vec![Some(18335)])));
        let v = evaluate_scalar_fn(ScalarFunction::DateTrunc, &[parts, dates], 1).expect("trunc");
        let out = v
            .array()
            .as_any()
            .downcast_ref::<Date32Array>()
            .expect("date");
        // 2020-03-01 is day 18322.
        assert_eq!(out.value(0), 18322);
    }

    #[test]
    fn test_starts_with() {
        let v = evaluate_scalar_fn(
            ScalarFunction::StartsWith,
            &[
                str_vec(vec![Some("Ganymede"), Some("Titan")]),
                str_vec(vec![Some("Gany"), Some("X")]),
            ],
            2,
        )
        .expect("starts_with");
        let out = v
            .array()
            .as_any()
            .downcast_ref::<BooleanArray>()
            .expect("bool");
        assert!(out.value(0));
        assert!(!out.value(1));
    }

    #[test]
    fn test_arity_validation() {
        assert!(validate_arity(ScalarFunction::Abs, 1).is_ok());
        assert!(validate_arity(ScalarFunction::Abs, 2).is_err());
        assert!(validate_arity(ScalarFunction::Substring, 3).is_ok());
    }
}
