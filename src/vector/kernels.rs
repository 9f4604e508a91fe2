//! Gather, filter and comparison kernels over vectors.
//!
//! Comparison kernels return boolean masks with SQL three-valued logic:
//! a NULL on either side yields a NULL mask slot, which downstream
//! filtering treats as false. [`normalize_mask`] materializes that
//! treatment when a plain bitmap is required.

use arrow::array::{Array, BooleanArray, Int32Array};
use arrow::compute::kernels::cmp;
use arrow::compute::{self, TakeOptions};

use super::Vector;
use crate::error::{EngineError, EngineResult};

/// Comparison operators with SQL null semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Gather rows of `vector` by i32 `indices`.
///
/// Indices outside `[0, len)` are an input error; a null index produces a
/// null output row, and source validity is propagated.
pub fn take(vector: &Vector, indices: &Int32Array) -> EngineResult<Vector> {
    let taken = compute::take(
        vector.array().as_ref(),
        indices,
        Some(TakeOptions { check_bounds: true }),
    )
    .map_err(|e| EngineError::InvalidInput(format!("take: {e}")))?;
    Ok(Vector::new(taken))
}

/// Keep the rows of `vector` where `mask` is true, preserving order.
///
/// The mask must be exactly as long as the vector; null mask slots drop
/// the row.
pub fn filter(vector: &Vector, mask: &BooleanArray) -> EngineResult<Vector> {
    if mask.len() != vector.len() {
        return Err(EngineError::InvalidInput(format!(
            "filter mask length {} does not match vector length {}",
            mask.len(),
            vector.len()
        )));
    }
    let mask = normalize_mask(mask);
    let filtered = compute::filter(vector.array().as_ref(), &mask)?;
    Ok(Vector::new(filtered))
}

/// Pure boolean null test: true where the row is NULL, never null itself.
pub fn is_null(vector: &Vector) -> EngineResult<BooleanArray> {
    Ok(compute::is_null(vector.array().as_ref())?)
}

/// Element-wise comparison of two equally-typed vectors.
///
/// NULL on either side yields a NULL mask slot (three-valued logic).
pub fn compare(op: CompareOp, left: &Vector, right: &Vector) -> EngineResult<BooleanArray> {
    if left.data_type() != right.data_type() {
        return Err(EngineError::TypeMismatch(format!(
            "cannot compare {} with {}",
            left.data_type(),
            right.data_type()
        )));
    }
    let l = left.array();
    let r = right.array();
    let mask = match op {
        CompareOp::Eq => cmp::eq(l, r),
        CompareOp::NotEq => cmp::neq(l, r),
        CompareOp::Lt => cmp::lt(l, r),
        CompareOp::LtEq => cmp::lt_eq(l, r),
        CompareOp::Gt => cmp::gt(l, r),
        CompareOp::GtEq => cmp::gt_eq(l, r),
    }?;
    Ok(mask)
}

/// Collapse a three-valued mask into a plain bitmap: NULL becomes false.
pub fn normalize_mask(mask: &BooleanArray) -> BooleanArray {
    if mask.null_count() == 0 {
        return mask.clone();
    }
    let values: Vec<bool> = (0..mask.len())
        .map(|i| mask.is_valid(i) && mask.value(i))
        .collect();
    BooleanArray::from(values)
}

// ============================================================================
// Row-wise equality (hash collision verification)
// ============================================================================

/// How NULLs compare during row equality checks.
///
/// Join key matching never equates NULLs; DISTINCT and set operations do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullEquality {
    NullsEqual,
    NullsNotEqual,
}

/// Compare one row of `left` against one row of `right`, column by column.
///
/// Used to verify hash-table candidates: equal hashes are never trusted
/// for correctness, raw values decide.
pub fn rows_equal(
    left: &[Vector],
    left_row: usize,
    right: &[Vector],
    right_row: usize,
    null_equality: NullEquality,
) -> EngineResult<bool> {
    debug_assert_eq!(left.len(), right.len());
    for (l, r) in left.iter().zip(right.iter()) {
        let l_null = !l.is_valid(left_row);
        let r_null = !r.is_valid(right_row);
        match (l_null, r_null) {
            (true, true) => {
                if null_equality == NullEquality::NullsNotEqual {
                    return Ok(false);
                }
            }
            (true, false) | (false, true) => return Ok(false),
            (false, false) => {
                if !value_eq(l, left_row, r, right_row)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

fn value_eq(left: &Vector, i: usize, right: &Vector, j: usize) -> EngineResult<bool> {
    use arrow::array::{
        BinaryArray, Date32Array, Float32Array, Float64Array, Int16Array, Int64Array, Int8Array,
        StringArray, Time32SecondArray, Time64MicrosecondArray, TimestampMicrosecondArray,
    };
    use arrow::datatypes::{DataType, TimeUnit};

    if left.data_type() != right.data_type() {
        return Err(EngineError::TypeMismatch(format!(
            "cannot compare {} with {}",
            left.data_type(),
            right.data_type()
        )));
    }

    macro_rules! eq_primitive {
        ($arr_ty:ty) => {{
            let l = left
                .array()
                .as_any()
                .downcast_ref::<$arr_ty>()
                .ok_or_else(|| EngineError::Internal("equality downcast failed".into()))?;
            let r = right
                .array()
                .as_any()
                .downcast_ref::<$arr_ty>()
                .ok_or_else(|| EngineError::Internal("equality downcast failed".into()))?;
            Ok(l.value(i) == r.value(j))
        }};
    }

    match left.data_type() {
        DataType::Boolean => {
            let l = left
                .array()
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| EngineError::Internal("equality downcast failed".into()))?;
            let r = right
                .array()
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| EngineError::Internal("equality downcast failed".into()))?;
            Ok(l.value(i) == r.value(j))
        }
        DataType::Int8 => eq_primitive!(Int8Array),
        DataType::Int16 => eq_primitive!(Int16Array),
        DataType::Int32 => eq_primitive!(Int32Array),
        DataType::Int64 => eq_primitive!(Int64Array),
        DataType::Float32 => {
            let l = left
                .array()
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| EngineError::Internal("equality downcast failed".into()))?;
            let r = right
                .array()
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| EngineError::Internal("equality downcast failed".into()))?;
            Ok(float_eq(f64::from(l.value(i)), f64::from(r.value(j))))
        }
        DataType::Float64 => {
            let l = left
                .array()
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| EngineError::Internal("equality downcast failed".into()))?;
            let r = right
                .array()
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| EngineError::Internal("equality downcast failed".into()))?;
            Ok(float_eq(l.value(i), r.value(j)))
        }
        DataType::Utf8 => eq_primitive!(StringArray),
        DataType::Binary => eq_primitive!(BinaryArray),
        DataType::Date32 => eq_primitive!(Date32Array),
        DataType::Timestamp(TimeUnit::Microsecond, _) => eq_primitive!(TimestampMicrosecondArray),
        DataType::Time32(TimeUnit::Second) => eq_primitive!(Time32SecondArray),
        DataType::Time64(TimeUnit::Microsecond) => eq_primitive!(Time64MicrosecondArray),
        other => Err(EngineError::Unsupported(format!(
            "equality is not defined for columns of type {other}"
        ))),
    }
}

/// Total float equality, consistent with the hash layer: all NaNs are one
/// value and -0.0 equals 0.0.
fn float_eq(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use std::sync::Arc;

    fn int_vector(values: Vec<Option<i64>>) -> Vector {
        Vector::from_arrow(Arc::new(Int64Array::from(values)) as ArrayRef)
    }

    #[test]
    fn test_take_gathers_and_propagates_nulls() {
        let v = int_vector(vec![Some(10), None, Some(30)]);
        let indices = Int32Array::from(vec![2, 1, 0, 0]);
        let taken = take(&v, &indices).expect("take");
        let out = taken
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64");
        assert_eq!(out.value(0), 30);
        assert!(out.is_null(1));
        assert_eq!(out.value(2), 10);
        assert_eq!(out.value(3), 10);
    }

    #[test]
    fn test_take_out_of_bounds() {
        let v = int_vector(vec![Some(1)]);
        let indices = Int32Array::from(vec![5]);
        let err = take(&v, &indices).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_filter_preserves_order() {
        let v = int_vector(vec![Some(1), Some(2), Some(3), Some(4)]);
        let mask = BooleanArray::from(vec![true, false, true, true]);
        let kept = filter(&v, &mask).expect("filter");
        let out = kept
            .array()
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("int64");
        assert_eq!(out.values().as_ref(), &[1, 3, 4]);
    }

    #[test]
    fn test_filter_length_mismatch() {
        let v = int_vector(vec![Some(1), Some(2)]);
        let mask = BooleanArray::from(vec![true]);
        assert!(matches!(
            filter(&v, &mask),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_null_mask_slot_drops_row() {
        let v = int_vector(vec![Some(1), Some(2), Some(3)]);
        let mask = BooleanArray::from(vec![Some(true), None, Some(true)]);
        let kept = filter(&v, &mask).expect("filter");
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_compare_null_yields_null_slot() {
        let a = int_vector(vec![Some(1), None]);
        let b = int_vector(vec![Some(1), Some(1)]);
        let mask = compare(CompareOp::Eq, &a, &b).expect("compare");
        assert!(mask.value(0));
        assert!(mask.is_null(1));
    }

    #[test]
    fn test_is_null_never_null() {
        let v = int_vector(vec![Some(1), None]);
        let mask = is_null(&v).expect("is_null");
        assert_eq!(mask.null_count(), 0);
        assert!(!mask.value(0));
        assert!(mask.value(1));
    }

    #[test]
    fn test_rows_equal_null_semantics() {
        let a = vec![int_vector(vec![None])];
        let b = vec![int_vector(vec![None])];
        assert!(rows_equal(&a, 0, &b, 0, NullEquality::NullsEqual).expect("eq"));
        assert!(!rows_equal(&a, 0, &b, 0, NullEquality::NullsNotEqual).expect("eq"));
    }

    #[test]
    fn test_rows_equal_composite() {
        let a = vec![
            int_vector(vec![Some(1), Some(1)]),
            Vector::from_arrow(Arc::new(StringArray::from(vec!["x", "y"])) as ArrayRef),
        ];
        assert!(rows_equal(&a, 0, &a, 0, NullEquality::NullsNotEqual).expect("eq"));
        assert!(!rows_equal(&a, 0, &a, 1, NullEquality::NullsNotEqual).expect("eq"));
    }
}
