//! Owned scalar values extracted from vectors.
//!
//! Scalars cross the columnar boundary in a few narrow places: literal
//! evaluation, aggregate accumulators, sort keys and the row-oriented
//! cursor fetch API. Integers widen to 64 bits and floats to f64 on
//! extraction; [`vector_from_scalars`] narrows back to the target Arrow
//! type when a column is rebuilt.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, Int8Array, ListArray, StringArray, Time32SecondArray,
    Time64MicrosecondArray, TimestampMicrosecondArray,
};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, TimeUnit};

use crate::error::{EngineError, EngineResult};

/// An owned scalar value.
#[derive(Debug, Clone)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
    /// Days since the Unix epoch
    Date32(i32),
    /// Microseconds since the Unix epoch, UTC
    Timestamp64(i64),
    List(Vec<ScalarValue>),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// The natural Arrow type of this scalar.
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Binary(_) => DataType::Binary,
            ScalarValue::Date32(_) => DataType::Date32,
            ScalarValue::Timestamp64(_) => DataType::Timestamp(TimeUnit::Microsecond, None),
            ScalarValue::List(items) => {
                let child = items
                    .iter()
                    .find(|v| !v.is_null())
                    .map_or(DataType::Null, ScalarValue::data_type);
                DataType::List(Arc::new(Field::new("item", child, true)))
            }
        }
    }

    /// Materialize this scalar as a length-`len` Arrow array of `data_type`.
    pub fn to_array(&self, data_type: &DataType, len: usize) -> EngineResult<ArrayRef> {
        let values = vec![self.clone(); len];
        vector_from_scalars(data_type, &values)
    }

    /// Ordering used by sort keys. Numeric types promote before comparing;
    /// nulls and non-comparable pairings are handled by the caller.
    pub fn try_cmp(&self, other: &ScalarValue) -> Option<Ordering> {
        use ScalarValue::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Int64(a), Int64(b)) => Some(a.cmp(b)),
            (Float64(a), Float64(b)) => Some(total_cmp_f64(*a, *b)),
            (Int64(a), Float64(b)) => Some(total_cmp_f64(*a as f64, *b)),
            (Float64(a), Int64(b)) => Some(total_cmp_f64(*a, *b as f64)),
            (Utf8(a), Utf8(b)) => Some(a.cmp(b)),
            (Binary(a), Binary(b)) => Some(a.cmp(b)),
            (Date32(a), Date32(b)) => Some(a.cmp(b)),
            (Timestamp64(a), Timestamp64(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn total_cmp_f64(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

/// Canonical bit pattern for hashing floats: all NaNs collapse, -0.0 == 0.0.
fn canonical_f64_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        use ScalarValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Float64(a), Float64(b)) => canonical_f64_bits(*a) == canonical_f64_bits(*b),
            (Utf8(a), Utf8(b)) => a == b,
            (Binary(a), Binary(b)) => a == b,
            (Date32(a), Date32(b)) => a == b,
            (Timestamp64(a), Timestamp64(b)) => a == b,
            (List(a), List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use ScalarValue::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Null => {}
            Boolean(v) => v.hash(state),
            Int64(v) => v.hash(state),
            Float64(v) => canonical_f64_bits(*v).hash(state),
            Utf8(v) => v.hash(state),
            Binary(v) => v.hash(state),
            Date32(v) => v.hash(state),
            Timestamp64(v) => v.hash(state),
            List(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            ScalarValue::Int64(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
            ScalarValue::Utf8(v) => write!(f, "'{v}'"),
            ScalarValue::Binary(v) => write!(f, "<{} bytes>", v.len()),
            ScalarValue::Date32(v) => write!(f, "DATE({v})"),
            ScalarValue::Timestamp64(v) => write!(f, "TIMESTAMP({v})"),
            ScalarValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ============================================================================
// Array <-> scalar bridging
// ============================================================================

/// Extract the value at `row` from an Arrow array.
pub fn scalar_at(array: &dyn Array, row: usize) -> EngineResult<ScalarValue> {
    if row >= array.len() {
        return Err(EngineError::InvalidInput(format!(
            "row {row} out of bounds for array of length {}",
            array.len()
        )));
    }
    if array.is_null(row) {
        return Ok(ScalarValue::Null);
    }
    let any = array.as_any();
    let value = match array.data_type() {
        DataType::Boolean => {
            ScalarValue::Boolean(downcast::<BooleanArray>(any, "Boolean")?.value(row))
        }
        DataType::Int8 => {
            ScalarValue::Int64(i64::from(downcast::<Int8Array>(any, "Int8")?.value(row)))
        }
        DataType::Int16 => {
            ScalarValue::Int64(i64::from(downcast::<Int16Array>(any, "Int16")?.value(row)))
        }
        DataType::Int32 => {
            ScalarValue::Int64(i64::from(downcast::<Int32Array>(any, "Int32")?.value(row)))
        }
        DataType::Int64 => ScalarValue::Int64(downcast::<Int64Array>(any, "Int64")?.value(row)),
        DataType::Float32 => ScalarValue::Float64(f64::from(
            downcast::<Float32Array>(any, "Float32")?.value(row),
        )),
        DataType::Float64 => {
            ScalarValue::Float64(downcast::<Float64Array>(any, "Float64")?.value(row))
        }
        DataType::Utf8 => {
            ScalarValue::Utf8(downcast::<StringArray>(any, "Utf8")?.value(row).to_string())
        }
        DataType::Binary => {
            ScalarValue::Binary(downcast::<BinaryArray>(any, "Binary")?.value(row).to_vec())
        }
        DataType::Date32 => ScalarValue::Date32(downcast::<Date32Array>(any, "Date32")?.value(row)),
        DataType::Timestamp(TimeUnit::Microsecond, _) => ScalarValue::Timestamp64(
            downcast::<TimestampMicrosecondArray>(any, "Timestamp")?.value(row),
        ),
        DataType::Time32(TimeUnit::Second) => ScalarValue::Int64(i64::from(
            downcast::<Time32SecondArray>(any, "Time32")?.value(row),
        )),
        DataType::Time64(TimeUnit::Microsecond) => {
            ScalarValue::Int64(downcast::<Time64MicrosecondArray>(any, "Time64")?.value(row))
        }
        DataType::List(_) => {
            let list = downcast::<ListArray>(any, "List")?;
            let element = list.value(row);
            let mut items = Vec::with_capacity(element.len());
            for i in 0..element.len() {
                items.push(scalar_at(element.as_ref(), i)?);
            }
            ScalarValue::List(items)
        }
        other => {
            return Err(EngineError::Unsupported(format!(
                "cannot extract scalar from column of type {other}"
            )))
        }
    };
    Ok(value)
}

fn downcast<'a, T: 'static>(any: &'a dyn std::any::Any, label: &str) -> EngineResult<&'a T> {
    any.downcast_ref::<T>()
        .ok_or_else(|| EngineError::Internal(format!("array downcast to {label} failed")))
}

/// Rebuild an Arrow array of `data_type` from owned scalars.
///
/// Integers and floats narrow back to the target width; a scalar that
/// cannot represent the target type is a type mismatch.
pub fn vector_from_scalars(data_type: &DataType, values: &[ScalarValue]) -> EngineResult<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Null => {
            if let Some(v) = values.iter().find(|v| !v.is_null()) {
                return Err(mismatch(v, data_type));
            }
            Arc::new(arrow::array::NullArray::new(values.len()))
        }
        DataType::Boolean => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    ScalarValue::Null => Ok(None),
                    ScalarValue::Boolean(b) => Ok(Some(*b)),
                    other => Err(mismatch(other, data_type)),
                })
                .collect::<EngineResult<BooleanArray>>()?,
        ),
        DataType::Int8 => Arc::new(
            collect_ints(values, data_type)?
                .into_iter()
                .map(|v| v.map(|x| x as i8))
                .collect::<Int8Array>(),
        ),
        DataType::Int16 => Arc::new(
            collect_ints(values, data_type)?
                .into_iter()
                .map(|v| v.map(|x| x as i16))
                .collect::<Int16Array>(),
        ),
        DataType::Int32 => Arc::new(
            collect_ints(values, data_type)?
                .into_iter()
                .map(|v| v.map(|x| x as i32))
                .collect::<Int32Array>(),
        ),
        DataType::Int64 => Arc::new(
            collect_ints(values, data_type)?
                .into_iter()
                .collect::<Int64Array>(),
        ),
        DataType::Float32 => Arc::new(
            collect_floats(values, data_type)?
                .into_iter()
                .map(|v| v.map(|x| x as f32))
                .collect::<Float32Array>(),
        ),
        DataType::Float64 => Arc::new(
            collect_floats(values, data_type)?
                .into_iter()
                .collect::<Float64Array>(),
        ),
        DataType::Utf8 => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    ScalarValue::Null => Ok(None),
                    ScalarValue::Utf8(s) => Ok(Some(s.clone())),
                    other => Err(mismatch(other, data_type)),
                })
                .collect::<EngineResult<StringArray>>()?,
        ),
        DataType::Binary => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    ScalarValue::Null => Ok(None),
                    ScalarValue::Binary(b) => Ok(Some(b.clone())),
                    other => Err(mismatch(other, data_type)),
                })
                .collect::<EngineResult<BinaryArray>>()?,
        ),
        DataType::Date32 => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    ScalarValue::Null => Ok(None),
                    ScalarValue::Date32(d) => Ok(Some(*d)),
                    ScalarValue::Int64(d) => Ok(Some(*d as i32)),
                    other => Err(mismatch(other, data_type)),
                })
                .collect::<EngineResult<Date32Array>>()?,
        ),
        DataType::Timestamp(TimeUnit::Microsecond, tz) => {
            let array = values
                .iter()
                .map(|v| match v {
                    ScalarValue::Null => Ok(None),
                    ScalarValue::Timestamp64(t) => Ok(Some(*t)),
                    ScalarValue::Int64(t) => Ok(Some(*t)),
                    other => Err(mismatch(other, data_type)),
                })
                .collect::<EngineResult<TimestampMicrosecondArray>>()?;
            Arc::new(array.with_timezone_opt(tz.clone()))
        }
        DataType::List(field) => {
            let mut offsets: Vec<i32> = Vec::with_capacity(values.len() + 1);
            let mut validity: Vec<bool> = Vec::with_capacity(values.len());
            let mut children: Vec<ScalarValue> = Vec::new();
            offsets.push(0);
            for v in values {
                match v {
                    ScalarValue::Null => {
                        validity.push(false);
                        offsets.push(children.len() as i32);
                    }
                    ScalarValue::List(items) => {
                        validity.push(true);
                        children.extend(items.iter().cloned());
                        offsets.push(children.len() as i32);
                    }
                    other => return Err(mismatch(other, data_type)),
                }
            }
            let child_array = vector_from_scalars(field.data_type(), &children)?;
            let nulls = if validity.iter().all(|v| *v) {
                None
            } else {
                Some(arrow::buffer::NullBuffer::from(validity))
            };
            Arc::new(ListArray::try_new(
                field.clone(),
                OffsetBuffer::new(offsets.into()),
                child_array,
                nulls,
            )?)
        }
        other => {
            return Err(EngineError::Unsupported(format!(
                "cannot build column of type {other} from scalars"
            )))
        }
    };
    Ok(array)
}

fn mismatch(value: &ScalarValue, target: &DataType) -> EngineError {
    EngineError::TypeMismatch(format!(
        "cannot place {value} into a column of type {target}"
    ))
}

fn collect_ints(values: &[ScalarValue], target: &DataType) -> EngineResult<Vec<Option<i64>>> {
    values
        .iter()
        .map(|v| match v {
            ScalarValue::Null => Ok(None),
            ScalarValue::Int64(x) => Ok(Some(*x)),
            ScalarValue::Boolean(b) => Ok(Some(i64::from(*b))),
            other => Err(mismatch(other, target)),
        })
        .collect()
}

fn collect_floats(values: &[ScalarValue], target: &DataType) -> EngineResult<Vec<Option<f64>>> {
    values
        .iter()
        .map(|v| match v {
            ScalarValue::Null => Ok(None),
            ScalarValue::Float64(x) => Ok(Some(*x)),
            ScalarValue::Int64(x) => Ok(Some(*x as f64)),
            other => Err(mismatch(other, target)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip_int() {
        let array = Int64Array::from(vec![Some(7), None]);
        assert_eq!(
            scalar_at(&array, 0).expect("in bounds"),
            ScalarValue::Int64(7)
        );
        assert_eq!(scalar_at(&array, 1).expect("in bounds"), ScalarValue::Null);
    }

    #[test]
    fn test_scalar_widening() {
        let array = Int32Array::from(vec![5]);
        assert_eq!(
            scalar_at(&array, 0).expect("in bounds"),
            ScalarValue::Int64(5)
        );
    }

    #[test]
    fn test_out_of_bounds() {
        let array = Int64Array::from(vec![1]);
        assert!(scalar_at(&array, 3).is_err());
    }

    #[test]
    fn test_rebuild_narrowing() {
        let values = vec![
            ScalarValue::Int64(1),
            ScalarValue::Null,
            ScalarValue::Int64(3),
        ];
        let array = vector_from_scalars(&DataType::Int32, &values).expect("rebuild");
        let ints = array.as_any().downcast_ref::<Int32Array>().expect("int32");
        assert_eq!(ints.value(0), 1);
        assert!(ints.is_null(1));
        assert_eq!(ints.value(2), 3);
    }

    #[test]
    fn test_float_equality_canonical() {
        assert_eq!(
            ScalarValue::Float64(f64::NAN),
            ScalarValue::Float64(f64::NAN)
        );
        assert_eq!(ScalarValue::Float64(0.0), ScalarValue::Float64(-0.0));
        assert_ne!(ScalarValue::Float64(1.0), ScalarValue::Float64(2.0));
    }

    #[test]
    fn test_list_roundtrip() {
        let values = vec![
            ScalarValue::List(vec![ScalarValue::Int64(1), ScalarValue::Int64(2)]),
            ScalarValue::Null,
            ScalarValue::List(vec![]),
        ];
        let field = Arc::new(Field::new("item", DataType::Int64, true));
        let array = vector_from_scalars(&DataType::List(field), &values).expect("list");
        let extracted = scalar_at(array.as_ref(), 0).expect("row 0");
        assert_eq!(
            extracted,
            ScalarValue::List(vec![ScalarValue::Int64(1), ScalarValue::Int64(2)])
        );
        assert_eq!(
            scalar_at(array.as_ref(), 1).expect("row 1"),
            ScalarValue::Null
        );
        assert_eq!(
            scalar_at(array.as_ref(), 2).expect("row 2"),
            ScalarValue::List(vec![])
        );
    }
}
