//! Typed columnar vectors over the Arrow memory layout.
//!
//! A [`Vector`] is a length-N typed column: a values buffer, an optional
//! validity bitmap and type metadata, all carried by an Arrow array.
//! Vectors are immutable once published. Arrow buffers are reference
//! counted, so a vector built from a foreign (imported) array retains the
//! originating allocation and never frees bytes it does not own; the
//! `owns_data` flag records which side allocated.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use arrow::array::{ArrayRef, Int64Array};
//! use meridian::vector::Vector;
//!
//! let array: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None, Some(3)]));
//! let vector = Vector::from_arrow(array);
//!
//! assert_eq!(vector.len(), 3);
//! assert_eq!(vector.null_count(), 1);
//! assert!(!vector.owns_data()); // imported buffers stay foreign-owned
//! ```

pub mod builder;
pub mod hashing;
pub mod kernels;
mod scalar;

pub use builder::StringVectorBuilder;
pub use scalar::{scalar_at, vector_from_scalars, ScalarValue};

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::{DataType, IntervalUnit, TimeUnit};

use crate::error::{EngineError, EngineResult};

// ============================================================================
// Element types
// ============================================================================

/// The closed set of column element types the engine understands.
///
/// Anything outside this set (decimals, dictionaries, unions) is carried
/// opaquely as [`ElementType::Other`]: it flows through scans and
/// projections untouched but cannot be hashed, compared or aggregated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Days since the Unix epoch
    Date32,
    /// Microseconds since the Unix epoch, UTC
    Timestamp64,
    /// Seconds since midnight
    Time32,
    /// Microseconds since midnight
    Time64,
    /// Month-day-nanosecond calendar interval
    Interval,
    Utf8,
    Binary,
    List(Box<ElementType>),
    Struct(Vec<(String, ElementType)>),
    /// Opaque fallback for Arrow types outside the closed set
    Other,
}

impl ElementType {
    /// Map an Arrow data type into the engine's closed element set.
    pub fn from_arrow(data_type: &DataType) -> ElementType {
        match data_type {
            DataType::Boolean => ElementType::Bool,
            DataType::Int8 => ElementType::Int8,
            DataType::Int16 => ElementType::Int16,
            DataType::Int32 => ElementType::Int32,
            DataType::Int64 => ElementType::Int64,
            DataType::Float32 => ElementType::Float32,
            DataType::Float64 => ElementType::Float64,
            DataType::Date32 => ElementType::Date32,
            DataType::Timestamp(TimeUnit::Microsecond, _) => ElementType::Timestamp64,
            DataType::Time32(TimeUnit::Second) => ElementType::Time32,
            DataType::Time64(TimeUnit::Microsecond) => ElementType::Time64,
            DataType::Interval(IntervalUnit::MonthDayNano) => ElementType::Interval,
            DataType::Utf8 => ElementType::Utf8,
            DataType::Binary => ElementType::Binary,
            DataType::List(field) => {
                ElementType::List(Box::new(ElementType::from_arrow(field.data_type())))
            }
            DataType::Struct(fields) => ElementType::Struct(
                fields
                    .iter()
                    .map(|f| (f.name().clone(), ElementType::from_arrow(f.data_type())))
                    .collect(),
            ),
            _ => ElementType::Other,
        }
    }

    /// Whether the type is nested (list or struct).
    pub fn is_nested(&self) -> bool {
        matches!(self, ElementType::List(_) | ElementType::Struct(_))
    }

    /// Whether values of this type can be hashed and compared for equality
    /// by the engine's kernels.
    pub fn is_comparable(&self) -> bool {
        !matches!(
            self,
            ElementType::List(_) | ElementType::Struct(_) | ElementType::Other
        )
    }
}

// ============================================================================
// Vector
// ============================================================================

/// A typed, immutable column of fixed length.
#[derive(Debug, Clone)]
pub struct Vector {
    array: ArrayRef,
    owns_data: bool,
}

impl Vector {
    /// Wrap an engine-built Arrow array. The vector owns its buffers.
    pub fn new(array: ArrayRef) -> Vector {
        Vector {
            array,
            owns_data: true,
        }
    }

    /// Zero-copy construction from a foreign Arrow array.
    ///
    /// The vector holds a reference to the originating buffers and will
    /// never free the underlying bytes.
    pub fn from_arrow(array: ArrayRef) -> Vector {
        Vector {
            array,
            owns_data: false,
        }
    }

    /// Zero-copy construction from a chunked foreign input.
    ///
    /// Exactly one chunk is accepted; anything else is an input error.
    pub fn from_chunks(mut chunks: Vec<ArrayRef>) -> EngineResult<Vector> {
        if chunks.len() != 1 {
            return Err(EngineError::InvalidInput(format!(
                "expected exactly one chunk, got {}",
                chunks.len()
            )));
        }
        Ok(Vector::from_arrow(chunks.remove(0)))
    }

    /// Export as an Arrow array. Zero-copy: the reference-counted buffers
    /// are shared, never duplicated.
    pub fn to_arrow(&self) -> ArrayRef {
        self.array.clone()
    }

    /// The underlying Arrow array.
    pub fn array(&self) -> &ArrayRef {
        &self.array
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// The Arrow data type of the values buffer.
    pub fn data_type(&self) -> &DataType {
        self.array.data_type()
    }

    /// The engine element type.
    pub fn element_type(&self) -> ElementType {
        ElementType::from_arrow(self.array.data_type())
    }

    /// Number of null rows.
    pub fn null_count(&self) -> usize {
        self.array.null_count()
    }

    /// Whether row `i` holds a defined (non-null) value.
    pub fn is_valid(&self, i: usize) -> bool {
        self.array.is_valid(i)
    }

    /// Whether this vector owns its buffers (false for imported arrays).
    pub fn owns_data(&self) -> bool {
        self.owns_data
    }

    /// Zero-copy slice of `length` rows starting at `offset`.
    pub fn slice(&self, offset: usize, length: usize) -> Vector {
        Vector {
            array: self.array.slice(offset, length),
            owns_data: self.owns_data,
        }
    }

    /// Total heap bytes retained by this vector's buffers.
    pub fn memory_size(&self) -> usize {
        self.array.get_array_memory_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use std::sync::Arc;

    #[test]
    fn test_from_arrow_is_foreign() {
        let array: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 3]));
        let vector = Vector::from_arrow(array);
        assert!(!vector.owns_data());
        assert_eq!(vector.len(), 3);
    }

    #[test]
    fn test_to_arrow_shares_buffers() {
        let array: ArrayRef = Arc::new(StringArray::from(vec!["a", "b"]));
        let vector = Vector::from_arrow(array.clone());
        let exported = vector.to_arrow();
        // Same allocation: Arc pointers are equal.
        assert!(Arc::ptr_eq(&array, &exported));
    }

    #[test]
    fn test_from_chunks_rejects_multi_chunk() {
        let a: ArrayRef = Arc::new(Int64Array::from(vec![1]));
        let b: ArrayRef = Arc::new(Int64Array::from(vec![2]));
        let err = Vector::from_chunks(vec![a, b]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_from_chunks_single() {
        let a: ArrayRef = Arc::new(Int64Array::from(vec![1, 2]));
        let vector = Vector::from_chunks(vec![a]).expect("single chunk");
        assert_eq!(vector.len(), 2);
    }

    #[test]
    fn test_element_type_mapping() {
        let array: ArrayRef = Arc::new(Int64Array::from(vec![1]));
        assert_eq!(Vector::from_arrow(array).element_type(), ElementType::Int64);

        let strings: ArrayRef = Arc::new(StringArray::from(vec!["x"]));
        assert_eq!(
            Vector::from_arrow(strings).element_type(),
            ElementType::Utf8
        );
    }

    #[test]
    fn test_nested_types_not_comparable() {
        assert!(!ElementType::List(Box::new(ElementType::Int64)).is_comparable());
        assert!(!ElementType::Other.is_comparable());
        assert!(ElementType::Utf8.is_comparable());
    }
}
