//! Incremental construction of variable-width string vectors.

use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::buffer::{Buffer, NullBuffer, OffsetBuffer, ScalarBuffer};

use super::Vector;
use crate::error::{EngineError, EngineResult};

/// Builds a UTF-8 vector from appended values.
///
/// Offsets are monotonically non-decreasing by construction and the byte
/// buffer grows geometrically. `finish()` transfers buffer ownership to
/// the resulting vector.
pub struct StringVectorBuilder {
    data: Vec<u8>,
    offsets: Vec<i32>,
    validity: Vec<bool>,
    has_nulls: bool,
}

impl StringVectorBuilder {
    pub fn new() -> Self {
        Self::with_capacity(0, 0)
    }

    /// `rows` and `bytes` size the offset and data buffers up front.
    pub fn with_capacity(rows: usize, bytes: usize) -> Self {
        let mut offsets = Vec::with_capacity(rows + 1);
        offsets.push(0);
        StringVectorBuilder {
            data: Vec::with_capacity(bytes),
            offsets,
            validity: Vec::with_capacity(rows),
            has_nulls: false,
        }
    }

    /// Append one UTF-8 value.
    pub fn append(&mut self, value: &str) -> EngineResult<()> {
        let bytes = value.as_bytes();
        self.reserve_bytes(bytes.len());
        self.data.extend_from_slice(bytes);
        let end = i32::try_from(self.data.len()).map_err(|_| {
            EngineError::InvalidInput("string vector exceeds i32 offset range".into())
        })?;
        self.offsets.push(end);
        self.validity.push(true);
        Ok(())
    }

    /// Append one NULL row.
    pub fn append_null(&mut self) {
        let end = self.offsets[self.offsets.len() - 1];
        self.offsets.push(end);
        self.validity.push(false);
        self.has_nulls = true;
    }

    /// Rows appended so far.
    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validity.is_empty()
    }

    /// Finish the vector, transferring buffer ownership.
    pub fn finish(self) -> Vector {
        let offsets = OffsetBuffer::new(ScalarBuffer::from(self.offsets));
        let values = Buffer::from_vec(self.data);
        let nulls = if self.has_nulls {
            Some(NullBuffer::from(self.validity))
        } else {
            None
        };
        let array: ArrayRef = Arc::new(StringArray::new(offsets, values, nulls));
        Vector::new(array)
    }

    // Grow geometrically: doubling keeps amortized appends O(1).
    fn reserve_bytes(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if needed > self.data.capacity() {
            let target = needed.max(self.data.capacity() * 2).max(64);
            self.data.reserve(target - self.data.len());
        }
    }
}

impl Default for StringVectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
