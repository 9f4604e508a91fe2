//! Type-specific 64-bit hashing over vectors.
//!
//! The hash identity contract: equal values hash to equal u64 per type,
//! NULL hashes to one distinguished sentinel shared across all types, and
//! composite keys combine with an order-sensitive mix. Downstream hash
//! tables treat the produced u64 as the bucket identity and never rehash.

use arrow::array::{
    Array, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, StringArray, Time32SecondArray, Time64MicrosecondArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, TimeUnit};
use xxhash_rust::xxh3::xxh3_64;

use super::Vector;
use crate::error::{EngineError, EngineResult};

/// Sentinel hash for NULL, shared across all types.
pub const NULL_HASH: u64 = 0x9ae1_6a3b_2f90_404f;

/// Order-sensitive combine for composite keys.
#[inline]
pub fn combine_hashes(acc: u64, next: u64) -> u64 {
    acc.rotate_left(31) ^ next.wrapping_mul(0x9e37_79b1_85eb_ca87)
}

#[inline]
fn hash_bytes(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

#[inline]
fn hash_f64(v: f64) -> u64 {
    // -0.0 and all NaN payloads collapse so equal SQL values share a hash.
    let canonical = if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    };
    hash_bytes(&canonical.to_le_bytes())
}

/// Write the hash of every row of `vector` into `out[offset..offset+len]`.
pub fn hash_into(vector: &Vector, out: &mut [u64], offset: usize) -> EngineResult<()> {
    apply_hashes(vector, out, offset, |_, h| h)
}

/// Mix the hash of every row of `vector` into the existing values of
/// `out[offset..offset+len]`, order-sensitively.
pub fn mix_into(vector: &Vector, out: &mut [u64], offset: usize) -> EngineResult<()> {
    apply_hashes(vector, out, offset, combine_hashes)
}

/// Hash a composite key spanning `columns`, row-wise.
///
/// All columns must share one length; the first column seeds the hash and
/// the rest mix in left to right.
pub fn hash_rows(columns: &[Vector]) -> EngineResult<Vec<u64>> {
    let Some(first) = columns.first() else {
        return Ok(Vec::new());
    };
    let mut out = vec![0u64; first.len()];
    hash_into(first, &mut out, 0)?;
    for column in &columns[1..] {
        if column.len() != first.len() {
            return Err(EngineError::InvalidInput(format!(
                "composite key columns disagree on length: {} vs {}",
                first.len(),
                column.len()
            )));
        }
        mix_into(column, &mut out, 0)?;
    }
    Ok(out)
}

fn apply_hashes(
    vector: &Vector,
    out: &mut [u64],
    offset: usize,
    merge: impl Fn(u64, u64) -> u64,
) -> EngineResult<()> {
    let len = vector.len();
    if offset + len > out.len() {
        return Err(EngineError::InvalidInput(format!(
            "hash output buffer too small: need {} slots at offset {offset}, have {}",
            len,
            out.len()
        )));
    }
    let slots = &mut out[offset..offset + len];
    let array = vector.array();
    let any = array.as_any();

    macro_rules! hash_primitive {
        ($arr_ty:ty, $to_bytes:expr) => {{
            let array = any
                .downcast_ref::<$arr_ty>()
                .ok_or_else(|| EngineError::Internal("hash downcast failed".into()))?;
            for (i, slot) in slots.iter_mut().enumerate() {
                let h = if array.is_null(i) {
                    NULL_HASH
                } else {
                    $to_bytes(array.value(i))
                };
                *slot = merge(*slot, h);
            }
        }};
    }

    match array.data_type() {
        DataType::Boolean => {
            let array = any
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| EngineError::Internal("hash downcast failed".into()))?;
            for (i, slot) in slots.iter_mut().enumerate() {
                let h = if array.is_null(i) {
                    NULL_HASH
                } else {
                    hash_bytes(&[u8::from(array.value(i))])
                };
                *slot = merge(*slot, h);
            }
        }
        DataType::Int8 => hash_primitive!(Int8Array, |v: i8| hash_bytes(&v.to_le_bytes())),
        DataType::Int16 => hash_primitive!(Int16Array, |v: i16| hash_bytes(&v.to_le_bytes())),
        DataType::Int32 => hash_primitive!(Int32Array, |v: i32| hash_bytes(&v.to_le_bytes())),
        DataType::Int64 => hash_primitive!(Int64Array, |v: i64| hash_bytes(&v.to_le_bytes())),
        DataType::Float32 => hash_primitive!(Float32Array, |v: f32| hash_f64(f64::from(v))),
        DataType::Float64 => hash_primitive!(Float64Array, |v: f64| hash_f64(v)),
        DataType::Date32 => hash_primitive!(Date32Array, |v: i32| hash_bytes(&v.to_le_bytes())),
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            hash_primitive!(TimestampMicrosecondArray, |v: i64| hash_bytes(
                &v.to_le_bytes()
            ));
        }
        DataType::Time32(TimeUnit::Second) => {
            hash_primitive!(Time32SecondArray, |v: i32| hash_bytes(&v.to_le_bytes()));
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            hash_primitive!(Time64MicrosecondArray, |v: i64| hash_bytes(
                &v.to_le_bytes()
            ));
        }
        DataType::Utf8 => {
            let array = any
                .downcast_ref::<StringArray>()
                .ok_or_else(|| EngineError::Internal("hash downcast failed".into()))?;
            for (i, slot) in slots.iter_mut().enumerate() {
                let h = if array.is_null(i) {
                    NULL_HASH
                } else {
                    hash_bytes(array.value(i).as_bytes())
                };
                *slot = merge(*slot, h);
            }
        }
        DataType::Binary => {
            let array = any
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| EngineError::Internal("hash downcast failed".into()))?;
            for (i, slot) in slots.iter_mut().enumerate() {
                let h = if array.is_null(i) {
                    NULL_HASH
                } else {
                    hash_bytes(array.value(i))
                };
                *slot = merge(*slot, h);
            }
        }
        other => {
            return Err(EngineError::Unsupported(format!(
                "hashing is not defined for columns of type {other}"
            )))
        }
    }
    Ok(())
}
