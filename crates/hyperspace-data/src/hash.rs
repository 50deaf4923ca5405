//! Per-attribute hashing.
//!
//! An object's position in each subspace is a vector of 64-bit hashes,
//! one per attribute. Strings and containers hash with xxh3; int64 and
//! float64 hash through their ordered encodings so region rectangles
//! cover contiguous value ranges.

use bytes::Bytes;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::DataError;
use crate::ordered::{ordered_encode_double, ordered_encode_int64};
use crate::schema::{AttrType, PrimType, Schema};
use crate::value::PackedTuple;

/// Hashes the key attribute.
pub fn hash_key(schema: &Schema, key: &Bytes) -> u64 {
    hash_packed(key, AttrType::Primitive(schema.key_type()))
}

/// Hashes every attribute of `(key, value)`, key first. The result has
/// `schema.attrs_sz()` entries and is what the configuration maps to a
/// region per subspace.
pub fn hash_tuple(
    schema: &Schema,
    key: &Bytes,
    value: &PackedTuple,
) -> Result<Vec<u64>, DataError> {
    if value.width() != schema.value_sz() {
        return Err(DataError::BadEncoding {
            index: schema.value_sz(),
            reason: "tuple width does not match schema",
        });
    }

    let mut hashes = Vec::with_capacity(usize::from(schema.attrs_sz()));
    hashes.push(hash_key(schema, key));

    for i in 0..schema.value_sz() {
        let ty = schema.value_type(i).expect("iterating schema width");
        let packed = value.attr(i).expect("width checked above");
        hashes.push(hash_packed(packed, ty));
    }

    Ok(hashes)
}

fn hash_packed(packed: &Bytes, ty: AttrType) -> u64 {
    match ty {
        AttrType::Primitive(PrimType::Int64) => {
            // Empty packed form is the unset attribute, i.e. zero.
            let x = if packed.is_empty() {
                0
            } else if packed.len() == 8 {
                i64::from_le_bytes(packed.as_ref().try_into().unwrap())
            } else {
                return xxh3_64(packed);
            };
            ordered_encode_int64(x)
        }
        AttrType::Primitive(PrimType::Float64) => {
            let x = if packed.is_empty() {
                0.0
            } else if packed.len() == 8 {
                f64::from_le_bytes(packed.as_ref().try_into().unwrap())
            } else {
                return xxh3_64(packed);
            };
            ordered_encode_double(x)
        }
        AttrType::Primitive(PrimType::String)
        | AttrType::List(_)
        | AttrType::Set(_)
        | AttrType::Map(_, _) => xxh3_64(packed),
    }
}
