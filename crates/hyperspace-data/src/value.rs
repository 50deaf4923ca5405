//! Typed values and their packed encodings.
//!
//! Every attribute value has two representations:
//!
//! - [`Value`]: the typed in-memory view used by predicate checks and
//!   functional updates.
//! - packed bytes: the flat encoding carried in chain messages and handed
//!   to the storage adapter. A whole object is a [`PackedTuple`]: one
//!   packed buffer per value attribute, `Bytes`-backed so a tuple is
//!   self-contained across thread handoff.
//!
//! Packed forms:
//!
//! - `string`: the raw bytes.
//! - `int64`: 8 bytes little-endian two's complement. The empty buffer
//!   decodes as 0 (an unset attribute).
//! - `float64`: 8 bytes IEEE-754 little-endian. The empty buffer decodes
//!   as 0.0.
//! - `list<T>`: concatenated elements in insertion order.
//! - `set<T>`: concatenated elements in sorted order, deduplicated.
//! - `map<K,V>`: concatenated `(K,V)` pairs sorted by `K`.
//!
//! Inside containers, string elements are `u32`-length-prefixed so they
//! can be delimited; numeric elements are fixed 8-byte.

use std::cmp::Ordering;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DataError;
use crate::ordered::ordered_encode_double;
use crate::schema::{AttrType, PrimType, Schema};

// ============================================================================
// Value
// ============================================================================

/// A typed attribute value.
///
/// Sets are kept sorted and deduplicated, maps sorted by key; the
/// constructors below canonicalize, so two equal containers always have
/// equal packed encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Bytes),
    Int(i64),
    Float(f64),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn str(s: impl AsRef<[u8]>) -> Value {
        Value::Str(Bytes::copy_from_slice(s.as_ref()))
    }

    /// Builds a canonical set: sorted, deduplicated.
    pub fn set(mut elems: Vec<Value>) -> Value {
        elems.sort_by(cmp_values);
        elems.dedup();
        Value::Set(elems)
    }

    /// Builds a canonical map: sorted by key, later duplicates dropped.
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Value {
        pairs.sort_by(|a, b| cmp_values(&a.0, &b.0));
        pairs.dedup_by(|a, b| a.0 == b.0);
        Value::Map(pairs)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int64",
            Value::Float(_) => "float64",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    /// The zero value for an attribute type: empty string, 0, 0.0, or an
    /// empty container.
    pub fn zero(ty: AttrType) -> Value {
        match ty {
            AttrType::Primitive(PrimType::String) => Value::Str(Bytes::new()),
            AttrType::Primitive(PrimType::Int64) => Value::Int(0),
            AttrType::Primitive(PrimType::Float64) => Value::Float(0.0),
            AttrType::List(_) => Value::List(Vec::new()),
            AttrType::Set(_) => Value::Set(Vec::new()),
            AttrType::Map(_, _) => Value::Map(Vec::new()),
        }
    }

    /// Whether this value inhabits the given attribute type.
    pub fn fits(&self, ty: AttrType) -> bool {
        match (self, ty) {
            (Value::Str(_), AttrType::Primitive(PrimType::String))
            | (Value::Int(_), AttrType::Primitive(PrimType::Int64))
            | (Value::Float(_), AttrType::Primitive(PrimType::Float64)) => true,
            (Value::List(elems), AttrType::List(p)) => {
                elems.iter().all(|e| e.fits(AttrType::Primitive(p)))
            }
            (Value::Set(elems), AttrType::Set(p)) => {
                elems.iter().all(|e| e.fits(AttrType::Primitive(p)))
            }
            (Value::Map(pairs), AttrType::Map(k, v)) => pairs.iter().all(|(pk, pv)| {
                pk.fits(AttrType::Primitive(k)) && pv.fits(AttrType::Primitive(v))
            }),
            _ => false,
        }
    }
}

/// Total order on primitive values of the same type: memcmp for strings,
/// numeric order for int64, ordered-encoding order for float64 (so -0.0
/// and +0.0 compare equal and NaN has a defined slot).
pub(crate) fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x.as_ref().cmp(y.as_ref()),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => {
            ordered_encode_double(*x).cmp(&ordered_encode_double(*y))
        }
        // Mixed-type comparison never happens for schema-checked values;
        // fall back to a stable arbitrary order.
        _ => a.type_name().cmp(b.type_name()),
    }
}

// ============================================================================
// Packed encoding
// ============================================================================

/// Encodes a value into its packed attribute form.
pub fn encode_packed(value: &Value, ty: AttrType, index: u16) -> Result<Bytes, DataError> {
    if !value.fits(ty) {
        return Err(DataError::TypeMismatch {
            index,
            expected: ty.name(),
            got: value.type_name(),
        });
    }

    let mut buf = BytesMut::new();

    match value {
        Value::Str(s) => return Ok(s.clone()),
        Value::Int(x) => buf.put_i64_le(*x),
        Value::Float(x) => buf.put_f64_le(*x),
        Value::List(elems) | Value::Set(elems) => {
            for e in elems {
                encode_element(e, &mut buf);
            }
        }
        Value::Map(pairs) => {
            for (k, v) in pairs {
                encode_element(k, &mut buf);
                encode_element(v, &mut buf);
            }
        }
    }

    Ok(buf.freeze())
}

/// Decodes a packed attribute into its typed form.
pub fn decode_packed(packed: &Bytes, ty: AttrType, index: u16) -> Result<Value, DataError> {
    match ty {
        AttrType::Primitive(PrimType::String) => Ok(Value::Str(packed.clone())),
        AttrType::Primitive(PrimType::Int64) => decode_int64(packed, index).map(Value::Int),
        AttrType::Primitive(PrimType::Float64) => decode_float64(packed, index).map(Value::Float),
        AttrType::List(p) => {
            let mut cursor = packed.clone();
            let mut elems = Vec::new();

            while cursor.has_remaining() {
                elems.push(decode_element(&mut cursor, p, index)?);
            }

            Ok(Value::List(elems))
        }
        AttrType::Set(p) => {
            let mut cursor = packed.clone();
            let mut elems = Vec::new();

            while cursor.has_remaining() {
                elems.push(decode_element(&mut cursor, p, index)?);
            }

            Ok(Value::set(elems))
        }
        AttrType::Map(kt, vt) => {
            let mut cursor = packed.clone();
            let mut pairs = Vec::new();

            while cursor.has_remaining() {
                let k = decode_element(&mut cursor, kt, index)?;
                let v = decode_element(&mut cursor, vt, index)?;
                pairs.push((k, v));
            }

            Ok(Value::map(pairs))
        }
    }
}

fn encode_element(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Str(s) => {
            buf.put_u32_le(s.len() as u32);
            buf.put_slice(s);
        }
        Value::Int(x) => buf.put_i64_le(*x),
        Value::Float(x) => buf.put_f64_le(*x),
        _ => unreachable!("containers hold primitives only"),
    }
}

fn decode_element(cursor: &mut Bytes, p: PrimType, index: u16) -> Result<Value, DataError> {
    match p {
        PrimType::String => {
            if cursor.remaining() < 4 {
                return Err(DataError::BadEncoding {
                    index,
                    reason: "truncated string element length",
                });
            }

            let len = cursor.get_u32_le() as usize;

            if cursor.remaining() < len {
                return Err(DataError::BadEncoding {
                    index,
                    reason: "truncated string element",
                });
            }

            Ok(Value::Str(cursor.split_to(len)))
        }
        PrimType::Int64 => {
            if cursor.remaining() < 8 {
                return Err(DataError::BadEncoding {
                    index,
                    reason: "truncated int64 element",
                });
            }

            Ok(Value::Int(cursor.get_i64_le()))
        }
        PrimType::Float64 => {
            if cursor.remaining() < 8 {
                return Err(DataError::BadEncoding {
                    index,
                    reason: "truncated float64 element",
                });
            }

            Ok(Value::Float(cursor.get_f64_le()))
        }
    }
}

fn decode_int64(packed: &Bytes, index: u16) -> Result<i64, DataError> {
    match packed.len() {
        // An unset attribute decodes as zero.
        0 => Ok(0),
        8 => Ok(i64::from_le_bytes(packed.as_ref().try_into().unwrap())),
        _ => Err(DataError::BadEncoding {
            index,
            reason: "int64 must be 0 or 8 bytes",
        }),
    }
}

fn decode_float64(packed: &Bytes, index: u16) -> Result<f64, DataError> {
    match packed.len() {
        0 => Ok(0.0),
        8 => Ok(f64::from_le_bytes(packed.as_ref().try_into().unwrap())),
        _ => Err(DataError::BadEncoding {
            index,
            reason: "float64 must be 0 or 8 bytes",
        }),
    }
}

// ============================================================================
// PackedTuple
// ============================================================================

/// A whole object: one packed buffer per value attribute, in schema
/// order. The key is carried separately.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackedTuple {
    attrs: Vec<Bytes>,
}

impl PackedTuple {
    /// A tuple of unset attributes for the given schema.
    pub fn unset(schema: &Schema) -> Self {
        Self {
            attrs: vec![Bytes::new(); usize::from(schema.value_sz())],
        }
    }

    pub fn from_attrs(attrs: Vec<Bytes>) -> Self {
        Self { attrs }
    }

    /// Encodes typed values (one per value attribute, in schema order).
    pub fn encode(schema: &Schema, values: &[Value]) -> Result<Self, DataError> {
        if values.len() != usize::from(schema.value_sz()) {
            return Err(DataError::BadEncoding {
                index: schema.value_sz(),
                reason: "tuple width does not match schema",
            });
        }

        let mut attrs = Vec::with_capacity(values.len());

        for (i, v) in values.iter().enumerate() {
            let index = i as u16;
            let ty = schema
                .value_type(index)
                .ok_or(DataError::UnknownAttribute {
                    index,
                    count: schema.attrs_sz(),
                })?;
            attrs.push(encode_packed(v, ty, index + 1)?);
        }

        Ok(Self { attrs })
    }

    /// Decodes into typed values, one per value attribute.
    pub fn decode(&self, schema: &Schema) -> Result<Vec<Value>, DataError> {
        if self.attrs.len() != usize::from(schema.value_sz()) {
            return Err(DataError::BadEncoding {
                index: schema.value_sz(),
                reason: "tuple width does not match schema",
            });
        }

        self.attrs
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let index = i as u16;
                let ty = schema.value_type(index).expect("width checked above");
                decode_packed(b, ty, index + 1)
            })
            .collect()
    }

    pub fn width(&self) -> u16 {
        self.attrs.len() as u16
    }

    pub fn attr(&self, i: u16) -> Option<&Bytes> {
        self.attrs.get(usize::from(i))
    }

    pub fn attrs(&self) -> &[Bytes] {
        &self.attrs
    }

    /// Total packed size in bytes, for flow-control accounting.
    pub fn packed_len(&self) -> usize {
        self.attrs.iter().map(Bytes::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::Attribute;

    use super::*;

    fn schema() -> Schema {
        Schema::new(
            "objects",
            vec![
                Attribute::new("k", AttrType::STRING),
                Attribute::new("name", AttrType::STRING),
                Attribute::new("count", AttrType::INT64),
                Attribute::new("score", AttrType::FLOAT64),
                Attribute::new("tags", AttrType::Set(PrimType::String)),
                Attribute::new("history", AttrType::List(PrimType::Int64)),
                Attribute::new("meta", AttrType::Map(PrimType::String, PrimType::Int64)),
            ],
        )
    }

    fn sample_values() -> Vec<Value> {
        vec![
            Value::str("alice"),
            Value::Int(-42),
            Value::Float(2.5),
            Value::set(vec![Value::str("b"), Value::str("a"), Value::str("b")]),
            Value::List(vec![Value::Int(3), Value::Int(1), Value::Int(3)]),
            Value::map(vec![
                (Value::str("y"), Value::Int(2)),
                (Value::str("x"), Value::Int(1)),
            ]),
        ]
    }

    #[test]
    fn tuple_round_trips() {
        let sc = schema();
        let tuple = PackedTuple::encode(&sc, &sample_values()).unwrap();
        let back = tuple.decode(&sc).unwrap();
        assert_eq!(back, sample_values());
    }

    #[test]
    fn set_encoding_is_sorted_and_deduped() {
        let a = Value::set(vec![Value::str("b"), Value::str("a"), Value::str("b")]);
        let b = Value::set(vec![Value::str("a"), Value::str("b")]);
        let ty = AttrType::Set(PrimType::String);
        assert_eq!(
            encode_packed(&a, ty, 1).unwrap(),
            encode_packed(&b, ty, 1).unwrap()
        );
    }

    #[test]
    fn map_encoding_is_sorted_by_key() {
        let a = Value::map(vec![
            (Value::Int(2), Value::str("two")),
            (Value::Int(1), Value::str("one")),
        ]);
        let ty = AttrType::Map(PrimType::Int64, PrimType::String);
        let packed = encode_packed(&a, ty, 1).unwrap();
        let back = decode_packed(&packed, ty, 1).unwrap();

        match back {
            Value::Map(pairs) => {
                assert_eq!(pairs[0].0, Value::Int(1));
                assert_eq!(pairs[1].0, Value::Int(2));
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn unset_attributes_decode_as_zero() {
        let sc = schema();
        let tuple = PackedTuple::unset(&sc);
        let values = tuple.decode(&sc).unwrap();
        assert_eq!(values[0], Value::Str(Bytes::new()));
        assert_eq!(values[1], Value::Int(0));
        assert_eq!(values[2], Value::Float(0.0));
        assert_eq!(values[3], Value::Set(Vec::new()));
        assert_eq!(values[4], Value::List(Vec::new()));
        assert_eq!(values[5], Value::Map(Vec::new()));
    }

    #[test]
    fn bad_width_is_rejected() {
        let sc = schema();
        let err = PackedTuple::encode(&sc, &[Value::Int(1)]).unwrap_err();
        assert!(matches!(err, DataError::BadEncoding { .. }));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let sc = schema();
        let mut values = sample_values();
        values[1] = Value::str("not an int");
        let err = PackedTuple::encode(&sc, &values).unwrap_err();
        assert!(matches!(err, DataError::TypeMismatch { index: 2, .. }));
    }

    #[test]
    fn truncated_container_is_rejected() {
        let ty = AttrType::List(PrimType::Int64);
        let packed = Bytes::from_static(&[1, 2, 3]);
        let err = decode_packed(&packed, ty, 1).unwrap_err();
        assert!(matches!(err, DataError::BadEncoding { .. }));
    }
}
