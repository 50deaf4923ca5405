//! Packed-attribute decoding must never panic, for any attribute type,
//! and decoded containers must re-encode canonically (sets sorted and
//! deduplicated, maps sorted by key).

#![no_main]

use bytes::Bytes;
use hyperspace_data::{AttrType, PackedTuple, PrimType, Schema, Attribute, Value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // The first byte picks the attribute type; the rest is the packed
    // payload.
    let types = [
        AttrType::Primitive(PrimType::String),
        AttrType::Primitive(PrimType::Int64),
        AttrType::Primitive(PrimType::Float64),
        AttrType::List(PrimType::String),
        AttrType::List(PrimType::Int64),
        AttrType::Set(PrimType::String),
        AttrType::Set(PrimType::Float64),
        AttrType::Map(PrimType::String, PrimType::Int64),
        AttrType::Map(PrimType::Int64, PrimType::String),
    ];
    let ty = types[usize::from(data[0]) % types.len()];
    let schema = Schema::new(
        "fuzz",
        vec![
            Attribute::new("k", AttrType::Primitive(PrimType::String)),
            Attribute::new("a", ty),
        ],
    );
    let tuple = PackedTuple::from_attrs(vec![Bytes::copy_from_slice(&data[1..])]);

    if let Ok(values) = tuple.decode(&schema) {
        // Whatever decodes must re-encode and decode to the same values;
        // NaN map keys are the one case with no canonical order.
        let has_nan = values.iter().any(contains_nan);

        if !has_nan {
            let reencoded = PackedTuple::encode(&schema, &values).expect("decoded values fit");
            let back = reencoded.decode(&schema).expect("canonical form decodes");
            assert_eq!(back, values);
        }
    }
});

fn contains_nan(value: &Value) -> bool {
    match value {
        Value::Float(f) => f.is_nan(),
        Value::List(elems) | Value::Set(elems) => elems.iter().any(contains_nan),
        Value::Map(pairs) => pairs
            .iter()
            .any(|(k, v)| contains_nan(k) || contains_nan(v)),
        Value::Str(_) | Value::Int(_) => false,
    }
}
