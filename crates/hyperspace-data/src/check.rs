//! CAS predicates.
//!
//! A client-atomic may guard its functional updates with attribute
//! checks. Checks are evaluated against the latest visible value of the
//! key (blocked tail, else committable tail, else on-disk) before a
//! version is assigned; if any check fails the operation is refused with
//! `CMPFAIL` and consumes no version.

use bytes::Bytes;

use crate::error::DataError;
use crate::schema::{AttrType, Schema};
use crate::value::{PackedTuple, Value, cmp_values, decode_packed};

/// A comparison applied to one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(Value),
    LessThan(Value),
    LessEqual(Value),
    GreaterThan(Value),
    GreaterEqual(Value),
    /// Substring for strings; element membership for lists and sets; key
    /// membership for maps.
    Contains(Value),
    /// Byte length for strings; cardinality for containers.
    LengthEquals(u64),
    LengthLessEqual(u64),
    LengthGreaterEqual(u64),
}

/// One attribute check: `attr` indexes the schema (0 is the key).
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeCheck {
    pub attr: u16,
    pub predicate: Predicate,
}

impl AttributeCheck {
    pub fn new(attr: u16, predicate: Predicate) -> Self {
        Self { attr, predicate }
    }
}

/// Evaluates `checks` against `(key, value)` and returns how many passed.
/// The caller treats anything short of `checks.len()` as a predicate
/// failure. A check that cannot be evaluated (unknown attribute, type
/// mismatch) counts as failed.
pub fn passes_attribute_checks(
    schema: &Schema,
    checks: &[AttributeCheck],
    key: &Bytes,
    value: &PackedTuple,
) -> usize {
    checks
        .iter()
        .take_while(|c| check_one(schema, c, key, value).unwrap_or(false))
        .count()
}

fn check_one(
    schema: &Schema,
    check: &AttributeCheck,
    key: &Bytes,
    value: &PackedTuple,
) -> Result<bool, DataError> {
    let attr = schema
        .attr(check.attr)
        .ok_or(DataError::UnknownAttribute {
            index: check.attr,
            count: schema.attrs_sz(),
        })?;

    let actual = if check.attr == 0 {
        decode_packed(key, attr.ty, 0)?
    } else {
        let packed = value
            .attr(check.attr - 1)
            .ok_or(DataError::UnknownAttribute {
                index: check.attr,
                count: schema.attrs_sz(),
            })?;
        decode_packed(packed, attr.ty, check.attr)?
    };

    Ok(evaluate(&actual, &check.predicate, attr.ty))
}

fn evaluate(actual: &Value, predicate: &Predicate, ty: AttrType) -> bool {
    match predicate {
        Predicate::Equals(expected) => expected.fits(ty) && actual == expected,
        Predicate::LessThan(bound) => {
            comparable(actual, bound) && cmp_values(actual, bound).is_lt()
        }
        Predicate::LessEqual(bound) => {
            comparable(actual, bound) && cmp_values(actual, bound).is_le()
        }
        Predicate::GreaterThan(bound) => {
            comparable(actual, bound) && cmp_values(actual, bound).is_gt()
        }
        Predicate::GreaterEqual(bound) => {
            comparable(actual, bound) && cmp_values(actual, bound).is_ge()
        }
        Predicate::Contains(needle) => contains(actual, needle),
        Predicate::LengthEquals(n) => length_of(actual).is_some_and(|len| len == *n),
        Predicate::LengthLessEqual(n) => length_of(actual).is_some_and(|len| len <= *n),
        Predicate::LengthGreaterEqual(n) => length_of(actual).is_some_and(|len| len >= *n),
    }
}

fn length_of(actual: &Value) -> Option<u64> {
    match actual {
        Value::Str(s) => Some(s.len() as u64),
        Value::List(elems) | Value::Set(elems) => Some(elems.len() as u64),
        Value::Map(pairs) => Some(pairs.len() as u64),
        Value::Int(_) | Value::Float(_) => None,
    }
}

fn comparable(actual: &Value, bound: &Value) -> bool {
    matches!(
        (actual, bound),
        (Value::Str(_), Value::Str(_))
            | (Value::Int(_), Value::Int(_))
            | (Value::Float(_), Value::Float(_))
    )
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match (actual, needle) {
        (Value::Str(hay), Value::Str(n)) => {
            n.is_empty()
                || hay
                    .windows(n.len())
                    .any(|w| w == n.as_ref())
        }
        (Value::List(elems) | Value::Set(elems), _) => elems.iter().any(|e| e == needle),
        (Value::Map(pairs), _) => pairs.iter().any(|(k, _)| k == needle),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::{Attribute, PrimType};

    use super::*;

    fn schema() -> Schema {
        Schema::new(
            "kv",
            vec![
                Attribute::new("u", AttrType::STRING),
                Attribute::new("v", AttrType::INT64),
                Attribute::new("tags", AttrType::Set(PrimType::String)),
            ],
        )
    }

    fn tuple(v: i64, tags: &[&str]) -> PackedTuple {
        PackedTuple::encode(
            &schema(),
            &[
                Value::Int(v),
                Value::set(tags.iter().map(Value::str).collect()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn equals_on_value_attribute() {
        let key = Bytes::from_static(b"k1");
        let t = tuple(7, &[]);
        let pass = [AttributeCheck::new(1, Predicate::Equals(Value::Int(7)))];
        let fail = [AttributeCheck::new(1, Predicate::Equals(Value::Int(8)))];
        assert_eq!(passes_attribute_checks(&schema(), &pass, &key, &t), 1);
        assert_eq!(passes_attribute_checks(&schema(), &fail, &key, &t), 0);
    }

    #[test]
    fn equals_on_key() {
        let key = Bytes::from_static(b"k1");
        let t = tuple(7, &[]);
        let checks = [AttributeCheck::new(0, Predicate::Equals(Value::str("k1")))];
        assert_eq!(passes_attribute_checks(&schema(), &checks, &key, &t), 1);
    }

    #[test]
    fn range_predicates() {
        let key = Bytes::from_static(b"k1");
        let t = tuple(7, &[]);
        let checks = [
            AttributeCheck::new(1, Predicate::GreaterEqual(Value::Int(7))),
            AttributeCheck::new(1, Predicate::LessThan(Value::Int(10))),
        ];
        assert_eq!(passes_attribute_checks(&schema(), &checks, &key, &t), 2);

        let stop_early = [
            AttributeCheck::new(1, Predicate::GreaterThan(Value::Int(7))),
            AttributeCheck::new(1, Predicate::LessThan(Value::Int(10))),
        ];
        // take_while semantics: the failing first check hides the second.
        assert_eq!(passes_attribute_checks(&schema(), &stop_early, &key, &t), 0);
    }

    #[test]
    fn contains_on_set_and_string() {
        let key = Bytes::from_static(b"hello-world");
        let t = tuple(0, &["red", "blue"]);
        let set_hit = [AttributeCheck::new(2, Predicate::Contains(Value::str("red")))];
        let set_miss = [AttributeCheck::new(2, Predicate::Contains(Value::str("green")))];
        let str_hit = [AttributeCheck::new(0, Predicate::Contains(Value::str("lo-wo")))];
        assert_eq!(passes_attribute_checks(&schema(), &set_hit, &key, &t), 1);
        assert_eq!(passes_attribute_checks(&schema(), &set_miss, &key, &t), 0);
        assert_eq!(passes_attribute_checks(&schema(), &str_hit, &key, &t), 1);
    }

    #[test]
    fn length_predicates() {
        let key = Bytes::from_static(b"k1");
        let t = tuple(0, &["red", "blue"]);
        let cases = [
            (AttributeCheck::new(0, Predicate::LengthEquals(2)), 1),
            (AttributeCheck::new(0, Predicate::LengthEquals(3)), 0),
            (AttributeCheck::new(2, Predicate::LengthGreaterEqual(2)), 1),
            (AttributeCheck::new(2, Predicate::LengthLessEqual(1)), 0),
            // Numbers have no length.
            (AttributeCheck::new(1, Predicate::LengthEquals(8)), 0),
        ];

        for (check, expect) in cases {
            let checks = [check];
            assert_eq!(
                passes_attribute_checks(&schema(), &checks, &key, &t),
                expect,
                "{:?}",
                checks[0]
            );
        }
    }

    #[test]
    fn type_mismatch_fails_closed() {
        let key = Bytes::from_static(b"k1");
        let t = tuple(7, &[]);
        let checks = [AttributeCheck::new(1, Predicate::Equals(Value::str("7")))];
        assert_eq!(passes_attribute_checks(&schema(), &checks, &key, &t), 0);
    }

    #[test]
    fn unknown_attribute_fails_closed() {
        let key = Bytes::from_static(b"k1");
        let t = tuple(7, &[]);
        let checks = [AttributeCheck::new(9, Predicate::Equals(Value::Int(7)))];
        assert_eq!(passes_attribute_checks(&schema(), &checks, &key, &t), 0);
    }
}
