//! Space schemas.
//!
//! A schema is the immutable shape of a space: a named primary-key
//! attribute followed by zero or more named value attributes. Attribute 0
//! is always the key and must be a primitive type.

use serde::{Deserialize, Serialize};

/// A primitive attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimType {
    String,
    Int64,
    Float64,
}

impl PrimType {
    pub fn name(self) -> &'static str {
        match self {
            PrimType::String => "string",
            PrimType::Int64 => "int64",
            PrimType::Float64 => "float64",
        }
    }
}

/// An attribute type: a primitive, or a container of primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrType {
    Primitive(PrimType),
    List(PrimType),
    Set(PrimType),
    Map(PrimType, PrimType),
}

impl AttrType {
    /// Shorthand for the common primitive types.
    pub const STRING: AttrType = AttrType::Primitive(PrimType::String);
    pub const INT64: AttrType = AttrType::Primitive(PrimType::Int64);
    pub const FLOAT64: AttrType = AttrType::Primitive(PrimType::Float64);

    pub fn is_primitive(self) -> bool {
        matches!(self, AttrType::Primitive(_))
    }

    pub fn name(self) -> &'static str {
        match self {
            AttrType::Primitive(p) => p.name(),
            AttrType::List(PrimType::String) => "list(string)",
            AttrType::List(PrimType::Int64) => "list(int64)",
            AttrType::List(PrimType::Float64) => "list(float64)",
            AttrType::Set(PrimType::String) => "set(string)",
            AttrType::Set(PrimType::Int64) => "set(int64)",
            AttrType::Set(PrimType::Float64) => "set(float64)",
            AttrType::Map(PrimType::String, PrimType::String) => "map(string,string)",
            AttrType::Map(PrimType::String, PrimType::Int64) => "map(string,int64)",
            AttrType::Map(PrimType::String, PrimType::Float64) => "map(string,float64)",
            AttrType::Map(PrimType::Int64, PrimType::String) => "map(int64,string)",
            AttrType::Map(PrimType::Int64, PrimType::Int64) => "map(int64,int64)",
            AttrType::Map(PrimType::Int64, PrimType::Float64) => "map(int64,float64)",
            AttrType::Map(PrimType::Float64, PrimType::String) => "map(float64,string)",
            AttrType::Map(PrimType::Float64, PrimType::Int64) => "map(float64,int64)",
            AttrType::Map(PrimType::Float64, PrimType::Float64) => "map(float64,float64)",
        }
    }
}

/// One named, typed attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub ty: AttrType,
}

impl Attribute {
    pub fn new(name: impl Into<String>, ty: AttrType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// The immutable shape of a space.
///
/// Attribute 0 is the primary key. The packed tuple carried by chain
/// messages and handed to the storage adapter covers attributes
/// `1..attrs_sz()`; the key is carried separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    name: String,
    attrs: Vec<Attribute>,
}

impl Schema {
    /// Builds a schema. The first attribute is the key and must be a
    /// primitive.
    ///
    /// # Panics
    ///
    /// Panics if `attrs` is empty or the key attribute is a container;
    /// schemas are constructed from validated coordinator state.
    pub fn new(name: impl Into<String>, attrs: Vec<Attribute>) -> Self {
        assert!(!attrs.is_empty(), "schema must have a key attribute");
        assert!(
            attrs[0].ty.is_primitive(),
            "key attribute must be a primitive type"
        );
        Self {
            name: name.into(),
            attrs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of attributes, key included.
    pub fn attrs_sz(&self) -> u16 {
        self.attrs.len() as u16
    }

    /// Number of value attributes (the width of a packed tuple).
    pub fn value_sz(&self) -> u16 {
        self.attrs_sz() - 1
    }

    pub fn attr(&self, index: u16) -> Option<&Attribute> {
        self.attrs.get(usize::from(index))
    }

    /// The key attribute's primitive type.
    pub fn key_type(&self) -> PrimType {
        match self.attrs[0].ty {
            AttrType::Primitive(p) => p,
            _ => unreachable!("constructor rejects container keys"),
        }
    }

    /// The type of value attribute `i` (0-based over value attributes).
    pub fn value_type(&self, i: u16) -> Option<AttrType> {
        self.attrs.get(usize::from(i) + 1).map(|a| a.ty)
    }

    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.attrs.iter().position(|a| a.name == name).map(|i| i as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(
            "kv",
            vec![
                Attribute::new("u", AttrType::STRING),
                Attribute::new("v", AttrType::INT64),
                Attribute::new("w", AttrType::STRING),
            ],
        )
    }

    #[test]
    fn indexes_and_lookup() {
        let sc = sample();
        assert_eq!(sc.attrs_sz(), 3);
        assert_eq!(sc.value_sz(), 2);
        assert_eq!(sc.key_type(), PrimType::String);
        assert_eq!(sc.lookup("v"), Some(1));
        assert_eq!(sc.lookup("w"), Some(2));
        assert_eq!(sc.lookup("nope"), None);
        assert_eq!(sc.value_type(0), Some(AttrType::INT64));
        assert_eq!(sc.value_type(2), None);
    }

    #[test]
    #[should_panic(expected = "key attribute must be a primitive")]
    fn container_key_rejected() {
        Schema::new(
            "bad",
            vec![Attribute::new("k", AttrType::List(PrimType::Int64))],
        );
    }
}
