//! # hyperspace-data: Schemas, typed values, and encodings
//!
//! This crate defines the data model shared by the client surface, the
//! wire protocol, the replication engine, and the storage adapter:
//!
//! - [`Schema`], [`AttrType`]: the immutable shape of a space
//! - [`Value`]: a typed attribute value (string, int64, float64, and
//!   lists/sets/maps thereof)
//! - [`PackedTuple`]: the packed per-attribute byte encoding that travels
//!   on the wire and into storage
//! - [`ordered`]: order-preserving encodings of int64 and float64 onto
//!   `u64`, used both for sorting and for hyperspace hashing
//! - [`AttributeCheck`]: CAS predicates evaluated against the latest
//!   visible value
//! - [`Funcall`]: functional updates (set, arithmetic, string edits,
//!   container edits) with overflow detection
//! - [`hash_tuple`]: the per-attribute hash vector that positions an
//!   object in each subspace

mod check;
mod error;
mod funcall;
mod hash;
pub mod ordered;
mod schema;
mod value;

pub use check::{AttributeCheck, Predicate, passes_attribute_checks};
pub use error::DataError;
pub use funcall::{FuncKind, Funcall, apply_funcs};
pub use hash::{hash_key, hash_tuple};
pub use schema::{AttrType, Attribute, PrimType, Schema};
pub use value::{PackedTuple, Value};
