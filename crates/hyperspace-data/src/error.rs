//! Data-model error type.

use thiserror::Error;

/// Errors produced while interpreting values against a schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    /// An attribute index is out of range for the schema.
    #[error("unknown attribute {index} (schema has {count})")]
    UnknownAttribute { index: u16, count: u16 },

    /// A value does not match the attribute's declared type.
    #[error("type mismatch on attribute {index}: expected {expected}, got {got}")]
    TypeMismatch {
        index: u16,
        expected: &'static str,
        got: &'static str,
    },

    /// A packed encoding could not be decoded.
    #[error("bad encoding for attribute {index}: {reason}")]
    BadEncoding { index: u16, reason: &'static str },

    /// The mathematical result of a numeric functional update is not
    /// representable as int64, or a division by zero was attempted.
    #[error("arithmetic overflow on attribute {index}")]
    Overflow { index: u16 },

    /// A functional update is not defined for the attribute's type.
    #[error("function not applicable to attribute {index} of type {ty}")]
    BadFunc { index: u16, ty: &'static str },
}
