//! Wire protocol errors.
//!
//! Every decode failure is a framing error: the receive side logs it and
//! drops the packet (the sender retransmits if the message mattered).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("frame truncated while reading {context}")]
    Truncated { context: &'static str },

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("unknown message type code {code}")]
    UnknownMessageType { code: u8 },

    #[error("unknown status code {code}")]
    UnknownStatus { code: u16 },

    #[error("unknown value tag {tag}")]
    UnknownValueTag { tag: u8 },

    #[error("unknown predicate tag {tag}")]
    UnknownPredicateTag { tag: u8 },

    #[error("unknown funcall tag {tag}")]
    UnknownFuncTag { tag: u8 },

    #[error("frame has {extra} bytes of trailing garbage")]
    TrailingBytes { extra: usize },
}
