//! # hyperspace-wire: Binary wire protocol
//!
//! Every message travels in a length-prefixed frame. After the `u32`
//! length, the header depends on the direction, selected by the message
//! type code:
//!
//! ```text
//! client  -> server   [len:u32][type:u8][flags:u8][epoch:u64][virtual_to:u64][payload]
//! server  -> client   [len:u32][type:u8][virtual_from:u64][payload]
//! server  -> server   [len:u32][type:u8][flags:u8][epoch:u64][virtual_to:u64][virtual_from:u64][payload]
//! ```
//!
//! All integers are little-endian; all byte strings are `u32`-length
//! prefixed. The header `flags` byte is reserved (zero); `CHAIN_OP`
//! carries its own flags byte in the payload (bit 0 = fresh, bit 1 =
//! has_value, cleared for a delete).
//!
//! Message type codes:
//!
//! | code | name |
//! |-|-|
//! | 8   | REQ_GET |
//! | 9   | RESP_GET |
//! | 10  | REQ_GET_PARTIAL |
//! | 11  | RESP_GET_PARTIAL |
//! | 16  | REQ_ATOMIC |
//! | 17  | RESP_ATOMIC |
//! | 64  | CHAIN_OP |
//! | 65  | CHAIN_SUBSPACE |
//! | 66  | CHAIN_ACK |
//! | 254 | CONFIGMISMATCH |
//! | 255 | PACKET_NOP |

mod codec;
mod error;
mod message;

pub use codec::{decode_frame, encode_frame};
pub use error::WireError;
pub use message::{Envelope, Message, MessageType};

/// Frames larger than this are treated as corruption and dropped.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
