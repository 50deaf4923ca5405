//! Message and envelope types.

use bytes::Bytes;
use hyperspace_data::{AttributeCheck, Funcall, PackedTuple};
use hyperspace_types::{ConfigEpoch, NetworkReturnCode, RegionId, Version, VirtualServerId};

use crate::error::WireError;

/// Wire message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ReqGet = 8,
    RespGet = 9,
    ReqGetPartial = 10,
    RespGetPartial = 11,
    ReqAtomic = 16,
    RespAtomic = 17,
    ChainOp = 64,
    ChainSubspace = 65,
    ChainAck = 66,
    ConfigMismatch = 254,
    PacketNop = 255,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(code: u8) -> Result<Self, WireError> {
        match code {
            8 => Ok(MessageType::ReqGet),
            9 => Ok(MessageType::RespGet),
            10 => Ok(MessageType::ReqGetPartial),
            11 => Ok(MessageType::RespGetPartial),
            16 => Ok(MessageType::ReqAtomic),
            17 => Ok(MessageType::RespAtomic),
            64 => Ok(MessageType::ChainOp),
            65 => Ok(MessageType::ChainSubspace),
            66 => Ok(MessageType::ChainAck),
            254 => Ok(MessageType::ConfigMismatch),
            255 => Ok(MessageType::PacketNop),
            code => Err(WireError::UnknownMessageType { code }),
        }
    }
}

/// A decoded message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Point read of a key, served by the tail of the key's region.
    ReqGet { nonce: u64, key: Bytes },

    RespGet {
        nonce: u64,
        status: NetworkReturnCode,
        value: Option<PackedTuple>,
    },

    /// Point read of a subset of attributes, by schema index.
    ReqGetPartial {
        nonce: u64,
        key: Bytes,
        attrs: Vec<u16>,
    },

    RespGetPartial {
        nonce: u64,
        status: NetworkReturnCode,
        /// The requested `(schema index, packed value)` pairs.
        attrs: Vec<(u16, Bytes)>,
    },

    /// Client atomic: optional predicate checks plus functional updates,
    /// or a delete (`erase`).
    ReqAtomic {
        nonce: u64,
        key: Bytes,
        erase: bool,
        fail_if_not_found: bool,
        fail_if_found: bool,
        checks: Vec<AttributeCheck>,
        funcs: Vec<Funcall>,
    },

    RespAtomic {
        nonce: u64,
        status: NetworkReturnCode,
    },

    /// One version moving down a chain whose region ids the receiver can
    /// re-derive by hashing.
    ChainOp {
        fresh: bool,
        has_value: bool,
        old_version: Version,
        new_version: Version,
        key: Bytes,
        value: PackedTuple,
    },

    /// A subspace transfer: the four region ids travel with the message
    /// so the receiver does not re-hash.
    ChainSubspace {
        old_version: Version,
        new_version: Version,
        key: Bytes,
        value: PackedTuple,
        hashes: Vec<u64>,
        prev_region: RegionId,
        this_old_region: RegionId,
        this_new_region: RegionId,
        next_region: RegionId,
    },

    ChainAck { version: Version, key: Bytes },

    /// The sender's configuration epoch disagrees with ours; drop and
    /// let the retransmitter repair.
    ConfigMismatch,

    /// Keepalive; carries nothing and elicits nothing.
    PacketNop,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ReqGet { .. } => MessageType::ReqGet,
            Message::RespGet { .. } => MessageType::RespGet,
            Message::ReqGetPartial { .. } => MessageType::ReqGetPartial,
            Message::RespGetPartial { .. } => MessageType::RespGetPartial,
            Message::ReqAtomic { .. } => MessageType::ReqAtomic,
            Message::RespAtomic { .. } => MessageType::RespAtomic,
            Message::ChainOp { .. } => MessageType::ChainOp,
            Message::ChainSubspace { .. } => MessageType::ChainSubspace,
            Message::ChainAck { .. } => MessageType::ChainAck,
            Message::ConfigMismatch => MessageType::ConfigMismatch,
            Message::PacketNop => MessageType::PacketNop,
        }
    }
}

/// A message plus its direction-dependent header.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Client-originated request, addressed to a virtual server.
    Client {
        to: VirtualServerId,
        epoch: ConfigEpoch,
        message: Message,
    },

    /// Daemon-originated response back to a client.
    ToClient {
        from: VirtualServerId,
        message: Message,
    },

    /// Server-to-server chain traffic.
    Server {
        epoch: ConfigEpoch,
        to: VirtualServerId,
        from: VirtualServerId,
        message: Message,
    },
}

impl Envelope {
    pub fn message(&self) -> &Message {
        match self {
            Envelope::Client { message, .. }
            | Envelope::ToClient { message, .. }
            | Envelope::Server { message, .. } => message,
        }
    }
}
