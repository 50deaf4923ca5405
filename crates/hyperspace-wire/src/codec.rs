//! Frame encoding and decoding.
//!
//! Hand-rolled little-endian codec. Encoding is infallible (the types
//! are already validated); decoding returns [`WireError`] on anything
//! short, long, or unknown, and the caller drops the packet.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hyperspace_data::{AttributeCheck, FuncKind, Funcall, PackedTuple, Predicate, Value};
use hyperspace_types::{ConfigEpoch, NetworkReturnCode, RegionId, Version, VirtualServerId};

use crate::error::WireError;
use crate::message::{Envelope, Message, MessageType};
use crate::MAX_FRAME_LEN;

// ============================================================================
// Frame encode
// ============================================================================

/// Encodes an envelope into a complete frame, length prefix included.
pub fn encode_frame(envelope: &Envelope) -> Bytes {
    let mut body = BytesMut::new();

    match envelope {
        Envelope::Client { to, epoch, message } => {
            body.put_u8(message.message_type().as_u8());
            body.put_u8(0); // reserved header flags
            body.put_u64_le(epoch.as_u64());
            body.put_u64_le(u64::from(*to));
            encode_payload(message, &mut body);
        }
        Envelope::ToClient { from, message } => {
            body.put_u8(message.message_type().as_u8());
            body.put_u64_le(u64::from(*from));
            encode_payload(message, &mut body);
        }
        Envelope::Server {
            epoch,
            to,
            from,
            message,
        } => {
            body.put_u8(message.message_type().as_u8());
            body.put_u8(0); // reserved header flags
            body.put_u64_le(epoch.as_u64());
            body.put_u64_le(u64::from(*to));
            body.put_u64_le(u64::from(*from));
            encode_payload(message, &mut body);
        }
    }

    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32_le(body.len() as u32);
    frame.put_slice(&body);
    frame.freeze()
}

fn encode_payload(message: &Message, buf: &mut BytesMut) {
    match message {
        Message::ReqGet { nonce, key } => {
            buf.put_u64_le(*nonce);
            put_bytes(buf, key);
        }
        Message::RespGet {
            nonce,
            status,
            value,
        } => {
            buf.put_u64_le(*nonce);
            buf.put_u16_le(status.as_u16());

            match value {
                Some(tuple) => {
                    buf.put_u8(1);
                    put_tuple(buf, tuple);
                }
                None => buf.put_u8(0),
            }
        }
        Message::ReqGetPartial { nonce, key, attrs } => {
            buf.put_u64_le(*nonce);
            put_bytes(buf, key);
            buf.put_u16_le(attrs.len() as u16);

            for attr in attrs {
                buf.put_u16_le(*attr);
            }
        }
        Message::RespGetPartial {
            nonce,
            status,
            attrs,
        } => {
            buf.put_u64_le(*nonce);
            buf.put_u16_le(status.as_u16());
            buf.put_u16_le(attrs.len() as u16);

            for (attr, packed) in attrs {
                buf.put_u16_le(*attr);
                put_bytes(buf, packed);
            }
        }
        Message::ReqAtomic {
            nonce,
            key,
            erase,
            fail_if_not_found,
            fail_if_found,
            checks,
            funcs,
        } => {
            buf.put_u64_le(*nonce);
            put_bytes(buf, key);
            let mut flags = 0u8;

            if *erase {
                flags |= 1;
            }

            if *fail_if_not_found {
                flags |= 2;
            }

            if *fail_if_found {
                flags |= 4;
            }

            buf.put_u8(flags);
            buf.put_u16_le(checks.len() as u16);

            for check in checks {
                put_check(buf, check);
            }

            buf.put_u16_le(funcs.len() as u16);

            for func in funcs {
                put_func(buf, func);
            }
        }
        Message::RespAtomic { nonce, status } => {
            buf.put_u64_le(*nonce);
            buf.put_u16_le(status.as_u16());
        }
        Message::ChainOp {
            fresh,
            has_value,
            old_version,
            new_version,
            key,
            value,
        } => {
            let mut flags = 0u8;

            if *fresh {
                flags |= 1;
            }

            if *has_value {
                flags |= 2;
            }

            buf.put_u8(flags);
            buf.put_u64_le(old_version.as_u64());
            buf.put_u64_le(new_version.as_u64());
            put_bytes(buf, key);
            put_tuple(buf, value);
        }
        Message::ChainSubspace {
            old_version,
            new_version,
            key,
            value,
            hashes,
            prev_region,
            this_old_region,
            this_new_region,
            next_region,
        } => {
            buf.put_u64_le(old_version.as_u64());
            buf.put_u64_le(new_version.as_u64());
            put_bytes(buf, key);
            put_tuple(buf, value);
            buf.put_u16_le(hashes.len() as u16);

            for h in hashes {
                buf.put_u64_le(*h);
            }

            buf.put_u64_le(u64::from(*prev_region));
            buf.put_u64_le(u64::from(*this_old_region));
            buf.put_u64_le(u64::from(*this_new_region));
            buf.put_u64_le(u64::from(*next_region));
        }
        Message::ChainAck { version, key } => {
            buf.put_u64_le(version.as_u64());
            put_bytes(buf, key);
        }
        Message::ConfigMismatch | Message::PacketNop => {}
    }
}

// ============================================================================
// Frame decode
// ============================================================================

/// Decodes one complete frame (length prefix included). The buffer must
/// contain exactly one frame.
pub fn decode_frame(frame: &Bytes) -> Result<Envelope, WireError> {
    let mut buf = frame.clone();
    let len = get_u32(&mut buf, "frame length")? as usize;

    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    if buf.remaining() != len {
        return Err(WireError::Truncated {
            context: "frame body",
        });
    }

    let ty = MessageType::from_u8(get_u8(&mut buf, "message type")?)?;

    let envelope = match ty {
        MessageType::ReqGet | MessageType::ReqGetPartial | MessageType::ReqAtomic => {
            let _flags = get_u8(&mut buf, "header flags")?;
            let epoch = ConfigEpoch::new(get_u64(&mut buf, "config epoch")?);
            let to = VirtualServerId::new(get_u64(&mut buf, "virtual to")?);
            let message = decode_payload(ty, &mut buf)?;
            Envelope::Client { to, epoch, message }
        }
        MessageType::RespGet | MessageType::RespGetPartial | MessageType::RespAtomic => {
            let from = VirtualServerId::new(get_u64(&mut buf, "virtual from")?);
            let message = decode_payload(ty, &mut buf)?;
            Envelope::ToClient { from, message }
        }
        MessageType::ChainOp
        | MessageType::ChainSubspace
        | MessageType::ChainAck
        | MessageType::ConfigMismatch
        | MessageType::PacketNop => {
            let _flags = get_u8(&mut buf, "header flags")?;
            let epoch = ConfigEpoch::new(get_u64(&mut buf, "config epoch")?);
            let to = VirtualServerId::new(get_u64(&mut buf, "virtual to")?);
            let from = VirtualServerId::new(get_u64(&mut buf, "virtual from")?);
            let message = decode_payload(ty, &mut buf)?;
            Envelope::Server {
                epoch,
                to,
                from,
                message,
            }
        }
    };

    if buf.has_remaining() {
        return Err(WireError::TrailingBytes {
            extra: buf.remaining(),
        });
    }

    Ok(envelope)
}

fn decode_payload(ty: MessageType, buf: &mut Bytes) -> Result<Message, WireError> {
    match ty {
        MessageType::ReqGet => Ok(Message::ReqGet {
            nonce: get_u64(buf, "nonce")?,
            key: get_bytes(buf, "key")?,
        }),
        MessageType::RespGet => {
            let nonce = get_u64(buf, "nonce")?;
            let status = get_status(buf)?;
            let value = match get_u8(buf, "value present")? {
                0 => None,
                _ => Some(get_tuple(buf)?),
            };
            Ok(Message::RespGet {
                nonce,
                status,
                value,
            })
        }
        MessageType::ReqGetPartial => {
            let nonce = get_u64(buf, "nonce")?;
            let key = get_bytes(buf, "key")?;
            let attrs_len = get_u16(buf, "attr count")?;
            let mut attrs = Vec::with_capacity(usize::from(attrs_len));

            for _ in 0..attrs_len {
                attrs.push(get_u16(buf, "attr index")?);
            }

            Ok(Message::ReqGetPartial { nonce, key, attrs })
        }
        MessageType::RespGetPartial => {
            let nonce = get_u64(buf, "nonce")?;
            let status = get_status(buf)?;
            let attrs_len = get_u16(buf, "attr count")?;
            let mut attrs = Vec::with_capacity(usize::from(attrs_len));

            for _ in 0..attrs_len {
                let attr = get_u16(buf, "attr index")?;
                let packed = get_bytes(buf, "attr value")?;
                attrs.push((attr, packed));
            }

            Ok(Message::RespGetPartial {
                nonce,
                status,
                attrs,
            })
        }
        MessageType::ReqAtomic => {
            let nonce = get_u64(buf, "nonce")?;
            let key = get_bytes(buf, "key")?;
            let flags = get_u8(buf, "atomic flags")?;
            let checks_len = get_u16(buf, "check count")?;
            let mut checks = Vec::with_capacity(usize::from(checks_len));

            for _ in 0..checks_len {
                checks.push(get_check(buf)?);
            }

            let funcs_len = get_u16(buf, "func count")?;
            let mut funcs = Vec::with_capacity(usize::from(funcs_len));

            for _ in 0..funcs_len {
                funcs.push(get_func(buf)?);
            }

            Ok(Message::ReqAtomic {
                nonce,
                key,
                erase: flags & 1 != 0,
                fail_if_not_found: flags & 2 != 0,
                fail_if_found: flags & 4 != 0,
                checks,
                funcs,
            })
        }
        MessageType::RespAtomic => Ok(Message::RespAtomic {
            nonce: get_u64(buf, "nonce")?,
            status: get_status(buf)?,
        }),
        MessageType::ChainOp => {
            let flags = get_u8(buf, "chain flags")?;
            Ok(Message::ChainOp {
                fresh: flags & 1 != 0,
                has_value: flags & 2 != 0,
                old_version: Version::new(get_u64(buf, "old version")?),
                new_version: Version::new(get_u64(buf, "new version")?),
                key: get_bytes(buf, "key")?,
                value: get_tuple(buf)?,
            })
        }
        MessageType::ChainSubspace => {
            let old_version = Version::new(get_u64(buf, "old version")?);
            let new_version = Version::new(get_u64(buf, "new version")?);
            let key = get_bytes(buf, "key")?;
            let value = get_tuple(buf)?;
            let hashes_len = get_u16(buf, "hash count")?;
            let mut hashes = Vec::with_capacity(usize::from(hashes_len));

            for _ in 0..hashes_len {
                hashes.push(get_u64(buf, "hash")?);
            }

            Ok(Message::ChainSubspace {
                old_version,
                new_version,
                key,
                value,
                hashes,
                prev_region: RegionId::new(get_u64(buf, "prev region")?),
                this_old_region: RegionId::new(get_u64(buf, "this old region")?),
                this_new_region: RegionId::new(get_u64(buf, "this new region")?),
                next_region: RegionId::new(get_u64(buf, "next region")?),
            })
        }
        MessageType::ChainAck => Ok(Message::ChainAck {
            version: Version::new(get_u64(buf, "version")?),
            key: get_bytes(buf, "key")?,
        }),
        MessageType::ConfigMismatch => Ok(Message::ConfigMismatch),
        MessageType::PacketNop => Ok(Message::PacketNop),
    }
}

// ============================================================================
// Field codecs
// ============================================================================

fn put_bytes(buf: &mut BytesMut, b: &Bytes) {
    buf.put_u32_le(b.len() as u32);
    buf.put_slice(b);
}

fn put_tuple(buf: &mut BytesMut, tuple: &PackedTuple) {
    buf.put_u16_le(tuple.width());

    for attr in tuple.attrs() {
        put_bytes(buf, attr);
    }
}

fn put_value(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Str(s) => {
            buf.put_u8(0);
            put_bytes(buf, s);
        }
        Value::Int(x) => {
            buf.put_u8(1);
            buf.put_i64_le(*x);
        }
        Value::Float(x) => {
            buf.put_u8(2);
            buf.put_f64_le(*x);
        }
        Value::List(elems) => {
            buf.put_u8(3);
            buf.put_u32_le(elems.len() as u32);

            for e in elems {
                put_value(buf, e);
            }
        }
        Value::Set(elems) => {
            buf.put_u8(4);
            buf.put_u32_le(elems.len() as u32);

            for e in elems {
                put_value(buf, e);
            }
        }
        Value::Map(pairs) => {
            buf.put_u8(5);
            buf.put_u32_le(pairs.len() as u32);

            for (k, v) in pairs {
                put_value(buf, k);
                put_value(buf, v);
            }
        }
    }
}

fn put_check(buf: &mut BytesMut, check: &AttributeCheck) {
    buf.put_u16_le(check.attr);

    match &check.predicate {
        Predicate::Equals(v) => {
            buf.put_u8(0);
            put_value(buf, v);
        }
        Predicate::LessThan(v) => {
            buf.put_u8(1);
            put_value(buf, v);
        }
        Predicate::LessEqual(v) => {
            buf.put_u8(2);
            put_value(buf, v);
        }
        Predicate::GreaterThan(v) => {
            buf.put_u8(3);
            put_value(buf, v);
        }
        Predicate::GreaterEqual(v) => {
            buf.put_u8(4);
            put_value(buf, v);
        }
        Predicate::Contains(v) => {
            buf.put_u8(5);
            put_value(buf, v);
        }
        Predicate::LengthEquals(n) => {
            buf.put_u8(6);
            buf.put_u64_le(*n);
        }
        Predicate::LengthLessEqual(n) => {
            buf.put_u8(7);
            buf.put_u64_le(*n);
        }
        Predicate::LengthGreaterEqual(n) => {
            buf.put_u8(8);
            buf.put_u64_le(*n);
        }
    }
}

fn put_func(buf: &mut BytesMut, func: &Funcall) {
    buf.put_u16_le(func.attr);
    buf.put_u8(func_tag(func.kind));
    put_value(buf, &func.arg);

    match &func.map_key {
        Some(k) => {
            buf.put_u8(1);
            put_value(buf, k);
        }
        None => buf.put_u8(0),
    }
}

fn func_tag(kind: FuncKind) -> u8 {
    match kind {
        FuncKind::Set => 0,
        FuncKind::NumAdd => 1,
        FuncKind::NumSub => 2,
        FuncKind::NumMul => 3,
        FuncKind::NumDiv => 4,
        FuncKind::NumMod => 5,
        FuncKind::NumAnd => 6,
        FuncKind::NumOr => 7,
        FuncKind::NumXor => 8,
        FuncKind::StringPrepend => 9,
        FuncKind::StringAppend => 10,
        FuncKind::ListLpush => 11,
        FuncKind::ListRpush => 12,
        FuncKind::SetAdd => 13,
        FuncKind::SetRemove => 14,
        FuncKind::MapAdd => 15,
        FuncKind::MapRemove => 16,
        FuncKind::SetIntersect => 17,
        FuncKind::SetUnion => 18,
    }
}

fn get_u8(buf: &mut Bytes, context: &'static str) -> Result<u8, WireError> {
    if buf.remaining() < 1 {
        return Err(WireError::Truncated { context });
    }

    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes, context: &'static str) -> Result<u16, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated { context });
    }

    Ok(buf.get_u16_le())
}

fn get_u32(buf: &mut Bytes, context: &'static str) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated { context });
    }

    Ok(buf.get_u32_le())
}

fn get_u64(buf: &mut Bytes, context: &'static str) -> Result<u64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::Truncated { context });
    }

    Ok(buf.get_u64_le())
}

fn get_bytes(buf: &mut Bytes, context: &'static str) -> Result<Bytes, WireError> {
    let len = get_u32(buf, context)? as usize;

    if buf.remaining() < len {
        return Err(WireError::Truncated { context });
    }

    Ok(buf.split_to(len))
}

fn get_tuple(buf: &mut Bytes) -> Result<PackedTuple, WireError> {
    let width = get_u16(buf, "tuple width")?;
    let mut attrs = Vec::with_capacity(usize::from(width));

    for _ in 0..width {
        attrs.push(get_bytes(buf, "tuple attribute")?);
    }

    Ok(PackedTuple::from_attrs(attrs))
}

fn get_status(buf: &mut Bytes) -> Result<NetworkReturnCode, WireError> {
    let code = get_u16(buf, "status")?;
    NetworkReturnCode::from_u16(code).ok_or(WireError::UnknownStatus { code })
}

fn get_value(buf: &mut Bytes) -> Result<Value, WireError> {
    match get_u8(buf, "value tag")? {
        0 => Ok(Value::Str(get_bytes(buf, "string value")?)),
        1 => Ok(Value::Int(get_u64(buf, "int value")? as i64)),
        2 => Ok(Value::Float(f64::from_bits(get_u64(buf, "float value")?))),
        3 => {
            let len = get_u32(buf, "list length")?;
            let mut elems = Vec::with_capacity(len as usize);

            for _ in 0..len {
                elems.push(get_value(buf)?);
            }

            Ok(Value::List(elems))
        }
        4 => {
            let len = get_u32(buf, "set length")?;
            let mut elems = Vec::with_capacity(len as usize);

            for _ in 0..len {
                elems.push(get_value(buf)?);
            }

            Ok(Value::set(elems))
        }
        5 => {
            let len = get_u32(buf, "map length")?;
            let mut pairs = Vec::with_capacity(len as usize);

            for _ in 0..len {
                let k = get_value(buf)?;
                let v = get_value(buf)?;
                pairs.push((k, v));
            }

            Ok(Value::map(pairs))
        }
        tag => Err(WireError::UnknownValueTag { tag }),
    }
}

fn get_check(buf: &mut Bytes) -> Result<AttributeCheck, WireError> {
    let attr = get_u16(buf, "check attr")?;
    let tag = get_u8(buf, "predicate tag")?;
    let predicate = match tag {
        0 => Predicate::Equals(get_value(buf)?),
        1 => Predicate::LessThan(get_value(buf)?),
        2 => Predicate::LessEqual(get_value(buf)?),
        3 => Predicate::GreaterThan(get_value(buf)?),
        4 => Predicate::GreaterEqual(get_value(buf)?),
        5 => Predicate::Contains(get_value(buf)?),
        6 => Predicate::LengthEquals(get_u64(buf, "length bound")?),
        7 => Predicate::LengthLessEqual(get_u64(buf, "length bound")?),
        8 => Predicate::LengthGreaterEqual(get_u64(buf, "length bound")?),
        tag => return Err(WireError::UnknownPredicateTag { tag }),
    };
    Ok(AttributeCheck { attr, predicate })
}

fn get_func(buf: &mut Bytes) -> Result<Funcall, WireError> {
    let attr = get_u16(buf, "func attr")?;
    let tag = get_u8(buf, "func tag")?;
    let kind = match tag {
        0 => FuncKind::Set,
        1 => FuncKind::NumAdd,
        2 => FuncKind::NumSub,
        3 => FuncKind::NumMul,
        4 => FuncKind::NumDiv,
        5 => FuncKind::NumMod,
        6 => FuncKind::NumAnd,
        7 => FuncKind::NumOr,
        8 => FuncKind::NumXor,
        9 => FuncKind::StringPrepend,
        10 => FuncKind::StringAppend,
        11 => FuncKind::ListLpush,
        12 => FuncKind::ListRpush,
        13 => FuncKind::SetAdd,
        14 => FuncKind::SetRemove,
        15 => FuncKind::MapAdd,
        16 => FuncKind::MapRemove,
        17 => FuncKind::SetIntersect,
        18 => FuncKind::SetUnion,
        tag => return Err(WireError::UnknownFuncTag { tag }),
    };
    let arg = get_value(buf)?;
    let map_key = match get_u8(buf, "map key present")? {
        0 => None,
        _ => Some(get_value(buf)?),
    };
    Ok(Funcall {
        attr,
        kind,
        arg,
        map_key,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn round_trip(envelope: &Envelope) -> Envelope {
        let frame = encode_frame(envelope);
        decode_frame(&frame).expect("frame must decode")
    }

    fn vsi(id: u64) -> VirtualServerId {
        VirtualServerId::new(id)
    }

    #[test]
    fn req_get_round_trips() {
        let env = Envelope::Client {
            to: vsi(7),
            epoch: ConfigEpoch::new(3),
            message: Message::ReqGet {
                nonce: 99,
                key: Bytes::from_static(b"k1"),
            },
        };
        assert_eq!(round_trip(&env), env);
    }

    #[test]
    fn resp_get_with_and_without_value() {
        let with = Envelope::ToClient {
            from: vsi(7),
            message: Message::RespGet {
                nonce: 1,
                status: NetworkReturnCode::Success,
                value: Some(PackedTuple::from_attrs(vec![
                    Bytes::from_static(b"\x07\x00\x00\x00\x00\x00\x00\x00"),
                ])),
            },
        };
        let without = Envelope::ToClient {
            from: vsi(7),
            message: Message::RespGet {
                nonce: 2,
                status: NetworkReturnCode::NotFound,
                value: None,
            },
        };
        assert_eq!(round_trip(&with), with);
        assert_eq!(round_trip(&without), without);
    }

    #[test]
    fn req_atomic_round_trips() {
        let env = Envelope::Client {
            to: vsi(4),
            epoch: ConfigEpoch::new(9),
            message: Message::ReqAtomic {
                nonce: 11,
                key: Bytes::from_static(b"k1"),
                erase: false,
                fail_if_not_found: true,
                fail_if_found: false,
                checks: vec![AttributeCheck::new(
                    1,
                    Predicate::Equals(Value::Int(7)),
                )],
                funcs: vec![
                    Funcall::new(1, FuncKind::NumAdd, Value::Int(3)),
                    Funcall::with_map_key(2, FuncKind::MapAdd, Value::str("x"), Value::Int(1)),
                ],
            },
        };
        assert_eq!(round_trip(&env), env);
    }

    #[test]
    fn chain_op_flags_round_trip() {
        for (fresh, has_value) in [(false, false), (true, true), (false, true), (true, false)] {
            let env = Envelope::Server {
                epoch: ConfigEpoch::new(2),
                to: vsi(5),
                from: vsi(4),
                message: Message::ChainOp {
                    fresh,
                    has_value,
                    old_version: Version::new(9),
                    new_version: Version::new(10),
                    key: Bytes::from_static(b"key"),
                    value: PackedTuple::from_attrs(vec![Bytes::from_static(b"v")]),
                },
            };
            assert_eq!(round_trip(&env), env);
        }
    }

    #[test]
    fn chain_subspace_round_trips() {
        let env = Envelope::Server {
            epoch: ConfigEpoch::new(2),
            to: vsi(5),
            from: vsi(4),
            message: Message::ChainSubspace {
                old_version: Version::new(3),
                new_version: Version::new(4),
                key: Bytes::from_static(b"key"),
                value: PackedTuple::from_attrs(vec![Bytes::new()]),
                hashes: vec![1, 2, 3],
                prev_region: RegionId::new(1),
                this_old_region: RegionId::new(2),
                this_new_region: RegionId::new(3),
                next_region: RegionId::NONE,
            },
        };
        assert_eq!(round_trip(&env), env);
    }

    #[test]
    fn get_partial_round_trips() {
        let req = Envelope::Client {
            to: vsi(3),
            epoch: ConfigEpoch::new(1),
            message: Message::ReqGetPartial {
                nonce: 5,
                key: Bytes::from_static(b"k"),
                attrs: vec![1, 3],
            },
        };
        let resp = Envelope::ToClient {
            from: vsi(3),
            message: Message::RespGetPartial {
                nonce: 5,
                status: NetworkReturnCode::Success,
                attrs: vec![
                    (1, Bytes::from_static(b"\x01\x00\x00\x00\x00\x00\x00\x00")),
                    (3, Bytes::from_static(b"blue")),
                ],
            },
        };
        assert_eq!(round_trip(&req), req);
        assert_eq!(round_trip(&resp), resp);
    }

    #[test]
    fn length_predicates_round_trip() {
        let env = Envelope::Client {
            to: vsi(4),
            epoch: ConfigEpoch::new(9),
            message: Message::ReqAtomic {
                nonce: 12,
                key: Bytes::from_static(b"k1"),
                erase: false,
                fail_if_not_found: false,
                fail_if_found: false,
                checks: vec![
                    AttributeCheck::new(1, Predicate::LengthEquals(4)),
                    AttributeCheck::new(2, Predicate::LengthGreaterEqual(1)),
                ],
                funcs: vec![Funcall::new(
                    2,
                    FuncKind::SetUnion,
                    Value::set(vec![Value::str("x")]),
                )],
            },
        };
        assert_eq!(round_trip(&env), env);
    }

    #[test]
    fn config_mismatch_round_trips() {
        let env = Envelope::Server {
            epoch: ConfigEpoch::new(8),
            to: vsi(1),
            from: vsi(2),
            message: Message::ConfigMismatch,
        };
        assert_eq!(round_trip(&env), env);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let env = Envelope::Server {
            epoch: ConfigEpoch::new(2),
            to: vsi(5),
            from: vsi(4),
            message: Message::ChainAck {
                version: Version::new(3),
                key: Bytes::from_static(b"key"),
            },
        };
        let frame = encode_frame(&env);

        for cut in 1..frame.len() {
            let short = frame.slice(..cut);
            assert!(decode_frame(&short).is_err(), "cut at {cut} must fail");
        }
    }

    #[test_case(8, MessageType::ReqGet)]
    #[test_case(9, MessageType::RespGet)]
    #[test_case(10, MessageType::ReqGetPartial)]
    #[test_case(11, MessageType::RespGetPartial)]
    #[test_case(16, MessageType::ReqAtomic)]
    #[test_case(17, MessageType::RespAtomic)]
    #[test_case(64, MessageType::ChainOp)]
    #[test_case(65, MessageType::ChainSubspace)]
    #[test_case(66, MessageType::ChainAck)]
    #[test_case(254, MessageType::ConfigMismatch)]
    #[test_case(255, MessageType::PacketNop)]
    fn type_codes_are_stable(code: u8, ty: MessageType) {
        assert_eq!(ty.as_u8(), code);
        assert_eq!(MessageType::from_u8(code).unwrap(), ty);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut body = BytesMut::new();
        body.put_u8(42);
        let mut frame = BytesMut::new();
        frame.put_u32_le(body.len() as u32);
        frame.put_slice(&body);
        let err = decode_frame(&frame.freeze()).unwrap_err();
        assert_eq!(err, WireError::UnknownMessageType { code: 42 });
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let env = Envelope::Server {
            epoch: ConfigEpoch::new(1),
            to: vsi(1),
            from: vsi(2),
            message: Message::ConfigMismatch,
        };
        let frame = encode_frame(&env);
        let mut padded = BytesMut::new();
        padded.put_u32_le((frame.len() - 4 + 2) as u32);
        padded.put_slice(&frame[4..]);
        padded.put_u16_le(0xdead);
        let err = decode_frame(&padded.freeze()).unwrap_err();
        assert_eq!(err, WireError::TrailingBytes { extra: 2 });
    }

    proptest! {
        #[test]
        fn chain_ack_round_trips(version in any::<u64>(), key in proptest::collection::vec(any::<u8>(), 0..64)) {
            let env = Envelope::Server {
                epoch: ConfigEpoch::new(1),
                to: vsi(1),
                from: vsi(2),
                message: Message::ChainAck {
                    version: Version::new(version),
                    key: Bytes::from(key),
                },
            };
            prop_assert_eq!(round_trip(&env), env);
        }
    }
}
