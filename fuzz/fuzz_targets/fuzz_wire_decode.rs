//! Frame decoding must never panic on arbitrary bytes, and anything it
//! accepts must re-encode idempotently. Envelopes are compared through
//! their encoded bytes so NaN float payloads (which are never equal to
//! themselves) still round-trip bit-exactly.

#![no_main]

use bytes::Bytes;
use hyperspace_wire::{decode_frame, encode_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let frame = Bytes::copy_from_slice(data);

    if let Ok(envelope) = decode_frame(&frame) {
        let first = encode_frame(&envelope);
        let again = decode_frame(&first).expect("re-encoded frame must decode");
        let second = encode_frame(&again);
        assert_eq!(first, second);
    }
});
