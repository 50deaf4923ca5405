//! Order-preserving encodings onto `u64`.
//!
//! Hyperspace positions objects in a hyperspace by hashing each attribute
//! to a `u64`. For numeric attributes the "hash" must preserve order so
//! that region rectangles cover contiguous value ranges:
//!
//! - `int64`: flip the sign bit, then compare unsigned.
//! - `float64`: if negative flip all bits, else flip the sign bit (and
//!   step past the negative image), then compare unsigned. This is a
//!   monotone map from doubles (including ±∞) onto `u64`; NaN has no
//!   order and is parked just above +∞.

/// The image of `+∞`.
pub const ENCODED_POS_INFINITY: u64 = 0xfff0_0000_0000_0002;

/// The image of NaN. NaN is unordered; this slot is outside the range of
/// every ordered double.
pub const ENCODED_NAN: u64 = 0xfff0_0000_0000_0003;

/// Encodes an `i64` so that unsigned comparison of the images matches
/// signed comparison of the inputs.
pub fn ordered_encode_int64(x: i64) -> u64 {
    (x as u64) ^ 0x8000_0000_0000_0000
}

/// Inverse of [`ordered_encode_int64`].
pub fn ordered_decode_int64(e: u64) -> i64 {
    (e ^ 0x8000_0000_0000_0000) as i64
}

/// Encodes an `f64` so that unsigned comparison of the images matches the
/// IEEE-754 total order on non-NaN doubles.
pub fn ordered_encode_double(x: f64) -> u64 {
    if x == f64::NEG_INFINITY {
        return 0;
    }

    if x == f64::INFINITY {
        return ENCODED_POS_INFINITY;
    }

    if x.is_nan() {
        return ENCODED_NAN;
    }

    let bits = x.to_bits();

    if x < 0.0 {
        !bits
    } else {
        // -0.0 and +0.0 share an image; the +1 steps past the largest
        // negative image so zero sorts strictly above every negative.
        (bits | 0x8000_0000_0000_0000) + 1
    }
}

/// Inverse of [`ordered_encode_double`] on its image.
pub fn ordered_decode_double(e: u64) -> f64 {
    if e == 0 {
        return f64::NEG_INFINITY;
    }

    if e == ENCODED_POS_INFINITY {
        return f64::INFINITY;
    }

    if e == ENCODED_NAN {
        return f64::NAN;
    }

    if e >= 0x8000_0000_0000_0001 {
        f64::from_bits((e - 1) & 0x7fff_ffff_ffff_ffff)
    } else {
        f64::from_bits(!e)
    }
}
