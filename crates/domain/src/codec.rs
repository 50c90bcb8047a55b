//! Value codec — pure conversions from raw response frames to numbers and
//! text.
//!
//! Every function takes the complete inbound frame (header included) and
//! locates the payload through the length byte:
//!
//! | Offset | Field |
//! |--------|-------|
//! | 3 | Length (payload bytes + 2) |
//! | 6.. | Payload |
//!
//! A payload that is declared longer than the bytes actually received is
//! truncated to what arrived.

use crate::frame::{LENGTH_OFFSET, LENGTH_OVERHEAD, PAYLOAD_OFFSET};

/// Return the payload bytes of a response frame.
///
/// The payload length is the frame's length byte minus the fixed overhead,
/// clamped to the bytes actually present after the header.
#[must_use]
pub fn payload(frame: &[u8]) -> &[u8] {
    let Some(&declared) = frame.get(LENGTH_OFFSET) else {
        return &[];
    };
    let declared = usize::from(declared).saturating_sub(LENGTH_OVERHEAD);
    let start = PAYLOAD_OFFSET.min(frame.len());
    let rest = &frame[start..];
    &rest[..declared.min(rest.len())]
}

/// Interpret the low `bits` bits of `raw` as a two's-complement integer.
///
/// For an n-bit value v: if v ≥ 2^(n−1) the result is v − 2^n, otherwise v.
#[must_use]
pub fn to_signed(raw: u16, bits: u32) -> i32 {
    let value = i32::from(raw);
    if value >= 1 << (bits - 1) {
        value - (1 << bits)
    } else {
        value
    }
}

/// Encode `value` as an n-bit two's-complement pattern (inverse of
/// [`to_signed`] for values in range).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_unsigned(value: i32, bits: u32) -> u16 {
    value.rem_euclid(1 << bits) as u16
}

/// Extract the payload as an unsigned integer.
///
/// Two payload bytes combine big-endian into 16 bits, one byte is taken as
/// 8 bits, any other payload length yields 0.
#[must_use]
pub fn extract_unsigned(frame: &[u8]) -> u16 {
    match payload(frame) {
        [hi, lo] => u16::from_be_bytes([*hi, *lo]),
        [byte] => u16::from(*byte),
        _ => 0,
    }
}

/// Extract the payload as a two's-complement signed integer, using the same
/// width detection as [`extract_unsigned`].
#[must_use]
pub fn extract_signed(frame: &[u8]) -> i32 {
    match payload(frame) {
        [hi, lo] => to_signed(u16::from_be_bytes([*hi, *lo]), 16),
        [byte] => to_signed(u16::from(*byte), 8),
        _ => 0,
    }
}

/// Extract the payload as text, one character per byte.
#[must_use]
pub fn extract_ascii(frame: &[u8]) -> String {
    payload(frame).iter().map(|&b| char::from(b)).collect()
}
