//! Checked integer arithmetic (component C).
//!
//! BSON length fields come from untrusted bytes on the wire. All length
//! bookkeeping — element sizes, document sizes, nested document lengths —
//! goes through these helpers instead of raw `+`/`-`/`*`, so that a
//! maliciously (or corruptly) large length value turns into
//! [`crate::error::Error::LengthOverflow`] instead of a silently wrapped
//! length that would let a reader walk past the end of a buffer.

/// Saturating/flagged signed 64-bit arithmetic. Every operation returns
/// `None` on overflow instead of wrapping or panicking: callers get either
/// the exact mathematical result or a clear signal that one doesn't fit.
pub fn checked_add_i64(a: i64, b: i64) -> Option<i64> {
    a.checked_add(b)
}

pub fn checked_sub_i64(a: i64, b: i64) -> Option<i64> {
    a.checked_sub(b)
}

pub fn checked_mul_i64(a: i64, b: i64) -> Option<i64> {
    a.checked_mul(b)
}

/// BSON lengths are always non-negative; this is the workhorse used by the
/// view/iterator/document code to accumulate element sizes. `usize` is used
/// for byte offsets internally, but checked against `i32`'s range since BSON
/// document lengths are a signed 32-bit field on the wire.
pub fn checked_add_usize(a: usize, b: usize) -> Option<usize> {
    a.checked_add(b)
}

/// Validates and widens a little-endian `i32` BSON/wire length into a
/// `usize`, rejecting negative values up front (a negative length can never
/// be a valid byte count, and widening it naively would wrap to a huge
/// `usize`).
pub fn length_to_usize(len: i32) -> Option<usize> {
    if len < 0 {
        None
    } else {
        Some(len as usize)
    }
}
