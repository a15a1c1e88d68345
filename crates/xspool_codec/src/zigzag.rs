//! Zig-zag mapping between signed and unsigned integers.
//!
//! Small-magnitude signed values map to small unsigned values
//! (`0, -1, 1, -2, 2, ...` become `0, 1, 2, 3, 4, ...`), which keeps them
//! short once written as varints.

/// Maps a signed 32-bit integer onto an unsigned one.
#[inline]
#[must_use]
pub const fn encode_i32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`encode_i32`].
#[inline]
#[must_use]
pub const fn decode_u32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Maps a signed 64-bit integer onto an unsigned one.
#[inline]
#[must_use]
pub const fn encode_i64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`encode_i64`].
#[inline]
#[must_use]
pub const fn decode_u64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
