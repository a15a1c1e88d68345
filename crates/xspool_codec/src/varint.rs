//! Variable-length quantity (VLQ) encoding.
//!
//! Each byte carries seven bits of the value, least-significant group first.
//! The high bit of a byte is set iff another byte follows. Encoding stops as
//! soon as the unsigned remainder is zero, so `0` takes a single byte.
//!
//! Signed values are written as their unsigned bit pattern: a negative `i32`
//! always takes five bytes and a negative `i64` ten. Use the `sint`/`slong`
//! variants to zig-zag first when small negative values are common.
//!
//! | value range (unsigned) | bytes |
//! |---|---|
//! | `0 ..= 2^7 - 1` | 1 |
//! | `2^7 ..= 2^14 - 1` | 2 |
//! | `2^14 ..= 2^21 - 1` | 3 |
//! | `2^21 ..= 2^28 - 1` | 4 |
//! | `2^28 ..= 2^35 - 1` | 5 |
//! | ... | +1 per 7 bits |
//! | `2^63 ..= 2^64 - 1` | 10 |

use crate::error::{CodecError, CodecResult};
use crate::zigzag;
use bytes::{Buf, BufMut, Bytes};

/// Maximum encoded size of a 32-bit value.
pub const MAX_LEN_32: usize = 5;

/// Maximum encoded size of a 64-bit value.
pub const MAX_LEN_64: usize = 10;

#[inline]
fn write_varint<B: BufMut>(buf: &mut B, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

#[inline]
fn read_varint<B: Buf>(buf: &mut B, bits: u32) -> CodecResult<u64> {
    let max_bytes = bits.div_ceil(7);
    let mut result = 0u64;
    let mut shift = 0u32;

    for _ in 0..max_bytes {
        if !buf.has_remaining() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = buf.get_u8();
        let group = u64::from(byte & 0x7f);

        // The last group may only carry the bits left in the target width.
        if shift + 7 > bits && group >> (bits - shift) != 0 {
            return Err(CodecError::overflow(bits));
        }
        result |= group << shift;

        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }

    Err(CodecError::overflow(bits))
}

/// Writes an unsigned 32-bit value.
pub fn write_u32<B: BufMut>(buf: &mut B, value: u32) {
    write_varint(buf, u64::from(value));
}

/// Writes an unsigned 64-bit value.
pub fn write_u64<B: BufMut>(buf: &mut B, value: u64) {
    write_varint(buf, value);
}

/// Writes a signed 32-bit value as its unsigned bit pattern.
pub fn write_int<B: BufMut>(buf: &mut B, value: i32) {
    write_u32(buf, value as u32);
}

/// Writes a signed 64-bit value as its unsigned bit pattern.
pub fn write_long<B: BufMut>(buf: &mut B, value: i64) {
    write_u64(buf, value as u64);
}

/// Writes a signed 32-bit value zig-zag encoded.
pub fn write_sint<B: BufMut>(buf: &mut B, value: i32) {
    write_u32(buf, zigzag::encode_i32(value));
}

/// Writes a signed 64-bit value zig-zag encoded.
pub fn write_slong<B: BufMut>(buf: &mut B, value: i64) {
    write_u64(buf, zigzag::encode_i64(value));
}

/// Reads an unsigned 32-bit value.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedEof`] if the buffer ends mid-value and
/// [`CodecError::Overflow`] if the value does not fit in 32 bits.
pub fn read_u32<B: Buf>(buf: &mut B) -> CodecResult<u32> {
    read_varint(buf, 32).map(|v| v as u32)
}

/// Reads an unsigned 64-bit value.
///
/// # Errors
///
/// Same as [`read_u32`] for 64 bits.
pub fn read_u64<B: Buf>(buf: &mut B) -> CodecResult<u64> {
    read_varint(buf, 64)
}

/// Reads a value written by [`write_int`].
pub fn read_int<B: Buf>(buf: &mut B) -> CodecResult<i32> {
    read_u32(buf).map(|v| v as i32)
}

/// Reads a value written by [`write_long`].
pub fn read_long<B: Buf>(buf: &mut B) -> CodecResult<i64> {
    read_u64(buf).map(|v| v as i64)
}

/// Reads a value written by [`write_sint`].
pub fn read_sint<B: Buf>(buf: &mut B) -> CodecResult<i32> {
    read_u32(buf).map(zigzag::decode_u32)
}

/// Reads a value written by [`write_slong`].
pub fn read_slong<B: Buf>(buf: &mut B) -> CodecResult<i64> {
    read_u64(buf).map(zigzag::decode_u64)
}

/// Returns the number of bytes [`write_u32`] produces for `value`.
#[must_use]
pub const fn encoded_len_u32(value: u32) -> usize {
    encoded_len_u64(value as u64)
}

/// Returns the number of bytes [`write_u64`] produces for `value`.
#[must_use]
pub const fn encoded_len_u64(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Writes a VLQ length prefix followed by the bytes.
pub fn write_bytes<B: BufMut>(buf: &mut B, data: &[u8]) {
    write_u64(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Reads bytes written by [`write_bytes`].
///
/// # Errors
///
/// Returns [`CodecError::LengthTooLarge`] if the prefix exceeds the
/// remaining input.
pub fn read_bytes<B: Buf>(buf: &mut B) -> CodecResult<Bytes> {
    let len = read_u64(buf)?;
    let remaining = buf.remaining();
    match usize::try_from(len) {
        Ok(n) if n <= remaining => Ok(buf.copy_to_bytes(n)),
        _ => Err(CodecError::LengthTooLarge { len, remaining }),
    }
}

/// Writes a UTF-8 string with a VLQ length prefix.
pub fn write_str<B: BufMut>(buf: &mut B, value: &str) {
    write_bytes(buf, value.as_bytes());
}

/// Reads a string written by [`write_str`].
///
/// # Errors
///
/// Returns [`CodecError::InvalidUtf8`] if the payload is not UTF-8.
pub fn read_str<B: Buf>(buf: &mut B) -> CodecResult<String> {
    let bytes = read_bytes(buf)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Skips `count` varints without decoding them.
///
/// # Errors
///
/// Returns [`CodecError::UnexpectedEof`] if fewer than `count` complete
/// varints remain.
pub fn skip_varints<B: Buf>(buf: &mut B, count: usize) -> CodecResult<()> {
    for _ in 0..count {
        loop {
            if !buf.has_remaining() {
                return Err(CodecError::UnexpectedEof);
            }
            if buf.get_u8() & 0x80 == 0 {
                break;
            }
        }
    }
    Ok(())
}
