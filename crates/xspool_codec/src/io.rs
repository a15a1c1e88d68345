//! Varint adapters for `std::io` streams.
//!
//! Used where compact integers are persisted straight into files rather than
//! staged in an in-memory buffer.

use crate::error::CodecError;
use crate::varint::{self, MAX_LEN_64};
use std::io::{self, Read, Write};

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        let kind = match err {
            CodecError::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// Writes varints to any [`Write`] implementation.
pub trait WriteVarint: Write {
    /// Writes `value` as a VLQ and returns the number of bytes written.
    fn write_varint(&mut self, value: u64) -> io::Result<usize> {
        let mut buf = [0u8; MAX_LEN_64];
        let mut slice = &mut buf[..];
        varint::write_u64(&mut slice, value);
        let len = MAX_LEN_64 - slice.len();
        self.write_all(&buf[..len])?;
        Ok(len)
    }

    /// Writes `value` zig-zag encoded.
    fn write_signed_varint(&mut self, value: i64) -> io::Result<usize> {
        self.write_varint(crate::zigzag::encode_i64(value))
    }
}

impl<W: Write + ?Sized> WriteVarint for W {}

/// Reads varints from any [`Read`] implementation.
pub trait ReadVarint: Read {
    /// Reads one VLQ, one byte at a time.
    ///
    /// Returns `Ok(None)` if the stream is at EOF before the first byte.
    fn read_varint(&mut self) -> io::Result<Option<u64>> {
        let mut scratch = Vec::with_capacity(MAX_LEN_64);
        let mut byte = [0u8; 1];
        loop {
            if self.read(&mut byte)? == 0 {
                if scratch.is_empty() {
                    return Ok(None);
                }
                return Err(CodecError::UnexpectedEof.into());
            }
            scratch.push(byte[0]);
            if byte[0] & 0x80 == 0 || scratch.len() == MAX_LEN_64 {
                break;
            }
        }
        Ok(Some(varint::read_u64(&mut scratch.as_slice())?))
    }

    /// Reads one zig-zag encoded VLQ.
    fn read_signed_varint(&mut self) -> io::Result<Option<i64>> {
        Ok(self.read_varint()?.map(crate::zigzag::decode_u64))
    }
}

impl<R: Read + ?Sized> ReadVarint for R {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stream_roundtrip() {
        let mut out = Vec::new();
        assert_eq!(out.write_varint(300).unwrap(), 2);
        out.write_signed_varint(-2).unwrap();
        out.write_varint(u64::MAX).unwrap();

        let mut input = Cursor::new(out);
        assert_eq!(input.read_varint().unwrap(), Some(300));
        assert_eq!(input.read_signed_varint().unwrap(), Some(-2));
        assert_eq!(input.read_varint().unwrap(), Some(u64::MAX));
        assert_eq!(input.read_varint().unwrap(), None);
    }

    #[test]
    fn truncated_stream_is_unexpected_eof() {
        let mut input = Cursor::new(vec![0x80u8, 0x80]);
        let err = input.read_varint().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn overlong_stream_is_invalid_data() {
        let mut input = Cursor::new(vec![0xffu8; 11]);
        let err = input.read_varint().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
