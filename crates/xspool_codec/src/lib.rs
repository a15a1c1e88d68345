//! # xspool Codec
//!
//! Compact integer codecs used by persistence formats across the kernel.
//!
//! - [`varint`]: variable-length quantity (VLQ) encoding, seven bits per byte,
//!   least-significant group first
//! - [`zigzag`]: signed ↔ unsigned mapping that keeps small negative values
//!   short under VLQ
//!
//! Both are stateless and work over any [`bytes::Buf`] / [`bytes::BufMut`];
//! [`ReadVarint`] and [`WriteVarint`] extend `std::io` streams.
//!
//! ## Usage
//!
//! ```
//! use xspool_codec::varint;
//!
//! let mut buf = Vec::new();
//! varint::write_int(&mut buf, 300);
//! varint::write_sint(&mut buf, -2);
//!
//! let mut input = buf.as_slice();
//! assert_eq!(varint::read_int(&mut input).unwrap(), 300);
//! assert_eq!(varint::read_sint(&mut input).unwrap(), -2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod io;
pub mod varint;
pub mod zigzag;

pub use error::{CodecError, CodecResult};
pub use io::{ReadVarint, WriteVarint};
