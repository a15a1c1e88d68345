//! Property-based test generators using proptest.

use proptest::prelude::*;

/// Names of the built-in replay cache kinds.
pub const CACHE_KINDS: [&str; 3] = ["memory", "file", "mmap"];

/// Strategy for payloads up to `max_len` bytes.
pub fn payload_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Strategy for write or read chunk sizes.
pub fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![1usize..16, 16usize..512, 512usize..8192]
}

/// Strategy for spill thresholds, `0` included.
pub fn threshold_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![Just(0u64), 1u64..64, 64u64..16 * 1024]
}

/// Strategy for a built-in replay cache kind.
pub fn cache_kind_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(CACHE_KINDS.to_vec())
}

/// Strategy for `i32` values biased towards VLQ byte-length boundaries.
pub fn varint_i32_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![
        Just(0),
        Just(-1),
        Just(i32::MIN),
        Just(i32::MAX),
        (0u32..5).prop_map(|k| (1i64 << (7 * k)) as i32),
        (1u32..5).prop_map(|k| ((1i64 << (7 * k)) - 1) as i32),
        any::<i32>(),
    ]
}

/// Strategy for `i64` values biased towards VLQ byte-length boundaries.
pub fn varint_i64_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        Just(0),
        Just(-1),
        Just(i64::MIN),
        Just(i64::MAX),
        (0u32..9).prop_map(|k| 1i64 << (7 * k)),
        (1u32..10).prop_map(|k| ((1u64 << (7 * k)) - 1) as i64),
        any::<i64>(),
    ]
}

/// Strategy for a sequence of replay operations.
pub fn replay_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<ReplayOp>> {
    prop::collection::vec(replay_op_strategy(), 0..max_ops)
}

/// One step against a caching replay stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOp {
    /// Read up to this many bytes.
    Read(usize),
    /// Skip forward.
    Skip(u32),
    /// Skip backwards.
    SkipBack(u32),
    /// Mark the current offset.
    Mark,
    /// Return to the mark.
    Reset,
}

fn replay_op_strategy() -> impl Strategy<Value = ReplayOp> {
    prop_oneof![
        4 => (1usize..256).prop_map(ReplayOp::Read),
        1 => (0u32..128).prop_map(ReplayOp::Skip),
        1 => (0u32..128).prop_map(ReplayOp::SkipBack),
        1 => Just(ReplayOp::Mark),
        1 => Just(ReplayOp::Reset),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{TestAuthority, TestSpool};
    use bytes::BytesMut;
    use std::io::{Read, Write};
    use xspool_codec::{varint, zigzag};
    use xspool_replay::{CachingReplayStream, ReplaySource};
    use xspool_storage::VirtualContentBuffer;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn varint_i32_roundtrip(value in varint_i32_strategy()) {
            let mut buf = BytesMut::new();
            varint::write_int(&mut buf, value);
            prop_assert_eq!(buf.len(), varint::encoded_len_u32(value as u32));
            prop_assert_eq!(varint::read_int(&mut buf.freeze()).unwrap(), value);
            prop_assert_eq!(zigzag::decode_u32(zigzag::encode_i32(value)), value);
        }

        #[test]
        fn varint_i64_roundtrip(value in varint_i64_strategy()) {
            let mut buf = BytesMut::new();
            varint::write_long(&mut buf, value);
            prop_assert_eq!(buf.len(), varint::encoded_len_u64(value as u64));
            prop_assert_eq!(varint::read_long(&mut buf.freeze()).unwrap(), value);
            prop_assert_eq!(zigzag::decode_u64(zigzag::encode_i64(value)), value);
        }

        #[test]
        fn content_buffer_roundtrip(
            data in payload_strategy(20_000),
            chunk in chunk_size_strategy(),
            threshold in threshold_strategy(),
        ) {
            let authority = TestAuthority::new();
            let buffer = VirtualContentBuffer::new(authority.handle(), threshold);

            let mut writer = buffer.new_writer().unwrap();
            for part in data.chunks(chunk) {
                writer.write_all(part).unwrap();
            }
            writer.finish().unwrap();

            let mut back = Vec::new();
            let mut reader = buffer.new_reader().unwrap();
            let mut scratch = vec![0u8; chunk];
            loop {
                let n = reader.read(&mut scratch).unwrap();
                if n == 0 {
                    break;
                }
                back.extend_from_slice(&scratch[..n]);
            }
            prop_assert_eq!(back, data);
        }

        #[test]
        fn replay_ops_match_model(
            data in payload_strategy(1024),
            kind in cache_kind_strategy(),
            ops in replay_ops_strategy(40),
        ) {
            let spool = TestSpool::with_config(|c| c.mmap_increment(256));
            let cache = spool
                .replay_cache_of(kind, ReplaySource::from_bytes(data.clone()))
                .unwrap();
            let mut stream = CachingReplayStream::new(cache).unwrap();

            let (mut offset, mut mark) = (0usize, 0usize);
            for op in ops {
                match op {
                    ReplayOp::Read(n) => {
                        let mut buf = vec![0u8; n];
                        let got = stream.read_bytes(&mut buf).unwrap();
                        let expected = n.min(data.len() - offset);
                        prop_assert_eq!(got, expected);
                        prop_assert_eq!(&buf[..got], &data[offset..offset + got]);
                        offset += got;
                    }
                    ReplayOp::Skip(n) => {
                        let got = stream.skip(i64::from(n)).unwrap() as usize;
                        prop_assert_eq!(got, (n as usize).min(data.len() - offset));
                        offset += got;
                    }
                    ReplayOp::SkipBack(n) => {
                        let got = stream.skip_backwards(n) as usize;
                        prop_assert_eq!(got, (n as usize).min(offset));
                        offset -= got;
                    }
                    ReplayOp::Mark => {
                        stream.mark();
                        mark = offset;
                    }
                    ReplayOp::Reset => {
                        stream.reset();
                        offset = mark;
                    }
                }
                prop_assert_eq!(stream.offset() as usize, offset);
            }
        }
    }
}
