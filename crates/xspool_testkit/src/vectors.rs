//! Byte-level test vectors for the integer codecs.
//!
//! Other implementations of the same persistence formats can load
//! [`all_vectors_json`] and check they produce identical bytes.

use serde::{Deserialize, Serialize};
use xspool_codec::{varint, CodecError};

/// Which codec entry point a vector exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorCodec {
    /// 32-bit VLQ of the unsigned bit pattern.
    Int,
    /// 64-bit VLQ of the unsigned bit pattern.
    Long,
    /// 32-bit zig-zag then VLQ.
    Sint,
    /// 64-bit zig-zag then VLQ.
    Slong,
}

/// A test vector that can be shared across implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Codec under test.
    pub codec: VectorCodec,
    /// Decoded value, absent for vectors that must fail to decode.
    pub value: Option<i64>,
    /// Encoded bytes (hex).
    pub encoded_hex: String,
    /// Expected decode error message, if decoding must fail.
    pub expected_error: Option<String>,
}

fn ok(id: &str, description: &str, codec: VectorCodec, value: i64, hex: &str) -> TestVector {
    TestVector {
        id: id.into(),
        description: description.into(),
        codec,
        value: Some(value),
        encoded_hex: hex.into(),
        expected_error: None,
    }
}

fn err(id: &str, description: &str, codec: VectorCodec, hex: &str, error: CodecError) -> TestVector {
    TestVector {
        id: id.into(),
        description: description.into(),
        codec,
        value: None,
        encoded_hex: hex.into(),
        expected_error: Some(error.to_string()),
    }
}

/// VLQ vectors over the unsigned bit pattern.
pub fn vlq_vectors() -> Vec<TestVector> {
    use VectorCodec::{Int, Long};
    vec![
        ok("vlq_int_0", "zero is one byte", Int, 0, "00"),
        ok("vlq_int_1", "one", Int, 1, "01"),
        ok("vlq_int_127", "largest 1-byte value", Int, 127, "7f"),
        ok("vlq_int_128", "smallest 2-byte value", Int, 128, "8001"),
        ok("vlq_int_300", "two groups", Int, 300, "ac02"),
        ok("vlq_int_16383", "largest 2-byte value", Int, 16_383, "ff7f"),
        ok("vlq_int_16384", "smallest 3-byte value", Int, 16_384, "808001"),
        ok("vlq_int_max", "i32::MAX", Int, i64::from(i32::MAX), "ffffffff07"),
        ok("vlq_int_neg1", "-1 takes five bytes", Int, -1, "ffffffff0f"),
        ok("vlq_int_min", "i32::MIN", Int, i64::from(i32::MIN), "8080808008"),
        ok("vlq_long_0", "zero is one byte", Long, 0, "00"),
        ok("vlq_long_max", "i64::MAX", Long, i64::MAX, "ffffffffffffffff7f"),
        ok("vlq_long_neg1", "-1 takes ten bytes", Long, -1, "ffffffffffffffffff01"),
        ok("vlq_long_min", "i64::MIN", Long, i64::MIN, "80808080808080808001"),
    ]
}

/// Zig-zag VLQ vectors.
pub fn zigzag_vectors() -> Vec<TestVector> {
    use VectorCodec::{Sint, Slong};
    vec![
        ok("zz_int_0", "zero", Sint, 0, "00"),
        ok("zz_int_neg1", "-1 maps to 1", Sint, -1, "01"),
        ok("zz_int_1", "1 maps to 2", Sint, 1, "02"),
        ok("zz_int_neg2", "-2 maps to 3", Sint, -2, "03"),
        ok("zz_int_max", "i32::MAX maps to 0xfffffffe", Sint, i64::from(i32::MAX), "feffffff0f"),
        ok("zz_int_min", "i32::MIN maps to 0xffffffff", Sint, i64::from(i32::MIN), "ffffffff0f"),
        ok("zz_long_neg64", "-64 stays one byte", Slong, -64, "7f"),
        ok("zz_long_64", "64 needs two bytes", Slong, 64, "8001"),
        ok("zz_long_min", "i64::MIN", Slong, i64::MIN, "ffffffffffffffffff01"),
    ]
}

/// Inputs that must be rejected.
pub fn malformed_vectors() -> Vec<TestVector> {
    use VectorCodec::{Int, Long};
    vec![
        err("bad_truncated", "continuation bit on last byte", Int, "80", CodecError::UnexpectedEof),
        err("bad_empty", "no bytes", Long, "", CodecError::UnexpectedEof),
        err("bad_int_high_bits", "fifth group exceeds 32 bits", Int, "ffffffff1f", CodecError::overflow(32)),
        err("bad_int_too_long", "six groups for a 32-bit value", Int, "8080808080", CodecError::overflow(32)),
        err(
            "bad_long_high_bits",
            "tenth group exceeds 64 bits",
            Long,
            "ffffffffffffffffff02",
            CodecError::overflow(64),
        ),
    ]
}

/// Encodes `value` with `codec`.
pub fn encode(codec: VectorCodec, value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    match codec {
        VectorCodec::Int => varint::write_int(&mut out, value as i32),
        VectorCodec::Long => varint::write_long(&mut out, value),
        VectorCodec::Sint => varint::write_sint(&mut out, value as i32),
        VectorCodec::Slong => varint::write_slong(&mut out, value),
    }
    out
}

/// Decodes one value with `codec`, widened to `i64`.
pub fn decode(codec: VectorCodec, mut bytes: &[u8]) -> Result<i64, CodecError> {
    match codec {
        VectorCodec::Int => varint::read_int(&mut bytes).map(i64::from),
        VectorCodec::Long => varint::read_long(&mut bytes),
        VectorCodec::Sint => varint::read_sint(&mut bytes).map(i64::from),
        VectorCodec::Slong => varint::read_slong(&mut bytes),
    }
}

/// Checks one vector in both directions, returning a description of the
/// first mismatch.
pub fn verify(vector: &TestVector) -> Result<(), String> {
    let bytes = hex_decode(&vector.encoded_hex)
        .ok_or_else(|| format!("{}: invalid hex {:?}", vector.id, vector.encoded_hex))?;

    match (&vector.value, &vector.expected_error) {
        (Some(value), _) => {
            let encoded = hex_encode(&encode(vector.codec, *value));
            if encoded != vector.encoded_hex {
                return Err(format!(
                    "{}: encoded {} expected {}",
                    vector.id, encoded, vector.encoded_hex
                ));
            }
            match decode(vector.codec, &bytes) {
                Ok(decoded) if decoded == *value => Ok(()),
                other => Err(format!("{}: decoded {:?} expected {}", vector.id, other, value)),
            }
        }
        (None, Some(expected)) => match decode(vector.codec, &bytes) {
            Err(e) if e.to_string() == *expected => Ok(()),
            other => Err(format!("{}: decoded {:?} expected error {}", vector.id, other, expected)),
        },
        (None, None) => Err(format!("{}: neither value nor error", vector.id)),
    }
}

/// Encodes bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes hex, returning `None` on odd length or a non-hex digit.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Generate all test vectors as JSON.
pub fn all_vectors_json() -> String {
    let vectors = AllTestVectors {
        vlq: vlq_vectors(),
        zigzag: zigzag_vectors(),
        malformed: malformed_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("Failed to serialize vectors")
}

#[derive(Debug, Serialize, Deserialize)]
struct AllTestVectors {
    vlq: Vec<TestVector>,
    zigzag: Vec<TestVector>,
    malformed: Vec<TestVector>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(vectors: Vec<TestVector>) {
        for vector in vectors {
            if let Err(message) = verify(&vector) {
                panic!("{message}");
            }
        }
    }

    #[test]
    fn test_vlq_vectors() {
        check(vlq_vectors());
    }

    #[test]
    fn test_zigzag_vectors() {
        check(zigzag_vectors());
    }

    #[test]
    fn test_malformed_vectors() {
        check(malformed_vectors());
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(hex_encode(&[0x00, 0xab, 0x7f]), "00ab7f");
        assert_eq!(hex_decode("00ab7f"), Some(vec![0x00, 0xab, 0x7f]));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
    }

    #[test]
    fn test_all_vectors_json() {
        let json = all_vectors_json();
        assert!(json.contains("\"vlq\""));
        assert!(json.contains("\"malformed\""));

        let parsed: AllTestVectors = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.zigzag.len(), zigzag_vectors().len());
        assert_eq!(parsed.vlq[0].codec, VectorCodec::Int);
    }
}
