//! Varint command implementation.

use serde::Serialize;
use xspool_codec::{varint, zigzag};

/// Width of the integer being encoded or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// 32 bits.
    Int,
    /// 64 bits.
    Long,
}

/// One encoded value.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct VarintResult {
    /// Decimal value.
    pub value: i64,
    /// Whether zig-zag was applied.
    pub zigzag: bool,
    /// Encoded bytes as lowercase hex.
    pub hex: String,
    /// Encoded length in bytes.
    pub len: usize,
}

/// Encodes `value` and returns the result.
pub fn encode(value: i64, width: Width, zigzag: bool) -> Result<VarintResult, Box<dyn std::error::Error>> {
    let mut buf = Vec::new();
    match (width, zigzag) {
        (Width::Int, false) => varint::write_int(&mut buf, narrow(value)?),
        (Width::Int, true) => varint::write_sint(&mut buf, narrow(value)?),
        (Width::Long, false) => varint::write_long(&mut buf, value),
        (Width::Long, true) => varint::write_slong(&mut buf, value),
    }
    Ok(VarintResult {
        value,
        zigzag,
        hex: to_hex(&buf),
        len: buf.len(),
    })
}

/// Decodes every value packed in `hex`.
pub fn decode(hex: &str, width: Width, zigzag: bool) -> Result<Vec<VarintResult>, Box<dyn std::error::Error>> {
    let bytes = from_hex(hex)?;
    let mut input = bytes.as_slice();
    let mut out = Vec::new();

    while !input.is_empty() {
        let before = input.len();
        let value = match width {
            Width::Int => {
                let raw = varint::read_u32(&mut input)?;
                if zigzag {
                    i64::from(zigzag::decode_u32(raw))
                } else {
                    i64::from(raw as i32)
                }
            }
            Width::Long => {
                let raw = varint::read_u64(&mut input)?;
                if zigzag {
                    zigzag::decode_u64(raw)
                } else {
                    raw as i64
                }
            }
        };
        let used = &bytes[bytes.len() - before..bytes.len() - input.len()];
        out.push(VarintResult {
            value,
            zigzag,
            hex: to_hex(used),
            len: used.len(),
        });
    }

    Ok(out)
}

/// Runs `varint encode`.
pub fn run_encode(values: &[i64], width: Width, zigzag: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let results = values
        .iter()
        .map(|&v| encode(v, width, zigzag))
        .collect::<Result<Vec<_>, _>>()?;
    print(&results, format)
}

/// Runs `varint decode`.
pub fn run_decode(hex: &str, width: Width, zigzag: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    print(&decode(hex, width, zigzag)?, format)
}

fn print(results: &[VarintResult], format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(results)?),
        _ => {
            for r in results {
                println!("{:>20}  {:<20}  ({} bytes)", r.value, r.hex, r.len);
            }
        }
    }
    Ok(())
}

fn narrow(value: i64) -> Result<i32, Box<dyn std::error::Error>> {
    i32::try_from(value).map_err(|_| format!("{} does not fit in 32 bits (use --long)", value).into())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(hex: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let digits: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err("Hex input must have an even number of digits".into());
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| -> Result<u8, Box<dyn std::error::Error>> {
            let pair = digits.get(i..i + 2).ok_or("Invalid hex digit")?;
            Ok(u8::from_str_radix(pair, 16).map_err(|e| format!("Invalid hex: {}", e))?)
        })
        .collect()
}
