use crate::{Error, Size, Value};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::{fmt, str};

/// The type of a scanned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanType {
    U16,
    U32,
    U64,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl ScanType {
    /// The size in bytes of a value of this type.
    pub fn size(self) -> usize {
        use self::ScanType::*;

        match self {
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 | F64 => 8,
        }
    }

    /// The natural alignment for values of this type.
    pub fn alignment(self) -> Size {
        Size::new(self.size() as u64)
    }

    /// Decode a single little-endian value.
    ///
    /// The buffer must hold at least [`size`](ScanType::size) bytes.
    pub fn decode(self, buf: &[u8]) -> Value {
        match self {
            ScanType::U16 => Value::U16(LittleEndian::read_u16(buf)),
            ScanType::U32 => Value::U32(LittleEndian::read_u32(buf)),
            ScanType::U64 => Value::U64(LittleEndian::read_u64(buf)),
            ScanType::I16 => Value::I16(LittleEndian::read_i16(buf)),
            ScanType::I32 => Value::I32(LittleEndian::read_i32(buf)),
            ScanType::I64 => Value::I64(LittleEndian::read_i64(buf)),
            ScanType::F32 => Value::F32(LittleEndian::read_f32(buf)),
            ScanType::F64 => Value::F64(LittleEndian::read_f64(buf)),
        }
    }

    /// Parse a single operand into a value of this type.
    ///
    /// Integer operands accept decimal or `0x`-prefixed hex.
    pub fn parse(self, input: &str) -> Result<Value, Error> {
        let input = input.trim();

        macro_rules! int {
            ($variant:ident, $ty:ty) => {{
                let parsed = if let Some(hex) = input.strip_prefix("0x") {
                    <$ty>::from_str_radix(hex, 16)
                } else {
                    input.parse::<$ty>()
                };

                Value::$variant(parsed.map_err(|_| Error::ParseOperand {
                    input: input.to_string(),
                    ty: self,
                })?)
            }};
        }

        macro_rules! float {
            ($variant:ident, $ty:ty) => {
                Value::$variant(input.parse::<$ty>().map_err(|_| Error::ParseOperand {
                    input: input.to_string(),
                    ty: self,
                })?)
            };
        }

        Ok(match self {
            ScanType::U16 => int!(U16, u16),
            ScanType::U32 => int!(U32, u32),
            ScanType::U64 => int!(U64, u64),
            ScanType::I16 => int!(I16, i16),
            ScanType::I32 => int!(I32, i32),
            ScanType::I64 => int!(I64, i64),
            ScanType::F32 => float!(F32, f32),
            ScanType::F64 => float!(F64, f64),
        })
    }
}

impl str::FromStr for ScanType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "u16" => ScanType::U16,
            "u32" => ScanType::U32,
            "u64" => ScanType::U64,
            "i16" => ScanType::I16,
            "i32" => ScanType::I32,
            "i64" => ScanType::I64,
            "f32" => ScanType::F32,
            "f64" => ScanType::F64,
            other => anyhow::bail!("bad type: {}", other),
        })
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanType::U16 => "u16",
            ScanType::U32 => "u32",
            ScanType::U64 => "u64",
            ScanType::I16 => "i16",
            ScanType::I32 => "i32",
            ScanType::I64 => "i64",
            ScanType::F32 => "f32",
            ScanType::F64 => "f64",
        };

        name.fmt(fmt)
    }
}

#[cfg(test)]
mod tests {
    use super::ScanType;
    use crate::Value;

    #[test]
    fn test_parse() {
        assert_eq!(Value::I32(42), ScanType::I32.parse("42").unwrap());
        assert_eq!(Value::I32(-42), ScanType::I32.parse("-42").unwrap());
        assert_eq!(Value::U64(0x1000), ScanType::U64.parse("0x1000").unwrap());
        assert_eq!(Value::F32(1.5), ScanType::F32.parse("1.5").unwrap());
        assert!(ScanType::I16.parse("not a number").is_err());
        assert!(ScanType::U16.parse("70000").is_err());
    }

    #[test]
    fn test_decode() {
        let buf = [0x2A, 0x00, 0x00, 0x00];
        assert_eq!(Value::I32(42), ScanType::I32.decode(&buf));
        assert_eq!(Value::U16(42), ScanType::U16.decode(&buf[..2]));
    }
}
