use crate::ScanType;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed value observed in memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    U16(u16),
    U32(u32),
    U64(u64),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

macro_rules! same_ty {
    ($a:expr, $b:expr, $an:ident, $bn:ident, $body:expr, $fallback:expr) => {
        match ($a, $b) {
            (Value::U16($an), Value::U16($bn)) => $body,
            (Value::U32($an), Value::U32($bn)) => $body,
            (Value::U64($an), Value::U64($bn)) => $body,
            (Value::I16($an), Value::I16($bn)) => $body,
            (Value::I32($an), Value::I32($bn)) => $body,
            (Value::I64($an), Value::I64($bn)) => $body,
            (Value::F32($an), Value::F32($bn)) => $body,
            (Value::F64($an), Value::F64($bn)) => $body,
            _ => $fallback,
        }
    };
}

macro_rules! same_ty_arith {
    ($a:expr, $b:expr, $checked:ident, $op:tt) => {
        match ($a, $b) {
            (Value::U16(a), Value::U16(b)) => a.$checked(*b).map(Value::U16),
            (Value::U32(a), Value::U32(b)) => a.$checked(*b).map(Value::U32),
            (Value::U64(a), Value::U64(b)) => a.$checked(*b).map(Value::U64),
            (Value::I16(a), Value::I16(b)) => a.$checked(*b).map(Value::I16),
            (Value::I32(a), Value::I32(b)) => a.$checked(*b).map(Value::I32),
            (Value::I64(a), Value::I64(b)) => a.$checked(*b).map(Value::I64),
            (Value::F32(a), Value::F32(b)) => Some(Value::F32(a $op b)),
            (Value::F64(a), Value::F64(b)) => Some(Value::F64(a $op b)),
            _ => None,
        }
    };
}

impl Value {
    /// The type of the value.
    pub fn ty(&self) -> ScanType {
        match self {
            Value::U16(..) => ScanType::U16,
            Value::U32(..) => ScanType::U32,
            Value::U64(..) => ScanType::U64,
            Value::I16(..) => ScanType::I16,
            Value::I32(..) => ScanType::I32,
            Value::I64(..) => ScanType::I64,
            Value::F32(..) => ScanType::F32,
            Value::F64(..) => ScanType::F64,
        }
    }

    /// The size in bytes of the value.
    pub fn size(&self) -> usize {
        self.ty().size()
    }

    /// Encode the value into the front of the given buffer, little-endian.
    pub fn encode(&self, buf: &mut [u8]) {
        match *self {
            Value::U16(v) => LittleEndian::write_u16(buf, v),
            Value::U32(v) => LittleEndian::write_u32(buf, v),
            Value::U64(v) => LittleEndian::write_u64(buf, v),
            Value::I16(v) => LittleEndian::write_i16(buf, v),
            Value::I32(v) => LittleEndian::write_i32(buf, v),
            Value::I64(v) => LittleEndian::write_i64(buf, v),
            Value::F32(v) => LittleEndian::write_f32(buf, v),
            Value::F64(v) => LittleEndian::write_f64(buf, v),
        }
    }

    /// Same-type equality. Values of differing types never compare equal.
    pub fn eq_value(&self, other: &Value) -> bool {
        same_ty!(self, other, a, b, a == b, false)
    }

    /// Same-type less-than.
    pub fn lt(&self, other: &Value) -> bool {
        same_ty!(self, other, a, b, a < b, false)
    }

    /// Same-type greater-than.
    pub fn gt(&self, other: &Value) -> bool {
        same_ty!(self, other, a, b, a > b, false)
    }

    /// Same-type less-than-or-equal.
    pub fn le(&self, other: &Value) -> bool {
        same_ty!(self, other, a, b, a <= b, false)
    }

    /// Same-type greater-than-or-equal.
    pub fn ge(&self, other: &Value) -> bool {
        same_ty!(self, other, a, b, a >= b, false)
    }

    /// Same-type checked addition. Floats add directly.
    pub fn checked_add(&self, other: &Value) -> Option<Value> {
        same_ty_arith!(self, other, checked_add, +)
    }

    /// Same-type checked subtraction. Floats subtract directly.
    pub fn checked_sub(&self, other: &Value) -> Option<Value> {
        same_ty_arith!(self, other, checked_sub, -)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U16(v) => v.fmt(fmt),
            Value::U32(v) => v.fmt(fmt),
            Value::U64(v) => v.fmt(fmt),
            Value::I16(v) => v.fmt(fmt),
            Value::I32(v) => v.fmt(fmt),
            Value::I64(v) => v.fmt(fmt),
            Value::F32(v) => v.fmt(fmt),
            Value::F64(v) => v.fmt(fmt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn test_compare() {
        assert!(Value::I32(10).eq_value(&Value::I32(10)));
        assert!(!Value::I32(10).eq_value(&Value::I64(10)));
        assert!(Value::I32(-5).lt(&Value::I32(3)));
        assert!(Value::F64(2.5).gt(&Value::F64(1.0)));
    }

    #[test]
    fn test_arith() {
        assert_eq!(
            Some(Value::I32(15)),
            Value::I32(10).checked_add(&Value::I32(5))
        );
        assert_eq!(None, Value::U16(0).checked_sub(&Value::U16(1)));
        assert_eq!(None, Value::I32(1).checked_add(&Value::I64(1)));
    }

    #[test]
    fn test_encode() {
        let mut buf = [0u8; 8];
        Value::U64(0x1122334455667788).encode(&mut buf);
        assert_eq!([0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11], buf);
    }
}
