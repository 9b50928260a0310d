use crate::{Sign, Size};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A signed byte displacement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Offset {
    sign: Sign,
    offset: Size,
}

impl Offset {
    /// Construct a new offset.
    pub fn new(sign: Sign, offset: Size) -> Self {
        if offset.is_zero() {
            return Self::zero();
        }

        Self { sign, offset }
    }

    /// Construct a zero offset.
    pub const fn zero() -> Self {
        Self {
            sign: Sign::NoSign,
            offset: Size::zero(),
        }
    }

    /// The sign of the offset.
    pub fn sign(self) -> Sign {
        self.sign
    }

    /// The magnitude of the offset.
    pub fn abs(self) -> Size {
        self.offset
    }

    /// Test that the magnitude of the offset is within the given size.
    pub fn is_within(self, size: Size) -> bool {
        self.offset <= size
    }

    /// Convert into a signed displacement.
    ///
    /// Magnitudes that do not fit in `i64` saturate.
    pub fn as_i64(self) -> i64 {
        match self.sign {
            Sign::NoSign => 0,
            Sign::Plus => i64::try_from(self.offset.0).unwrap_or(i64::MAX),
            Sign::Minus => i64::try_from(self.offset.0)
                .map(|v| -v)
                .unwrap_or(i64::MIN),
        }
    }

    /// Construct from a signed displacement.
    pub fn from_i64(value: i64) -> Self {
        if value >= 0 {
            Self::new(Sign::Plus, Size(value as u64))
        } else {
            Self::new(Sign::Minus, Size(value.unsigned_abs()))
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sign {
            Sign::NoSign => write!(fmt, "0x0"),
            sign => write!(fmt, "{}{}", sign, self.offset),
        }
    }
}
