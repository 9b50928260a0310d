use crate::Error;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::{fmt, str};

/// A size in bytes.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Size(pub(crate) u64);

impl Size {
    /// Construct a new size.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Construct a zero size.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// If the size is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Convert into the inner representation.
    pub fn into_inner(self) -> u64 {
        self.0
    }

    /// Performed a checked addition of two sizes.
    pub fn add(self, rhs: Size) -> Result<Size, Error> {
        let sum = self.0.checked_add(rhs.0).ok_or(Error::Add(self.0, rhs.0))?;
        Ok(Size(sum))
    }

    /// Performed a checked subtraction of two sizes.
    pub fn sub(self, rhs: Size) -> Result<Size, Error> {
        let rest = self.0.checked_sub(rhs.0).ok_or(Error::Sub(self.0, rhs.0))?;
        Ok(Size(rest))
    }

    /// Add another size to this one.
    pub fn add_assign(&mut self, rhs: Size) -> Result<(), Error> {
        *self = self.add(rhs)?;
        Ok(())
    }

    /// Convert into usize.
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).expect("usize conversion failed")
    }
}

impl From<u64> for Size {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl TryFrom<usize> for Size {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .map(Size)
            .map_err(|_| Error::SizeConversion)
    }
}

impl str::FromStr for Size {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = if s.starts_with("0x") { &s[2..] } else { s };

        Ok(Size(
            u64::from_str_radix(s, 16).map_err(|_| Error::SizeConversion)?,
        ))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "0x{:X}", self.0)
    }
}
