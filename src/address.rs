//! Abstraction to help deal with virtual addresses.

use crate::{Error, Offset, Sign, Size};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::{fmt, str};

#[derive(Clone, Default, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub(crate) u64);

impl Address {
    /// Construct a new address.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Construct a null address.
    pub const fn null() -> Self {
        Self(0)
    }

    /// If the address is null.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Convert into the inner representation.
    pub fn into_inner(self) -> u64 {
        self.0
    }

    /// Performed a checked add with an address and a size.
    pub fn add(self, rhs: Size) -> Result<Address, Error> {
        let sum = self
            .0
            .checked_add(rhs.0)
            .ok_or(Error::AddressAdd(self, rhs))?;

        Ok(Address(sum))
    }

    /// Add a size to the current address.
    pub fn add_assign(&mut self, rhs: Size) -> Result<(), Error> {
        *self = self.add(rhs)?;
        Ok(())
    }

    /// Add the given size in a saturating manner.
    pub fn saturating_add(self, rhs: Size) -> Address {
        Address(self.0.saturating_add(rhs.0))
    }

    /// Subtract the given size in a saturating manner.
    pub fn saturating_sub(self, rhs: Size) -> Address {
        Address(self.0.saturating_sub(rhs.0))
    }

    /// Add an offset in a checked manner.
    pub fn checked_offset(self, offset: Offset) -> Option<Address> {
        match offset.sign() {
            Sign::NoSign => Some(self),
            Sign::Plus => Some(Address(self.0.checked_add(offset.abs().0)?)),
            Sign::Minus => Some(Address(self.0.checked_sub(offset.abs().0)?)),
        }
    }

    /// Add a signed displacement in a checked manner.
    pub fn checked_add_signed(self, value: i64) -> Option<Address> {
        if value >= 0 {
            Some(Address(self.0.checked_add(value as u64)?))
        } else {
            Some(Address(self.0.checked_sub(value.unsigned_abs())?))
        }
    }

    /// Find how far this address offsets another one.
    pub fn offset_of(self, base: Address) -> Offset {
        if self.0 >= base.0 {
            Offset::new(Sign::Plus, Size(self.0 - base.0))
        } else {
            Offset::new(Sign::Minus, Size(base.0 - self.0))
        }
    }

    /// Safely convert two addresses into a non-negative size.
    pub fn size_from(self, base: Address) -> Result<Size, Error> {
        let distance = self
            .0
            .checked_sub(base.0)
            .ok_or(Error::Sub(self.0, base.0))?;

        Ok(Size(distance))
    }

    /// Test if the current address is aligned with the given size.
    pub fn is_aligned(self, size: Size) -> bool {
        size.0 != 0 && self.0 % size.0 == 0
    }

    /// Convert into usize.
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).expect("usize conversion failed")
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl TryFrom<usize> for Address {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        u64::try_from(value)
            .map(Address)
            .map_err(|_| Error::AddressConversion)
    }
}

impl str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = if s.starts_with("0x") { &s[2..] } else { s };

        Ok(Address(
            u64::from_str_radix(s, 16).map_err(|_| Error::AddressFromStr)?,
        ))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "0x{:X}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, fmt)
    }
}

#[cfg(test)]
mod tests {
    use super::Address;
    use crate::{Sign, Size};

    #[test]
    fn test_offset_of() {
        let a = Address::new(0x2010);
        let b = Address::new(0x2000);

        assert_eq!(Sign::Plus, a.offset_of(b).sign());
        assert_eq!(Size::new(0x10), a.offset_of(b).abs());
        assert_eq!(Sign::Minus, b.offset_of(a).sign());
        assert_eq!(Some(a), b.checked_offset(a.offset_of(b)));
    }

    #[test]
    fn test_signed_displacement() {
        let a = Address::new(0x1000);

        assert_eq!(Some(Address::new(0x1020)), a.checked_add_signed(0x20));
        assert_eq!(Some(Address::new(0xFF0)), a.checked_add_signed(-0x10));
        assert_eq!(None, a.checked_add_signed(-0x2000));
    }

    #[test]
    fn test_parse() {
        assert_eq!(Address::new(0xABCD), "0xABCD".parse().unwrap());
        assert_eq!(Address::new(0xABCD), "ABCD".parse().unwrap());
    }
}
