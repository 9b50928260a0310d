use crate::{Address, Error, Size};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open range of virtual memory, `[base, base + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub base: Address,
    pub size: Size,
}

impl AddressRange {
    /// Construct a new address range.
    pub fn new(base: Address, size: Size) -> Self {
        Self { base, size }
    }

    /// The first address past the end of the range.
    pub fn end(&self) -> Result<Address, Error> {
        self.base.add(self.size)
    }

    /// Test if the range contains the given address.
    pub fn contains(&self, address: Address) -> bool {
        self.base <= address && address.0 - self.base.0 < self.size.0
    }

    /// Test if the range fully contains another range.
    pub fn contains_range(&self, other: &AddressRange) -> bool {
        if other.size.is_zero() {
            return self.contains(other.base);
        }

        self.base <= other.base
            && other.base.0.saturating_add(other.size.0) <= self.base.0.saturating_add(self.size.0)
    }

    /// Find the range containing the given address in a slice sorted by base.
    pub fn find_in_range<T>(
        things: &[T],
        accessor: impl Fn(&T) -> &AddressRange,
        address: Address,
    ) -> Option<&T> {
        let index = match things.binary_search_by(|thing| accessor(thing).base.cmp(&address)) {
            Ok(exact) => exact,
            Err(0) => return None,
            Err(n) => n - 1,
        };

        let thing = &things[index];

        if accessor(thing).contains(address) {
            Some(thing)
        } else {
            None
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}-{}", self.base, self.base.saturating_add(self.size))
    }
}
