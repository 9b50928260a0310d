use crate::pointer_index::PointerMap;
use crate::{Address, Error, ModuleTable, Offset, Sign};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A discovered pointer chain.
///
/// The chain is anchored at a static base, a module (or thread-stack
/// pseudo-module) index plus a signed base offset. Hop offsets are stored
/// innermost-first: `offsets[i]` is the displacement applied at level `i`,
/// so `offsets[0]` is the final hop onto the target and the chain is
/// followed from the back of the vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub module_index: usize,
    pub base_offset: i64,
    pub offsets: Vec<Offset>,
    /// The address the chain resolved to when it was discovered, or null
    /// for chains coming out of a decoder.
    pub points_to: Address,
}

impl Pointer {
    /// The level of the chain. A chain always has `level + 1` hop offsets.
    pub fn level(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// The static anchor address under the given module table.
    pub fn base_address(&self, table: &ModuleTable) -> Result<Address, Error> {
        let module = table.get(self.module_index)?;

        module
            .base()
            .checked_add_signed(self.base_offset)
            .ok_or(Error::AddressConversion)
    }

    /// Re-resolve the chain against a fresh pointer map.
    ///
    /// Returns the address the chain points at now, or `None` if any hop
    /// lands outside pointer-holding memory.
    pub fn resolve(&self, table: &ModuleTable, map: &PointerMap) -> Option<Address> {
        let anchor = self.base_address(table).ok()?;

        if self.offsets.is_empty() {
            return Some(anchor);
        }

        let mut value = map.get(anchor)?;
        let mut current = None;

        for (n, offset) in self.offsets.iter().rev().enumerate() {
            if n > 0 {
                value = map.get(current?)?;
            }

            current = Some(value.checked_offset(*offset)?);
        }

        current
    }

    /// The hop offsets in follow order, outermost first, as hex.
    pub fn display_offsets(&self) -> String {
        let mut out = String::new();

        for (n, offset) in self.offsets.iter().rev().enumerate() {
            if n > 0 {
                out.push_str(", ");
            }

            match offset.sign() {
                Sign::Minus => out.push_str(&format!("-{:X}", offset.abs().into_inner())),
                _ => out.push_str(&format!("{:X}", offset.abs().into_inner())),
            }
        }

        out
    }

    /// Human-readable form under the given module table.
    pub fn display<'a>(&'a self, table: &'a ModuleTable) -> impl fmt::Display + 'a {
        DisplayPointer {
            pointer: self,
            table,
        }
    }
}

struct DisplayPointer<'a> {
    pointer: &'a Pointer,
    table: &'a ModuleTable,
}

impl fmt::Display for DisplayPointer<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table.get(self.pointer.module_index) {
            Ok(module) => write!(fmt, "{}", module.name)?,
            Err(..) => write!(fmt, "<module {}>", self.pointer.module_index)?,
        }

        if self.pointer.base_offset >= 0 {
            write!(fmt, "+0x{:X}", self.pointer.base_offset)?;
        } else {
            write!(fmt, "-0x{:X}", self.pointer.base_offset.unsigned_abs())?;
        }

        write!(fmt, " -> {}", self.pointer.display_offsets())
    }
}

#[cfg(test)]
mod tests {
    use super::Pointer;
    use crate::{Address, Offset, Sign, Size};

    fn offset(value: i64) -> Offset {
        Offset::from_i64(value)
    }

    #[test]
    fn test_display_offsets_reverses_hops() {
        let pointer = Pointer {
            module_index: 0,
            base_offset: 0x20,
            offsets: vec![offset(0x18), offset(0), offset(0x18), offset(0x10)],
            points_to: Address::new(0x1000),
        };

        assert_eq!(3, pointer.level());
        assert_eq!("10, 18, 0, 18", pointer.display_offsets());
    }

    #[test]
    fn test_display_negative_offset() {
        let pointer = Pointer {
            module_index: 0,
            base_offset: 0,
            offsets: vec![Offset::new(Sign::Minus, Size::new(0x8)), offset(0x10)],
            points_to: Address::null(),
        };

        assert_eq!("10, -8", pointer.display_offsets());
    }
}
