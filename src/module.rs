use crate::{Address, AddressRange, Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A loaded module, or a thread stack masquerading as one.
///
/// The index is the module's position in the table it was enumerated into and
/// stays stable for the lifetime of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub range: AddressRange,
    pub index: usize,
}

impl ModuleInfo {
    /// The base address of the module.
    pub fn base(&self) -> Address {
        self.range.base
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} ({})", self.name, self.range)
    }
}

/// An indexed table of modules.
///
/// Thread stacks can be appended as `THREADSTACK{n}` pseudo-modules so that
/// stack-anchored chains share the module numbering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleTable {
    modules: Vec<ModuleInfo>,
}

impl ModuleTable {
    /// Construct a table out of named ranges, assigning indexes in order.
    pub fn new(modules: impl IntoIterator<Item = (String, AddressRange)>) -> Self {
        let modules = modules
            .into_iter()
            .enumerate()
            .map(|(index, (name, range))| ModuleInfo { name, range, index })
            .collect();

        Self { modules }
    }

    /// The number of modules in the table.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// If the table is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Get a module by index.
    pub fn get(&self, index: usize) -> Result<&ModuleInfo, Error> {
        self.modules
            .get(index)
            .ok_or(Error::BadModuleIndex(index, self.modules.len()))
    }

    /// Iterate over all modules in index order.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.iter()
    }

    /// Append a thread stack under the pseudo-module numbering.
    ///
    /// Returns the index the stack was assigned.
    pub fn push_stack(&mut self, stack_index: usize, range: AddressRange) -> usize {
        let index = self.modules.len();

        self.modules.push(ModuleInfo {
            name: format!("THREADSTACK{}", stack_index),
            range,
            index,
        });

        index
    }

    /// Find the module containing the given address.
    ///
    /// Tables are small, so this is a linear pass over index order.
    pub fn find_by_address(&self, address: Address) -> Option<&ModuleInfo> {
        self.modules.iter().find(|m| m.range.contains(address))
    }
}

#[cfg(test)]
mod tests {
    use super::ModuleTable;
    use crate::{Address, AddressRange, Size};

    fn table() -> ModuleTable {
        ModuleTable::new(vec![
            (
                "game.exe".to_string(),
                AddressRange::new(Address::new(0x400000), Size::new(0x1000)),
            ),
            (
                "engine.dll".to_string(),
                AddressRange::new(Address::new(0x500000), Size::new(0x2000)),
            ),
        ])
    }

    #[test]
    fn test_indexing() {
        let table = table();

        assert_eq!(2, table.len());
        assert_eq!("engine.dll", table.get(1).unwrap().name);
        assert_eq!(1, table.get(1).unwrap().index);
        assert!(table.get(2).is_err());
    }

    #[test]
    fn test_push_stack() {
        let mut table = table();

        let index = table.push_stack(0, AddressRange::new(Address::new(0x7000), Size::new(0x100)));
        assert_eq!(2, index);
        assert_eq!("THREADSTACK0", table.get(index).unwrap().name);
    }

    #[test]
    fn test_find_by_address() {
        let table = table();

        assert_eq!(
            "game.exe",
            table.find_by_address(Address::new(0x400800)).unwrap().name
        );
        assert!(table.find_by_address(Address::new(0x600000)).is_none());
    }
}
