//! The reverse pointer index and the flat pointer map.

use crate::{Address, AddressRange, ModuleTable, Size, Snapshot, Token, VirtualMemoryRegion};
use byteorder::{ByteOrder, LittleEndian};
use hashbrown::HashMap;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Where a pointer-holding address sits inside a static root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticRef {
    pub module_index: usize,
    /// Displacement of the holder from the root's base.
    pub offset: i64,
}

/// One pointer-holding location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// The address holding the pointer value.
    pub address: Address,
    /// Set when the holder lies inside a static root.
    pub static_ref: Option<StaticRef>,
}

/// Maps pointer values to every location holding them.
///
/// Built once per snapshot and queried heavily during chain discovery: a
/// reverse query asks for all pointer values in `[target - max_offset,
/// target]`, walking downwards from the target.
pub struct PointerIndex {
    map: BTreeMap<Address, Vec<IndexEntry>>,
    entries: usize,
}

impl PointerIndex {
    /// Build the index over a snapshot.
    ///
    /// Only word-sized values that are `alignment`-aligned and land inside
    /// some captured region are indexed. Holders inside a module or
    /// thread-stack range are tagged with their static root up front.
    ///
    /// Regions are indexed in parallel and merged. Cancellation is honored
    /// at region boundaries and yields a usable partial index.
    pub fn build(
        thread_pool: &rayon::ThreadPool,
        snapshot: &Snapshot,
        table: &ModuleTable,
        alignment: Size,
        cancel: Option<&Token>,
    ) -> PointerIndex {
        let ranges = snapshot.ranges();
        let roots: Vec<(AddressRange, usize)> = table.iter().map(|m| (m.range, m.index)).collect();
        let align = alignment.into_inner().max(1);

        let map = thread_pool.install(|| {
            snapshot
                .regions
                .par_iter()
                .map(|region| {
                    if cancel.map(Token::is_set).unwrap_or(false) {
                        return BTreeMap::new();
                    }

                    index_region(region, &ranges, &roots, align)
                })
                .reduce(BTreeMap::new, merge)
        });

        let entries = map.values().map(Vec::len).sum();

        log::debug!(
            "indexed {} pointer values across {} holders",
            map.len(),
            entries
        );

        PointerIndex { map, entries }
    }

    /// The number of distinct pointer values.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// If the index is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The total number of holders.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// All holders of the exact value.
    pub fn holders_of(&self, value: Address) -> Option<&[IndexEntry]> {
        self.map.get(&value).map(Vec::as_slice)
    }

    /// Pointer values in `[target - max_offset, target]`, closest first.
    pub fn candidates(
        &self,
        target: Address,
        max_offset: Size,
    ) -> impl Iterator<Item = (Address, &[IndexEntry])> {
        let start = target.saturating_sub(max_offset);

        self.map
            .range(start..=target)
            .rev()
            .map(|(value, entries)| (*value, entries.as_slice()))
    }
}

fn index_region(
    region: &VirtualMemoryRegion,
    ranges: &[AddressRange],
    roots: &[(AddressRange, usize)],
    align: u64,
) -> BTreeMap<Address, Vec<IndexEntry>> {
    let mut map: BTreeMap<Address, Vec<IndexEntry>> = BTreeMap::new();

    let data = &region.data[..];
    let step = align as usize;
    let mut offset = 0usize;

    while offset + 8 <= data.len() {
        let value = Address::new(LittleEndian::read_u64(&data[offset..]));

        if value.is_aligned(Size::new(align)) && !value.is_null() && in_ranges(ranges, value) {
            let address = region.base().saturating_add(Size::new(offset as u64));
            let static_ref = static_ref_of(roots, address);

            map.entry(value)
                .or_insert_with(Vec::new)
                .push(IndexEntry {
                    address,
                    static_ref,
                });
        }

        offset += step;
    }

    map
}

fn in_ranges(ranges: &[AddressRange], address: Address) -> bool {
    AddressRange::find_in_range(ranges, |r| r, address).is_some()
}

fn static_ref_of(roots: &[(AddressRange, usize)], address: Address) -> Option<StaticRef> {
    for (range, module_index) in roots {
        if range.contains(address) {
            return Some(StaticRef {
                module_index: *module_index,
                offset: address.offset_of(range.base).as_i64(),
            });
        }
    }

    None
}

fn merge(
    mut a: BTreeMap<Address, Vec<IndexEntry>>,
    b: BTreeMap<Address, Vec<IndexEntry>>,
) -> BTreeMap<Address, Vec<IndexEntry>> {
    for (value, mut entries) in b {
        a.entry(value).or_insert_with(Vec::new).append(&mut entries);
    }

    a
}

/// The forward map, address to held pointer value.
///
/// This is what rescans resolve stored chains against; it only needs point
/// lookups, so it is a flat hash map rather than an ordered index.
pub struct PointerMap {
    map: HashMap<Address, Address>,
}

impl PointerMap {
    /// Build the map over a snapshot, with the same value filtering as the
    /// reverse index.
    pub fn build(snapshot: &Snapshot, alignment: Size) -> PointerMap {
        let ranges = snapshot.ranges();
        let align = alignment.into_inner().max(1);
        let step = align as usize;

        let mut map = HashMap::new();

        for region in &snapshot.regions {
            let data = &region.data[..];
            let mut offset = 0usize;

            while offset + 8 <= data.len() {
                let value = Address::new(LittleEndian::read_u64(&data[offset..]));

                if value.is_aligned(Size::new(align)) && !value.is_null() && in_ranges(&ranges, value)
                {
                    let address = region.base().saturating_add(Size::new(offset as u64));
                    map.insert(address, value);
                }

                offset += step;
            }
        }

        PointerMap { map }
    }

    /// The pointer value held at the given address, if any.
    pub fn get(&self, address: Address) -> Option<Address> {
        self.map.get(&address).copied()
    }

    /// The number of pointer-holding locations.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// If the map is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{PointerIndex, PointerMap};
    use crate::{
        Address, AddressRange, ModuleTable, Protection, RegionInfo, RegionKind, Size, Snapshot,
        VirtualMemoryRegion,
    };
    use byteorder::{ByteOrder, LittleEndian};

    fn region(base: u64, size: u64) -> VirtualMemoryRegion {
        VirtualMemoryRegion {
            info: RegionInfo {
                range: AddressRange::new(Address::new(base), Size::new(size)),
                protection: Protection::rw(),
                kind: RegionKind::Private,
            },
            data: vec![0u8; size as usize],
        }
    }

    fn put_u64(region: &mut VirtualMemoryRegion, offset: usize, value: u64) {
        LittleEndian::write_u64(&mut region.data[offset..], value);
    }

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    fn fixture() -> (Snapshot, ModuleTable) {
        let mut module = region(0x400000, 0x1000);
        let mut heap = region(0x100_0000, 0x1000);

        put_u64(&mut module, 0x20, 0x100_0000);
        put_u64(&mut heap, 0x10, 0x100_0100);
        // unaligned value, must not be indexed
        put_u64(&mut heap, 0x30, 0x100_0102);
        // value outside every region, must not be indexed
        put_u64(&mut heap, 0x40, 0xDEAD_0000);

        let table = ModuleTable::new(vec![(
            "game.exe".to_string(),
            AddressRange::new(Address::new(0x400000), Size::new(0x1000)),
        )]);

        let snapshot = Snapshot {
            regions: vec![module, heap],
        };

        (snapshot, table)
    }

    #[test]
    fn test_build_and_static_tagging() {
        let (snapshot, table) = fixture();
        let index = PointerIndex::build(&pool(), &snapshot, &table, Size::new(4), None);

        assert_eq!(2, index.entries());

        let holders = index.holders_of(Address::new(0x100_0000)).unwrap();
        assert_eq!(1, holders.len());
        assert_eq!(Address::new(0x400020), holders[0].address);

        let static_ref = holders[0].static_ref.unwrap();
        assert_eq!(0, static_ref.module_index);
        assert_eq!(0x20, static_ref.offset);

        let holders = index.holders_of(Address::new(0x100_0100)).unwrap();
        assert!(holders[0].static_ref.is_none());
    }

    #[test]
    fn test_candidates_walk_down_from_target() {
        let (snapshot, table) = fixture();
        let index = PointerIndex::build(&pool(), &snapshot, &table, Size::new(4), None);

        let hits: Vec<_> = index
            .candidates(Address::new(0x100_0108), Size::new(0x1000))
            .map(|(value, _)| value)
            .collect();

        assert_eq!(
            vec![Address::new(0x100_0100), Address::new(0x100_0000)],
            hits
        );

        // a tight window excludes the farther value
        let hits: Vec<_> = index
            .candidates(Address::new(0x100_0108), Size::new(0x10))
            .map(|(value, _)| value)
            .collect();

        assert_eq!(vec![Address::new(0x100_0100)], hits);
    }

    #[test]
    fn test_pointer_map() {
        let (snapshot, _) = fixture();
        let map = PointerMap::build(&snapshot, Size::new(4));

        assert_eq!(2, map.len());
        assert_eq!(Some(Address::new(0x100_0000)), map.get(Address::new(0x400020)));
        assert_eq!(None, map.get(Address::new(0x400028)));
    }
}
