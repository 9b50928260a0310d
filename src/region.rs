use crate::{Address, AddressRange, MemorySource, Size};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Page protection of a memory region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Protection {
    /// Read-only protection.
    pub const fn r() -> Self {
        Self {
            read: true,
            write: false,
            execute: false,
        }
    }

    /// Read-write protection.
    pub const fn rw() -> Self {
        Self {
            read: true,
            write: true,
            execute: false,
        }
    }

    /// Read-execute protection.
    pub const fn rx() -> Self {
        Self {
            read: true,
            write: false,
            execute: true,
        }
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.read { 'r' } else { '-' };
        let w = if self.write { 'w' } else { '-' };
        let x = if self.execute { 'x' } else { '-' };
        write!(fmt, "{}{}{}", r, w, x)
    }
}

/// The backing of a memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    /// Private, committed memory such as heaps.
    Private,
    /// File-backed mappings.
    Mapped,
    /// Module images.
    Image,
}

/// Metadata for a single committed memory region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub range: AddressRange,
    pub protection: Protection,
    pub kind: RegionKind,
}

/// Which regions a snapshot or scan should take in.
#[derive(Debug, Default, Clone)]
pub struct RegionFilter {
    /// Only regions intersecting the given range.
    pub range: Option<AddressRange>,
    /// Only writable regions.
    pub writable_only: bool,
    /// Only regions of the given kind.
    pub kind: Option<RegionKind>,
}

impl RegionFilter {
    /// Test whether a region passes the filter.
    ///
    /// Unreadable regions never pass.
    pub fn accepts(&self, info: &RegionInfo) -> bool {
        if !info.protection.read {
            return false;
        }

        if self.writable_only && !info.protection.write {
            return false;
        }

        if let Some(kind) = self.kind {
            if info.kind != kind {
                return false;
            }
        }

        if let Some(range) = self.range {
            let end = info.range.base.saturating_add(info.range.size);
            let filter_end = range.base.saturating_add(range.size);

            if end <= range.base || filter_end <= info.range.base {
                return false;
            }
        }

        true
    }
}

/// A region and the bytes it held when the snapshot was taken.
#[derive(Debug, Clone)]
pub struct VirtualMemoryRegion {
    pub info: RegionInfo,
    pub data: Vec<u8>,
}

impl VirtualMemoryRegion {
    /// The base address of the region.
    pub fn base(&self) -> Address {
        self.info.range.base
    }

    /// The number of captured bytes.
    ///
    /// This can be shorter than the region if the read was truncated.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// If no bytes were captured.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A point-in-time capture of a process's readable memory.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Captured regions, sorted by base address.
    pub regions: Vec<VirtualMemoryRegion>,
}

impl Snapshot {
    /// Capture all regions passing the filter from the given source.
    ///
    /// Regions that vanish between enumeration and read are skipped.
    pub fn capture<S>(source: &S, filter: &RegionFilter) -> anyhow::Result<Snapshot>
    where
        S: MemorySource + ?Sized,
    {
        let mut regions = Vec::new();
        let mut bytes = Size::zero();

        for info in source.regions()? {
            if !filter.accepts(&info) {
                continue;
            }

            let mut data = vec![0u8; info.range.size.as_usize()];

            let read = match source.read_memory(info.range.base, &mut data)? {
                Some(read) => read,
                None => continue,
            };

            data.truncate(read);
            bytes.add_assign(Size::new(read as u64))?;
            regions.push(VirtualMemoryRegion { info, data });
        }

        regions.sort_by_key(|r| r.info.range.base);

        log::debug!(
            "captured {} regions totalling {} bytes",
            regions.len(),
            bytes
        );

        Ok(Snapshot { regions })
    }

    /// Test if any captured region contains the given address.
    pub fn contains(&self, address: Address) -> bool {
        AddressRange::find_in_range(&self.regions, |r| &r.info.range, address).is_some()
    }

    /// Find the captured region containing the given address.
    pub fn find_region(&self, address: Address) -> Option<&VirtualMemoryRegion> {
        AddressRange::find_in_range(&self.regions, |r| &r.info.range, address)
    }

    /// The sorted ranges of all captured regions.
    pub fn ranges(&self) -> Vec<AddressRange> {
        self.regions.iter().map(|r| r.info.range).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Protection, RegionFilter, RegionInfo, RegionKind};
    use crate::{Address, AddressRange, Size};

    fn info(base: u64, size: u64, protection: Protection, kind: RegionKind) -> RegionInfo {
        RegionInfo {
            range: AddressRange::new(Address::new(base), Size::new(size)),
            protection,
            kind,
        }
    }

    #[test]
    fn test_filter_protection() {
        let filter = RegionFilter {
            writable_only: true,
            ..RegionFilter::default()
        };

        assert!(filter.accepts(&info(0x1000, 0x100, Protection::rw(), RegionKind::Private)));
        assert!(!filter.accepts(&info(0x1000, 0x100, Protection::r(), RegionKind::Private)));
        assert!(!filter.accepts(&info(
            0x1000,
            0x100,
            Protection::default(),
            RegionKind::Private
        )));
    }

    #[test]
    fn test_filter_range() {
        let filter = RegionFilter {
            range: Some(AddressRange::new(Address::new(0x2000), Size::new(0x1000))),
            ..RegionFilter::default()
        };

        assert!(filter.accepts(&info(0x2800, 0x100, Protection::r(), RegionKind::Private)));
        assert!(filter.accepts(&info(0x1F00, 0x200, Protection::r(), RegionKind::Private)));
        assert!(!filter.accepts(&info(0x4000, 0x100, Protection::r(), RegionKind::Private)));
    }
}
