//! The value-constraint comparator over captured memory.

use crate::progress::Reporter;
use crate::{
    Address, CompareKind, Error, MemorySource, ScanConstraint, ScanProgress, ScanType, Size,
    Snapshot, Token, Value, VirtualMemoryRegion,
};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;

/// One matching location, with the value first observed there and the value
/// most recently observed there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySegment {
    /// Base address of the region the match was found in.
    pub base: Address,
    /// Byte offset of the match within the region.
    pub offset: usize,
    pub initial: Value,
    pub current: Value,
}

impl MemorySegment {
    /// The absolute address of the match.
    pub fn address(&self) -> Address {
        self.base.saturating_add(Size::new(self.offset as u64))
    }

    /// The type of the matched value.
    pub fn ty(&self) -> ScanType {
        self.current.ty()
    }
}

impl fmt::Display for MemorySegment {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "{} = {} (was {})",
            self.address(),
            self.current,
            self.initial
        )
    }
}

/// An in-progress scan and its current result set.
#[derive(Clone)]
pub struct Scan {
    thread_pool: Arc<rayon::ThreadPool>,
    pub results: Vec<MemorySegment>,
    /// If no first pass has populated the results yet.
    pub initial: bool,
}

impl Scan {
    /// Construct a new scan against the given thread pool.
    pub fn new(thread_pool: &Arc<rayon::ThreadPool>) -> Self {
        Self {
            thread_pool: thread_pool.clone(),
            results: Vec::new(),
            initial: true,
        }
    }

    /// Run the first pass over a snapshot, populating the results.
    ///
    /// Regions are scanned in parallel, fanning in over a channel drained on
    /// the calling thread so every pool worker is free to scan. Cancellation
    /// is honored at region boundaries and leaves the results populated with
    /// whatever regions completed.
    pub fn initial_scan(
        &mut self,
        snapshot: &Snapshot,
        constraint: &ScanConstraint,
        cancel: Option<&Token>,
        progress: impl ScanProgress,
    ) -> anyhow::Result<()> {
        if constraint.kind.requires_initial() {
            return Err(Error::MissingInitialValue(constraint.kind).into());
        }

        let total: u64 = snapshot.regions.iter().map(|r| r.data.len() as u64).sum();

        let mut reporter = Reporter::new(progress, cancel, total);
        reporter.start();

        let mut results = Vec::new();

        self.thread_pool.in_place_scope(|s| {
            let (tx, rx) = mpsc::channel::<(u64, Vec<MemorySegment>)>();

            for region in &snapshot.regions {
                let tx = tx.clone();

                s.spawn(move |_| {
                    let bytes = region.data.len() as u64;

                    let hits = if cancel.map(Token::is_set).unwrap_or(false) {
                        Vec::new()
                    } else {
                        scan_region(region, constraint)
                    };

                    tx.send((bytes, hits)).expect("channel send failed");
                });
            }

            drop(tx);

            while let Ok((bytes, hits)) = rx.recv() {
                reporter.tick(bytes, hits.len() as u64);
                results.extend(hits);
            }
        });

        results.sort_by_key(|s| (s.base, s.offset));

        log::info!(
            "initial scan over {} regions found {} results",
            snapshot.regions.len(),
            results.len()
        );

        self.results = results;
        self.initial = false;
        reporter.done()
    }

    /// Narrow the results by re-reading each surviving location.
    ///
    /// Locations whose memory is gone are dropped. The previously observed
    /// value is what delta relations compare against, and survivors have
    /// their current value updated.
    pub fn rescan<S>(
        &mut self,
        source: &S,
        constraint: &ScanConstraint,
        cancel: Option<&Token>,
        progress: impl ScanProgress,
    ) -> anyhow::Result<()>
    where
        S: MemorySource + ?Sized,
    {
        let size = constraint.ty.size();

        if let Some(first) = self.results.first() {
            if first.ty() != constraint.ty {
                return Err(Error::OperandType {
                    expected: first.ty(),
                    actual: constraint.ty,
                }
                .into());
            }
        }

        let total = self.results.len() as u64 * size as u64;
        let mut reporter = Reporter::new(progress, cancel, total);
        reporter.start();

        let mut buf = vec![0u8; size];
        let mut kept = Vec::with_capacity(self.results.len());

        for segment in self.results.drain(..) {
            if cancel.map(Token::is_set).unwrap_or(false) {
                break;
            }

            if let Some(read) = source.read_memory(segment.address(), &mut buf)? {
                if read == size {
                    let current = constraint.ty.decode(&buf);

                    if constraint.matches_next(&current, &segment.current) {
                        kept.push(MemorySegment { current, ..segment });
                        reporter.tick(size as u64, 1);
                        continue;
                    }
                }
            }

            reporter.tick(size as u64, 0);
        }

        log::info!("narrowed to {} results", kept.len());

        self.results = kept;
        reporter.done()
    }
}

/// A value that the typed scan loops can decode and compare directly.
trait Scannable: Copy + PartialEq + PartialOrd {
    const SIZE: usize;

    /// If equality can be tested on the raw bytes. False for floats, where
    /// `-0.0 == 0.0` but the encodings differ.
    const BYTEWISE_EQ: bool;

    fn decode(buf: &[u8]) -> Self;

    fn encode(self, buf: &mut [u8]);

    fn into_value(self) -> Value;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! scannable {
    ($ty:ty, $variant:ident, $read:ident, $write:ident, $bytewise:expr) => {
        impl Scannable for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();
            const BYTEWISE_EQ: bool = $bytewise;

            fn decode(buf: &[u8]) -> Self {
                LittleEndian::$read(buf)
            }

            fn encode(self, buf: &mut [u8]) {
                LittleEndian::$write(buf, self)
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

scannable!(u16, U16, read_u16, write_u16, true);
scannable!(u32, U32, read_u32, write_u32, true);
scannable!(u64, U64, read_u64, write_u64, true);
scannable!(i16, I16, read_i16, write_i16, true);
scannable!(i32, I32, read_i32, write_i32, true);
scannable!(i64, I64, read_i64, write_i64, true);
scannable!(f32, F32, read_f32, write_f32, false);
scannable!(f64, F64, read_f64, write_f64, false);

fn scan_region(region: &VirtualMemoryRegion, constraint: &ScanConstraint) -> Vec<MemorySegment> {
    match constraint.ty {
        ScanType::U16 => scan_region_typed::<u16>(region, constraint),
        ScanType::U32 => scan_region_typed::<u32>(region, constraint),
        ScanType::U64 => scan_region_typed::<u64>(region, constraint),
        ScanType::I16 => scan_region_typed::<i16>(region, constraint),
        ScanType::I32 => scan_region_typed::<i32>(region, constraint),
        ScanType::I64 => scan_region_typed::<i64>(region, constraint),
        ScanType::F32 => scan_region_typed::<f32>(region, constraint),
        ScanType::F64 => scan_region_typed::<f64>(region, constraint),
    }
}

fn scan_region_typed<T>(
    region: &VirtualMemoryRegion,
    constraint: &ScanConstraint,
) -> Vec<MemorySegment>
where
    T: Scannable,
{
    let data = &region.data[..];

    let operand = constraint.operand().and_then(T::from_value);

    let hits = match (constraint.kind, operand) {
        (CompareKind::Exact, Some(v)) if T::BYTEWISE_EQ => exact_matches(data, v),
        (CompareKind::Exact, Some(v)) => block_matches(data, |x: T| x == v),
        (CompareKind::SmallerThan, Some(v)) => block_matches(data, |x: T| x < v),
        (CompareKind::BiggerThan, Some(v)) => block_matches(data, |x: T| x > v),
        (CompareKind::Between, Some(low)) => {
            // validated at construction, so the upper bound is present
            match constraint.second().and_then(T::from_value) {
                Some(high) => block_matches(data, |x: T| x >= low && x <= high),
                None => Vec::new(),
            }
        }
        (CompareKind::UnknownInitial, _) => every_value(data),
        _ => Vec::new(),
    };

    hits.into_iter()
        .map(|(offset, v)| MemorySegment {
            base: region.base(),
            offset,
            initial: v.into_value(),
            current: v.into_value(),
        })
        .collect()
}

/// Exact matching runs over candidate positions found by a byte search
/// instead of decoding every aligned value.
fn exact_matches<T>(data: &[u8], value: T) -> Vec<(usize, T)>
where
    T: Scannable,
{
    let mut needle = [0u8; 8];
    value.encode(&mut needle[..T::SIZE]);

    let mut out = Vec::new();

    for pos in memchr::memchr_iter(needle[0], data) {
        if pos % T::SIZE != 0 {
            continue;
        }

        if pos + T::SIZE > data.len() {
            break;
        }

        if data[pos..pos + T::SIZE] == needle[..T::SIZE] {
            out.push((pos, value));
        }
    }

    out
}

const BLOCK: usize = 16;

/// Relational matching decodes a full block of lanes at a time and collects
/// the match mask, with a scalar loop over the remainder.
fn block_matches<T, F>(data: &[u8], pred: F) -> Vec<(usize, T)>
where
    T: Scannable,
    F: Fn(T) -> bool,
{
    let lanes = BLOCK / T::SIZE;
    let mut out = Vec::new();
    let mut offset = 0;

    while offset + BLOCK <= data.len() {
        let window = &data[offset..offset + BLOCK];
        let mut mask = 0u32;

        for lane in 0..lanes {
            let v = T::decode(&window[lane * T::SIZE..]);

            if pred(v) {
                mask |= 1 << lane;
            }
        }

        while mask != 0 {
            let lane = mask.trailing_zeros() as usize;
            mask &= mask - 1;

            let pos = offset + lane * T::SIZE;
            out.push((pos, T::decode(&data[pos..])));
        }

        offset += BLOCK;
    }

    while offset + T::SIZE <= data.len() {
        let v = T::decode(&data[offset..]);

        if pred(v) {
            out.push((offset, v));
        }

        offset += T::SIZE;
    }

    out
}

/// Record every aligned value, for unknown-initial scans.
fn every_value<T>(data: &[u8]) -> Vec<(usize, T)>
where
    T: Scannable,
{
    let mut out = Vec::with_capacity(data.len() / T::SIZE);
    let mut offset = 0;

    while offset + T::SIZE <= data.len() {
        out.push((offset, T::decode(&data[offset..])));
        offset += T::SIZE;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{block_matches, exact_matches, scan_region, Scan};
    use crate::{
        Address, AddressRange, CompareKind, Protection, RegionInfo, RegionKind, ScanConstraint,
        ScanType, Size, Snapshot, Token, Value, VirtualMemoryRegion,
    };
    use byteorder::{ByteOrder, LittleEndian};
    use std::sync::Arc;

    fn region_of(base: u64, data: Vec<u8>) -> VirtualMemoryRegion {
        VirtualMemoryRegion {
            info: RegionInfo {
                range: AddressRange::new(Address::new(base), Size::new(data.len() as u64)),
                protection: Protection::rw(),
                kind: RegionKind::Private,
            },
            data,
        }
    }

    fn region_of_i32(base: u64, values: &[i32]) -> VirtualMemoryRegion {
        let mut data = vec![0u8; values.len() * 4];

        for (i, v) in values.iter().enumerate() {
            LittleEndian::write_i32(&mut data[i * 4..], *v);
        }

        region_of(base, data)
    }

    fn region_of_f32(base: u64, values: &[f32]) -> VirtualMemoryRegion {
        let mut data = vec![0u8; values.len() * 4];

        for (i, v) in values.iter().enumerate() {
            LittleEndian::write_f32(&mut data[i * 4..], *v);
        }

        region_of(base, data)
    }

    fn values_with_plants() -> Vec<i32> {
        // 32 values, four of them exactly 5
        let mut values = vec![0i32; 32];
        values[0] = 5;
        values[7] = 5;
        values[8] = -3;
        values[15] = 100;
        values[16] = 5;
        values[30] = 5;
        values[31] = 7;
        values
    }

    #[test]
    fn test_exact_matches() {
        let region = region_of_i32(0x1000, &values_with_plants());
        let constraint = ScanConstraint::new(CompareKind::Exact, ScanType::I32, "5").unwrap();

        let hits = scan_region(&region, &constraint);

        assert_eq!(4, hits.len());
        assert_eq!(
            vec![0x1000, 0x101C, 0x1040, 0x1078],
            hits.iter()
                .map(|h| h.address().into_inner())
                .collect::<Vec<_>>()
        );
        assert!(hits.iter().all(|h| h.current == Value::I32(5)));
    }

    #[test]
    fn test_relational_matches() {
        let region = region_of_i32(0x1000, &values_with_plants());

        let smaller = ScanConstraint::new(CompareKind::SmallerThan, ScanType::I32, "5").unwrap();
        let hits = scan_region(&region, &smaller);
        // 25 zeros and one -3
        assert_eq!(26, hits.len());

        let bigger = ScanConstraint::new(CompareKind::BiggerThan, ScanType::I32, "5").unwrap();
        let hits = scan_region(&region, &bigger);
        assert_eq!(2, hits.len());
        assert_eq!(Value::I32(100), hits[0].current);
        assert_eq!(Value::I32(7), hits[1].current);
    }

    #[test]
    fn test_between_and_unknown() {
        let region = region_of_i32(0x1000, &values_with_plants());

        let between = ScanConstraint::new(CompareKind::Between, ScanType::I32, "5-10").unwrap();
        let hits = scan_region(&region, &between);
        assert_eq!(5, hits.len());

        let unknown = ScanConstraint::new(CompareKind::UnknownInitial, ScanType::I32, "").unwrap();
        let hits = scan_region(&region, &unknown);
        assert_eq!(32, hits.len());
    }

    #[test]
    fn test_exact_float_matches_negative_zero() {
        let region = region_of_f32(0x1000, &[1.0, -0.0, 0.0, 3.5]);
        let constraint = ScanConstraint::new(CompareKind::Exact, ScanType::F32, "0").unwrap();

        let hits = scan_region(&region, &constraint);

        assert_eq!(
            vec![4, 8],
            hits.iter().map(|h| h.offset).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_cancelled_initial_scan_keeps_partial_results() {
        let snapshot = Snapshot {
            regions: vec![region_of_i32(0x1000, &values_with_plants())],
        };

        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(2)
                .build()
                .unwrap(),
        );

        let cancel = Token::new();
        cancel.set();

        let constraint = ScanConstraint::new(CompareKind::Exact, ScanType::I32, "5").unwrap();
        let mut scan = Scan::new(&pool);
        scan.initial_scan(&snapshot, &constraint, Some(&cancel), ())
            .unwrap();

        // regions seen after the cancel contribute nothing
        assert!(scan.results.is_empty());
        assert!(!scan.initial);
    }

    #[test]
    fn test_unaligned_occurrence_is_skipped() {
        // the bytes of 5i32 occur at offset 2, which is not 4-aligned
        let data = vec![0, 0, 5, 0, 0, 0, 0, 0];
        let hits = exact_matches::<i32>(&data, 5);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_block_remainder() {
        // 5 values, so one 16-byte block plus a 4-byte tail
        let mut data = vec![0u8; 20];
        LittleEndian::write_i32(&mut data[16..], 9);

        let hits = block_matches::<i32, _>(&data, |x| x > 0);
        assert_eq!(vec![(16, 9)], hits);
    }
}
