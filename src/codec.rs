//! Compact binary codecs for discovered pointer chains.
//!
//! Both layouts encode a chain as a fixed-size entry, so a stream of
//! entries stays seekable: entry `n` starts at byte `n * entry_size`. The
//! bit-packed layout derives exact field widths from configured bounds; the
//! varint layout stores 7-bit groups and sizes entries for the worst case.
//!
//! The module table is not part of the stream. Decoding against a different
//! table than the one encoded under is the caller's problem; the reader
//! only fail-fasts on module indexes its table cannot satisfy.

use crate::{Error, ModuleTable, Offset, Pointer};
use std::io::{self, Read, Write};

/// The deepest chain level any layout accepts.
pub const MAX_SUPPORTED_LEVEL: usize = 30;

/// A chain entry codec with a fixed per-entry size.
pub trait PointerLayout {
    /// The number of bytes every encoded entry occupies.
    fn entry_size(&self) -> usize;

    /// Encode a chain into the front of `buf`.
    ///
    /// `buf` must hold `entry_size` zeroed bytes.
    fn encode(&self, pointer: &Pointer, buf: &mut [u8]) -> Result<(), Error>;

    /// Decode one entry from the front of `buf`.
    ///
    /// The points-to address is not part of the format; decoded chains
    /// carry a null one.
    fn decode(&self, buf: &[u8]) -> Result<Pointer, Error>;
}

fn bits_for(value: u64) -> u32 {
    (64 - value.leading_zeros()).max(1)
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Shared bound validation and field accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    max_module_index: u64,
    max_base_offset: u64,
    max_level: usize,
    max_offset: u64,
}

impl Bounds {
    fn new(
        max_module_index: usize,
        max_base_offset: u64,
        max_level: usize,
        max_offset: u64,
    ) -> Result<Self, Error> {
        if max_level == 0 {
            return Err(Error::ZeroLayoutBound("max_level"));
        }

        if max_level > MAX_SUPPORTED_LEVEL {
            return Err(Error::LevelOverflow(max_level, MAX_SUPPORTED_LEVEL));
        }

        if max_offset == 0 {
            return Err(Error::ZeroLayoutBound("max_offset"));
        }

        Ok(Self {
            max_module_index: max_module_index as u64,
            max_base_offset,
            max_level,
            max_offset,
        })
    }

    /// The most hop offsets a chain may carry.
    fn max_count(&self) -> usize {
        self.max_level + 1
    }

    fn check(&self, pointer: &Pointer) -> Result<(), Error> {
        if pointer.base_offset.unsigned_abs() > self.max_base_offset {
            return Err(Error::FieldOverflow {
                field: "base offset",
                value: pointer.base_offset,
                max: self.max_base_offset,
            });
        }

        if pointer.module_index as u64 > self.max_module_index {
            return Err(Error::FieldOverflow {
                field: "module index",
                value: pointer.module_index as i64,
                max: self.max_module_index,
            });
        }

        let count = pointer.offsets.len();

        if count == 0 {
            return Err(Error::BadOffsetsCount(0));
        }

        if count > self.max_count() {
            return Err(Error::LevelOverflow(count - 1, self.max_level));
        }

        for offset in &pointer.offsets {
            let value = offset.as_i64();

            if value.unsigned_abs() > self.max_offset {
                return Err(Error::FieldOverflow {
                    field: "hop offset",
                    value,
                    max: self.max_offset,
                });
            }
        }

        Ok(())
    }

    fn check_count(&self, count: usize) -> Result<(), Error> {
        if count == 0 || count > self.max_count() {
            return Err(Error::BadOffsetsCount(count));
        }

        Ok(())
    }
}

fn write_bits(buf: &mut [u8], mut value: u64, bits: u32, pos: &mut usize) {
    let mut remaining = bits as usize;

    while remaining > 0 {
        let byte = *pos >> 3;
        let bit = *pos & 7;
        let take = (8 - bit).min(remaining);
        let mask = ((1u16 << take) - 1) as u8;

        buf[byte] |= ((value as u8) & mask) << bit;
        value >>= take;
        remaining -= take;
        *pos += take;
    }
}

fn read_bits(buf: &[u8], bits: u32, pos: &mut usize) -> u64 {
    let mut value = 0u64;
    let mut shift = 0usize;
    let mut remaining = bits as usize;

    while remaining > 0 {
        let byte = *pos >> 3;
        let bit = *pos & 7;
        let take = (8 - bit).min(remaining);
        let mask = ((1u16 << take) - 1) as u8;

        value |= u64::from((buf[byte] >> bit) & mask) << shift;
        shift += take;
        remaining -= take;
        *pos += take;
    }

    value
}

/// The bit-packed layout.
///
/// Field widths are exactly wide enough for the configured bounds: the base
/// offset magnitude plus an explicit sign bit, the module index, the offsets
/// count (up to `max_level + 1`), then `max_level + 1` zigzag hop offset
/// slots. Unused trailing slots stay zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerBitLayout {
    bounds: Bounds,
    bits_base_offset: u32,
    bits_module_index: u32,
    bits_count: u32,
    bits_offset: u32,
    entry_size: usize,
}

impl PointerBitLayout {
    pub fn new(
        max_module_index: usize,
        max_base_offset: u64,
        max_level: usize,
        max_offset: u64,
    ) -> Result<Self, Error> {
        let bounds = Bounds::new(max_module_index, max_base_offset, max_level, max_offset)?;

        let bits_base_offset = bits_for(max_base_offset);
        let bits_module_index = bits_for(bounds.max_module_index);
        let bits_count = bits_for(bounds.max_count() as u64);
        // zigzag doubles the magnitude range
        let bits_offset = bits_for(max_offset.saturating_mul(2));

        let total = bits_base_offset as usize
            + 1
            + bits_module_index as usize
            + bits_count as usize
            + bits_offset as usize * bounds.max_count();

        Ok(Self {
            bounds,
            bits_base_offset,
            bits_module_index,
            bits_count,
            bits_offset,
            entry_size: (total + 7) / 8,
        })
    }

    /// Derive a layout from a discovered chain set and the search bounds it
    /// came out of.
    pub fn from_observed(
        pointers: &[Pointer],
        max_level: usize,
        max_offset: u64,
    ) -> Result<Self, Error> {
        let (max_module_index, max_base_offset) = observed_bounds(pointers);
        Self::new(max_module_index, max_base_offset, max_level, max_offset)
    }

    /// The width of the hop offset field, in bits.
    pub fn offset_bits(&self) -> u32 {
        self.bits_offset
    }

    /// The width of the offsets count field, in bits.
    pub fn count_bits(&self) -> u32 {
        self.bits_count
    }
}

impl PointerLayout for PointerBitLayout {
    fn entry_size(&self) -> usize {
        self.entry_size
    }

    fn encode(&self, pointer: &Pointer, buf: &mut [u8]) -> Result<(), Error> {
        self.bounds.check(pointer)?;

        let mut pos = 0;

        write_bits(
            buf,
            pointer.base_offset.unsigned_abs(),
            self.bits_base_offset,
            &mut pos,
        );
        write_bits(buf, (pointer.base_offset < 0) as u64, 1, &mut pos);
        write_bits(
            buf,
            pointer.module_index as u64,
            self.bits_module_index,
            &mut pos,
        );
        write_bits(buf, pointer.offsets.len() as u64, self.bits_count, &mut pos);

        for offset in &pointer.offsets {
            write_bits(buf, zigzag(offset.as_i64()), self.bits_offset, &mut pos);
        }

        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<Pointer, Error> {
        if buf.len() < self.entry_size {
            return Err(Error::UnexpectedEof);
        }

        let mut pos = 0;

        let magnitude = read_bits(buf, self.bits_base_offset, &mut pos) as i64;
        let negative = read_bits(buf, 1, &mut pos) != 0;
        let module_index = read_bits(buf, self.bits_module_index, &mut pos) as usize;
        let count = read_bits(buf, self.bits_count, &mut pos) as usize;

        self.bounds.check_count(count)?;

        let mut offsets = Vec::with_capacity(count);

        for _ in 0..count {
            let raw = read_bits(buf, self.bits_offset, &mut pos);
            offsets.push(Offset::from_i64(unzigzag(raw)));
        }

        Ok(Pointer {
            module_index,
            base_offset: if negative { -magnitude } else { magnitude },
            offsets,
            points_to: crate::Address::null(),
        })
    }
}

/// The largest module index and base offset magnitude in a chain set.
fn observed_bounds(pointers: &[Pointer]) -> (usize, u64) {
    let mut max_module_index = 0;
    let mut max_base_offset = 0;

    for p in pointers {
        max_module_index = max_module_index.max(p.module_index);
        max_base_offset = max_base_offset.max(p.base_offset.unsigned_abs());
    }

    (max_module_index, max_base_offset)
}

fn varint_len(value: u64) -> usize {
    (bits_for(value) as usize + 6) / 7
}

fn write_varint(buf: &mut [u8], pos: &mut usize, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;

        if value == 0 {
            buf[*pos] = byte;
            *pos += 1;
            return;
        }

        buf[*pos] = byte | 0x80;
        *pos += 1;
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, Error> {
    let mut value = 0u64;
    let mut shift = 0u32;

    loop {
        let byte = *buf.get(*pos).ok_or(Error::UnexpectedEof)?;
        *pos += 1;

        if shift == 63 && (byte & 0x7F) > 1 {
            return Err(Error::BadVarint);
        }

        value |= u64::from(byte & 0x7F) << shift;

        if byte & 0x80 == 0 {
            return Ok(value);
        }

        shift += 7;

        if shift > 63 {
            return Err(Error::BadVarint);
        }
    }
}

/// The 7-bit-group layout.
///
/// Every field is a varint, with signed fields zigzag-mapped first. Entries
/// are padded to the worst-case size under the configured bounds so the
/// stream stays seekable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerVarintLayout {
    bounds: Bounds,
    entry_size: usize,
}

impl PointerVarintLayout {
    /// Derive a layout from a discovered chain set and the search bounds it
    /// came out of.
    pub fn from_observed(
        pointers: &[Pointer],
        max_level: usize,
        max_offset: u64,
    ) -> Result<Self, Error> {
        let (max_module_index, max_base_offset) = observed_bounds(pointers);
        Self::new(max_module_index, max_base_offset, max_level, max_offset)
    }

    pub fn new(
        max_module_index: usize,
        max_base_offset: u64,
        max_level: usize,
        max_offset: u64,
    ) -> Result<Self, Error> {
        let bounds = Bounds::new(max_module_index, max_base_offset, max_level, max_offset)?;

        let entry_size = varint_len(max_base_offset.saturating_mul(2))
            + varint_len(bounds.max_module_index)
            + varint_len(bounds.max_count() as u64)
            + bounds.max_count() * varint_len(max_offset.saturating_mul(2));

        Ok(Self { bounds, entry_size })
    }
}

impl PointerLayout for PointerVarintLayout {
    fn entry_size(&self) -> usize {
        self.entry_size
    }

    fn encode(&self, pointer: &Pointer, buf: &mut [u8]) -> Result<(), Error> {
        self.bounds.check(pointer)?;

        let mut pos = 0;

        write_varint(buf, &mut pos, zigzag(pointer.base_offset));
        write_varint(buf, &mut pos, pointer.module_index as u64);
        write_varint(buf, &mut pos, pointer.offsets.len() as u64);

        for offset in &pointer.offsets {
            write_varint(buf, &mut pos, zigzag(offset.as_i64()));
        }

        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<Pointer, Error> {
        if buf.len() < self.entry_size {
            return Err(Error::UnexpectedEof);
        }

        let mut pos = 0;

        let base_offset = unzigzag(read_varint(buf, &mut pos)?);
        let module_index = read_varint(buf, &mut pos)? as usize;
        let count = read_varint(buf, &mut pos)? as usize;

        self.bounds.check_count(count)?;

        let mut offsets = Vec::with_capacity(count);

        for _ in 0..count {
            offsets.push(Offset::from_i64(unzigzag(read_varint(buf, &mut pos)?)));
        }

        Ok(Pointer {
            module_index,
            base_offset,
            offsets,
            points_to: crate::Address::null(),
        })
    }
}

/// Streams chains out as fixed-size entries.
pub struct PointerWriter<W, L> {
    inner: W,
    layout: L,
    buf: Vec<u8>,
}

impl<W, L> PointerWriter<W, L>
where
    W: Write,
    L: PointerLayout,
{
    pub fn new(inner: W, layout: L) -> Self {
        let buf = vec![0u8; layout.entry_size()];

        Self { inner, layout, buf }
    }

    /// Encode and write one chain.
    pub fn write(&mut self, pointer: &Pointer) -> Result<(), Error> {
        for b in &mut self.buf {
            *b = 0;
        }

        self.layout.encode(pointer, &mut self.buf)?;
        self.inner.write_all(&self.buf)?;
        Ok(())
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Streams chains back in, validating module indexes against a table.
pub struct PointerReader<'t, R, L> {
    inner: R,
    layout: L,
    table: &'t ModuleTable,
    buf: Vec<u8>,
}

impl<'t, R, L> PointerReader<'t, R, L>
where
    R: Read,
    L: PointerLayout,
{
    pub fn new(inner: R, layout: L, table: &'t ModuleTable) -> Self {
        let buf = vec![0u8; layout.entry_size()];

        Self {
            inner,
            layout,
            table,
            buf,
        }
    }

    /// Read the next chain, or `None` at a clean end of stream.
    ///
    /// A stream ending in the middle of an entry is an error, as is an
    /// entry naming a module the table does not have.
    pub fn read(&mut self) -> Result<Option<Pointer>, Error> {
        let len = self.buf.len();
        let mut total = 0usize;

        while total < len {
            let read = match self.inner.read(&mut self.buf[total..]) {
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if read == 0 {
                break;
            }

            total += read;
        }

        if total == 0 {
            return Ok(None);
        }

        if total < len {
            return Err(Error::UnexpectedEof);
        }

        let pointer = self.layout.decode(&self.buf)?;
        self.table.get(pointer.module_index)?;
        Ok(Some(pointer))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PointerBitLayout, PointerLayout, PointerReader, PointerVarintLayout, PointerWriter,
        MAX_SUPPORTED_LEVEL,
    };
    use crate::{Address, AddressRange, Error, ModuleTable, Offset, Pointer, Size};

    fn table(modules: usize) -> ModuleTable {
        ModuleTable::new((0..modules).map(|n| {
            (
                format!("module{}.dll", n),
                AddressRange::new(Address::new(0x40_0000 + n as u64 * 0x10000), Size::new(0x1000)),
            )
        }))
    }

    fn chain(module_index: usize, base_offset: i64, offsets: &[i64]) -> Pointer {
        Pointer {
            module_index,
            base_offset,
            offsets: offsets.iter().copied().map(Offset::from_i64).collect(),
            points_to: Address::null(),
        }
    }

    fn roundtrip(layout: impl PointerLayout + Copy, chains: &[Pointer]) {
        let table = table(16);
        let mut writer = PointerWriter::new(Vec::new(), layout);

        for c in chains {
            writer.write(c).unwrap();
        }

        let encoded = writer.into_inner();
        assert_eq!(chains.len() * layout.entry_size(), encoded.len());

        let mut reader = PointerReader::new(&encoded[..], layout, &table);
        let mut decoded = Vec::new();

        while let Some(p) = reader.read().unwrap() {
            decoded.push(p);
        }

        assert_eq!(chains.len(), decoded.len());

        for (a, b) in chains.iter().zip(&decoded) {
            assert_eq!(a.module_index, b.module_index);
            assert_eq!(a.base_offset, b.base_offset);
            assert_eq!(a.offsets, b.offsets);
            assert!(b.points_to.is_null());
        }
    }

    fn sample_chains() -> Vec<Pointer> {
        vec![
            chain(0, 0x20, &[0x18, 0, 0x18, 0x10]),
            chain(10, -0x800, &[0x1000]),
            chain(3, 0, &[0, 0, 0, 0, 0]),
            chain(15, 0xFFF, &[0x4, -0x1000, 0x81, 0xFFC]),
        ]
    }

    #[test]
    fn test_bit_layout_widths() {
        let layout = PointerBitLayout::new(10, 0x1000, 4, 0x1000).unwrap();

        // count field covers max_level + 1 without wrapping
        assert_eq!(3, layout.count_bits());
        // hop field covers the zigzag of +/-0x1000
        assert_eq!(14, layout.offset_bits());
        // 13 + 1 + 4 + 3 + 5 * 14 = 91 bits
        assert_eq!(12, layout.entry_size());
    }

    #[test]
    fn test_varint_layout_entry_size() {
        let layout = PointerVarintLayout::new(10, 0x1000, 4, 0x1000).unwrap();

        // 2 (base) + 1 (module) + 1 (count) + 5 * 2 (hops)
        assert_eq!(14, layout.entry_size());
    }

    #[test]
    fn test_bit_roundtrip() {
        let layout = PointerBitLayout::new(15, 0x1000, 5, 0x1000).unwrap();
        roundtrip(layout, &sample_chains());
    }

    #[test]
    fn test_varint_roundtrip() {
        let layout = PointerVarintLayout::new(15, 0x1000, 5, 0x1000).unwrap();
        roundtrip(layout, &sample_chains());
    }

    #[test]
    fn test_max_supported_level_roundtrips() {
        let offsets: Vec<i64> = (0..=MAX_SUPPORTED_LEVEL as i64).collect();

        let layout = PointerBitLayout::new(0, 0x100, MAX_SUPPORTED_LEVEL, 0x100).unwrap();
        roundtrip(layout, &[chain(0, 0x10, &offsets)]);

        let layout = PointerVarintLayout::new(0, 0x100, MAX_SUPPORTED_LEVEL, 0x100).unwrap();
        roundtrip(layout, &[chain(0, 0x10, &offsets)]);
    }

    #[test]
    fn test_from_observed() {
        let chains = sample_chains();

        let layout = PointerBitLayout::from_observed(&chains, 5, 0x1000).unwrap();
        roundtrip(layout, &chains);

        let layout = PointerVarintLayout::from_observed(&chains, 5, 0x1000).unwrap();
        roundtrip(layout, &chains);
    }

    #[test]
    fn test_bound_validation() {
        assert!(matches!(
            PointerBitLayout::new(0, 0x100, 0, 0x100),
            Err(Error::ZeroLayoutBound("max_level"))
        ));
        assert!(matches!(
            PointerVarintLayout::new(0, 0x100, 2, 0),
            Err(Error::ZeroLayoutBound("max_offset"))
        ));
        assert!(matches!(
            PointerBitLayout::new(0, 0x100, MAX_SUPPORTED_LEVEL + 1, 0x100),
            Err(Error::LevelOverflow(..))
        ));
    }

    #[test]
    fn test_encode_rejects_out_of_bounds() {
        let layout = PointerBitLayout::new(3, 0x100, 2, 0x40).unwrap();
        let mut buf = vec![0u8; layout.entry_size()];

        let too_far = chain(0, 0, &[0x41]);
        assert!(matches!(
            layout.encode(&too_far, &mut buf),
            Err(Error::FieldOverflow { field: "hop offset", .. })
        ));

        let too_deep = chain(0, 0, &[1, 2, 3, 4]);
        assert!(matches!(
            layout.encode(&too_deep, &mut buf),
            Err(Error::LevelOverflow(3, 2))
        ));

        let bad_module = chain(4, 0, &[1]);
        assert!(matches!(
            layout.encode(&bad_module, &mut buf),
            Err(Error::FieldOverflow { field: "module index", .. })
        ));

        let big_base = chain(0, 0x101, &[1]);
        assert!(matches!(
            layout.encode(&big_base, &mut buf),
            Err(Error::FieldOverflow { field: "base offset", .. })
        ));

        let empty = chain(0, 0, &[]);
        assert!(matches!(
            layout.encode(&empty, &mut buf),
            Err(Error::BadOffsetsCount(0))
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let layout = PointerVarintLayout::new(3, 0x100, 2, 0x40).unwrap();
        let table = table(4);

        let mut writer = PointerWriter::new(Vec::new(), layout);
        writer.write(&chain(1, 0x10, &[0x8, 0x10])).unwrap();
        let mut encoded = writer.into_inner();
        encoded.truncate(encoded.len() - 1);

        let mut reader = PointerReader::new(&encoded[..], layout, &table);
        assert!(matches!(reader.read(), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn test_read_retries_after_interrupt() {
        use std::io::{self, Read};

        /// Fails every other read with `Interrupted`.
        struct Flaky<R> {
            inner: R,
            interrupt: bool,
        }

        impl<R: Read> Read for Flaky<R> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.interrupt = !self.interrupt;

                if self.interrupt {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
                }

                self.inner.read(buf)
            }
        }

        let layout = PointerVarintLayout::new(3, 0x100, 2, 0x40).unwrap();
        let table = table(4);

        let mut writer = PointerWriter::new(Vec::new(), layout);
        writer.write(&chain(1, 0x10, &[0x8, 0x10])).unwrap();
        let encoded = writer.into_inner();

        let flaky = Flaky {
            inner: &encoded[..],
            interrupt: false,
        };

        let mut reader = PointerReader::new(flaky, layout, &table);

        let decoded = reader.read().unwrap().unwrap();
        assert_eq!(1, decoded.module_index);
        assert_eq!(0x10, decoded.base_offset);
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_module() {
        let layout = PointerBitLayout::new(15, 0x100, 2, 0x40).unwrap();
        // the layout admits indexes the table does not have
        let table = table(2);

        let mut writer = PointerWriter::new(Vec::new(), layout);
        writer.write(&chain(7, 0x10, &[0x8])).unwrap();
        let encoded = writer.into_inner();

        let mut reader = PointerReader::new(&encoded[..], layout, &table);
        assert!(matches!(
            reader.read(),
            Err(Error::BadModuleIndex(7, 2))
        ));
    }
}
