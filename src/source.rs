use crate::{Address, AddressRange, Error, RegionInfo};

/// The native memory capability consumed by the engine.
///
/// Implementations wrap whatever the platform offers for inspecting another
/// process: region enumeration, bulk reads into caller-provided buffers,
/// module and thread-stack resolution, and writes.
///
/// Reads against memory that has been unmapped since enumeration must report
/// `Ok(None)` rather than an error, so that scans can skip transient regions
/// and keep going. A dead process handle is the fatal case: report it as
/// [`Error::ProcessLost`] and the whole scan aborts.
pub trait MemorySource {
    /// Enumerate all committed memory regions.
    fn regions(&self) -> Result<Vec<RegionInfo>, Error>;

    /// Read memory at `address` into `buf`.
    ///
    /// Returns the number of bytes read, which may be shorter than `buf` at
    /// a region boundary, or `None` if the memory is gone.
    fn read_memory(&self, address: Address, buf: &mut [u8]) -> Result<Option<usize>, Error>;

    /// Enumerate loaded modules as named ranges, in a stable order.
    fn modules(&self) -> Result<Vec<(String, AddressRange)>, Error>;

    /// Resolve the stack range of the n:th thread, if there is one.
    fn thread_stack(&self, index: usize) -> Result<Option<AddressRange>, Error>;

    /// Write the given bytes at `address`.
    fn write_memory(&self, address: Address, data: &[u8]) -> Result<(), Error>;
}
