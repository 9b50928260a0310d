//! A stateful scanning session against one memory source.

use crate::pointer_index::{PointerIndex, PointerMap};
use crate::{
    Address, Error, MemorySource, ModuleTable, Pointer, PointerScan, PointerScanOptions,
    PointerScanProgress, RegionFilter, Scan, ScanConstraint, ScanProgress, Snapshot, Token, Value,
};
use std::sync::Arc;

/// Owns the memory source, the worker pool, and the module table for the
/// duration of a session.
///
/// Module (and thread-stack pseudo-module) indexes handed out by discovery
/// stay stable for the session, which is what makes stored chains and the
/// codec's module indexes meaningful. All mutation goes through `&mut self`,
/// so writes serialize against in-flight scans.
pub struct ScanSession<S> {
    source: S,
    thread_pool: Arc<rayon::ThreadPool>,
    table: ModuleTable,
}

impl<S> ScanSession<S>
where
    S: MemorySource,
{
    /// Construct a session with one worker per logical CPU.
    pub fn new(source: S) -> anyhow::Result<Self> {
        Self::with_parallelism(source, num_cpus::get())
    }

    /// Construct a session with the given number of workers.
    pub fn with_parallelism(source: S, threads: usize) -> anyhow::Result<Self> {
        let thread_pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads.max(1))
                .build()?,
        );

        let table = ModuleTable::new(source.modules()?);

        Ok(Self {
            source,
            thread_pool,
            table,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn modules(&self) -> &ModuleTable {
        &self.table
    }

    /// Re-enumerate modules, discarding any thread-stack pseudo-modules.
    pub fn refresh_modules(&mut self) -> Result<(), Error> {
        self.table = ModuleTable::new(self.source.modules()?);
        Ok(())
    }

    /// Snapshot and run the first pass of a value scan.
    pub fn scan_first(
        &mut self,
        constraint: &ScanConstraint,
        cancel: Option<&Token>,
        progress: impl ScanProgress,
    ) -> anyhow::Result<Scan> {
        let snapshot = Snapshot::capture(&self.source, &constraint.filter)?;

        let mut scan = Scan::new(&self.thread_pool);
        scan.initial_scan(&snapshot, constraint, cancel, progress)?;
        Ok(scan)
    }

    /// Narrow an existing scan by re-reading live memory.
    pub fn scan_next(
        &mut self,
        scan: &mut Scan,
        constraint: &ScanConstraint,
        cancel: Option<&Token>,
        progress: impl ScanProgress,
    ) -> anyhow::Result<()> {
        scan.rescan(&self.source, constraint, cancel, progress)
    }

    /// Discover pointer chains onto `target`.
    ///
    /// Re-enumerates modules, appends the configured number of thread
    /// stacks as pseudo-modules, snapshots pointer-holding memory, builds
    /// the reverse index, and runs the bounded search. The extended module
    /// table sticks around so chain indexes resolve for the session.
    pub fn discover_pointers(
        &mut self,
        target: Address,
        opts: &PointerScanOptions,
        cancel: Option<&Token>,
        progress: impl PointerScanProgress,
    ) -> anyhow::Result<Vec<Pointer>> {
        self.refresh_modules()?;
        let mut table = self.table.clone();

        for n in 0..opts.thread_stacks {
            match self.source.thread_stack(n)? {
                Some(range) => {
                    table.push_stack(n, range);
                }
                None => break,
            }
        }

        let snapshot = Snapshot::capture(&self.source, &self.pointer_filter(opts))?;
        let index = PointerIndex::build(&self.thread_pool, &snapshot, &table, opts.alignment, cancel);

        let scan = PointerScan::new(&index, opts);
        let results = scan.scan(&self.thread_pool, target, cancel, progress)?;

        self.table = table;
        Ok(results)
    }

    /// Check which stored chains still resolve onto `new_target`.
    ///
    /// Cheap compared to discovery: one snapshot, one forward pointer map,
    /// and a parallel walk over the stored chains.
    pub fn rescan_pointers(
        &mut self,
        pointers: Vec<Pointer>,
        opts: &PointerScanOptions,
        new_target: Address,
    ) -> anyhow::Result<Vec<Pointer>> {
        let snapshot = Snapshot::capture(&self.source, &self.pointer_filter(opts))?;
        let map = PointerMap::build(&snapshot, opts.alignment);

        Ok(PointerScan::rescan(
            &self.thread_pool,
            pointers,
            &self.table,
            &map,
            new_target,
        ))
    }

    /// Encode a typed value and write it into the source.
    pub fn write_value(&mut self, address: Address, value: &Value) -> Result<(), Error> {
        let mut buf = [0u8; 8];
        let size = value.size();
        value.encode(&mut buf[..size]);
        self.source.write_memory(address, &buf[..size])
    }

    fn pointer_filter(&self, opts: &PointerScanOptions) -> RegionFilter {
        RegionFilter {
            writable_only: !opts.include_readonly,
            ..RegionFilter::default()
        }
    }
}
