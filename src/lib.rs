//! A scanning engine over process memory snapshots: typed value-constraint
//! scans, a reverse pointer index, bounded discovery of static-to-target
//! pointer chains, and compact codecs for storing the chains found.
//!
//! The native capability for actually touching another process is consumed
//! through the [`MemorySource`] trait, so the engine itself is host-agnostic
//! and testable against synthetic memory.

mod address;
mod address_range;
mod codec;
mod constraint;
mod error;
mod module;
mod offset;
mod pointer;
mod pointer_index;
mod pointer_scan;
mod progress;
mod region;
mod scan;
mod session;
mod sign;
mod size;
mod source;
mod token;
mod ty;
mod value;

pub use self::address::Address;
pub use self::address_range::AddressRange;
pub use self::codec::{
    PointerBitLayout, PointerLayout, PointerReader, PointerVarintLayout, PointerWriter,
    MAX_SUPPORTED_LEVEL,
};
pub use self::constraint::{CompareKind, ScanConstraint};
pub use self::error::Error;
pub use self::module::{ModuleInfo, ModuleTable};
pub use self::offset::Offset;
pub use self::pointer::Pointer;
pub use self::pointer_index::{IndexEntry, PointerIndex, PointerMap, StaticRef};
pub use self::pointer_scan::{PointerScan, PointerScanOptions, PointerScanProgress};
pub use self::progress::ScanProgress;
pub use self::region::{
    Protection, RegionFilter, RegionInfo, RegionKind, Snapshot, VirtualMemoryRegion,
};
pub use self::scan::{MemorySegment, Scan};
pub use self::session::ScanSession;
pub use self::sign::Sign;
pub use self::size::Size;
pub use self::source::MemorySource;
pub use self::token::Token;
pub use self::ty::ScanType;
pub use self::value::Value;
