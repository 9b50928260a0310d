use crate::{Address, CompareKind, ScanType, Size};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse `{input}` as {ty}")]
    ParseOperand { input: String, ty: ScanType },
    #[error("`{0}` requires two operands, like `10-20`")]
    MissingSecondOperand(CompareKind),
    #[error("`{0}` takes no operand")]
    UnexpectedOperand(CompareKind),
    #[error("`{0}` requires a previously recorded value")]
    MissingInitialValue(CompareKind),
    #[error("bad type of scan operand, expected {expected}, got {actual}")]
    OperandType { expected: ScanType, actual: ScanType },
    #[error("process handle is no longer valid")]
    ProcessLost,
    #[error("add operation `{0} + {1}` overflowed")]
    Add(u64, u64),
    #[error("sub operation `{0} - {1}` underflowed")]
    Sub(u64, u64),
    #[error("address operation `{0} + {1}` overflowed")]
    AddressAdd(Address, Size),
    #[error("failed to convert number into address")]
    AddressConversion,
    #[error("failed to parse string as address")]
    AddressFromStr,
    #[error("failed to convert number into size")]
    SizeConversion,
    #[error("{field} value `{value}` does not fit the configured bound `{max}`")]
    FieldOverflow {
        field: &'static str,
        value: i64,
        max: u64,
    },
    #[error("level {0} exceeds the maximum supported level {1}")]
    LevelOverflow(usize, usize),
    #[error("invalid encoded offsets count {0}")]
    BadOffsetsCount(usize),
    #[error("layout bound `{0}` must be non-zero")]
    ZeroLayoutBound(&'static str),
    #[error("module index {0} out of range for a table of {1} modules")]
    BadModuleIndex(usize, usize),
    #[error("malformed variable-length field")]
    BadVarint,
    #[error("unexpected end of encoded stream")]
    UnexpectedEof,
    #[error("failed to write {0} bytes at {1}")]
    WriteMemory(usize, Address),
    #[error("I/O error")]
    Io(#[source] io::Error),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(error)
    }
}
