//! Loader error types

use core::fmt;

/// Reason a program-header entry was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFault {
    /// `offset + filesz` overflows
    FileRangeOverflow,
    /// Segment data extends beyond the image
    FileRangeOutOfBounds,
    /// Memory size smaller than file size
    MemSizeBelowFileSize,
    /// `vaddr + memsz` overflows the 32-bit address space
    AddressOverflow,
    /// Alignment is not zero, one or a power of two
    InvalidAlignment,
    /// Virtual range overlaps an earlier LOAD segment
    Overlap,
    /// Virtual range reaches into the reserved (kernel) part of the address space
    ReservedRange,
    /// Segment is writable and executable and the policy forbids it
    WritableExecutable,
}

impl fmt::Display for SegmentFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileRangeOverflow => write!(f, "file range overflows"),
            Self::FileRangeOutOfBounds => write!(f, "file range out of bounds"),
            Self::MemSizeBelowFileSize => write!(f, "memory size below file size"),
            Self::AddressOverflow => write!(f, "virtual range overflows"),
            Self::InvalidAlignment => write!(f, "invalid alignment"),
            Self::Overlap => write!(f, "overlapping segments"),
            Self::ReservedRange => write!(f, "segment in reserved address range"),
            Self::WritableExecutable => write!(f, "segment is writable and executable"),
        }
    }
}

/// Errors reported by an address-space mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Not enough memory to back the range
    OutOfMemory,
    /// Range is empty, unaligned or otherwise unacceptable
    InvalidRange,
    /// Part of the range is not reserved
    NotMapped,
    /// Write to a range that is not currently writable
    PermissionDenied,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::InvalidRange => write!(f, "Invalid address range"),
            Self::NotMapped => write!(f, "Range not mapped"),
            Self::PermissionDenied => write!(f, "Permission denied"),
        }
    }
}

/// Errors reported by a byte source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// Executable does not exist
    NotFound,
    /// Caller may not read the executable
    PermissionDenied,
    /// Source ended before the whole image was read
    UnexpectedEof,
    /// Source did not answer in time
    TimedOut,
    /// Any other device or transport failure
    Other,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "Not found"),
            Self::PermissionDenied => write!(f, "Permission denied"),
            Self::UnexpectedEof => write!(f, "Unexpected end of file"),
            Self::TimedOut => write!(f, "Timed out"),
            Self::Other => write!(f, "I/O error"),
        }
    }
}

/// ELF loading errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// First four bytes are not `7F 'E' 'L' 'F'`
    InvalidMagic,
    /// Header or program-header entry size is not the ELF32 size
    UnsupportedFormat,
    /// Header is truncated or its table bounds are unusable
    MalformedHeader,
    /// A program-header entry is inconsistent
    MalformedSegment(SegmentFault),
    /// The address-space mapper rejected a request
    MappingFailed(MapError),
    /// The byte source failed to deliver the image
    IoFailure(IoError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "Invalid ELF magic"),
            Self::UnsupportedFormat => write!(f, "Unsupported ELF format"),
            Self::MalformedHeader => write!(f, "Malformed ELF header"),
            Self::MalformedSegment(fault) => write!(f, "Malformed segment: {}", fault),
            Self::MappingFailed(e) => write!(f, "Mapping failed: {}", e),
            Self::IoFailure(e) => write!(f, "I/O failure: {}", e),
        }
    }
}

impl From<SegmentFault> for LoadError {
    fn from(fault: SegmentFault) -> Self {
        Self::MalformedSegment(fault)
    }
}

impl From<MapError> for LoadError {
    fn from(e: MapError) -> Self {
        Self::MappingFailed(e)
    }
}

impl From<IoError> for LoadError {
    fn from(e: IoError) -> Self {
        Self::IoFailure(e)
    }
}

/// Result type for loader operations
pub type Result<T> = core::result::Result<T, LoadError>;
