//! ELF32 on-disk format definitions.
//!
//! Layout constants and little-endian field accessors shared by the header
//! validator and the program-header walker. Records are decoded field by
//! field at fixed offsets, never by reinterpreting the buffer as a struct.

use bitflags::bitflags;

/// ELF magic number: 0x7F 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF magic as read with a little-endian `u32` load.
pub const ELF_MAGIC_LE: u32 = 0x464C_457F;

/// Size of the ELF32 file header.
pub const ELF32_HEADER_SIZE: usize = 52;

/// Size of one ELF32 program-header record.
pub const ELF32_PHDR_SIZE: usize = 32;

/// Program header type: unused entry
pub const PT_NULL: u32 = 0;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;

/// Program header type: dynamic linking info
pub const PT_DYNAMIC: u32 = 2;

/// Program header type: interpreter path
pub const PT_INTERP: u32 = 3;

/// Program header type: auxiliary note
pub const PT_NOTE: u32 = 4;

/// Program header type: program header table
pub const PT_PHDR: u32 = 6;

/// File header field offsets.
pub(crate) mod ehdr {
    pub const MAGIC: usize = 0;
    pub const IDENT: usize = 4;
    pub const TYPE: usize = 16;
    pub const MACHINE: usize = 18;
    pub const VERSION: usize = 20;
    pub const ENTRY: usize = 24;
    pub const PHOFF: usize = 28;
    pub const SHOFF: usize = 32;
    pub const FLAGS: usize = 36;
    pub const EHSIZE: usize = 40;
    pub const PHENTSIZE: usize = 42;
    pub const PHNUM: usize = 44;
    pub const SHENTSIZE: usize = 46;
    pub const SHNUM: usize = 48;
    pub const SHSTRNDX: usize = 50;
}

/// Program header field offsets.
pub(crate) mod phdr {
    pub const TYPE: usize = 0;
    pub const OFFSET: usize = 4;
    pub const VADDR: usize = 8;
    pub const PADDR: usize = 12;
    pub const FILESZ: usize = 16;
    pub const MEMSZ: usize = 20;
    pub const FLAGS: usize = 24;
    pub const ALIGN: usize = 28;
}

bitflags! {
    /// Segment permission bits (`p_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u32 {
        /// Executable.
        const EXECUTE = 0b001;
        /// Writable.
        const WRITE = 0b010;
        /// Readable.
        const READ = 0b100;
    }
}

impl SegmentFlags {
    /// Check if segment is both writable and executable
    pub fn is_wx(&self) -> bool {
        self.contains(Self::WRITE | Self::EXECUTE)
    }
}

/// Program header entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Null,
    Load,
    Dynamic,
    Interp,
    Note,
    Phdr,
    /// Any other value, carried through untouched.
    Other(u32),
}

impl SegmentType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            PT_NULL => Self::Null,
            PT_LOAD => Self::Load,
            PT_DYNAMIC => Self::Dynamic,
            PT_INTERP => Self::Interp,
            PT_NOTE => Self::Note,
            PT_PHDR => Self::Phdr,
            other => Self::Other(other),
        }
    }

    pub fn raw(&self) -> u32 {
        match self {
            Self::Null => PT_NULL,
            Self::Load => PT_LOAD,
            Self::Dynamic => PT_DYNAMIC,
            Self::Interp => PT_INTERP,
            Self::Note => PT_NOTE,
            Self::Phdr => PT_PHDR,
            Self::Other(raw) => *raw,
        }
    }
}

/// Read a little-endian `u16`. Callers guarantee `at + 2 <= bytes.len()`.
#[inline]
pub(crate) fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// Read a little-endian `u32`. Callers guarantee `at + 4 <= bytes.len()`.
#[inline]
pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
pub(crate) fn write_u16(bytes: &mut [u8], at: usize, value: u16) {
    bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
