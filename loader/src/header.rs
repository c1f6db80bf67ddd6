//! ELF32 file header validation.

use core::ops::Range;

use crate::config::LoaderConfig;
use crate::error::{LoadError, Result};
use crate::format::{ehdr, read_u16, read_u32, write_u16, write_u32};
use crate::format::{ELF32_HEADER_SIZE, ELF32_PHDR_SIZE, ELF_MAGIC, ELF_MAGIC_LE};

/// ELF32 file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Magic number, `ELF_MAGIC_LE` once validated
    pub magic: u32,
    /// Remaining identification bytes (class, encoding, ...), unchecked
    pub ident: [u8; 12],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub machine: u16,
    /// Object file version
    pub version: u32,
    /// Entry point virtual address
    pub entry: u32,
    /// Program header table file offset
    pub phoff: u32,
    /// Section header table file offset (unused)
    pub shoff: u32,
    /// Processor-specific flags
    pub flags: u32,
    /// ELF header size
    pub ehsize: u16,
    /// Program header table entry size
    pub phentsize: u16,
    /// Program header table entry count
    pub phnum: u16,
    /// Section header table entry size (unused)
    pub shentsize: u16,
    /// Section header table entry count (unused)
    pub shnum: u16,
    /// Section name string table index (unused)
    pub shstrndx: u16,
}

impl FileHeader {
    /// Header for an executable with `phnum` program headers right after it.
    pub fn new(entry: u32, phnum: u16) -> Self {
        Self {
            magic: ELF_MAGIC_LE,
            ident: [0; 12],
            e_type: 0,
            machine: 0,
            version: 1,
            entry,
            phoff: ELF32_HEADER_SIZE as u32,
            shoff: 0,
            flags: 0,
            ehsize: ELF32_HEADER_SIZE as u16,
            phentsize: ELF32_PHDR_SIZE as u16,
            phnum,
            shentsize: 0,
            shnum: 0,
            shstrndx: 0,
        }
    }

    /// Decode the fixed fields. Callers guarantee `bytes.len() >= ELF32_HEADER_SIZE`.
    fn decode(bytes: &[u8]) -> Self {
        let mut ident = [0u8; 12];
        ident.copy_from_slice(&bytes[ehdr::IDENT..ehdr::IDENT + 12]);

        Self {
            magic: read_u32(bytes, ehdr::MAGIC),
            ident,
            e_type: read_u16(bytes, ehdr::TYPE),
            machine: read_u16(bytes, ehdr::MACHINE),
            version: read_u32(bytes, ehdr::VERSION),
            entry: read_u32(bytes, ehdr::ENTRY),
            phoff: read_u32(bytes, ehdr::PHOFF),
            shoff: read_u32(bytes, ehdr::SHOFF),
            flags: read_u32(bytes, ehdr::FLAGS),
            ehsize: read_u16(bytes, ehdr::EHSIZE),
            phentsize: read_u16(bytes, ehdr::PHENTSIZE),
            phnum: read_u16(bytes, ehdr::PHNUM),
            shentsize: read_u16(bytes, ehdr::SHENTSIZE),
            shnum: read_u16(bytes, ehdr::SHNUM),
            shstrndx: read_u16(bytes, ehdr::SHSTRNDX),
        }
    }

    /// Encode into the on-disk layout.
    pub fn encode(&self) -> [u8; ELF32_HEADER_SIZE] {
        let mut out = [0u8; ELF32_HEADER_SIZE];
        write_u32(&mut out, ehdr::MAGIC, self.magic);
        out[ehdr::IDENT..ehdr::IDENT + 12].copy_from_slice(&self.ident);
        write_u16(&mut out, ehdr::TYPE, self.e_type);
        write_u16(&mut out, ehdr::MACHINE, self.machine);
        write_u32(&mut out, ehdr::VERSION, self.version);
        write_u32(&mut out, ehdr::ENTRY, self.entry);
        write_u32(&mut out, ehdr::PHOFF, self.phoff);
        write_u32(&mut out, ehdr::SHOFF, self.shoff);
        write_u32(&mut out, ehdr::FLAGS, self.flags);
        write_u16(&mut out, ehdr::EHSIZE, self.ehsize);
        write_u16(&mut out, ehdr::PHENTSIZE, self.phentsize);
        write_u16(&mut out, ehdr::PHNUM, self.phnum);
        write_u16(&mut out, ehdr::SHENTSIZE, self.shentsize);
        write_u16(&mut out, ehdr::SHNUM, self.shnum);
        write_u16(&mut out, ehdr::SHSTRNDX, self.shstrndx);
        out
    }

    /// Byte range of the program-header table, or `None` if it overflows.
    pub fn program_table_range(&self) -> Option<Range<usize>> {
        let start = self.phoff as usize;
        let len = (self.phnum as usize).checked_mul(self.phentsize as usize)?;
        let end = start.checked_add(len)?;
        Some(start..end)
    }
}

/// Validate the file header with the default configuration.
pub fn validate(bytes: &[u8]) -> Result<FileHeader> {
    validate_with(bytes, &LoaderConfig::default())
}

/// Parse and validate the file header at the start of `bytes`.
///
/// # Errors
///
/// * `MalformedHeader` - truncated buffer, `phnum` above the configured
///   ceiling, or a program-header table that does not fit in `bytes`
/// * `InvalidMagic` - first four bytes are not `7F 'E' 'L' 'F'`
/// * `UnsupportedFormat` - `ehsize` or `phentsize` is not the ELF32 size
pub fn validate_with(bytes: &[u8], config: &LoaderConfig) -> Result<FileHeader> {
    if bytes.len() < ELF_MAGIC.len() {
        return Err(LoadError::MalformedHeader);
    }

    if bytes[..ELF_MAGIC.len()] != ELF_MAGIC {
        return Err(LoadError::InvalidMagic);
    }

    if bytes.len() < ELF32_HEADER_SIZE {
        return Err(LoadError::MalformedHeader);
    }

    let header = FileHeader::decode(bytes);

    if header.ehsize as usize != ELF32_HEADER_SIZE
        || header.phentsize as usize != ELF32_PHDR_SIZE
    {
        log::warn!(
            "[ELF32] Unsupported header layout: ehsize={} phentsize={}",
            header.ehsize,
            header.phentsize
        );
        return Err(LoadError::UnsupportedFormat);
    }

    // Ceiling first, so an absurd count never reaches the table arithmetic
    if header.phnum > config.max_phnum {
        log::warn!(
            "[ELF32] Program header count {} exceeds limit {}",
            header.phnum,
            config.max_phnum
        );
        return Err(LoadError::MalformedHeader);
    }

    let table = header.program_table_range().ok_or(LoadError::MalformedHeader)?;
    // An empty table may point anywhere, nothing is ever read from it
    if header.phnum > 0 && table.end > bytes.len() {
        return Err(LoadError::MalformedHeader);
    }

    log::debug!(
        "[ELF32] Header ok: entry={:#x} phoff={} phnum={}",
        header.entry,
        header.phoff,
        header.phnum
    );

    Ok(header)
}
