//! Program-header table walker.
//!
//! [`entries`] yields the table records one at a time, decoding each only
//! when it is requested. LOAD records are checked against the image before
//! they are handed out; every other record type is passed through so the
//! caller can log or ignore it.

use core::iter::FusedIterator;
use core::ops::Range;

use crate::error::{LoadError, Result, SegmentFault};
use crate::format::{phdr, read_u32, write_u32, SegmentFlags, SegmentType, ELF32_PHDR_SIZE};
use crate::header::FileHeader;

/// ELF32 program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeaderEntry {
    /// Segment type
    pub seg_type: SegmentType,
    /// Segment file offset
    pub offset: u32,
    /// Segment virtual address
    pub vaddr: u32,
    /// Segment physical address (unused)
    pub paddr: u32,
    /// Segment size in file
    pub filesz: u32,
    /// Segment size in memory
    pub memsz: u32,
    /// Raw segment flags, see [`SegmentFlags`]
    pub flags: u32,
    /// Segment alignment
    pub align: u32,
}

impl ProgramHeaderEntry {
    /// A LOAD entry.
    pub fn load(offset: u32, vaddr: u32, filesz: u32, memsz: u32, flags: SegmentFlags) -> Self {
        Self {
            seg_type: SegmentType::Load,
            offset,
            vaddr,
            paddr: vaddr,
            filesz,
            memsz,
            flags: flags.bits(),
            align: 0,
        }
    }

    /// Decode one record. Callers guarantee `bytes.len() >= ELF32_PHDR_SIZE`.
    fn decode(bytes: &[u8]) -> Self {
        Self {
            seg_type: SegmentType::from_raw(read_u32(bytes, phdr::TYPE)),
            offset: read_u32(bytes, phdr::OFFSET),
            vaddr: read_u32(bytes, phdr::VADDR),
            paddr: read_u32(bytes, phdr::PADDR),
            filesz: read_u32(bytes, phdr::FILESZ),
            memsz: read_u32(bytes, phdr::MEMSZ),
            flags: read_u32(bytes, phdr::FLAGS),
            align: read_u32(bytes, phdr::ALIGN),
        }
    }

    /// Encode into the on-disk layout.
    pub fn encode(&self) -> [u8; ELF32_PHDR_SIZE] {
        let mut out = [0u8; ELF32_PHDR_SIZE];
        write_u32(&mut out, phdr::TYPE, self.seg_type.raw());
        write_u32(&mut out, phdr::OFFSET, self.offset);
        write_u32(&mut out, phdr::VADDR, self.vaddr);
        write_u32(&mut out, phdr::PADDR, self.paddr);
        write_u32(&mut out, phdr::FILESZ, self.filesz);
        write_u32(&mut out, phdr::MEMSZ, self.memsz);
        write_u32(&mut out, phdr::FLAGS, self.flags);
        write_u32(&mut out, phdr::ALIGN, self.align);
        out
    }

    /// Check if this is a LOAD segment
    pub fn is_load(&self) -> bool {
        self.seg_type == SegmentType::Load
    }

    /// Permission bits, ignoring processor-specific flags.
    pub fn permissions(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.flags)
    }

    /// Bytes to zero after the file-backed part.
    pub fn zero_fill_len(&self) -> u32 {
        self.memsz.saturating_sub(self.filesz)
    }

    /// Source range within the image.
    pub fn file_range(&self) -> core::result::Result<Range<usize>, SegmentFault> {
        let end = self
            .offset
            .checked_add(self.filesz)
            .ok_or(SegmentFault::FileRangeOverflow)?;
        Ok(self.offset as usize..end as usize)
    }

    /// Destination range in the address space.
    pub fn mem_range(&self) -> core::result::Result<Range<u32>, SegmentFault> {
        let end = self
            .vaddr
            .checked_add(self.memsz)
            .ok_or(SegmentFault::AddressOverflow)?;
        Ok(self.vaddr..end)
    }

    /// Validate a LOAD entry against an image of `image_len` bytes.
    pub fn check(&self, image_len: usize) -> core::result::Result<(), SegmentFault> {
        if self.memsz < self.filesz {
            return Err(SegmentFault::MemSizeBelowFileSize);
        }

        if self.file_range()?.end > image_len {
            return Err(SegmentFault::FileRangeOutOfBounds);
        }

        self.mem_range()?;

        // Alignment must be a power of 2 (or 0/1)
        if self.align > 1 && !self.align.is_power_of_two() {
            return Err(SegmentFault::InvalidAlignment);
        }

        Ok(())
    }
}

/// Lazy iterator over a program-header table.
///
/// Stops for good after the first error.
#[derive(Debug, Clone)]
pub struct ProgramHeaders<'a> {
    buffer: &'a [u8],
    phoff: usize,
    phnum: u16,
    index: u16,
    failed: bool,
}

impl<'a> ProgramHeaders<'a> {
    /// Table position of the next entry.
    pub fn position(&self) -> u16 {
        self.index
    }

    fn read_entry(&self, index: u16) -> Result<ProgramHeaderEntry> {
        let start = (index as usize)
            .checked_mul(ELF32_PHDR_SIZE)
            .and_then(|rel| rel.checked_add(self.phoff))
            .ok_or(LoadError::MalformedHeader)?;
        let end = start
            .checked_add(ELF32_PHDR_SIZE)
            .ok_or(LoadError::MalformedHeader)?;

        // The header was validated against some buffer; not necessarily this one
        let record = self.buffer.get(start..end).ok_or(LoadError::MalformedHeader)?;
        let entry = ProgramHeaderEntry::decode(record);

        if entry.is_load() {
            entry.check(self.buffer.len()).map_err(|fault| {
                log::warn!("[ELF32] Program header {} rejected: {}", index, fault);
                LoadError::MalformedSegment(fault)
            })?;
        } else {
            log::trace!(
                "[ELF32] Program header {} type {:#x} skipped",
                index,
                entry.seg_type.raw()
            );
        }

        Ok(entry)
    }
}

impl<'a> Iterator for ProgramHeaders<'a> {
    type Item = Result<ProgramHeaderEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.phnum {
            return None;
        }

        let result = self.read_entry(self.index);
        self.index += 1;
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let remaining = (self.phnum - self.index) as usize;
        (0, Some(remaining))
    }
}

impl<'a> FusedIterator for ProgramHeaders<'a> {}

/// Walk the program-header table described by `header`.
///
/// Calling this again with the same arguments yields the same sequence.
pub fn entries<'a>(buffer: &'a [u8], header: &FileHeader) -> ProgramHeaders<'a> {
    ProgramHeaders {
        buffer,
        phoff: header.phoff as usize,
        phnum: header.phnum,
        index: 0,
        failed: false,
    }
}
