//! ELF Segment Memory Loader
//!
//! Connects the program-header walker to an address-space mapper to
//! actually place LOAD segments into a process's virtual address space.
//!
//! # Process
//!
//! For each PT_LOAD segment, in table order:
//!  1. Reserve `[vaddr, vaddr + memsz)`, writable while it is populated
//!  2. Copy `filesz` bytes from the image
//!  3. Zero-fill the BSS tail (`memsz - filesz` bytes)
//!  4. Apply the segment's final permissions
//!
//! A failure leaves earlier segments mapped; tearing the address space
//! down is up to whoever owns it.

use core::ops::Range;

use crate::error::{LoadError, MapError, Result, SegmentFault};
use crate::format::SegmentFlags;
use crate::program::ProgramHeaderEntry;

/// Memory-mapping collaborator that backs a target address space.
///
/// `reserve` must leave the range writable so it can be populated;
/// `protect` installs the permissions the segment asked for.
pub trait AddressSpaceMapper {
    /// Make `[vaddr, vaddr + len)` present and writable.
    fn reserve(&mut self, vaddr: u32, len: u32, flags: SegmentFlags) -> core::result::Result<(), MapError>;

    /// Copy `data` to `vaddr`.
    fn write(&mut self, vaddr: u32, data: &[u8]) -> core::result::Result<(), MapError>;

    /// Zero `[vaddr, vaddr + len)`.
    fn zero_fill(&mut self, vaddr: u32, len: u32) -> core::result::Result<(), MapError>;

    /// Install final permissions on `[vaddr, vaddr + len)`.
    fn protect(&mut self, vaddr: u32, len: u32, flags: SegmentFlags) -> core::result::Result<(), MapError>;
}

impl<M: AddressSpaceMapper + ?Sized> AddressSpaceMapper for &mut M {
    fn reserve(&mut self, vaddr: u32, len: u32, flags: SegmentFlags) -> core::result::Result<(), MapError> {
        (**self).reserve(vaddr, len, flags)
    }

    fn write(&mut self, vaddr: u32, data: &[u8]) -> core::result::Result<(), MapError> {
        (**self).write(vaddr, data)
    }

    fn zero_fill(&mut self, vaddr: u32, len: u32) -> core::result::Result<(), MapError> {
        (**self).zero_fill(vaddr, len)
    }

    fn protect(&mut self, vaddr: u32, len: u32, flags: SegmentFlags) -> core::result::Result<(), MapError> {
        (**self).protect(vaddr, len, flags)
    }
}

/// One segment's worth of mapping work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Destination virtual address
    pub vaddr: u32,
    /// Bytes of the image to copy
    pub source: Range<usize>,
    /// Bytes to zero after the copied data
    pub zero_fill: u32,
    /// Final permissions
    pub flags: SegmentFlags,
}

impl LoadRequest {
    /// Build the request for a LOAD entry taken from an image of `image_len` bytes.
    pub fn from_entry(entry: &ProgramHeaderEntry, image_len: usize) -> Result<Self> {
        entry.check(image_len)?;

        Ok(Self {
            vaddr: entry.vaddr,
            source: entry.file_range()?,
            zero_fill: entry.zero_fill_len(),
            flags: entry.permissions(),
        })
    }

    /// Total bytes occupied in memory, saturating at `u32::MAX`.
    ///
    /// [`execute`](Self::execute) refuses requests whose size saturates.
    pub fn mem_size(&self) -> u32 {
        self.checked_mem_size().unwrap_or(u32::MAX)
    }

    /// Bytes copied from the image, saturating at `u32::MAX`.
    pub fn file_size(&self) -> u32 {
        u32::try_from(self.source.len()).unwrap_or(u32::MAX)
    }

    fn checked_mem_size(&self) -> core::result::Result<u32, SegmentFault> {
        let file_size = u32::try_from(self.source.len()).map_err(|_| SegmentFault::FileRangeOverflow)?;
        file_size
            .checked_add(self.zero_fill)
            .ok_or(SegmentFault::AddressOverflow)
    }

    /// Carry out the request against `mapper`.
    pub fn execute<M: AddressSpaceMapper + ?Sized>(&self, image: &[u8], mapper: &mut M) -> Result<()> {
        let len = self.checked_mem_size()?;
        if len == 0 {
            log::trace!("[ELF32] Empty segment at {:#x}, nothing to map", self.vaddr);
            return Ok(());
        }

        let end = self
            .vaddr
            .checked_add(len)
            .ok_or(SegmentFault::AddressOverflow)?;
        let data = image
            .get(self.source.clone())
            .ok_or(SegmentFault::FileRangeOutOfBounds)?;

        mapper.reserve(self.vaddr, len, self.flags)?;

        if !data.is_empty() {
            mapper.write(self.vaddr, data)?;
        }

        if self.zero_fill > 0 {
            mapper.zero_fill(self.vaddr + self.file_size(), self.zero_fill)?;
        }

        mapper.protect(self.vaddr, len, self.flags)?;

        log::debug!(
            "[ELF32] Loaded segment {:#x}..{:#x} ({} file, {} zero) {:?}",
            self.vaddr,
            end,
            data.len(),
            self.zero_fill,
            self.flags
        );

        Ok(())
    }
}

/// Load one program-header entry into `mapper`.
///
/// Non-LOAD entries are ignored. The entry is re-checked against `image`
/// before the first mapper call, so a bad entry never touches the address
/// space.
pub fn load<M: AddressSpaceMapper + ?Sized>(image: &[u8], entry: &ProgramHeaderEntry, mapper: &mut M) -> Result<()> {
    if !entry.is_load() {
        return Ok(());
    }

    LoadRequest::from_entry(entry, image.len())?.execute(image, mapper)
}


#[cfg(test)]
mod tests {
    use super::testing::{Call, RecordingMapper};
    use super::*;
    use crate::format::SegmentType;
    use alloc::vec;
    use alloc::vec::Vec;

    const RW: SegmentFlags = SegmentFlags::READ.union(SegmentFlags::WRITE);
    const RX: SegmentFlags = SegmentFlags::READ.union(SegmentFlags::EXECUTE);

    fn image_with_payload(offset: usize, payload: &[u8]) -> Vec<u8> {
        let mut image = vec![0u8; offset];
        image.extend_from_slice(payload);
        image
    }

    #[test]
    fn test_exact_copy_no_zero_fill() {
        let payload: Vec<u8> = (1..=8).collect();
        let image = image_with_payload(84, &payload);
        let entry = ProgramHeaderEntry::load(84, 0x40_0000, 8, 8, RX);

        let mut mapper = RecordingMapper::default();
        load(&image, &entry, &mut mapper).unwrap();

        assert_eq!(
            mapper.calls,
            [
                Call::Reserve(0x40_0000, 8, RX),
                Call::Write(0x40_0000, payload),
                Call::Protect(0x40_0000, 8, RX),
            ]
        );
    }

    #[test]
    fn test_bss_tail() {
        let payload = [0x5Au8; 16];
        let image = image_with_payload(84, &payload);
        let entry = ProgramHeaderEntry::load(84, 0x1000, 16, 32, RW);

        let mut mapper = RecordingMapper::default();
        load(&image, &entry, &mut mapper).unwrap();

        assert_eq!(
            mapper.calls,
            [
                Call::Reserve(0x1000, 32, RW),
                Call::Write(0x1000, payload.to_vec()),
                Call::ZeroFill(0x1010, 16),
                Call::Protect(0x1000, 32, RW),
            ]
        );
    }

    #[test]
    fn test_pure_bss() {
        let entry = ProgramHeaderEntry::load(0, 0x8000, 0, 0x100, RW);
        let mut mapper = RecordingMapper::default();
        load(&[], &entry, &mut mapper).unwrap();

        assert_eq!(
            mapper.calls,
            [
                Call::Reserve(0x8000, 0x100, RW),
                Call::ZeroFill(0x8000, 0x100),
                Call::Protect(0x8000, 0x100, RW),
            ]
        );
    }

    #[test]
    fn test_out_of_bounds_never_maps() {
        let image = image_with_payload(84, &[0u8; 16]);
        let entry = ProgramHeaderEntry::load(84, 0x1000, 17, 32, RW);

        let mut mapper = RecordingMapper::default();
        assert_eq!(
            load(&image, &entry, &mut mapper),
            Err(LoadError::MalformedSegment(SegmentFault::FileRangeOutOfBounds))
        );
        assert!(mapper.calls.is_empty());
    }

    #[test]
    fn test_non_load_ignored() {
        let mut entry = ProgramHeaderEntry::load(u32::MAX, 0x1000, 16, 8, RW);
        entry.seg_type = SegmentType::Interp;

        let mut mapper = RecordingMapper::default();
        assert_eq!(load(&[], &entry, &mut mapper), Ok(()));
        assert!(mapper.calls.is_empty());
    }

    #[test]
    fn test_empty_segment_skipped() {
        let entry = ProgramHeaderEntry::load(0, 0x1000, 0, 0, RW);
        let mut mapper = RecordingMapper::default();
        assert_eq!(load(&[], &entry, &mut mapper), Ok(()));
        assert!(mapper.calls.is_empty());
    }

    #[test]
    fn test_reserve_failure() {
        let image = image_with_payload(84, &[1u8; 4]);
        let entry = ProgramHeaderEntry::load(84, 0x1000, 4, 4, RW);

        let mut mapper = RecordingMapper {
            fail_reserve: Some(MapError::OutOfMemory),
            ..Default::default()
        };
        assert_eq!(
            load(&image, &entry, &mut mapper),
            Err(LoadError::MappingFailed(MapError::OutOfMemory))
        );
        // Nothing after the failed reserve
        assert_eq!(mapper.calls, [Call::Reserve(0x1000, 4, RW)]);
    }

    #[test]
    fn test_protect_failure() {
        let entry = ProgramHeaderEntry::load(0, 0x1000, 0, 4, RX);
        let mut mapper = RecordingMapper {
            fail_protect: Some(MapError::PermissionDenied),
            ..Default::default()
        };
        assert_eq!(
            load(&[], &entry, &mut mapper),
            Err(LoadError::MappingFailed(MapError::PermissionDenied))
        );
    }

    #[test]
    fn test_oversized_request_refused() {
        let request = LoadRequest {
            vaddr: 0x1000,
            source: 0..4,
            zero_fill: u32::MAX - 2,
            flags: RW,
        };
        assert_eq!(request.mem_size(), u32::MAX);

        let mut mapper = RecordingMapper::default();
        assert_eq!(
            request.execute(&[0u8; 4], &mut mapper),
            Err(LoadError::MalformedSegment(SegmentFault::AddressOverflow))
        );
        assert!(mapper.calls.is_empty());
    }

    #[test]
    fn test_request_sizes() {
        let entry = ProgramHeaderEntry::load(84, 0x1000, 16, 32, RW);
        let request = LoadRequest::from_entry(&entry, 100).unwrap();
        assert_eq!(request.source, 84..100);
        assert_eq!(request.file_size(), 16);
        assert_eq!(request.zero_fill, 16);
        assert_eq!(request.mem_size(), 32);
        assert_eq!(request.flags, RW);

        assert_eq!(
            LoadRequest::from_entry(&entry, 99),
            Err(LoadError::MalformedSegment(SegmentFault::FileRangeOutOfBounds))
        );
    }
}
