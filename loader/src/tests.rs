//! ELF32 Loader Scenario Tests
//!
//! End-to-end runs of the validator, walker and segment loader against
//! hand-built images.

#[cfg(test)]
mod image_tests {
    use alloc::vec::Vec;

    use crate::config::{LoaderConfig, WxPolicy, USER_SPACE_END};
    use crate::error::{IoError, LoadError, MapError, SegmentFault};
    use crate::format::{SegmentFlags, SegmentType, ELF32_HEADER_SIZE, ELF32_PHDR_SIZE};
    use crate::header::{validate, FileHeader};
    use crate::image::{load_from_source, load_image, load_image_locked, load_image_with, ByteSource};
    use crate::program::{entries, ProgramHeaderEntry};
    use crate::segment_loader::testing::{Call, RecordingMapper};
    use crate::segment_loader::{load, AddressSpaceMapper};
    use crate::space::PagedAddressSpace;

    const RW: SegmentFlags = SegmentFlags::READ.union(SegmentFlags::WRITE);
    const RX: SegmentFlags = SegmentFlags::READ.union(SegmentFlags::EXECUTE);

    /// Header, program-header table, then `payload`.
    fn build(entry: u32, phdrs: &[ProgramHeaderEntry], payload: &[u8]) -> Vec<u8> {
        let mut bytes = FileHeader::new(entry, phdrs.len() as u16).encode().to_vec();
        for phdr in phdrs {
            bytes.extend_from_slice(&phdr.encode());
        }
        bytes.extend_from_slice(payload);
        bytes
    }

    fn payload_offset(phnum: usize) -> u32 {
        (ELF32_HEADER_SIZE + phnum * ELF32_PHDR_SIZE) as u32
    }

    #[test]
    fn test_single_segment_scenario() {
        let payload: Vec<u8> = (0x10..0x20).collect();
        let phdr = ProgramHeaderEntry::load(84, 0x1000, 16, 32, RW);
        let image = build(0x1000, &[phdr], &payload);
        assert_eq!(payload_offset(1), 84);

        let mut mapper = RecordingMapper::default();
        let loaded = load_image(&image, &mut mapper).unwrap();

        assert_eq!(
            mapper.calls,
            [
                Call::Reserve(0x1000, 32, RW),
                Call::Write(0x1000, payload),
                Call::ZeroFill(0x1010, 16),
                Call::Protect(0x1000, 32, RW),
            ]
        );
        assert_eq!(loaded.entry, 0x1000);
        assert_eq!(loaded.segments.len(), 1);
        assert_eq!(loaded.brk_start, 0x2000);
    }

    #[test]
    fn test_zero_fill_reads_back_zero() {
        let payload = [0xC3u8; 16];
        let phdr = ProgramHeaderEntry::load(84, 0x1000, 16, 32, RW);
        let image = build(0x1000, &[phdr], &payload);

        // Dirty the page first so the zeros must come from the loader
        let mut space = PagedAddressSpace::new();
        space.reserve(0x1000, 0x1000, RW).unwrap();
        space.write(0x1000, &[0xEE; 0x100]).unwrap();
        space.protect(0x1000, 0x1000, RW).unwrap();

        load_image(&image, &mut space).unwrap();

        let bytes = space.read(0x1000, 32).unwrap();
        assert_eq!(&bytes[..16], &payload);
        assert!(bytes[16..].iter().all(|&b| b == 0));
        // Past memsz the old contents survive
        assert_eq!(space.read(0x1020, 1).unwrap(), [0xEE]);
    }

    #[test]
    fn test_phnum_ceiling_scenario() {
        let mut header = FileHeader::new(0x1000, 5000);
        header.phoff = 52;
        let image = header.encode().to_vec();

        let mut mapper = RecordingMapper::default();
        assert_eq!(load_image(&image, &mut mapper), Err(LoadError::MalformedHeader));
        assert!(mapper.calls.is_empty());
    }

    #[test]
    fn test_no_program_headers() {
        let image = build(0x1000, &[], &[]);
        let header = validate(&image).unwrap();
        assert_eq!(entries(&image, &header).count(), 0);

        let mut mapper = RecordingMapper::default();
        let loaded = load_image(&image, &mut mapper).unwrap();
        assert!(mapper.calls.is_empty());
        assert!(loaded.segments.is_empty());
        assert_eq!(loaded.brk_start, 0);
    }

    #[test]
    fn test_bad_segment_after_good_maps_nothing() {
        let good = ProgramHeaderEntry::load(116, 0x1000, 4, 4, RX);
        let bad = ProgramHeaderEntry::load(116, 0x2000, 64, 64, RW);
        let image = build(0x1000, &[good, bad], &[0x90; 8]);

        let mut mapper = RecordingMapper::default();
        assert_eq!(
            load_image(&image, &mut mapper),
            Err(LoadError::MalformedSegment(SegmentFault::FileRangeOutOfBounds))
        );
        assert!(mapper.calls.is_empty());
    }

    #[test]
    fn test_overlapping_segments_rejected() {
        let text = ProgramHeaderEntry::load(116, 0x1000, 8, 0x100, RX);
        let data = ProgramHeaderEntry::load(116, 0x10F0, 8, 0x20, RW);
        let image = build(0x1000, &[text, data], &[0; 8]);

        let mut mapper = RecordingMapper::default();
        assert_eq!(
            load_image(&image, &mut mapper),
            Err(LoadError::MalformedSegment(SegmentFault::Overlap))
        );
        assert!(mapper.calls.is_empty());
    }

    #[test]
    fn test_kernel_range_rejected() {
        let phdr = ProgramHeaderEntry::load(84, USER_SPACE_END - 0x10, 0, 0x20, RW);
        let image = build(USER_SPACE_END - 0x10, &[phdr], &[]);

        let mut mapper = RecordingMapper::default();
        assert_eq!(
            load_image(&image, &mut mapper),
            Err(LoadError::MalformedSegment(SegmentFault::ReservedRange))
        );
        assert!(mapper.calls.is_empty());

        let open = LoaderConfig::new().with_user_limit(None);
        assert!(load_image_with(&image, &mut mapper, &open).is_ok());
    }

    #[test]
    fn test_realistic_layout() {
        let phnum = 4;
        let base = payload_offset(phnum);
        let code = [0x55u8, 0x89, 0xE5, 0xC3];
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut payload = Vec::new();
        payload.extend_from_slice(&code);
        payload.extend_from_slice(&data);

        let mut phdr = ProgramHeaderEntry::load(0, 0x40_0000, 0, 0, SegmentFlags::READ);
        phdr.seg_type = SegmentType::Phdr;
        let text = ProgramHeaderEntry::load(base, 0x40_0000, 4, 4, RX);
        let mut note = ProgramHeaderEntry::load(base, 0, 4, 4, SegmentFlags::READ);
        note.seg_type = SegmentType::Note;
        let mut bss = ProgramHeaderEntry::load(base + 4, 0x40_1000, 8, 0x2000, RW);
        bss.align = 0x1000;
        let image = build(0x40_0000, &[phdr, text, note, bss], &payload);

        let mut space = PagedAddressSpace::new();
        let loaded = load_image(&image, &mut space).unwrap();

        assert_eq!(loaded.entry, 0x40_0000);
        assert_eq!(loaded.segments.len(), 2);
        assert_eq!(loaded.segments[0].vaddr, 0x40_0000);
        assert_eq!(loaded.segments[1].mem_size, 0x2000);
        assert_eq!(loaded.segments[1].file_size, 8);
        assert_eq!(loaded.brk_start, 0x40_3000);

        assert_eq!(space.read(0x40_0000, 4).unwrap(), code);
        assert_eq!(space.read(0x40_1000, 8).unwrap(), data);
        assert!(space.read(0x40_1008, 0x1FF8).unwrap().iter().all(|&b| b == 0));

        assert_eq!(space.flags_at(0x40_0000), Some(RX));
        assert!(!space.is_writable(0x40_0000));
        assert!(space.is_writable(0x40_2FFF));
        assert_eq!(space.page_count(), 3);
    }

    #[test]
    fn test_mapping_failure_keeps_earlier_segments() {
        let first = ProgramHeaderEntry::load(116, 0x1000, 4, 0x1000, RX);
        let second = ProgramHeaderEntry::load(116, 0x10_0000, 0, 0x3000, RW);
        let image = build(0x1000, &[first, second], &[0xCC; 4]);

        let mut space = PagedAddressSpace::with_page_limit(2);
        assert_eq!(
            load_image(&image, &mut space),
            Err(LoadError::MappingFailed(MapError::OutOfMemory))
        );
        // Unwinding is the caller's job
        assert!(space.is_mapped(0x1000));
        assert!(!space.is_mapped(0x10_0000));
    }

    #[test]
    fn test_huge_bss_is_recoverable() {
        let phdr = ProgramHeaderEntry::load(84, 0x1000, 0, 0x1000_0000, RW);
        let image = build(0x1000, &[phdr], &[]);
        assert_eq!(image.len(), 84);

        let mut space = PagedAddressSpace::new();
        assert_eq!(
            load_image(&image, &mut space),
            Err(LoadError::MappingFailed(MapError::OutOfMemory))
        );
        assert_eq!(space.page_count(), 0);
    }

    #[test]
    fn test_wx_drop_write() {
        let rwx = ProgramHeaderEntry::load(84, 0x1000, 4, 4, SegmentFlags::all());
        let image = build(0x1000, &[rwx], &[0x90; 4]);

        let config = LoaderConfig::new().with_wx_policy(WxPolicy::DropWrite);
        let mut space = PagedAddressSpace::new();
        let loaded = load_image_with(&image, &mut space, &config).unwrap();

        assert_eq!(loaded.segments[0].flags, RX);
        assert_eq!(space.read(0x1000, 4).unwrap(), [0x90; 4]);
        assert!(!space.is_writable(0x1000));
    }

    #[test]
    fn test_per_entry_load_in_table_order() {
        let a = ProgramHeaderEntry::load(116, 0x3000, 2, 2, RW);
        let b = ProgramHeaderEntry::load(118, 0x1000, 2, 2, RX);
        let image = build(0x1000, &[a, b], &[1, 2, 3, 4]);
        let header = validate(&image).unwrap();

        let mut mapper = RecordingMapper::default();
        for entry in entries(&image, &header) {
            load(&image, &entry.unwrap(), &mut mapper).unwrap();
        }

        let reserves: Vec<u32> = mapper
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Reserve(vaddr, _, _) => Some(*vaddr),
                _ => None,
            })
            .collect();
        assert_eq!(reserves, [0x3000, 0x1000]);
    }

    struct FailingSource;

    impl ByteSource for FailingSource {
        fn read_all(&mut self) -> Result<Vec<u8>, IoError> {
            Err(IoError::UnexpectedEof)
        }
    }

    #[test]
    fn test_byte_source() {
        let phdr = ProgramHeaderEntry::load(84, 0x1000, 4, 4, RX);
        let image = build(0x1000, &[phdr], &[1, 2, 3, 4]);
        let config = LoaderConfig::default();

        let mut mapper = RecordingMapper::default();
        assert_eq!(
            load_from_source(&mut FailingSource, &mut mapper, &config),
            Err(LoadError::IoFailure(IoError::UnexpectedEof))
        );
        assert!(mapper.calls.is_empty());

        let mut source: &[u8] = &image;
        let loaded = load_from_source(&mut source, &mut mapper, &config).unwrap();
        assert_eq!(loaded.entry, 0x1000);
    }

    #[test]
    fn test_parallel_loads() {
        use std::sync::Arc;
        use std::thread;

        let mut handles = Vec::new();
        for i in 0..4u8 {
            handles.push(thread::spawn(move || {
                let phdr = ProgramHeaderEntry::load(84, 0x1000, 4, 0x10, RW);
                let image = build(0x1000, &[phdr], &[i; 4]);
                let space = Arc::new(spin::Mutex::new(PagedAddressSpace::new()));

                load_image_locked(&image, &space, &LoaderConfig::default()).unwrap();
                let bytes = space.lock().read(0x1000, 0x10).unwrap();
                assert_eq!(&bytes[..4], &[i; 4]);
                assert!(bytes[4..].iter().all(|&b| b == 0));
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
