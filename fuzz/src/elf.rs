//! ELF32 Loader Fuzzing
//!
//! Drives the whole load pipeline into a page-backed address space and
//! checks the result against the input image.

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use kpio_loader::config::PAGE_SIZE;
use kpio_loader::format::{ELF32_HEADER_SIZE, ELF32_PHDR_SIZE, ELF_MAGIC, PT_LOAD};
use kpio_loader::{
    entries, load_image_with, validate_with, FileHeader, LoadError, LoadedImage, LoaderConfig,
    PagedAddressSpace, ProgramHeaderEntry, SegmentFlags, SegmentType,
};

use crate::{FuzzResult, FuzzTarget, FuzzerConfig, Violation, ViolationKind};

/// ELF32 loader fuzzer
pub struct Elf32LoadTarget {
    /// Loader configuration under test
    config: LoaderConfig,
    /// Maximum input size
    max_size: usize,
    /// Page budget per attempt
    max_pages: usize,
}

impl Elf32LoadTarget {
    /// Create new ELF32 fuzzer
    pub fn new(fuzz_config: &FuzzerConfig) -> Self {
        Self {
            config: LoaderConfig::default(),
            max_size: fuzz_config.max_input_size,
            max_pages: fuzz_config.max_pages,
        }
    }

    /// Use a specific loader configuration
    pub fn with_loader_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    fn check_walk(&self, input: &[u8]) -> Option<Violation> {
        let header = validate_with(input, &self.config).ok()?;
        let first: Vec<_> = entries(input, &header).collect();
        let second: Vec<_> = entries(input, &header).collect();
        if first != second {
            return Some(Violation {
                kind: ViolationKind::NonDeterministicWalk,
                address: None,
                detail: format!("{} vs {} entries", first.len(), second.len()),
            });
        }
        None
    }

    fn check_loaded(&self, input: &[u8], space: &PagedAddressSpace, image: &LoadedImage) -> Option<Violation> {
        let header = validate_with(input, &self.config).ok()?;
        let loads: Vec<ProgramHeaderEntry> = entries(input, &header)
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.is_load())
            .collect();

        for (entry, segment) in loads.iter().zip(image.segments.iter()) {
            if segment.mem_size == 0 {
                continue;
            }

            let expected = &input[entry.offset as usize..(entry.offset + entry.filesz) as usize];
            match space.read(segment.vaddr, segment.file_size) {
                Ok(actual) if actual == expected => {}
                _ => {
                    return Some(Violation {
                        kind: ViolationKind::ContentMismatch,
                        address: Some(segment.vaddr),
                        detail: format!("{} bytes at offset {:#x}", entry.filesz, entry.offset),
                    })
                }
            }

            let tail = segment.mem_size - segment.file_size;
            if tail > 0 {
                let zeroed = space
                    .read(segment.vaddr + segment.file_size, tail)
                    .map_or(false, |bytes| bytes.iter().all(|&b| b == 0));
                if !zeroed {
                    return Some(Violation {
                        kind: ViolationKind::DirtyZeroFill,
                        address: Some(segment.vaddr + segment.file_size),
                        detail: format!("{} byte tail", tail),
                    });
                }
            }

            if !segment.flags.contains(SegmentFlags::WRITE)
                && space.is_writable(segment.vaddr)
                && !shares_writable_page(image, segment.vaddr)
            {
                return Some(Violation {
                    kind: ViolationKind::PermissionLeak,
                    address: Some(segment.vaddr),
                    detail: format!("flags {:?}", segment.flags),
                });
            }
        }

        None
    }
}

/// Check whether a writable segment also lives on the page holding `vaddr`.
fn shares_writable_page(image: &LoadedImage, vaddr: u32) -> bool {
    let page = vaddr / PAGE_SIZE;
    image.segments.iter().any(|s| {
        s.flags.contains(SegmentFlags::WRITE)
            && s.mem_size > 0
            && s.vaddr / PAGE_SIZE <= page
            && (s.end() - 1) / PAGE_SIZE >= page
    })
}

impl FuzzTarget for Elf32LoadTarget {
    fn name(&self) -> &str {
        "elf32_loader"
    }

    fn fuzz(&mut self, input: &[u8]) -> FuzzResult {
        let input = &input[..input.len().min(self.max_size)];

        if let Some(violation) = self.check_walk(input) {
            return FuzzResult::Violation(violation);
        }

        let mut space = PagedAddressSpace::with_page_limit(self.max_pages);
        match load_image_with(input, &mut space, &self.config) {
            Ok(image) => match self.check_loaded(input, &space, &image) {
                Some(violation) => FuzzResult::Violation(violation),
                None => FuzzResult::Loaded,
            },
            Err(e @ LoadError::MappingFailed(_)) => FuzzResult::Rejected(e),
            Err(e) => {
                if space.page_count() > 0 {
                    FuzzResult::Violation(Violation {
                        kind: ViolationKind::MappedOnRejection,
                        address: None,
                        detail: format!("{} pages after {}", space.page_count(), e),
                    })
                } else {
                    FuzzResult::Rejected(e)
                }
            }
        }
    }

    fn reset(&mut self) {}
}

/// Build an image: header, table, then `payload`.
pub fn build_image(entry: u32, phdrs: &[ProgramHeaderEntry], payload: &[u8]) -> Vec<u8> {
    let mut bytes = FileHeader::new(entry, phdrs.len() as u16).encode().to_vec();
    for phdr in phdrs {
        bytes.extend_from_slice(&phdr.encode());
    }
    bytes.extend_from_slice(payload);
    bytes
}

/// Well-formed images to start mutating from.
pub fn seed_corpus() -> Vec<Vec<u8>> {
    let rw = SegmentFlags::READ | SegmentFlags::WRITE;
    let rx = SegmentFlags::READ | SegmentFlags::EXECUTE;
    let one = (ELF32_HEADER_SIZE + ELF32_PHDR_SIZE) as u32;
    let three = (ELF32_HEADER_SIZE + 3 * ELF32_PHDR_SIZE) as u32;

    let mut note = ProgramHeaderEntry::load(three, 0, 4, 4, SegmentFlags::READ);
    note.seg_type = SegmentType::Note;

    vec![
        build_image(0x1000, &[], &[]),
        build_image(0x1000, &[ProgramHeaderEntry::load(one, 0x1000, 16, 32, rw)], &[0xAB; 16]),
        build_image(
            0x40_0000,
            &[
                ProgramHeaderEntry::load(three, 0x40_0000, 8, 8, rx),
                note,
                ProgramHeaderEntry::load(three + 8, 0x40_1000, 8, 0x1800, rw),
            ],
            &[0x90, 0x90, 0x90, 0xC3, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8],
        ),
    ]
}

/// Byte strings worth splicing into inputs.
pub fn dictionary() -> Vec<Vec<u8>> {
    vec![
        ELF_MAGIC.to_vec(),
        PT_LOAD.to_le_bytes().to_vec(),
        (ELF32_HEADER_SIZE as u16).to_le_bytes().to_vec(),
        (ELF32_PHDR_SIZE as u16).to_le_bytes().to_vec(),
        0x8000_0000u32.to_le_bytes().to_vec(),
    ]
}
