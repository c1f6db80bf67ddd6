//! Whole-image loading.
//!
//! Runs validator, walker and segment loader in sequence and applies the
//! image-wide policy (overlap, reserved ranges, W^X) before the first page
//! is touched. The caller gets a [`LoadedImage`] only once every LOAD
//! segment is in place.

use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{LoaderConfig, WxPolicy, PAGE_SIZE};
use crate::error::{IoError, LoadError, Result, SegmentFault};
use crate::format::SegmentFlags;
use crate::header::validate_with;
use crate::program::entries;
use crate::segment_loader::{AddressSpaceMapper, LoadRequest};

/// Supplier of raw executable bytes (filesystem, initrd, network, ...).
pub trait ByteSource {
    /// Read the whole executable.
    fn read_all(&mut self) -> core::result::Result<Vec<u8>, IoError>;
}

impl ByteSource for &[u8] {
    fn read_all(&mut self) -> core::result::Result<Vec<u8>, IoError> {
        Ok(self.to_vec())
    }
}

/// A segment placed in the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedSegment {
    /// Virtual address where segment was loaded
    pub vaddr: u32,
    /// Size of segment in memory
    pub mem_size: u32,
    /// Bytes copied from the image
    pub file_size: u32,
    /// Final permissions
    pub flags: SegmentFlags,
}

impl LoadedSegment {
    /// End of the segment (exclusive).
    pub fn end(&self) -> u32 {
        self.vaddr + self.mem_size
    }
}

/// Result of loading an executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    /// Entry point for process setup
    pub entry: u32,
    /// Segments in table order
    pub segments: Vec<LoadedSegment>,
    /// Initial heap break: first page boundary after the highest segment,
    /// saturating at the top of the address space
    pub brk_start: u32,
}

/// Load `image` into `mapper` with the default configuration.
pub fn load_image<M: AddressSpaceMapper + ?Sized>(image: &[u8], mapper: &mut M) -> Result<LoadedImage> {
    load_image_with(image, mapper, &LoaderConfig::default())
}

/// Load `image` into `mapper`.
///
/// Everything that can be checked without the mapper is checked first, so
/// an image rejected for its layout issues no mapping calls at all. Mapper
/// failures part way through leave earlier segments mapped.
pub fn load_image_with<M: AddressSpaceMapper + ?Sized>(
    image: &[u8],
    mapper: &mut M,
    config: &LoaderConfig,
) -> Result<LoadedImage> {
    let header = validate_with(image, config)?;

    let mut requests: Vec<LoadRequest> = Vec::new();
    for entry in entries(image, &header) {
        let entry = entry?;
        if !entry.is_load() {
            continue;
        }

        let mut request = LoadRequest::from_entry(&entry, image.len())?;
        apply_wx_policy(&mut request, config)?;

        let len = request.mem_size();
        if len > 0 && !config.permits_range(request.vaddr, request.vaddr + len) {
            log::warn!(
                "[ELF32] Segment {:#x}..{:#x} reaches reserved memory",
                request.vaddr,
                request.vaddr + len
            );
            return Err(SegmentFault::ReservedRange.into());
        }

        requests.push(request);
    }

    check_overlap(&requests)?;

    let mut segments = Vec::with_capacity(requests.len());
    for request in &requests {
        request.execute(image, mapper)?;
        segments.push(LoadedSegment {
            vaddr: request.vaddr,
            mem_size: request.mem_size(),
            file_size: request.file_size(),
            flags: request.flags,
        });
    }

    let max_end = segments
        .iter()
        .filter(|s| s.mem_size > 0)
        .map(LoadedSegment::end)
        .max()
        .unwrap_or(0);
    let brk_start = page_align_up(max_end);

    log::debug!(
        "[ELF32] Image loaded: entry={:#x} segments={} brk={:#x}",
        header.entry,
        segments.len(),
        brk_start
    );

    Ok(LoadedImage {
        entry: header.entry,
        segments,
        brk_start,
    })
}

/// Load while holding the address-space lock for the whole attempt.
pub fn load_image_locked<M: AddressSpaceMapper>(
    image: &[u8],
    space: &Mutex<M>,
    config: &LoaderConfig,
) -> Result<LoadedImage> {
    let mut guard = space.lock();
    load_image_with(image, &mut *guard, config)
}

/// Fetch the executable from `source`, then load it.
pub fn load_from_source<S, M>(source: &mut S, mapper: &mut M, config: &LoaderConfig) -> Result<LoadedImage>
where
    S: ByteSource + ?Sized,
    M: AddressSpaceMapper + ?Sized,
{
    let image = source.read_all().map_err(|e| {
        log::warn!("[ELF32] Reading executable failed: {}", e);
        LoadError::IoFailure(e)
    })?;
    load_image_with(&image, mapper, config)
}

fn apply_wx_policy(request: &mut LoadRequest, config: &LoaderConfig) -> Result<()> {
    if !request.flags.is_wx() {
        return Ok(());
    }

    match config.wx_policy {
        WxPolicy::Allow => Ok(()),
        WxPolicy::DropWrite => {
            request.flags.remove(SegmentFlags::WRITE);
            log::warn!(
                "[ELF32] W^X enforcement - segment at {:#x} has W+X, removing W",
                request.vaddr
            );
            Ok(())
        }
        WxPolicy::Reject => Err(SegmentFault::WritableExecutable.into()),
    }
}

/// Reject images whose LOAD segments share any virtual address.
fn check_overlap(requests: &[LoadRequest]) -> Result<()> {
    let mut ranges: Vec<(u32, u32)> = requests
        .iter()
        .filter(|r| r.mem_size() > 0)
        .map(|r| (r.vaddr, r.vaddr + r.mem_size()))
        .collect();
    ranges.sort_unstable_by_key(|&(start, _)| start);

    for pair in ranges.windows(2) {
        let (_, prev_end) = pair[0];
        let (start, _) = pair[1];
        if start < prev_end {
            log::warn!("[ELF32] Segment at {:#x} overlaps previous segment", start);
            return Err(SegmentFault::Overlap.into());
        }
    }

    Ok(())
}

fn page_align_up(addr: u32) -> u32 {
    let mask = PAGE_SIZE - 1;
    addr.checked_add(mask).map_or(u32::MAX, |a| a & !mask)
}
