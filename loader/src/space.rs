//! Page-Backed Address Space
//!
//! A sparse, page-granular [`AddressSpaceMapper`] kept entirely in kernel
//! heap memory. Used wherever an image has to be materialized without a
//! hardware page table behind it: staging buffers, tests, fuzzing.
//!
//! Pages follow the same rules a real page table enforces on the loader:
//! a reserved page is writable until `protect` runs, after which only the
//! segment's own permissions apply. A page shared by two segments ends up
//! with the union of their permissions.
//!
//! Every space has a page budget and all backing memory is allocated
//! fallibly, so an image asking for more than the heap can give gets
//! `MapError::OutOfMemory` instead of an allocation abort.

use alloc::vec::Vec;
use core::ops::RangeInclusive;

use hashbrown::HashMap;

use crate::config::{DEFAULT_PAGE_BUDGET, PAGE_SIZE};
use crate::error::MapError;
use crate::format::SegmentFlags;
use crate::segment_loader::AddressSpaceMapper;

const PAGE_BYTES: usize = PAGE_SIZE as usize;
const PAGE_SHIFT: u32 = PAGE_SIZE.trailing_zeros();

/// One 4 KiB page.
struct Page {
    /// Always exactly `PAGE_BYTES` long
    data: Vec<u8>,
    /// Permissions installed by `protect`
    flags: SegmentFlags,
    /// Reserved and not yet protected
    populating: bool,
}

impl Page {
    fn try_new() -> Result<Self, MapError> {
        let mut data = Vec::new();
        data.try_reserve_exact(PAGE_BYTES)
            .map_err(|_| MapError::OutOfMemory)?;
        data.resize(PAGE_BYTES, 0);

        Ok(Self {
            data,
            flags: SegmentFlags::empty(),
            populating: true,
        })
    }

    fn is_writable(&self) -> bool {
        self.populating || self.flags.contains(SegmentFlags::WRITE)
    }
}

/// Sparse address space backed by heap pages.
pub struct PagedAddressSpace {
    pages: HashMap<u32, Page>,
    max_pages: usize,
}

impl PagedAddressSpace {
    /// Create an empty address space with the default page budget.
    pub fn new() -> Self {
        Self::with_page_limit(DEFAULT_PAGE_BUDGET)
    }

    /// Create an empty address space that refuses to grow past `max_pages`.
    pub fn with_page_limit(max_pages: usize) -> Self {
        Self {
            pages: HashMap::new(),
            max_pages,
        }
    }

    /// Page budget of this space.
    pub fn page_limit(&self) -> usize {
        self.max_pages
    }

    /// Number of pages currently backed.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Check whether the page containing `vaddr` is present.
    pub fn is_mapped(&self, vaddr: u32) -> bool {
        self.pages.contains_key(&(vaddr >> PAGE_SHIFT))
    }

    /// Permissions of the page containing `vaddr`.
    pub fn flags_at(&self, vaddr: u32) -> Option<SegmentFlags> {
        self.pages.get(&(vaddr >> PAGE_SHIFT)).map(|page| page.flags)
    }

    /// Check whether the page containing `vaddr` currently accepts writes.
    pub fn is_writable(&self, vaddr: u32) -> bool {
        self.pages
            .get(&(vaddr >> PAGE_SHIFT))
            .map_or(false, Page::is_writable)
    }

    /// Copy `len` bytes starting at `vaddr` out of the address space.
    pub fn read(&self, vaddr: u32, len: u32) -> Result<Vec<u8>, MapError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        // Only mapped bytes are copied, so the buffer is bounded by the budget
        let span = Self::page_span(vaddr, len)?;
        self.check_span(span, false)?;

        let mut out = Vec::new();
        out.try_reserve_exact(len as usize)
            .map_err(|_| MapError::OutOfMemory)?;
        out.resize(len as usize, 0);

        let mut done = 0usize;
        while done < out.len() {
            let addr = vaddr as usize + done;
            let offset = addr & (PAGE_BYTES - 1);
            let n = core::cmp::min(PAGE_BYTES - offset, out.len() - done);
            let page = self
                .pages
                .get(&((addr >> PAGE_SHIFT) as u32))
                .ok_or(MapError::NotMapped)?;
            out[done..done + n].copy_from_slice(&page.data[offset..offset + n]);
            done += n;
        }

        Ok(out)
    }

    /// Page numbers covered by `[vaddr, vaddr + len)`.
    fn page_span(vaddr: u32, len: u32) -> Result<RangeInclusive<u32>, MapError> {
        if len == 0 {
            return Err(MapError::InvalidRange);
        }
        let end = vaddr as u64 + len as u64;
        if end > 1u64 << 32 {
            return Err(MapError::InvalidRange);
        }
        let first = vaddr >> PAGE_SHIFT;
        let last = ((end - 1) >> PAGE_SHIFT) as u32;
        Ok(first..=last)
    }

    /// Fail unless every page in the span is present (and writable, if asked).
    fn check_span(&self, span: RangeInclusive<u32>, need_write: bool) -> Result<(), MapError> {
        for number in span {
            let page = self.pages.get(&number).ok_or(MapError::NotMapped)?;
            if need_write && !page.is_writable() {
                return Err(MapError::PermissionDenied);
            }
        }
        Ok(())
    }

    /// Run `fill` over each page-sized chunk of `[vaddr, vaddr + len)`.
    /// The span must have been checked already.
    fn fill_chunks<F>(&mut self, vaddr: u32, len: u32, mut fill: F) -> Result<(), MapError>
    where
        F: FnMut(&mut [u8], usize),
    {
        let len = len as usize;
        let mut done = 0usize;
        while done < len {
            let addr = vaddr as usize + done;
            let offset = addr & (PAGE_BYTES - 1);
            let n = core::cmp::min(PAGE_BYTES - offset, len - done);
            let page = self
                .pages
                .get_mut(&((addr >> PAGE_SHIFT) as u32))
                .ok_or(MapError::NotMapped)?;
            fill(&mut page.data[offset..offset + n], done);
            done += n;
        }
        Ok(())
    }
}

impl Default for PagedAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpaceMapper for PagedAddressSpace {
    fn reserve(&mut self, vaddr: u32, len: u32, _flags: SegmentFlags) -> Result<(), MapError> {
        let span = Self::page_span(vaddr, len)?;

        let room = self.max_pages.saturating_sub(self.pages.len());
        // Stop counting once the budget is blown; spans can cover the whole space
        let missing = span
            .clone()
            .filter(|number| !self.pages.contains_key(number))
            .take(room.saturating_add(1))
            .count();
        if missing > room {
            log::warn!(
                "[ELF32] Page budget exhausted: {} pages in use, limit {}",
                self.pages.len(),
                self.max_pages
            );
            return Err(MapError::OutOfMemory);
        }

        // Allocate everything up front so a failure leaves the space untouched
        let mut fresh: Vec<(u32, Page)> = Vec::new();
        fresh
            .try_reserve_exact(missing)
            .map_err(|_| MapError::OutOfMemory)?;
        for number in span.clone() {
            if !self.pages.contains_key(&number) {
                fresh.push((number, Page::try_new()?));
            }
        }
        self.pages
            .try_reserve(missing)
            .map_err(|_| MapError::OutOfMemory)?;

        for (number, page) in fresh {
            self.pages.insert(number, page);
        }
        for number in span {
            if let Some(page) = self.pages.get_mut(&number) {
                page.populating = true;
            }
        }

        Ok(())
    }

    fn write(&mut self, vaddr: u32, data: &[u8]) -> Result<(), MapError> {
        if data.is_empty() {
            return Ok(());
        }
        let len = u32::try_from(data.len()).map_err(|_| MapError::InvalidRange)?;
        let span = Self::page_span(vaddr, len)?;
        self.check_span(span, true)?;

        self.fill_chunks(vaddr, len, |chunk, at| {
            chunk.copy_from_slice(&data[at..at + chunk.len()]);
        })
    }

    fn zero_fill(&mut self, vaddr: u32, len: u32) -> Result<(), MapError> {
        if len == 0 {
            return Ok(());
        }
        let span = Self::page_span(vaddr, len)?;
        self.check_span(span, true)?;

        self.fill_chunks(vaddr, len, |chunk, _| chunk.fill(0))
    }

    fn protect(&mut self, vaddr: u32, len: u32, flags: SegmentFlags) -> Result<(), MapError> {
        let span = Self::page_span(vaddr, len)?;
        self.check_span(span.clone(), false)?;

        for number in span {
            if let Some(page) = self.pages.get_mut(&number) {
                page.flags |= flags;
                page.populating = false;
            }
        }

        Ok(())
    }
}
