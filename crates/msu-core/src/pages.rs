//! Page allocation abstraction.
//!
//! A `PageAllocator` hands out runs of zeroed, page-aligned memory that
//! the device can address. Each run carries the device (bus) address of
//! its first page; pages inside a run are contiguous both in the CPU view
//! and in the device view.
//!
//! # Implementors
//!
//! - `HeapPages` (msu-buffer): page-aligned heap allocations, optional
//!   page budget. Simple, works everywhere.
//! - `MmapPages` (msu-buffer, unix): anonymous mappings, locked and
//!   excluded from fork while the device owns them.

use core::ptr::NonNull;

use crate::constants::{PAGE_SHIFT, PAGE_SIZE};
use crate::error::Result;

/// Cache policy applied to a run while the device owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Normal cached memory (state before allocation and after release)
    WriteBack,
    /// Device-visible memory outside normal cache coherency
    Uncached,
}

/// A run of contiguous pages owned by whoever holds this value.
///
/// Not `Clone`: the run is returned to its allocator exactly once, by value.
#[derive(Debug)]
pub struct PageRun {
    base: NonNull<u8>,
    nr_pages: usize,
    dma_addr: u64,
}

// Safety: a run is plain memory; synchronization of its contents is the
// owner's business.
unsafe impl Send for PageRun {}
unsafe impl Sync for PageRun {}

impl PageRun {
    /// Wrap an allocation.
    ///
    /// # Safety
    /// - `base` must be page-aligned and valid for `nr_pages * PAGE_SIZE`
    ///   bytes until the run is handed back to its allocator.
    /// - `dma_addr` must be page-aligned.
    pub unsafe fn from_raw(base: NonNull<u8>, nr_pages: usize, dma_addr: u64) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % PAGE_SIZE, 0);
        debug_assert_eq!(dma_addr % PAGE_SIZE as u64, 0);
        Self { base, nr_pages, dma_addr }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn nr_pages(&self) -> usize {
        self.nr_pages
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.nr_pages * PAGE_SIZE
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nr_pages == 0
    }

    /// Device address of the first page
    #[inline]
    pub fn dma_addr(&self) -> u64 {
        self.dma_addr
    }

    /// CPU pointer to page `i` of the run
    #[inline]
    pub fn page_ptr(&self, i: usize) -> NonNull<u8> {
        assert!(i < self.nr_pages, "page {} outside run of {}", i, self.nr_pages);
        // Safety: in bounds of the allocation per from_raw's contract
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(i * PAGE_SIZE)) }
    }

    /// Device address of page `i` of the run
    #[inline]
    pub fn page_addr(&self, i: usize) -> u64 {
        self.dma_addr + ((i as u64) << PAGE_SHIFT)
    }
}

/// Source of device-visible pages.
///
/// **Contract:**
/// - `alloc()` returns zeroed, page-aligned memory with a device address
///   that fits the 32-bit frame-number registers.
/// - `free()` takes the run back; callers reset it to write-back first.
/// - Allocation failures are reported, never panicked on.
pub trait PageAllocator: Send + Sync {
    /// Allocate `nr_pages` contiguous pages
    fn alloc(&self, nr_pages: usize) -> Result<PageRun>;

    /// Return a run to the allocator
    fn free(&self, run: PageRun);

    /// Switch the cache policy of a run
    fn set_policy(&self, run: &PageRun, policy: CachePolicy) -> Result<()>;

    /// Pages currently handed out
    fn pages_in_use(&self) -> usize;

    /// Allocator name, for diagnostics
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_run_addressing() {
        let layout = std::alloc::Layout::from_size_align(3 * PAGE_SIZE, PAGE_SIZE).unwrap();
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let base = NonNull::new(ptr).unwrap();
        let run = unsafe { PageRun::from_raw(base, 3, 0x4000_0000) };

        assert_eq!(run.len(), 3 * PAGE_SIZE);
        assert_eq!(run.page_addr(0), 0x4000_0000);
        assert_eq!(run.page_addr(2), 0x4000_2000);
        assert_eq!(run.page_ptr(1).as_ptr() as usize - ptr as usize, PAGE_SIZE);

        unsafe { std::alloc::dealloc(ptr, layout) };
    }
}
