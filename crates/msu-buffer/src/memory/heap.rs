//! Heap-backed page allocator
//!
//! Page-aligned allocations from the global allocator. Works on every
//! platform and supports a page budget, which makes allocation failure
//! reproducible in tests.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use msu_core::constants::{MAX_PAGES_PER_REQUEST, PAGE_SIZE};
use msu_core::{CachePolicy, MscError, PageAllocator, PageRun, Result};
use nix::errno::Errno;

use super::IovaSpace;

/// Page allocator on top of `std::alloc`
#[derive(Debug)]
pub struct HeapPages {
    iova: IovaSpace,
    /// Maximum pages outstanding at once (None: unlimited)
    limit: Option<usize>,
    in_use: AtomicUsize,
    uncached: AtomicUsize,
}

impl HeapPages {
    pub fn new() -> Self {
        Self {
            iova: IovaSpace::new(),
            limit: None,
            in_use: AtomicUsize::new(0),
            uncached: AtomicUsize::new(0),
        }
    }

    /// Allocator that refuses to hand out more than `pages` at once
    pub fn with_limit(pages: usize) -> Self {
        Self {
            limit: Some(pages),
            ..Self::new()
        }
    }

    /// Pages currently switched to the uncached policy
    pub fn uncached_pages(&self) -> usize {
        self.uncached.load(Ordering::Relaxed)
    }

    fn layout(nr_pages: usize) -> Result<Layout> {
        Layout::from_size_align(nr_pages * PAGE_SIZE, PAGE_SIZE)
            .map_err(|_| MscError::InvalidArgument("page count"))
    }

    fn reserve(&self, nr_pages: usize) -> Result<()> {
        let mut cur = self.in_use.load(Ordering::Relaxed);
        loop {
            let next = cur + nr_pages;
            if matches!(self.limit, Some(limit) if next > limit) {
                return Err(MscError::NoMemory { pages: nr_pages, errno: Errno::ENOMEM });
            }
            match self
                .in_use
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(actual) => cur = actual,
            }
        }
    }
}

impl Default for HeapPages {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator for HeapPages {
    fn alloc(&self, nr_pages: usize) -> Result<PageRun> {
        if nr_pages == 0 || nr_pages > MAX_PAGES_PER_REQUEST {
            return Err(MscError::InvalidArgument("page count"));
        }
        let layout = Self::layout(nr_pages)?;
        self.reserve(nr_pages)?;

        let Some(dma_addr) = self.iova.alloc(nr_pages) else {
            self.in_use.fetch_sub(nr_pages, Ordering::AcqRel);
            return Err(MscError::NoMemory { pages: nr_pages, errno: Errno::ENOSPC });
        };

        // Safety: layout has non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(base) = NonNull::new(ptr) else {
            self.in_use.fetch_sub(nr_pages, Ordering::AcqRel);
            return Err(MscError::NoMemory { pages: nr_pages, errno: Errno::ENOMEM });
        };

        // Safety: page-aligned, zeroed, valid until free()
        Ok(unsafe { PageRun::from_raw(base, nr_pages, dma_addr) })
    }

    fn free(&self, run: PageRun) {
        let nr_pages = run.nr_pages();
        match Self::layout(nr_pages) {
            // Safety: allocated in alloc() with this exact layout
            Ok(layout) => unsafe { alloc::dealloc(run.base().as_ptr(), layout) },
            Err(e) => log::error!("heap: cannot release {} page(s): {}", nr_pages, e),
        }
        self.in_use.fetch_sub(nr_pages, Ordering::AcqRel);
    }

    fn set_policy(&self, run: &PageRun, policy: CachePolicy) -> Result<()> {
        // Heap memory is always cached; only the bookkeeping changes
        match policy {
            CachePolicy::Uncached => self.uncached.fetch_add(run.nr_pages(), Ordering::Relaxed),
            CachePolicy::WriteBack => self.uncached.fetch_sub(run.nr_pages(), Ordering::Relaxed),
        };
        Ok(())
    }

    fn pages_in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "heap"
    }
}
