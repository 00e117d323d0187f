//! Unix page allocator using mmap

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use msu_core::constants::{MAX_PAGES_PER_REQUEST, PAGE_SIZE};
use msu_core::{CachePolicy, MscError, PageAllocator, PageRun, Result};
use nix::errno::Errno;

use super::IovaSpace;

/// Anonymous private mappings, one per run.
///
/// While a run is owned by the device it is locked in memory so the
/// pages cannot move under the writer. Locking is best effort: an
/// unprivileged process may hit RLIMIT_MEMLOCK, which is logged and
/// otherwise ignored.
#[derive(Debug)]
pub struct MmapPages {
    iova: IovaSpace,
    in_use: AtomicUsize,
}

impl MmapPages {
    pub fn new() -> Self {
        Self {
            iova: IovaSpace::new(),
            in_use: AtomicUsize::new(0),
        }
    }
}

impl Default for MmapPages {
    fn default() -> Self {
        Self::new()
    }
}

impl PageAllocator for MmapPages {
    fn alloc(&self, nr_pages: usize) -> Result<PageRun> {
        if nr_pages == 0 || nr_pages > MAX_PAGES_PER_REQUEST {
            return Err(MscError::InvalidArgument("page count"));
        }
        let len = nr_pages * PAGE_SIZE;

        let Some(dma_addr) = self.iova.alloc(nr_pages) else {
            return Err(MscError::NoMemory { pages: nr_pages, errno: Errno::ENOSPC });
        };

        // Anonymous mappings come back zeroed and page-aligned
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MscError::NoMemory { pages: nr_pages, errno: Errno::last() });
        }

        // Keep device pages out of forked children
        #[cfg(target_os = "linux")]
        {
            let ret = unsafe { libc::madvise(base, len, libc::MADV_DONTFORK) };
            if ret != 0 {
                log::warn!("mmap: MADV_DONTFORK failed: {}", Errno::last());
            }
        }

        let Some(base) = NonNull::new(base as *mut u8) else {
            return Err(MscError::NoMemory { pages: nr_pages, errno: Errno::EFAULT });
        };

        self.in_use.fetch_add(nr_pages, Ordering::AcqRel);
        // Safety: fresh mapping of `len` bytes, released only in free()
        Ok(unsafe { PageRun::from_raw(base, nr_pages, dma_addr) })
    }

    fn free(&self, run: PageRun) {
        let ret = unsafe { libc::munmap(run.base().as_ptr() as *mut libc::c_void, run.len()) };
        if ret != 0 {
            log::error!("mmap: munmap of {} page(s) failed: {}", run.nr_pages(), Errno::last());
        }
        self.in_use.fetch_sub(run.nr_pages(), Ordering::AcqRel);
    }

    fn set_policy(&self, run: &PageRun, policy: CachePolicy) -> Result<()> {
        let addr = run.base().as_ptr() as *const libc::c_void;
        let ret = match policy {
            CachePolicy::Uncached => unsafe { libc::mlock(addr, run.len()) },
            CachePolicy::WriteBack => unsafe { libc::munlock(addr, run.len()) },
        };
        if ret != 0 {
            log::warn!(
                "mmap: {:?} policy on {} page(s) not applied: {}",
                policy,
                run.nr_pages(),
                Errno::last()
            );
        }
        Ok(())
    }

    fn pages_in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "mmap"
    }
}
