//! Trace buffer storage: pages, windows and the buffer that owns them
//!
//! A `TraceBuffer` owns every page run it allocated and gives them back to
//! the allocator on drop, so a half-built buffer rolls itself back on the
//! error path.
//!
//! ```text
//!   single:  [page 0][page 1] ... [page n-1]           one run
//!   multi:   window 0 [blk 0][blk 1]                   one run per window
//!            window 1 [blk 0][blk 1][blk 2]
//!            ...
//! ```
//!
//! Logical page offsets number the pages of the whole buffer in window
//! order; they are what a memory mapping sees.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use msu_core::constants::{DATA_IN_PAGE, MAX_PAGES_PER_REQUEST, MSC_BDESC, PAGE_SHIFT, PAGE_SIZE};
use msu_core::desc::HW_HEADER_OFFSET;
use msu_core::{BlockDesc, CachePolicy, Mode, MscError, PageAllocator, PageRun, Result};

/// Owner value of a page no mapping has faulted in
const NO_OWNER: u64 = 0;

/// One page of the buffer
pub struct PageSlot {
    ptr: NonNull<u8>,
    addr: u64,
    owner: AtomicU64,
    pins: AtomicUsize,
}

// Safety: the page is plain memory shared with the device; all access goes
// through volatile accessors or snapshot copies.
unsafe impl Send for PageSlot {}
unsafe impl Sync for PageSlot {}

impl PageSlot {
    fn new(ptr: NonNull<u8>, addr: u64) -> Self {
        Self {
            ptr,
            addr,
            owner: AtomicU64::new(NO_OWNER),
            pins: AtomicUsize::new(0),
        }
    }

    /// Device address of the page
    #[inline]
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Page frame number as programmed into descriptors and registers
    #[inline]
    pub fn pfn(&self) -> u32 {
        (self.addr >> PAGE_SHIFT) as u32
    }

    /// CPU address of the page
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Snapshot of the block descriptor
    #[inline]
    pub fn desc(&self) -> BlockDesc {
        // Safety: page-aligned, at least 64 bytes, alive as long as self
        unsafe { ptr::read_volatile(self.ptr.as_ptr() as *const BlockDesc) }
    }

    #[inline]
    pub fn write_desc(&self, desc: &BlockDesc) {
        unsafe { ptr::write_volatile(self.ptr.as_ptr() as *mut BlockDesc, *desc) }
    }

    /// Zero the device-owned half of the descriptor
    pub fn clear_hw_header(&self) {
        let words = (MSC_BDESC - HW_HEADER_OFFSET) / 4;
        for i in 0..words {
            unsafe {
                let p = self.ptr.as_ptr().add(HW_HEADER_OFFSET + i * 4) as *mut u32;
                ptr::write_volatile(p, 0);
            }
        }
    }

    /// Copy payload bytes starting at payload offset `start` into `out`.
    ///
    /// The device or a mapping may be writing the page; the copy holds
    /// whatever the memory contains at the time, and no reference into
    /// the shared page outlives the call.
    pub fn copy_payload(&self, start: usize, out: &mut [u8]) {
        assert!(
            start <= DATA_IN_PAGE && out.len() <= DATA_IN_PAGE - start,
            "payload range {}..{} outside block",
            start,
            start + out.len()
        );
        // Safety: bounds checked above, `out` is caller memory
        unsafe {
            ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(MSC_BDESC + start),
                out.as_mut_ptr(),
                out.len(),
            );
        }
    }

    /// Device-side store into the page, at a byte offset
    pub(crate) fn store(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= PAGE_SIZE, "store past end of page");
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
    }

    /// Mapping session that last faulted this page in
    pub fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            id => Some(id),
        }
    }

    /// Outstanding mapping references
    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    pub(crate) fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "page {:#x} unpinned without pin", self.addr);
    }

    pub(crate) fn set_owner(&self, id: u64) {
        self.owner.store(id, Ordering::Release);
    }

    /// Drop the owner link if `id` still holds it
    pub(crate) fn clear_owner(&self, id: u64) -> bool {
        self.owner
            .compare_exchange(id, NO_OWNER, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One multi-mode window: blocks allocated together as a run
pub struct Window {
    pgoff: usize,
    blocks: Vec<PageSlot>,
}

impl Window {
    /// Logical page offset of the first block
    #[inline]
    pub fn pgoff(&self) -> usize {
        self.pgoff
    }

    #[inline]
    pub fn nr_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn block(&self, blk: usize) -> &PageSlot {
        &self.blocks[blk]
    }

    #[inline]
    pub fn blocks(&self) -> &[PageSlot] {
        &self.blocks
    }

    /// Device address of the first block
    #[inline]
    pub fn base_addr(&self) -> u64 {
        self.blocks[0].addr()
    }

    #[inline]
    pub fn contains(&self, pgoff: usize) -> bool {
        pgoff >= self.pgoff && pgoff < self.pgoff + self.blocks.len()
    }
}

/// Backing storage for one MSC
pub struct TraceBuffer {
    mode: Mode,
    /// Multi mode windows, in link order (empty in single mode)
    windows: Vec<Window>,
    /// Single mode pages (empty in multi mode)
    pages: Vec<PageSlot>,
    runs: Vec<PageRun>,
    nr_pages: usize,
    alloc: Arc<dyn PageAllocator>,
}

impl TraceBuffer {
    /// Allocate storage for `mode` from a list of window sizes in pages
    pub fn alloc(alloc: Arc<dyn PageAllocator>, mode: Mode, sizes: &[usize]) -> Result<Self> {
        match mode {
            Mode::Single => match sizes {
                [nr_pages] => Self::single(alloc, *nr_pages),
                _ => Err(MscError::InvalidArgument("single mode takes exactly one size")),
            },
            Mode::Multi => Self::multi(alloc, sizes),
            other => Err(MscError::Unsupported(other.raw())),
        }
    }

    /// One contiguous region of `nr_pages`
    pub fn single(alloc: Arc<dyn PageAllocator>, nr_pages: usize) -> Result<Self> {
        let mut buf = Self::empty(alloc, Mode::Single);
        buf.pages = buf.push_run(nr_pages)?;
        buf.nr_pages = nr_pages;
        Ok(buf)
    }

    /// One window per entry of `sizes`, linked into a ring
    ///
    /// Any failure drops the windows allocated so far.
    pub fn multi(alloc: Arc<dyn PageAllocator>, sizes: &[usize]) -> Result<Self> {
        if sizes.is_empty() {
            return Err(MscError::InvalidArgument("no windows"));
        }

        let mut buf = Self::empty(alloc, Mode::Multi);
        for &nr_blocks in sizes {
            let blocks = buf.push_run(nr_blocks)?;
            buf.windows.push(Window {
                pgoff: buf.nr_pages,
                blocks,
            });
            buf.nr_pages += nr_blocks;
        }

        crate::topology::relink(&buf.windows);
        Ok(buf)
    }

    fn empty(alloc: Arc<dyn PageAllocator>, mode: Mode) -> Self {
        Self {
            mode,
            windows: Vec::new(),
            pages: Vec::new(),
            runs: Vec::new(),
            nr_pages: 0,
            alloc,
        }
    }

    /// Allocate a run, switch it to uncached, and keep it for release
    fn push_run(&mut self, nr_pages: usize) -> Result<Vec<PageSlot>> {
        if nr_pages == 0 {
            return Err(MscError::InvalidArgument("zero-page window"));
        }
        if nr_pages > MAX_PAGES_PER_REQUEST {
            return Err(MscError::InvalidArgument("window too large"));
        }

        let run = self.alloc.alloc(nr_pages).map_err(|e| {
            log::error!("{}: allocating {} page(s) failed: {}", self.alloc.name(), nr_pages, e);
            e
        })?;

        if let Err(e) = self.alloc.set_policy(&run, CachePolicy::Uncached) {
            log::error!("{}: uncached policy failed: {}", self.alloc.name(), e);
            self.alloc.free(run);
            return Err(e);
        }

        let slots = (0..nr_pages)
            .map(|i| PageSlot::new(run.page_ptr(i), run.page_addr(i)))
            .collect();
        self.runs.push(run);
        Ok(slots)
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Total pages across all windows
    #[inline]
    pub fn nr_pages(&self) -> usize {
        self.nr_pages
    }

    /// Total size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.nr_pages << PAGE_SHIFT
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nr_pages == 0
    }

    #[inline]
    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// Pages of a single mode buffer
    #[inline]
    pub fn pages(&self) -> &[PageSlot] {
        &self.pages
    }

    /// Device address programmed into BAR
    pub fn base_addr(&self) -> u64 {
        match self.mode {
            Mode::Single => self.pages.first().map_or(0, PageSlot::addr),
            _ => self.windows.first().map_or(0, Window::base_addr),
        }
    }

    /// Window sizes in pages, in link order
    pub fn window_sizes(&self) -> Vec<usize> {
        match self.mode {
            Mode::Single => vec![self.nr_pages],
            _ => self.windows.iter().map(Window::nr_blocks).collect(),
        }
    }

    /// Page at a logical page offset
    pub fn get_page(&self, pgoff: usize) -> Option<&PageSlot> {
        if self.mode == Mode::Single {
            return self.pages.get(pgoff);
        }
        let win = self.windows.iter().find(|w| w.contains(pgoff))?;
        Some(win.block(pgoff - win.pgoff))
    }

    /// Copy bytes of a single mode buffer, from byte offset `start`.
    ///
    /// Returns false (copying nothing) for multi mode or a range past the
    /// end. Like `PageSlot::copy_payload`, no reference into the buffer
    /// outlives the call.
    pub fn copy_out(&self, start: usize, out: &mut [u8]) -> bool {
        if self.mode != Mode::Single || start > self.len() || out.len() > self.len() - start {
            return false;
        }
        let Some(first) = self.pages.first() else {
            return false;
        };
        // Safety: single mode pages are one run, bounds checked above
        unsafe {
            ptr::copy_nonoverlapping(first.as_ptr().as_ptr().add(start), out.as_mut_ptr(), out.len());
        }
        true
    }

    /// Every page in logical order
    pub fn iter_pages(&self) -> impl Iterator<Item = &PageSlot> {
        self.pages
            .iter()
            .chain(self.windows.iter().flat_map(|w| w.blocks.iter()))
    }
}

impl Drop for TraceBuffer {
    fn drop(&mut self) {
        let pinned = self.iter_pages().filter(|p| p.pins() > 0).count();
        if pinned > 0 {
            log::warn!("releasing buffer with {} pinned page(s)", pinned);
        }

        for run in self.runs.drain(..) {
            if let Err(e) = self.alloc.set_policy(&run, CachePolicy::WriteBack) {
                log::warn!("{}: write-back reset failed: {}", self.alloc.name(), e);
            }
            self.alloc.free(run);
        }
    }
}

impl std::fmt::Debug for TraceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceBuffer")
            .field("mode", &self.mode)
            .field("nr_pages", &self.nr_pages)
            .field("windows", &self.window_sizes())
            .field("allocator", &self.alloc.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapPages;

    #[test]
    fn test_multi_layout() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::multi(heap.clone(), &[2, 3, 1]).unwrap();

        assert_eq!(buf.nr_pages(), 6);
        assert_eq!(buf.len(), 6 * PAGE_SIZE);
        assert_eq!(buf.window_sizes(), vec![2, 3, 1]);
        assert_eq!(buf.windows()[1].pgoff(), 2);
        assert_eq!(buf.windows()[2].pgoff(), 5);
        assert_eq!(heap.pages_in_use(), 6);
        assert_eq!(heap.uncached_pages(), 6);

        // blocks of a window are contiguous
        let w = &buf.windows()[1];
        assert_eq!(w.block(1).addr(), w.block(0).addr() + PAGE_SIZE as u64);
        assert_eq!(w.block(2).addr(), w.block(0).addr() + 2 * PAGE_SIZE as u64);

        drop(buf);
        assert_eq!(heap.pages_in_use(), 0);
        assert_eq!(heap.uncached_pages(), 0);
    }

    #[test]
    fn test_get_page() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::multi(heap, &[2, 3]).unwrap();
        assert_eq!(buf.get_page(0).unwrap().addr(), buf.windows()[0].block(0).addr());
        assert_eq!(buf.get_page(3).unwrap().addr(), buf.windows()[1].block(1).addr());
        assert!(buf.get_page(5).is_none());
    }

    #[test]
    fn test_multi_rollback() {
        let heap = Arc::new(HeapPages::with_limit(5));
        let err = TraceBuffer::multi(heap.clone(), &[2, 2, 2]).unwrap_err();
        assert!(matches!(err, MscError::NoMemory { pages: 2, .. }));
        assert_eq!(heap.pages_in_use(), 0);
        assert_eq!(heap.uncached_pages(), 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let heap = Arc::new(HeapPages::new());
        let err = TraceBuffer::multi(heap.clone(), &[2, 0]).unwrap_err();
        assert_eq!(err, MscError::InvalidArgument("zero-page window"));
        assert_eq!(heap.pages_in_use(), 0);

        assert!(TraceBuffer::single(heap.clone(), 0).is_err());
        assert!(TraceBuffer::multi(heap, &[]).is_err());
    }

    #[test]
    fn test_alloc_dispatch() {
        let heap = Arc::new(HeapPages::new());
        assert_eq!(
            TraceBuffer::alloc(heap.clone(), Mode::Single, &[1, 2]).unwrap_err(),
            MscError::InvalidArgument("single mode takes exactly one size")
        );
        assert_eq!(
            TraceBuffer::alloc(heap.clone(), Mode::Exi, &[1]).unwrap_err(),
            MscError::Unsupported(2)
        );

        let buf = TraceBuffer::alloc(heap, Mode::Single, &[4]).unwrap();
        assert_eq!(buf.mode(), Mode::Single);
        assert!(buf.windows().is_empty());
        assert_eq!(buf.pages().len(), 4);
        assert_eq!(buf.window_sizes(), vec![4]);
        assert_eq!(buf.base_addr(), buf.pages()[0].addr());
    }

    #[test]
    fn test_copy_out_single() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::single(heap.clone(), 2).unwrap();
        buf.pages()[1].store(0, b"xyz");
        let mut out = [0u8; 3];
        assert!(buf.copy_out(PAGE_SIZE, &mut out));
        assert_eq!(&out, b"xyz");
        assert!(!buf.copy_out(2 * PAGE_SIZE - 1, &mut out));

        let multi = TraceBuffer::multi(heap, &[1]).unwrap();
        assert!(!multi.copy_out(0, &mut out));
    }

    #[test]
    fn test_copy_payload() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::multi(heap, &[1]).unwrap();
        let blk = buf.windows()[0].block(0);
        blk.store(MSC_BDESC + 4, b"data");
        let mut out = [0u8; 4];
        blk.copy_payload(4, &mut out);
        assert_eq!(&out, b"data");
    }

    #[test]
    fn test_descriptor_access() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::single(heap, 1).unwrap();
        let page = &buf.pages()[0];

        let mut d = BlockDesc::zeroed();
        d.sw_tag = 3;
        d.hw_tag = 0x1f;
        d.valid_dw = 100;
        page.write_desc(&d);
        assert_eq!(page.desc(), d);

        page.clear_hw_header();
        let d = page.desc();
        assert_eq!(d.sw_tag, 3);
        assert_eq!(d.hw_tag, 0);
        assert_eq!(d.valid_dw, 0);
    }

    #[test]
    fn test_owner_links() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::single(heap, 1).unwrap();
        let page = &buf.pages()[0];
        assert_eq!(page.owner(), None);

        page.set_owner(7);
        assert!(!page.clear_owner(8));
        assert_eq!(page.owner(), Some(7));
        assert!(page.clear_owner(7));
        assert_eq!(page.owner(), None);
    }
}
