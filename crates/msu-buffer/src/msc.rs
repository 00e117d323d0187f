//! MSC buffer coordinator
//!
//! Owns the buffer of one MSC and gates every change to it.
//!
//! # Locking
//!
//! - `inner` (mutex): allocation and free, mode changes, enable and
//!   disable, reader attach and detach. Never held while copying data.
//! - `usage` (lock-free): keeps the buffer alive for capture, readers and
//!   mappings. Locators and readers only need a usage reference.
//!
//! ```text
//!   alloc          Unallocated -> Idle
//!   activate       +1          deactivate  -1
//!   open reader    +1          reader drop -1
//!   map            +1          last unmap  -1
//!   free           Idle -> Unallocated (refused while anyone holds +1)
//! ```

use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use msu_core::constants::{PAGE_SHIFT, PAGE_SIZE, PLE_WAITLOOP_DEPTH};
use msu_core::regs::{
    MSCSTS_PLE, MSCSTS_WRAPSTAT, MSC_EN, MSC_LEN, MSC_LEN_SHIFT, MSC_MODE, MSC_MODE_SHIFT,
    MSC_RD_HDR_OVRD, MSC_WRAPEN,
};
use msu_core::{FreeOutcome, Mode, MscError, MscReg, MscRegisters, PageAllocator, Result, UsageCounter, UsageState};

use crate::config::{self, defaults, MscConfig};
use crate::locate::{self, BlockPos};
use crate::topology;
use crate::window::TraceBuffer;

/// State changed only under the buffer mutex
pub(crate) struct MscInner {
    pub(crate) mode: Mode,
    pub(crate) wrap: bool,
    pub(crate) burst_len: u32,
    pub(crate) max_blocks: usize,
    pub(crate) readers: usize,
    pub(crate) buffer: Option<Arc<TraceBuffer>>,
}

/// One Memory Storage Controller and its trace buffer
pub struct Msc<R: MscRegisters> {
    pub(crate) regs: R,
    alloc: Arc<dyn PageAllocator>,
    pub(crate) usage: UsageCounter,
    pub(crate) mmap_count: AtomicUsize,
    enabled: AtomicBool,
    /// Next window start address captured at disable
    nwsa: AtomicU64,
    /// Single mode write size captured at disable
    pub(crate) single_sz: AtomicUsize,
    /// Single mode wrap status captured at disable
    pub(crate) single_wrap: AtomicBool,
    pub(crate) next_map_id: AtomicU64,
    pub(crate) inner: Mutex<MscInner>,
}

impl<R: MscRegisters> Msc<R> {
    /// Bind to an MSC. No buffer is allocated; burst length is taken from
    /// the hardware.
    pub fn new(regs: R, alloc: Arc<dyn PageAllocator>) -> Self {
        let burst_len = (regs.read(MscReg::Ctl) & MSC_LEN) >> MSC_LEN_SHIFT;

        Self {
            regs,
            alloc,
            usage: UsageCounter::new(),
            mmap_count: AtomicUsize::new(0),
            enabled: AtomicBool::new(false),
            nwsa: AtomicU64::new(0),
            single_sz: AtomicUsize::new(0),
            single_wrap: AtomicBool::new(false),
            next_map_id: AtomicU64::new(1),
            inner: Mutex::new(MscInner {
                mode: Mode::Multi,
                wrap: false,
                burst_len,
                max_blocks: 0,
                readers: 0,
                buffer: None,
            }),
        }
    }

    /// Bind to an MSC and allocate the configured buffer
    pub fn with_config(regs: R, alloc: Arc<dyn PageAllocator>, config: &MscConfig) -> Result<Self> {
        config.validate()?;

        let msc = Self::new(regs, alloc);
        {
            let mut inner = msc.lock();
            inner.mode = config.mode;
            inner.wrap = config.wrap;
            if let Some(len) = config.burst_len {
                inner.burst_len = len;
            }
        }
        msc.configure_buffer(&config.nr_pages)?;
        Ok(msc)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MscInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    /// Change the operating mode, freeing the buffer first
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        let mut inner = self.lock();
        self.free_unless_used_locked(&mut inner)?;
        inner.mode = mode;
        Ok(())
    }

    pub fn wrap(&self) -> bool {
        self.lock().wrap
    }

    /// Takes effect at the next activation
    pub fn set_wrap(&self, wrap: bool) {
        self.lock().wrap = wrap;
    }

    pub fn burst_len(&self) -> u32 {
        self.lock().burst_len
    }

    /// Takes effect at the next activation
    pub fn set_burst_len(&self, len: u32) -> Result<()> {
        if len > defaults::MAX_BURST_LEN {
            return Err(MscError::InvalidArgument("burst_len must be <= 7"));
        }
        self.lock().burst_len = len;
        Ok(())
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn usage(&self) -> UsageState {
        self.usage.state()
    }

    /// Live mapping handles
    pub fn mmap_count(&self) -> usize {
        self.mmap_count.load(Ordering::Acquire)
    }

    /// Attached streaming readers
    pub fn readers(&self) -> usize {
        self.lock().readers
    }

    /// Total pages of the current buffer (0 without one)
    pub fn nr_pages(&self) -> usize {
        self.lock().buffer.as_ref().map_or(0, |b| b.nr_pages())
    }

    /// Largest configured window, in blocks
    pub fn max_blocks(&self) -> usize {
        self.lock().max_blocks
    }

    /// Size of the biggest block
    pub fn block_max_size(&self) -> usize {
        PAGE_SIZE
    }

    /// Current buffer, if any
    pub fn buffer(&self) -> Option<Arc<TraceBuffer>> {
        self.lock().buffer.clone()
    }

    /// Allocate a buffer for the current mode; the buffer must not exist
    pub fn alloc_buffer(&self, sizes: &[usize]) -> Result<()> {
        let mut inner = self.lock();
        self.alloc_locked(&mut inner, sizes)
    }

    /// Replace the buffer with one of the given window sizes
    pub fn configure_buffer(&self, sizes: &[usize]) -> Result<()> {
        let mut inner = self.lock();
        self.free_unless_used_locked(&mut inner)?;
        inner.max_blocks = 0;
        self.alloc_locked(&mut inner, sizes)
    }

    /// Replace the buffer from the text form of the window sizes
    pub fn set_window_sizes(&self, text: &str) -> Result<()> {
        let sizes = config::parse_window_sizes(text, self.mode())?;
        self.configure_buffer(&sizes)
    }

    /// Text form of the window sizes
    pub fn window_sizes(&self) -> String {
        let inner = self.lock();
        match inner.mode {
            Mode::Single => {
                let nr_pages = inner.buffer.as_ref().map_or(0, |b| b.nr_pages());
                format!("{}\n", nr_pages)
            }
            Mode::Multi => match &inner.buffer {
                Some(buf) => config::format_window_sizes(&buf.window_sizes()),
                None => String::new(),
            },
            _ => "unsupported\n".to_string(),
        }
    }

    /// Free the buffer unless someone is using it
    pub fn free_unless_used(&self) -> Result<()> {
        let mut inner = self.lock();
        self.free_unless_used_locked(&mut inner)
    }

    fn alloc_locked(&self, inner: &mut MscInner, sizes: &[usize]) -> Result<()> {
        if self.usage.state() != UsageState::Unallocated {
            return Err(MscError::Busy);
        }

        let buf = TraceBuffer::alloc(Arc::clone(&self.alloc), inner.mode, sizes)?;

        // the allocation must be visible before the counter leaves Unallocated
        fence(Ordering::SeqCst);
        inner.buffer = Some(Arc::new(buf));
        if let Err(e) = self.usage.mark_allocated() {
            log::error!("usage counter changed during allocation");
            inner.buffer = None;
            return Err(e);
        }

        self.reset_capture_state();
        inner.max_blocks = sizes.iter().copied().max().unwrap_or(0);
        log::debug!("{} buffer allocated: {:?}", inner.mode, sizes);
        Ok(())
    }

    fn free_unless_used_locked(&self, inner: &mut MscInner) -> Result<()> {
        match self.usage.try_free() {
            FreeOutcome::Freed => {
                inner.buffer = None;
                self.reset_capture_state();
                log::debug!("{} buffer freed", inner.mode);
                Ok(())
            }
            FreeOutcome::Busy => Err(MscError::Busy),
            FreeOutcome::NotAllocated => Ok(()),
        }
    }

    /// Forget what the last capture left behind; it described the old buffer
    fn reset_capture_state(&self) {
        self.single_sz.store(0, Ordering::Release);
        self.single_wrap.store(false, Ordering::Release);
        self.nwsa.store(0, Ordering::Release);
    }

    /// Start capture into the buffer.
    ///
    /// Refused while readers are attached or capture is already running.
    pub fn activate(&self) -> Result<()> {
        self.usage.acquire()?;

        let ret = {
            let inner = self.lock();
            if inner.readers > 0 || self.is_enabled() {
                Err(MscError::Busy)
            } else {
                self.configure_locked(&inner)
            }
        };

        if ret.is_err() {
            self.usage.release();
        }
        ret
    }

    /// Stop capture; nothing happens if it is not running
    pub fn deactivate(&self) {
        let inner = self.lock();
        if self.is_enabled() {
            self.disable_locked(&inner);
            self.usage.release();
        }
    }

    fn configure_locked(&self, inner: &MscInner) -> Result<()> {
        if !inner.mode.has_buffer() {
            return Err(MscError::Unsupported(inner.mode.raw()));
        }
        let buf = inner.buffer.as_ref().ok_or(MscError::NotReady)?;

        if inner.mode == Mode::Multi {
            topology::clear_hw_headers(buf.windows());
        }
        // descriptors must reach memory before the device is pointed at them
        fence(Ordering::SeqCst);

        self.regs.write(MscReg::Bar, (buf.base_addr() >> PAGE_SHIFT) as u32);
        if inner.mode == Mode::Single {
            self.regs.write(MscReg::Size, buf.nr_pages() as u32);
        }

        let mut set = MSC_EN;
        set |= inner.mode.raw() << MSC_MODE_SHIFT;
        set |= (inner.burst_len << MSC_LEN_SHIFT) & MSC_LEN;
        if inner.wrap {
            set |= MSC_WRAPEN;
        }
        self.regs
            .modify(MscReg::Ctl, MSC_MODE | MSC_WRAPEN | MSC_EN | MSC_RD_HDR_OVRD | MSC_LEN, set);

        self.enabled.store(true, Ordering::Release);
        log::debug!("capture enabled: {} mode, wrap {}, burst {}", inner.mode, inner.wrap, inner.burst_len);
        Ok(())
    }

    fn disable_locked(&self, inner: &MscInner) {
        if inner.mode == Mode::Single {
            let sts = self.regs.read(MscReg::Sts);
            let mwp = self.regs.read(MscReg::Mwp);
            let (base, size) = inner
                .buffer
                .as_ref()
                .map_or((0, 0), |b| (b.base_addr(), b.len()));

            let wrapped = sts & MSCSTS_WRAPSTAT != 0;
            let single_sz = (mwp as u64).saturating_sub(base).min(size as u64) as usize;
            self.single_wrap.store(wrapped, Ordering::Release);
            self.single_sz.store(single_sz, Ordering::Release);
            log::debug!("MSCnMWP: {:08x}/{:08x}, wrap: {}", mwp, single_sz, wrapped);
        }

        let nwsa = (self.regs.read(MscReg::Nwsa) as u64) << PAGE_SHIFT;
        self.nwsa.store(nwsa, Ordering::Release);

        self.regs.modify(MscReg::Ctl, MSC_EN, 0);
        self.enabled.store(false, Ordering::Release);

        self.regs.write(MscReg::Bar, 0);
        self.regs.write(MscReg::Size, 0);

        log::debug!("MSCnNWSA: {:08x}", nwsa);
        log::debug!("MSCnSTS: {:08x}", self.regs.read(MscReg::Sts));
    }

    /// Address of the window that will be written next
    pub(crate) fn marker(&self) -> u64 {
        if self.is_enabled() {
            (self.regs.read(MscReg::Nwsa) as u64) << PAGE_SHIFT
        } else {
            self.nwsa.load(Ordering::Acquire)
        }
    }

    /// Window the device is writing to (multi mode)
    pub fn current_window(&self) -> Option<usize> {
        let _usage = self.usage.acquire_ref().ok()?;
        let buf = self.buffer()?;
        let nwsa = (self.regs.read(MscReg::Nwsa) as u64) << PAGE_SHIFT;
        locate::current_window(buf.windows(), nwsa)
    }

    /// Window holding the oldest data (multi mode)
    pub fn oldest_window(&self) -> Option<usize> {
        let _usage = self.usage.acquire_ref().ok()?;
        let buf = self.buffer()?;
        locate::oldest_window(buf.windows(), self.marker())
    }

    /// Capture running in multi mode: buffer snapshot for the locators
    fn capturing_multi(&self) -> Result<Arc<TraceBuffer>> {
        if !self.is_enabled() {
            return Err(MscError::InvalidArgument("capture not running"));
        }
        let buf = self.buffer().ok_or(MscError::NotReady)?;
        if buf.mode() != Mode::Multi {
            return Err(MscError::InvalidArgument("not in multi mode"));
        }
        Ok(buf)
    }

    /// Valid bytes in the window being written
    pub fn current_window_bytes(&self) -> Result<usize> {
        let _usage = self.usage.acquire_ref()?;
        let buf = self.capturing_multi()?;
        let windows = buf.windows();

        let nwsa = (self.regs.read(MscReg::Nwsa) as u64) << PAGE_SHIFT;
        let win = locate::current_window(windows, nwsa).ok_or(MscError::NotReady)?;
        let mwp = self.regs.read(MscReg::Mwp) as u64;

        locate::window_bytes(&windows[win], mwp)
            .ok_or(MscError::InvalidArgument("write pointer outside the current window"))
    }

    /// Blocks of the oldest window, oldest data first, while capturing.
    ///
    /// Empty when the oldest window is the one being written.
    pub fn oldest_window_blocks(&self) -> Result<Vec<BlockPos>> {
        let _usage = self.usage.acquire_ref()?;
        let buf = self.capturing_multi()?;
        let windows = buf.windows();

        let Some(oldest) = locate::oldest_window(windows, self.marker()) else {
            return Ok(Vec::new());
        };
        let nwsa = (self.regs.read(MscReg::Nwsa) as u64) << PAGE_SHIFT;
        if locate::current_window(windows, nwsa) == Some(oldest) {
            return Ok(Vec::new());
        }
        Ok(locate::oldest_window_blocks(windows, oldest))
    }

    /// Poll STS until the pipeline is empty.
    ///
    /// Gives up after a bounded number of polls; returns whether the
    /// pipeline drained.
    pub fn wait_pipeline_empty(&self) -> bool {
        for _ in 0..PLE_WAITLOOP_DEPTH {
            if self.regs.read(MscReg::Sts) & MSCSTS_PLE != 0 {
                return true;
            }
            std::hint::spin_loop();
        }
        log::debug!("timeout waiting for MSC pipeline empty");
        false
    }
}

impl<R: MscRegisters> Drop for Msc<R> {
    fn drop(&mut self) {
        if self.is_enabled() {
            log::warn!("MSC dropped with capture running, disabling");
            self.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapPages;
    use crate::sim::{SimRegisters, SimWriter};
    use msu_core::constants::DATA_IN_PAGE;
    use msu_core::desc::HW_TAG_ENDBIT;

    fn msc(mode: Mode, sizes: &[usize], wrap: bool) -> Msc<SimRegisters> {
        let config = MscConfig::new().mode(mode).nr_pages(sizes.to_vec()).wrap(wrap);
        Msc::with_config(SimRegisters::new(), Arc::new(HeapPages::new()), &config).unwrap()
    }

    #[test]
    fn test_lifecycle_counts() {
        let heap = Arc::new(HeapPages::new());
        let m = Msc::new(SimRegisters::new(), heap.clone());
        assert_eq!(m.usage(), UsageState::Unallocated);
        assert_eq!(m.activate(), Err(MscError::NotReady));

        m.alloc_buffer(&[2, 2]).unwrap();
        assert_eq!(m.usage(), UsageState::Idle);
        assert_eq!(m.nr_pages(), 4);
        assert_eq!(m.alloc_buffer(&[1]), Err(MscError::Busy));

        m.activate().unwrap();
        assert_eq!(m.usage(), UsageState::InUse(1));
        assert_eq!(m.free_unless_used(), Err(MscError::Busy));

        m.deactivate();
        m.deactivate();
        assert_eq!(m.usage(), UsageState::Idle);

        m.free_unless_used().unwrap();
        assert_eq!(m.usage(), UsageState::Unallocated);
        assert_eq!(heap.pages_in_use(), 0);
        // freeing nothing is fine
        m.free_unless_used().unwrap();
    }

    #[test]
    fn test_activate_programs_registers() {
        let regs = SimRegisters::with_burst_len(3);
        let config = MscConfig::new().nr_pages(vec![2]).wrap(true);
        let m = Msc::with_config(regs, Arc::new(HeapPages::new()), &config).unwrap();
        assert_eq!(m.burst_len(), 3);

        m.activate().unwrap();
        let buf = m.buffer().unwrap();
        let ctl = m.regs().read(MscReg::Ctl);
        assert_ne!(ctl & MSC_EN, 0);
        assert_ne!(ctl & MSC_WRAPEN, 0);
        assert_eq!((ctl & MSC_MODE) >> MSC_MODE_SHIFT, Mode::Multi.raw());
        assert_eq!((ctl & MSC_LEN) >> MSC_LEN_SHIFT, 3);
        assert_eq!(m.regs().read(MscReg::Bar) as u64, buf.base_addr() >> PAGE_SHIFT);
        assert_eq!(m.activate(), Err(MscError::Busy));
        assert_eq!(m.usage(), UsageState::InUse(1));

        m.deactivate();
        assert_eq!(m.regs().read(MscReg::Ctl) & MSC_EN, 0);
        assert_eq!(m.regs().read(MscReg::Bar), 0);
        assert_eq!(m.regs().read(MscReg::Size), 0);
    }

    #[test]
    fn test_single_registers_and_capture() {
        let m = msc(Mode::Single, &[2], true);
        m.activate().unwrap();
        assert_eq!(m.regs().read(MscReg::Size), 2);

        let mut w = SimWriter::attach(m.regs(), m.buffer().unwrap()).unwrap();
        w.write(&[1u8; 3000]);
        m.deactivate();
        assert_eq!(m.single_sz.load(Ordering::Acquire), 3000);
        assert!(!m.single_wrap.load(Ordering::Acquire));
    }

    #[test]
    fn test_realloc_forgets_capture_state() {
        let m = msc(Mode::Single, &[2], true);
        m.activate().unwrap();
        let mut w = SimWriter::attach(m.regs(), m.buffer().unwrap()).unwrap();
        w.write(&vec![1u8; 10_000]);
        m.deactivate();
        assert!(m.single_wrap.load(Ordering::Acquire));
        assert_eq!(m.single_sz.load(Ordering::Acquire), 1808);

        m.configure_buffer(&[2]).unwrap();
        assert!(!m.single_wrap.load(Ordering::Acquire));
        assert_eq!(m.single_sz.load(Ordering::Acquire), 0);
        assert_eq!(m.nwsa.load(Ordering::Acquire), 0);
    }

    /// Registers that check, when CTL.EN is set, that no stale device
    /// header is left in the buffer
    struct EnableCheck {
        regs: SimRegisters,
        buffer: Mutex<Option<Arc<TraceBuffer>>>,
        clean_at_enable: AtomicBool,
    }

    impl MscRegisters for EnableCheck {
        fn read(&self, reg: MscReg) -> u32 {
            self.regs.read(reg)
        }

        fn write(&self, reg: MscReg, val: u32) {
            if reg == MscReg::Ctl && val & MSC_EN != 0 {
                let buffer = self.buffer.lock().unwrap();
                let clean = buffer.as_ref().is_some_and(|b| {
                    b.iter_pages().all(|p| p.desc().hw_tag == 0 && p.desc().valid_dw == 0)
                });
                self.clean_at_enable.store(clean, Ordering::SeqCst);
            }
            self.regs.write(reg, val);
        }
    }

    #[test]
    fn test_headers_cleared_before_enable() {
        let regs = Arc::new(EnableCheck {
            regs: SimRegisters::new(),
            buffer: Mutex::new(None),
            clean_at_enable: AtomicBool::new(false),
        });
        let config = MscConfig::new().nr_pages(vec![2, 2]);
        let m = Msc::with_config(Arc::clone(&regs), Arc::new(HeapPages::new()), &config).unwrap();
        let buf = m.buffer().unwrap();
        *regs.buffer.lock().unwrap() = Some(Arc::clone(&buf));

        // leftovers of an earlier capture
        for page in buf.iter_pages() {
            let mut d = page.desc();
            d.hw_tag = HW_TAG_ENDBIT;
            d.valid_dw = 100;
            page.write_desc(&d);
        }

        m.activate().unwrap();
        assert!(regs.clean_at_enable.load(Ordering::SeqCst));
        m.deactivate();
    }

    #[test]
    fn test_unsupported_mode() {
        let m = Msc::new(SimRegisters::new(), Arc::new(HeapPages::new()));
        m.set_mode(Mode::Exi).unwrap();
        assert_eq!(m.alloc_buffer(&[1]), Err(MscError::Unsupported(2)));
        assert_eq!(m.window_sizes(), "unsupported\n");
    }

    #[test]
    fn test_set_mode_frees_unless_used() {
        let m = msc(Mode::Multi, &[2], true);
        m.activate().unwrap();
        assert_eq!(m.set_mode(Mode::Single), Err(MscError::Busy));
        assert_eq!(m.mode(), Mode::Multi);

        m.deactivate();
        m.set_mode(Mode::Single).unwrap();
        assert_eq!(m.usage(), UsageState::Unallocated);
        assert!(m.buffer().is_none());
        assert_eq!(m.window_sizes(), "0\n");
    }

    #[test]
    fn test_window_sizes_text() {
        let m = msc(Mode::Multi, &[4], true);
        assert_eq!(m.window_sizes(), "4\n");
        assert_eq!(m.max_blocks(), 4);

        m.set_window_sizes("2,8,1\n").unwrap();
        assert_eq!(m.window_sizes(), "2,8,1\n");
        assert_eq!(m.max_blocks(), 8);
        assert_eq!(m.nr_pages(), 11);

        // a bad list leaves the old buffer alone
        assert!(m.set_window_sizes("2,x").is_err());
        assert_eq!(m.window_sizes(), "2,8,1\n");
        assert_eq!(m.block_max_size(), PAGE_SIZE);
    }

    #[test]
    fn test_configure_rolls_back_on_oom() {
        let heap = Arc::new(HeapPages::with_limit(4));
        let m = Msc::new(SimRegisters::new(), heap.clone());
        m.configure_buffer(&[2]).unwrap();

        let err = m.configure_buffer(&[2, 2, 2]).unwrap_err();
        assert!(matches!(err, MscError::NoMemory { .. }));
        assert_eq!(m.usage(), UsageState::Unallocated);
        assert_eq!(heap.pages_in_use(), 0);
    }

    #[test]
    fn test_current_window_bytes() {
        let m = msc(Mode::Multi, &[2, 2], true);
        assert!(m.current_window_bytes().is_err());

        m.activate().unwrap();
        let mut w = SimWriter::attach(m.regs(), m.buffer().unwrap()).unwrap();
        w.write(&vec![0u8; DATA_IN_PAGE + 124]);
        assert_eq!(m.current_window(), Some(0));
        assert_eq!(m.current_window_bytes().unwrap(), DATA_IN_PAGE + 124);

        w.switch_window();
        w.write(&[0u8; 12]);
        assert_eq!(m.current_window(), Some(1));
        assert_eq!(m.current_window_bytes().unwrap(), 12);

        // a partial dword is not in memory yet
        w.write(&[0u8; 3]);
        assert_eq!(m.current_window_bytes().unwrap(), 12);
        m.deactivate();
    }

    #[test]
    fn test_oldest_window_blocks() {
        let m = msc(Mode::Multi, &[3, 3], true);
        m.activate().unwrap();
        let mut w = SimWriter::attach(m.regs(), m.buffer().unwrap()).unwrap();

        // oldest window is the one being written
        w.write(&[0u8; 100]);
        assert_eq!(m.oldest_window_blocks().unwrap(), vec![]);

        w.write(&vec![0u8; DATA_IN_PAGE]);
        w.switch_window();
        w.write(&[0u8; 12]);
        let blocks: Vec<usize> = m.oldest_window_blocks().unwrap().iter().map(|p| p.block).collect();
        assert_eq!(m.oldest_window(), Some(0));
        assert_eq!(blocks, vec![0, 1]);
        m.deactivate();
    }

    #[test]
    fn test_wait_pipeline_empty() {
        let m = msc(Mode::Multi, &[1], true);
        assert!(m.wait_pipeline_empty());
        m.regs().set_pipeline_busy(true);
        assert!(!m.wait_pipeline_empty());
    }

    #[test]
    fn test_burst_len_bounds() {
        let m = Msc::new(SimRegisters::new(), Arc::new(HeapPages::new()));
        assert!(m.set_burst_len(8).is_err());
        m.set_burst_len(7).unwrap();
        assert_eq!(m.burst_len(), 7);
    }

    #[test]
    fn test_drop_disables_capture() {
        let regs = Arc::new(SimRegisters::new());
        {
            let config = MscConfig::new().nr_pages(vec![1]);
            let m = Msc::with_config(Arc::clone(&regs), Arc::new(HeapPages::new()), &config).unwrap();
            m.activate().unwrap();
        }
        assert_eq!(regs.read(MscReg::Ctl) & MSC_EN, 0);
    }
}
