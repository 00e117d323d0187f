//! Software model of the MSC
//!
//! `SimRegisters` is an atomic register file; `SimWriter` plays the
//! device side, writing trace bytes into an enabled buffer the way the
//! hardware does: descriptors, write pointer, next window address and
//! wrap status.
//!
//! # Multi mode model
//!
//! - Blocks of the current window fill in order.
//! - With wrap enabled, a full window wraps back to its first block and
//!   every block of the window gets BLOCKWRAP.
//! - With wrap disabled, a full window closes and writing moves to the
//!   next window; it stops once it gets back to the first one.
//! - `switch_window()` closes the current window (ENDBIT on the block
//!   being written) and moves on, clearing the new window's headers.
//!
//! # Dwords
//!
//! The device stores whole dwords. A write ending mid-dword keeps its last
//! bytes in the pipeline until the next write completes the dword;
//! `finish()` flushes them zero-padded.
//!
//! # Single mode model
//!
//! Bytes go to consecutive addresses; wrapping sets STS.WRAPSTAT, no wrap
//! stops at the end of the buffer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use msu_core::constants::{DATA_IN_PAGE, DWORD, MSC_BDESC, PAGE_SHIFT, PAGE_SIZE};
use msu_core::desc::{HW_TAG_BLOCKWRAP, HW_TAG_CLOSE, HW_TAG_ENDBIT, HW_TAG_START};
use msu_core::regs::{MSCSTS_PLE, MSCSTS_WRAPSTAT, MSC_EN, MSC_LEN_SHIFT, MSC_MODE, MSC_MODE_SHIFT, MSC_WRAPEN};
use msu_core::{BlockDesc, Mode, MscError, MscReg, MscRegisters, Result};

use crate::window::TraceBuffer;

/// Atomic register file
#[derive(Debug, Default)]
pub struct SimRegisters {
    regs: [AtomicU32; 6],
    pipeline_busy: AtomicBool,
}

impl SimRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register file as left by firmware, with a burst length in CTL.LEN
    pub fn with_burst_len(burst_len: u32) -> Self {
        let regs = Self::new();
        regs.write(MscReg::Ctl, burst_len << MSC_LEN_SHIFT);
        regs
    }

    /// Hold STS.PLE low, as if trace data were still in flight
    pub fn set_pipeline_busy(&self, busy: bool) {
        self.pipeline_busy.store(busy, Ordering::Release);
    }

    #[inline]
    fn slot(&self, reg: MscReg) -> &AtomicU32 {
        let idx = match reg {
            MscReg::Ctl => 0,
            MscReg::Sts => 1,
            MscReg::Bar => 2,
            MscReg::Size => 3,
            MscReg::Mwp => 4,
            MscReg::Nwsa => 5,
        };
        &self.regs[idx]
    }

    fn set_status(&self, bits: u32) {
        self.slot(MscReg::Sts).fetch_or(bits, Ordering::AcqRel);
    }

    fn clear_status(&self, bits: u32) {
        self.slot(MscReg::Sts).fetch_and(!bits, Ordering::AcqRel);
    }
}

impl MscRegisters for SimRegisters {
    fn read(&self, reg: MscReg) -> u32 {
        let val = self.slot(reg).load(Ordering::Acquire);
        if reg == MscReg::Sts && !self.pipeline_busy.load(Ordering::Acquire) {
            return val | MSCSTS_PLE;
        }
        val
    }

    fn write(&self, reg: MscReg, val: u32) {
        // STS is read-only from software
        if reg == MscReg::Sts {
            return;
        }
        self.slot(reg).store(val, Ordering::Release);
    }
}

#[derive(Debug)]
enum Cursor {
    Single { pos: usize },
    Multi { win: usize, blk: usize, fill: usize, start_win: usize },
}

/// Device-side writer for an enabled buffer
pub struct SimWriter<'a> {
    regs: &'a SimRegisters,
    buffer: Arc<TraceBuffer>,
    wrap: bool,
    cursor: Cursor,
    /// Bytes of a dword not yet stored
    pending: Vec<u8>,
    stopped: bool,
}

impl<'a> SimWriter<'a> {
    /// Start capturing into `buffer`, which must be the one programmed
    /// into the registers by an enable.
    pub fn attach(regs: &'a SimRegisters, buffer: Arc<TraceBuffer>) -> Result<Self> {
        let ctl = regs.read(MscReg::Ctl);
        if ctl & MSC_EN == 0 {
            return Err(MscError::NotReady);
        }

        let raw_mode = (ctl & MSC_MODE) >> MSC_MODE_SHIFT;
        if Mode::from_raw(raw_mode) != Some(buffer.mode()) {
            return Err(MscError::InvalidArgument("CTL mode does not match the buffer"));
        }
        let bar = (regs.read(MscReg::Bar) as u64) << PAGE_SHIFT;
        if bar != buffer.base_addr() {
            return Err(MscError::InvalidArgument("BAR does not match the buffer"));
        }

        let cursor = match buffer.mode() {
            Mode::Single => Cursor::Single { pos: 0 },
            _ => Cursor::Multi { win: 0, blk: 0, fill: 0, start_win: 0 },
        };
        let mut writer = Self {
            regs,
            buffer,
            wrap: ctl & MSC_WRAPEN != 0,
            cursor,
            pending: Vec::with_capacity(DWORD),
            stopped: false,
        };

        regs.clear_status(MSCSTS_WRAPSTAT);
        if writer.buffer.mode() == Mode::Multi {
            writer.enter_block(HW_TAG_START);
            writer.update_nwsa();
        }
        writer.update_mwp();
        Ok(writer)
    }

    /// The writer has stopped (buffer full without wrap, or finished)
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Write trace bytes; returns how many the device accepted.
    ///
    /// Accepted bytes past the last whole dword stay pending until the
    /// dword completes or the writer finishes.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.regs.read(MscReg::Ctl) & MSC_EN == 0 {
            self.stopped = true;
        }
        if self.stopped {
            return 0;
        }

        let mut done = 0;
        if !self.pending.is_empty() {
            let take = (DWORD - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            done = take;
            if self.pending.len() < DWORD {
                return done;
            }
            let word = std::mem::take(&mut self.pending);
            if self.store(&word) < DWORD {
                return done;
            }
        }

        let rest = &data[done..];
        let aligned = rest.len() - rest.len() % DWORD;
        let stored = self.store(&rest[..aligned]);
        if stored < aligned {
            return done + stored;
        }
        self.pending.extend_from_slice(&rest[aligned..]);
        done + rest.len()
    }

    /// Bytes waiting for the rest of their dword
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Store whole dwords at the cursor
    fn store(&mut self, data: &[u8]) -> usize {
        match self.cursor {
            Cursor::Single { .. } => self.write_single(data),
            Cursor::Multi { .. } => self.write_multi(data),
        }
    }

    /// Close the current window and move to the next one
    pub fn switch_window(&mut self) {
        if self.stopped || !matches!(self.cursor, Cursor::Multi { .. }) {
            return;
        }
        self.close_window();
        self.next_window();
    }

    /// Flush on disable: pad out the pending dword and mark the block
    /// being written as the last one
    pub fn finish(&mut self) {
        if !self.stopped && !self.pending.is_empty() {
            let mut word = std::mem::take(&mut self.pending);
            word.resize(DWORD, 0);
            self.store(&word);
        }
        self.pending.clear();
        if !self.stopped && matches!(self.cursor, Cursor::Multi { .. }) {
            self.tag_current(HW_TAG_ENDBIT | HW_TAG_CLOSE);
        }
        self.stopped = true;
    }

    fn write_single(&mut self, data: &[u8]) -> usize {
        let size = self.buffer.len();
        let mut done = 0;

        while done < data.len() && !self.stopped {
            let Cursor::Single { pos } = &mut self.cursor else {
                break;
            };
            let page_off = *pos % PAGE_SIZE;
            let n = (PAGE_SIZE - page_off).min(data.len() - done);
            self.buffer.pages()[*pos / PAGE_SIZE].store(page_off, &data[done..done + n]);
            *pos += n;
            done += n;

            if *pos == size {
                if self.wrap {
                    *pos = 0;
                    self.regs.set_status(MSCSTS_WRAPSTAT);
                } else {
                    self.stopped = true;
                }
            }
            self.update_mwp();
        }
        done
    }

    fn write_multi(&mut self, data: &[u8]) -> usize {
        let mut done = 0;

        while done < data.len() && !self.stopped {
            let Cursor::Multi { win, blk, fill, .. } = &mut self.cursor else {
                break;
            };
            let block = self.buffer.windows()[*win].block(*blk);
            let n = (DATA_IN_PAGE - *fill).min(data.len() - done);
            block.store(MSC_BDESC + *fill, &data[done..done + n]);
            *fill += n;
            done += n;

            let mut desc = block.desc();
            desc.valid_dw = BlockDesc::valid_dw_for(*fill);
            block.write_desc(&desc);

            let full = *fill == DATA_IN_PAGE;
            self.update_mwp();
            if full {
                self.next_block();
            }
        }
        done
    }

    fn next_block(&mut self) {
        let Cursor::Multi { win, blk, .. } = &mut self.cursor else {
            return;
        };
        let window = &self.buffer.windows()[*win];

        if *blk + 1 < window.nr_blocks() {
            *blk += 1;
        } else if self.wrap {
            for block in window.blocks() {
                let mut desc = block.desc();
                desc.hw_tag |= HW_TAG_BLOCKWRAP;
                block.write_desc(&desc);
            }
            *blk = 0;
        } else {
            self.close_window();
            self.next_window();
            return;
        }
        self.enter_block(0);
        self.update_mwp();
    }

    fn close_window(&mut self) {
        self.tag_current(HW_TAG_ENDBIT | HW_TAG_CLOSE);
    }

    fn next_window(&mut self) {
        let nr_windows = self.buffer.windows().len();
        let Cursor::Multi { win, blk, start_win, .. } = &mut self.cursor else {
            return;
        };

        let next = (*win + 1) % nr_windows;
        if !self.wrap && next == *start_win {
            self.stopped = true;
            return;
        }

        *win = next;
        *blk = 0;
        crate::topology::clear_hw_headers(std::slice::from_ref(&self.buffer.windows()[next]));
        self.enter_block(HW_TAG_START);
        self.update_nwsa();
        self.update_mwp();
    }

    /// Start writing the current block from its beginning
    fn enter_block(&mut self, tag: u32) {
        let Cursor::Multi { win, blk, fill, .. } = &mut self.cursor else {
            return;
        };
        *fill = 0;
        let block = self.buffer.windows()[*win].block(*blk);
        let mut desc = block.desc();
        desc.valid_dw = BlockDesc::valid_dw_for(0);
        desc.hw_tag = (desc.hw_tag & HW_TAG_BLOCKWRAP) | tag;
        block.write_desc(&desc);
    }

    fn tag_current(&self, tag: u32) {
        if let Cursor::Multi { win, blk, .. } = self.cursor {
            let block = self.buffer.windows()[win].block(blk);
            let mut desc = block.desc();
            desc.hw_tag |= tag;
            block.write_desc(&desc);
        }
    }

    fn update_mwp(&self) {
        let mwp = match self.cursor {
            Cursor::Single { pos } => self.buffer.base_addr() + pos as u64,
            Cursor::Multi { win, blk, fill, .. } => {
                self.buffer.windows()[win].block(blk).addr() + (MSC_BDESC + fill) as u64
            }
        };
        self.regs.write(MscReg::Mwp, mwp as u32);
    }

    fn update_nwsa(&self) {
        if let Cursor::Multi { win, .. } = self.cursor {
            let windows = self.buffer.windows();
            let next = &windows[(win + 1) % windows.len()];
            self.regs.write(MscReg::Nwsa, next.block(0).pfn());
        }
    }
}
