//! Streaming iterator over a multi-window buffer
//!
//! Linearizes the ring into one oldest-to-newest byte stream. Starts at
//! the oldest window, walks its blocks from the oldest one, and moves on
//! window by window until it gets back to where it started.
//!
//! A window whose writes wrapped around its blocks has one block holding
//! both ends of the data: the newest bytes at its head, the oldest at its
//! tail. That block is visited twice.
//!
//! ```text
//!   pass 1 (wrap_count 2):  [ newest | OLDEST ]   tail  data_sz..DATA_IN_PAGE
//!   other blocks            [ ...... full .... ]
//!   pass 2 (wrap_count 1):  [ NEWEST | oldest ]   head  0..data_sz
//! ```
//!
//! The iterator never blocks and never holds the buffer mutex; the caller
//! keeps the buffer alive with a usage reference.

use msu_core::constants::DATA_IN_PAGE;

use crate::locate::{oldest_block, oldest_window};
use crate::sink::ChunkSink;
use crate::window::Window;

/// Where the iterator is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterPhase {
    /// No data located yet
    Uninit,
    /// Positioned on the oldest block, nothing produced
    WindowStarted,
    /// Producing data
    Iterating,
    /// Every window visited; reads return 0
    Eof,
}

/// Per-session cursor
#[derive(Debug, Clone)]
pub struct MscIter {
    phase: IterPhase,
    start_win: usize,
    win: usize,
    start_block: usize,
    block: usize,
    /// Bytes of the current block range already consumed
    block_off: usize,
    /// Visits left to the two-pass block (0 when the window did not wrap)
    wrap_count: u8,
    /// Logical stream position
    offset: u64,
}

impl Default for MscIter {
    fn default() -> Self {
        Self::new()
    }
}

impl MscIter {
    pub const fn new() -> Self {
        Self {
            phase: IterPhase::Uninit,
            start_win: 0,
            win: 0,
            start_block: 0,
            block: 0,
            block_off: 0,
            wrap_count: 0,
            offset: 0,
        }
    }

    #[inline]
    pub fn phase(&self) -> IterPhase {
        self.phase
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.phase == IterPhase::Eof
    }

    /// Bytes produced so far
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Produce up to `len` bytes into `sink`.
    ///
    /// `marker` is the next-window-start address used to find the oldest
    /// window on the first call. Returns the bytes produced; 0 once the
    /// end of the buffer has been reached.
    pub fn iterate<S: ChunkSink + ?Sized>(
        &mut self,
        windows: &[Window],
        marker: u64,
        len: usize,
        sink: &mut S,
    ) -> usize {
        if self.phase == IterPhase::Eof {
            return 0;
        }
        if self.phase == IterPhase::Uninit && !self.win_start(windows, marker) {
            return 0;
        }

        let mut bounce = [0u8; DATA_IN_PAGE];
        let mut left = len;
        while left > 0 {
            let block = windows[self.win].block(self.block);
            let data_sz = block.desc().data_sz().min(DATA_IN_PAGE);

            let range = if self.block == self.start_block && self.wrap_count == 2 {
                data_sz..DATA_IN_PAGE
            } else {
                0..data_sz
            };
            let avail = range.len().saturating_sub(self.block_off);

            if avail > 0 {
                self.phase = IterPhase::Iterating;

                let start = range.start + self.block_off;
                let take = avail.min(left);
                let chunk = &mut bounce[..take];
                block.copy_payload(start, chunk);
                let residual = sink.consume(chunk).min(take);
                let copied = take - residual;

                left -= copied;
                self.block_off += copied;
                self.offset += copied as u64;

                if take < avail || residual > 0 {
                    break;
                }
            }

            if self.block_advance(windows) {
                break;
            }
        }

        len - left
    }

    /// Locate the oldest window and its oldest block
    fn win_start(&mut self, windows: &[Window], marker: u64) -> bool {
        let Some(win) = oldest_window(windows, marker) else {
            return false;
        };
        self.start_win = win;
        self.win = win;
        self.block_start(windows);
        self.phase = IterPhase::WindowStarted;
        true
    }

    fn block_start(&mut self, windows: &[Window]) {
        let win = &windows[self.win];
        self.start_block = oldest_block(win);
        self.block = self.start_block;
        self.block_off = 0;
        self.wrap_count = if win.block(self.block).desc().is_wrapped() { 2 } else { 0 };
    }

    /// Move to the next window; true when that closes the loop
    fn win_advance(&mut self, windows: &[Window]) -> bool {
        self.win = (self.win + 1) % windows.len();
        if self.win == self.start_win {
            self.phase = IterPhase::Eof;
            return true;
        }
        self.block_start(windows);
        false
    }

    /// Move to the next block; true at end of buffer
    fn block_advance(&mut self, windows: &[Window]) -> bool {
        self.block_off = 0;

        if self.wrap_count > 0 && self.block == self.start_block {
            self.wrap_count -= 1;
            if self.wrap_count == 0 {
                // newest data of the wrapped window is out
                return self.win_advance(windows);
            }
        }

        let win = &windows[self.win];
        if self.wrap_count == 0 && win.block(self.block).desc().is_last_written() {
            return self.win_advance(windows);
        }

        self.block = (self.block + 1) % win.nr_blocks();

        // no last written block: stop after one lap
        if self.wrap_count == 0 && self.block == self.start_block {
            return self.win_advance(windows);
        }

        false
    }
}
