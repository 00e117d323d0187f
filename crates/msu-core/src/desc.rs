//! Block descriptor layout (repr(C))
//!
//! Every block starts with a 64-byte descriptor shared with the device.
//! Software owns the first half (tags and links, written by the topology
//! builder); the device owns the second half (`hw_tag` onward), which it
//! updates as it writes the block.
//!
//! ```text
//! 0x00  sw_tag     LASTBLK | LASTWIN
//! 0x04  block_sz   block size in 64-byte units
//! 0x08  next_blk   frame number of the next block in this window
//! 0x0c  next_win   frame number of the next window's first block
//! 0x10  res0[4]
//! 0x20  hw_tag     CLOSE | START | BLOCKWRAP | WINWRAP | ENDBIT
//! 0x24  valid_dw   valid dwords, descriptor included
//! 0x28  ts_low
//! 0x2c  ts_high
//! 0x30  res1[4]
//! ```

use crate::constants::{DATA_IN_PAGE, DWORD, MSC_BDESC, PAGE_SIZE};

/// Software tag: last block of its window
pub const SW_TAG_LASTBLK: u32 = 1 << 0;
/// Software tag: block belongs to the last window of the buffer
pub const SW_TAG_LASTWIN: u32 = 1 << 1;

/// Hardware tag: block closed
pub const HW_TAG_CLOSE: u32 = 1 << 0;
/// Hardware tag: first block of a capture
pub const HW_TAG_START: u32 = 1 << 1;
/// Hardware tag: writes wrapped around the blocks of a window
pub const HW_TAG_BLOCKWRAP: u32 = 1 << 2;
/// Hardware tag: writes wrapped around the windows of the buffer
pub const HW_TAG_WINWRAP: u32 = 1 << 3;
/// Hardware tag: last block written before the window was closed
pub const HW_TAG_ENDBIT: u32 = 1 << 4;

/// Offset of the device-owned half of the descriptor
pub const HW_HEADER_OFFSET: usize = 0x20;

/// Block descriptor as laid out in memory
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockDesc {
    pub sw_tag: u32,
    pub block_sz: u32,
    pub next_blk: u32,
    pub next_win: u32,
    pub res0: [u32; 4],
    pub hw_tag: u32,
    pub valid_dw: u32,
    pub ts_low: u32,
    pub ts_high: u32,
    pub res1: [u32; 4],
}

const _: () = assert!(core::mem::size_of::<BlockDesc>() == MSC_BDESC);
const _: () = assert!(core::mem::offset_of!(BlockDesc, hw_tag) == HW_HEADER_OFFSET);

impl BlockDesc {
    /// Descriptor with every field cleared
    #[inline]
    pub const fn zeroed() -> Self {
        Self {
            sw_tag: 0,
            block_sz: 0,
            next_blk: 0,
            next_win: 0,
            res0: [0; 4],
            hw_tag: 0,
            valid_dw: 0,
            ts_low: 0,
            ts_high: 0,
            res1: [0; 4],
        }
    }

    /// `block_sz` value for a one-page block
    #[inline]
    pub const fn page_block_sz() -> u32 {
        (PAGE_SIZE / 64) as u32
    }

    /// Payload bytes recorded by the device (descriptor excluded)
    #[inline]
    pub fn data_sz(&self) -> usize {
        if self.valid_dw == 0 {
            return 0;
        }
        (self.valid_dw as usize * DWORD).saturating_sub(MSC_BDESC)
    }

    /// `valid_dw` value describing `data_sz` payload bytes.
    ///
    /// The device writes whole dwords; `data_sz` must be a multiple of 4.
    #[inline]
    pub fn valid_dw_for(data_sz: usize) -> u32 {
        debug_assert!(data_sz % DWORD == 0, "payload of {} bytes is not dword aligned", data_sz);
        ((data_sz + MSC_BDESC) / DWORD) as u32
    }

    /// The header was never written, or holds no payload
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.valid_dw == 0 || self.data_sz() == 0
    }

    /// Writes wrapped over this block (block or window wrap)
    #[inline]
    pub fn is_wrapped(&self) -> bool {
        self.hw_tag & (HW_TAG_BLOCKWRAP | HW_TAG_WINWRAP) != 0
    }

    /// The device stopped writing in this block
    #[inline]
    pub fn is_last_written(&self) -> bool {
        self.hw_tag & HW_TAG_ENDBIT != 0 || self.data_sz() != DATA_IN_PAGE
    }

    #[inline]
    pub fn is_last_block(&self) -> bool {
        self.sw_tag & SW_TAG_LASTBLK != 0
    }

    #[inline]
    pub fn is_last_window(&self) -> bool {
        self.sw_tag & SW_TAG_LASTWIN != 0
    }
}
