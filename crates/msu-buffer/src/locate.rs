//! Window and block locators
//!
//! Pure functions of the window list and a register snapshot. The device
//! only exposes NWSA, the start of the window it will move to next, so
//! everything here is inferred from that one address.

use msu_core::desc::HW_TAG_ENDBIT;
use msu_core::constants::PAGE_SIZE;

use crate::window::Window;

/// Position of a block in the window list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPos {
    pub window: usize,
    pub block: usize,
}

/// Window the device is writing to.
///
/// NWSA names the next window, so the current one precedes it. When NWSA
/// matches the first window, or nothing at all, the last window is current.
pub fn current_window(windows: &[Window], nwsa: u64) -> Option<usize> {
    let last = windows.len().checked_sub(1)?;
    match windows.iter().position(|w| w.base_addr() == nwsa) {
        Some(idx) if idx > 0 => Some(idx - 1),
        _ => Some(last),
    }
}

/// Window holding the oldest data.
///
/// Starting from the window at `marker` (the next window to be written),
/// the first window with data in its first block. Windows before the
/// marker are not revisited; when nothing qualifies the first window is
/// returned.
pub fn oldest_window(windows: &[Window], marker: u64) -> Option<usize> {
    if windows.is_empty() {
        return None;
    }

    let mut found = false;
    for (idx, win) in windows.iter().enumerate() {
        if win.base_addr() == marker {
            found = true;
        }
        if win.block(0).desc().is_empty() {
            continue;
        }
        if found {
            return Some(idx);
        }
    }

    log::debug!("no non-empty window after {:#x}, starting at window 0", marker);
    Some(0)
}

/// Block holding the oldest data of a window.
///
/// Without wrapping that is the first block. After a block wrap the last
/// written block holds both the newest data (head) and the oldest (tail).
pub fn oldest_block(win: &Window) -> usize {
    let last = win.nr_blocks() - 1;
    if !win.block(last).desc().is_wrapped() {
        return 0;
    }

    match win.blocks().iter().position(|b| b.desc().is_last_written()) {
        Some(blk) => blk,
        None => {
            log::warn!("wrapped window at {:#x} has no last written block", win.base_addr());
            0
        }
    }
}

/// Valid payload bytes in `win` with the write pointer at `mwp`.
///
/// Returns `None` when `mwp` is outside the window.
pub fn window_bytes(win: &Window, mwp: u64) -> Option<usize> {
    let page = mwp & !(PAGE_SIZE as u64 - 1);
    let blk = win.blocks().iter().position(|b| b.addr() == page)?;
    let offset = (mwp & (PAGE_SIZE as u64 - 1)) as usize;

    let mut size = 0;
    if win.block(blk).desc().is_wrapped() {
        size += win.blocks()[blk + 1..].iter().map(|b| b.desc().data_sz()).sum::<usize>();
    }
    size += win.blocks()[..blk].iter().map(|b| b.desc().data_sz()).sum::<usize>();
    size += offset.saturating_sub(msu_core::constants::MSC_BDESC);
    Some(size)
}

/// Blocks of `windows[oldest]` from the first one holding only old data
/// through the block where the device stopped.
pub fn oldest_window_blocks(windows: &[Window], oldest: usize) -> Vec<BlockPos> {
    let win = &windows[oldest];
    let nr_blocks = win.nr_blocks();
    let mut blk = oldest_block(win);

    if win.block(blk).desc().is_wrapped() {
        blk = (blk + 1) % nr_blocks;
    }

    let mut out = Vec::with_capacity(nr_blocks);
    while out.len() < nr_blocks {
        out.push(BlockPos { window: oldest, block: blk });
        if win.block(blk).desc().hw_tag & HW_TAG_ENDBIT != 0 {
            break;
        }
        blk = (blk + 1) % nr_blocks;
    }
    out
}
