//! Window topology builder
//!
//! Writes the software half of every block descriptor so the device can
//! follow the ring on its own:
//!
//! ```text
//!   window 0: [b0] -> [b1] -> [b0]...     next_blk, LASTBLK on b1
//!              |       |
//!              +-------+--> next_win = window 1, block 0
//!   window n-1: every block LASTWIN, next_win = window 0, block 0
//! ```

use std::sync::atomic::{fence, Ordering};

use msu_core::desc::{SW_TAG_LASTBLK, SW_TAG_LASTWIN};
use msu_core::BlockDesc;

use crate::window::Window;

/// Link windows and blocks into a ring.
///
/// Every descriptor is rewritten from scratch, device half included.
/// Ends with a full fence so the device never sees a partial topology.
pub fn relink(windows: &[Window]) {
    let nr_windows = windows.len();

    for (i, win) in windows.iter().enumerate() {
        let last_win = i + 1 == nr_windows;
        let next_win = &windows[(i + 1) % nr_windows];
        let nr_blocks = win.nr_blocks();

        for blk in 0..nr_blocks {
            let last_blk = blk + 1 == nr_blocks;
            let mut desc = BlockDesc::zeroed();

            desc.next_win = next_win.block(0).pfn();
            desc.next_blk = win.block((blk + 1) % nr_blocks).pfn();
            desc.block_sz = BlockDesc::page_block_sz();
            if last_blk {
                desc.sw_tag |= SW_TAG_LASTBLK;
            }
            if last_win {
                desc.sw_tag |= SW_TAG_LASTWIN;
            }

            win.block(blk).write_desc(&desc);
        }
    }

    fence(Ordering::SeqCst);
}

/// Clear the device-owned half of every descriptor before a capture
pub fn clear_hw_headers(windows: &[Window]) {
    for win in windows {
        for block in win.blocks() {
            block.clear_hw_header();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::memory::HeapPages;
    use crate::window::TraceBuffer;
    use msu_core::desc::HW_TAG_ENDBIT;

    /// Follow the device's view of the ring: next_blk inside a window,
    /// next_win from the last block.
    fn walk(buf: &TraceBuffer, start: u32, steps: usize) -> u32 {
        let by_pfn: HashMap<u32, BlockDesc> = buf
            .windows()
            .iter()
            .flat_map(|w| w.blocks())
            .map(|b| (b.pfn(), b.desc()))
            .collect();

        let mut pfn = start;
        for _ in 0..steps {
            let d = by_pfn[&pfn];
            pfn = if d.is_last_block() { d.next_win } else { d.next_blk };
        }
        pfn
    }

    #[test]
    fn test_ring_closes() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::multi(heap, &[2, 3, 1]).unwrap();
        let total = buf.nr_pages();

        for win in buf.windows() {
            for b in win.blocks() {
                assert_eq!(walk(&buf, b.pfn(), total), b.pfn());
                if total > 1 {
                    assert_ne!(walk(&buf, b.pfn(), 1), b.pfn());
                }
            }
        }
    }

    #[test]
    fn test_tags() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::multi(heap, &[2, 2]).unwrap();
        let w0 = &buf.windows()[0];
        let w1 = &buf.windows()[1];

        let d = w0.block(0).desc();
        assert_eq!(d.sw_tag, 0);
        assert_eq!(d.block_sz, 64);
        assert_eq!(d.next_blk, w0.block(1).pfn());
        assert_eq!(d.next_win, w1.block(0).pfn());

        let d = w0.block(1).desc();
        assert_eq!(d.sw_tag, SW_TAG_LASTBLK);
        assert_eq!(d.next_blk, w0.block(0).pfn());

        assert_eq!(w1.block(0).desc().sw_tag, SW_TAG_LASTWIN);
        let d = w1.block(1).desc();
        assert_eq!(d.sw_tag, SW_TAG_LASTWIN | SW_TAG_LASTBLK);
        assert_eq!(d.next_win, w0.block(0).pfn());
    }

    #[test]
    fn test_single_window_links_to_itself() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::multi(heap, &[1]).unwrap();
        let b = buf.windows()[0].block(0);
        let d = b.desc();
        assert_eq!(d.next_blk, b.pfn());
        assert_eq!(d.next_win, b.pfn());
        assert!(d.is_last_block() && d.is_last_window());
    }

    #[test]
    fn test_clear_hw_headers_keeps_links() {
        let heap = Arc::new(HeapPages::new());
        let buf = TraceBuffer::multi(heap, &[2]).unwrap();
        let b = buf.windows()[0].block(1);

        let mut d = b.desc();
        d.hw_tag = HW_TAG_ENDBIT;
        d.valid_dw = 40;
        b.write_desc(&d);

        clear_hw_headers(buf.windows());
        let d = b.desc();
        assert_eq!(d.hw_tag, 0);
        assert_eq!(d.valid_dw, 0);
        assert_eq!(d.sw_tag, SW_TAG_LASTBLK | SW_TAG_LASTWIN);
    }
}
