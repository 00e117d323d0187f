//! Page allocators for trace buffers
//!
//! Platform-specific implementations back the `PageAllocator` trait.
//! Both hand out device addresses from a shared I/O virtual address
//! space, since the device registers only hold 32-bit addresses.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::MmapPages;
    }
}

mod heap;
pub use heap::HeapPages;

use msu_core::constants::{PAGE_SHIFT, PAGE_SIZE};
use std::sync::atomic::{AtomicU64, Ordering};

/// First device address handed out (leaves low memory to the platform)
const IOVA_START: u64 = 0x1000_0000;

/// One past the last address reachable through a 32-bit register
const IOVA_END: u64 = 1 << 32;

/// Bump allocator for device addresses.
///
/// Addresses are never reused; a 3.75 GiB space outlives any realistic
/// number of buffer reconfigurations.
#[derive(Debug)]
pub struct IovaSpace {
    next: AtomicU64,
    end: u64,
}

impl IovaSpace {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(IOVA_START),
            end: IOVA_END,
        }
    }

    /// Reserve device addresses for `nr_pages` pages
    pub fn alloc(&self, nr_pages: usize) -> Option<u64> {
        let len = (nr_pages as u64).checked_shl(PAGE_SHIFT)?;
        let mut cur = self.next.load(Ordering::Relaxed);
        loop {
            let end = cur.checked_add(len)?;
            if end > self.end {
                return None;
            }
            match self
                .next
                .compare_exchange_weak(cur, end, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Some(cur),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Pages still available
    pub fn remaining_pages(&self) -> usize {
        let next = self.next.load(Ordering::Relaxed);
        (self.end.saturating_sub(next) / PAGE_SIZE as u64) as usize
    }
}

impl Default for IovaSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iova_sequential() {
        let iova = IovaSpace::new();
        let a = iova.alloc(2).unwrap();
        let b = iova.alloc(1).unwrap();
        assert_eq!(a, IOVA_START);
        assert_eq!(b, IOVA_START + 2 * PAGE_SIZE as u64);
        assert_eq!(a % PAGE_SIZE as u64, 0);
    }

    #[test]
    fn test_iova_exhaustion() {
        let iova = IovaSpace::new();
        let all = iova.remaining_pages();
        assert!(iova.alloc(all + 1).is_none());
        assert!(iova.alloc(all).is_some());
        assert_eq!(iova.remaining_pages(), 0);
        assert!(iova.alloc(1).is_none());
    }
}
