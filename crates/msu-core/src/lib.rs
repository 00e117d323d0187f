//! # msu-core
//!
//! Core types and traits for the MSU (Memory Storage Unit) trace buffer.
//!
//! This crate is platform-agnostic and owns no memory. It describes the
//! hardware contract (block descriptor layout, register window, operating
//! modes) and the seams the buffer manager is built on. All storage and
//! device access lives in `msu-buffer`.
//!
//! ## Modules
//!
//! - `desc` - Block descriptor layout and tag bits
//! - `regs` - MSC register window and the `MscRegisters` trait
//! - `mode` - Operating modes
//! - `usage` - Tri-state buffer usage counter
//! - `pages` - Page allocation trait and page runs
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod desc;
pub mod regs;
pub mod mode;
pub mod usage;
pub mod pages;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use desc::BlockDesc;
pub use regs::{MscReg, MscRegisters};
pub use mode::Mode;
pub use usage::{FreeOutcome, UsageCounter, UsageRef, UsageState};
pub use pages::{CachePolicy, PageAllocator, PageRun};
pub use error::{MscError, Result};
pub use env::{env_get, env_get_bool, env_get_opt};

/// Constants for the buffer layout
pub mod constants {
    /// Page shift used by the device for frame numbers
    pub const PAGE_SHIFT: u32 = 12;

    /// Page size (4 KB); every block is exactly one page
    pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

    /// Size of the block descriptor at the start of each block
    pub const MSC_BDESC: usize = 64;

    /// Unit of device writes; payload sizes are whole dwords
    pub const DWORD: usize = 4;

    /// Payload capacity of one block
    pub const DATA_IN_PAGE: usize = PAGE_SIZE - MSC_BDESC;

    /// Polls of the status register while waiting for pipeline empty
    pub const PLE_WAITLOOP_DEPTH: usize = 10_000;

    /// Largest page count accepted for a single window or region
    pub const MAX_PAGES_PER_REQUEST: usize = 1 << 20;
}
