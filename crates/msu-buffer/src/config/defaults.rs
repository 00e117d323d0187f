//! Library defaults for `MscConfig`

use msu_core::Mode;

/// Operating mode
pub const MODE: Mode = Mode::Multi;

/// Wrap enable
pub const WRAP: bool = true;

/// Window sizes in pages
pub const NR_PAGES: &[usize] = &[16];

/// Largest value CTL.LEN can hold
pub const MAX_BURST_LEN: u32 = 7;
