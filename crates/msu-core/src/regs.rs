//! MSC register window
//!
//! The buffer manager only touches six 32-bit registers of its MSC.
//! Offsets are relative to the MSC's register window; each MSC in the
//! unit has its own window, 0x100 bytes apart.
//!
//! # Implementors
//!
//! - `MmioRegisters` (msu-buffer): volatile loads/stores on a mapped BAR.
//! - `SimRegisters` (msu-buffer): atomic register file driven by the
//!   software device model.

use std::sync::Arc;

/// Registers of one MSC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MscReg {
    /// Control: enable, wrap, mode, burst length
    Ctl,
    /// Status: wrap status, pipeline empty
    Sts,
    /// Base address (frame number of the first page/block)
    Bar,
    /// Buffer size in pages (single mode)
    Size,
    /// Memory write pointer (byte address)
    Mwp,
    /// Next window start address (frame number)
    Nwsa,
}

impl MscReg {
    pub const ALL: [MscReg; 6] = [
        MscReg::Ctl,
        MscReg::Sts,
        MscReg::Bar,
        MscReg::Size,
        MscReg::Mwp,
        MscReg::Nwsa,
    ];

    /// Byte offset inside the MSC register window
    #[inline]
    pub const fn offset(&self) -> usize {
        match self {
            MscReg::Ctl => 0x100,
            MscReg::Sts => 0x104,
            MscReg::Bar => 0x108,
            MscReg::Size => 0x10c,
            MscReg::Mwp => 0x110,
            MscReg::Nwsa => 0x11c,
        }
    }
}

/// Distance between the register windows of consecutive MSCs
pub const MSC_WINDOW_STRIDE: usize = 0x100;

// CTL bits
pub const MSC_EN: u32 = 1 << 0;
pub const MSC_WRAPEN: u32 = 1 << 1;
pub const MSC_RD_HDR_OVRD: u32 = 1 << 2;
pub const MSC_MODE: u32 = (1 << 4) | (1 << 5);
pub const MSC_LEN: u32 = (1 << 8) | (1 << 9) | (1 << 10);

pub const MSC_MODE_SHIFT: u32 = MSC_MODE.trailing_zeros();
pub const MSC_LEN_SHIFT: u32 = MSC_LEN.trailing_zeros();

// STS bits
pub const MSCSTS_WRAPSTAT: u32 = 1 << 1;
pub const MSCSTS_PLE: u32 = 1 << 2;

/// Access to an MSC register window.
///
/// **Contract:**
/// - Reads have no side effects and may race with the device; callers
///   treat values as snapshots.
/// - Writes are only issued with the buffer mutex held.
pub trait MscRegisters: Send + Sync {
    /// Read a register
    fn read(&self, reg: MscReg) -> u32;

    /// Write a register
    fn write(&self, reg: MscReg, val: u32);

    /// Read-modify-write: clear `clear`, then set `set`
    fn modify(&self, reg: MscReg, clear: u32, set: u32) {
        let val = self.read(reg);
        self.write(reg, (val & !clear) | set);
    }
}

impl<T: MscRegisters + ?Sized> MscRegisters for Arc<T> {
    #[inline]
    fn read(&self, reg: MscReg) -> u32 {
        (**self).read(reg)
    }

    #[inline]
    fn write(&self, reg: MscReg, val: u32) {
        (**self).write(reg, val)
    }
}

impl<T: MscRegisters + ?Sized> MscRegisters for &T {
    #[inline]
    fn read(&self, reg: MscReg) -> u32 {
        (**self).read(reg)
    }

    #[inline]
    fn write(&self, reg: MscReg, val: u32) {
        (**self).write(reg, val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flat([AtomicU32; 6]);

    impl Flat {
        fn idx(reg: MscReg) -> usize {
            MscReg::ALL.iter().position(|r| *r == reg).unwrap()
        }
    }

    impl MscRegisters for Flat {
        fn read(&self, reg: MscReg) -> u32 {
            self.0[Self::idx(reg)].load(Ordering::Relaxed)
        }
        fn write(&self, reg: MscReg, val: u32) {
            self.0[Self::idx(reg)].store(val, Ordering::Relaxed)
        }
    }

    #[test]
    fn test_field_shifts() {
        assert_eq!(MSC_MODE_SHIFT, 4);
        assert_eq!(MSC_LEN_SHIFT, 8);
        assert_eq!(MSC_MODE >> MSC_MODE_SHIFT, 0b11);
        assert_eq!(MSC_LEN >> MSC_LEN_SHIFT, 0b111);
    }

    #[test]
    fn test_modify() {
        let regs = Flat(Default::default());
        regs.write(MscReg::Ctl, MSC_EN | MSC_WRAPEN | (3 << MSC_LEN_SHIFT));
        regs.modify(MscReg::Ctl, MSC_EN | MSC_WRAPEN, 1 << MSC_MODE_SHIFT);
        assert_eq!(regs.read(MscReg::Ctl), (3 << MSC_LEN_SHIFT) | (1 << MSC_MODE_SHIFT));
    }

    #[test]
    fn test_arc_forwarding() {
        let regs = Arc::new(Flat(Default::default()));
        let shared = Arc::clone(&regs);
        shared.write(MscReg::Nwsa, 0x1234);
        assert_eq!(regs.read(MscReg::Nwsa), 0x1234);
    }
}
