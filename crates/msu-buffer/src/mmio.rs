//! Memory-mapped register access

use std::ptr::{self, NonNull};

use msu_core::regs::MSC_WINDOW_STRIDE;
use msu_core::{MscReg, MscRegisters};

/// Registers of one MSC behind a mapped BAR
#[derive(Debug)]
pub struct MmioRegisters {
    base: NonNull<u8>,
}

// Safety: MMIO accesses are single volatile 32-bit loads/stores
unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// Registers of MSC `index` in the unit mapped at `unit_base`.
    ///
    /// # Safety
    /// `unit_base` must point to a mapping of the unit's register space
    /// covering every MSC register of `index`, valid for the lifetime of
    /// the returned value, and 4-byte aligned.
    pub unsafe fn new(unit_base: NonNull<u8>, index: usize) -> Self {
        Self {
            base: NonNull::new_unchecked(unit_base.as_ptr().add(index * MSC_WINDOW_STRIDE)),
        }
    }

    #[inline]
    fn reg_ptr(&self, reg: MscReg) -> *mut u32 {
        // Safety: in bounds per new()'s contract
        unsafe { self.base.as_ptr().add(reg.offset()) as *mut u32 }
    }
}

impl MscRegisters for MmioRegisters {
    #[inline]
    fn read(&self, reg: MscReg) -> u32 {
        unsafe { ptr::read_volatile(self.reg_ptr(reg)) }
    }

    #[inline]
    fn write(&self, reg: MscReg, val: u32) {
        unsafe { ptr::write_volatile(self.reg_ptr(reg), val) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_and_stride() {
        // two MSC windows worth of register space
        let mut space = vec![0u32; (MSC_WINDOW_STRIDE + 0x120) / 4];
        let base = NonNull::new(space.as_mut_ptr() as *mut u8).unwrap();

        let msc0 = unsafe { MmioRegisters::new(base, 0) };
        let msc1 = unsafe { MmioRegisters::new(base, 1) };
        msc0.write(MscReg::Nwsa, 0x1111);
        msc1.write(MscReg::Ctl, 0x2222);

        assert_eq!(msc1.read(MscReg::Ctl), 0x2222);
        assert_eq!(msc0.read(MscReg::Mwp), 0);

        assert_eq!(space[0x11c / 4], 0x1111);
        assert_eq!(space[(MSC_WINDOW_STRIDE + 0x100) / 4], 0x2222);
    }
}
