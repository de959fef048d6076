//! Memory-mapped bus backend.

use core::ptr::{read_volatile, write_volatile, NonNull};

use super::{fits, BusOps};

/// Volatile accesses over an already mapped device window.
///
/// This is the access half of a memory-mapped bus backend (e.g. the flink AXI
/// interface on Zynq): mapping the physical region and discovering its size
/// stay with the backend. Accesses outside the window or not naturally aligned
/// are logged and turned into zero reads / dropped writes.
pub struct MmioBus {
    base: NonNull<u8>,
    size: u32,
}

// SAFETY: the window is device memory that is only ever accessed with volatile
// operations; the bus itself holds no thread-affine state.
unsafe impl Send for MmioBus {}
unsafe impl Sync for MmioBus {}

impl MmioBus {
    /// Creates a bus over `size` bytes of mapped memory starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a mapping of at least `size` bytes that stays valid
    /// for the whole lifetime of the returned bus and is suitable for volatile
    /// 8/16/32-bit accesses.
    pub const unsafe fn new(base: NonNull<u8>, size: u32) -> Self {
        Self { base, size }
    }

    fn check(&self, offset: u32, width: usize, op: &str) -> bool {
        if !fits(self.size, offset, width) {
            error!(
                "mmio bus: {} at {:#x} outside the {:#x}-byte window",
                op, offset, self.size
            );
            return false;
        }
        if offset as usize % width != 0 {
            error!("mmio bus: {} at {:#x} is not {}-byte aligned", op, offset, width);
            return false;
        }
        true
    }

    #[inline]
    fn ptr<T>(&self, offset: u32) -> *mut T {
        // SAFETY: callers checked that `offset` lies inside the window.
        unsafe { self.base.as_ptr().add(offset as usize).cast::<T>() }
    }
}

impl BusOps for MmioBus {
    fn read8(&self, offset: u32) -> u8 {
        if !self.check(offset, 1, "read8") {
            return 0;
        }
        // SAFETY: in bounds of the mapping promised by `new`.
        unsafe { read_volatile(self.ptr::<u8>(offset)) }
    }

    fn read16(&self, offset: u32) -> u16 {
        if !self.check(offset, 2, "read16") {
            return 0;
        }
        // SAFETY: in bounds and 2-byte aligned relative to the window base.
        unsafe { read_volatile(self.ptr::<u16>(offset)) }
    }

    fn read32(&self, offset: u32) -> u32 {
        if !self.check(offset, 4, "read32") {
            return 0;
        }
        // SAFETY: in bounds and 4-byte aligned relative to the window base.
        unsafe { read_volatile(self.ptr::<u32>(offset)) }
    }

    fn write8(&self, offset: u32, val: u8) {
        if self.check(offset, 1, "write8") {
            // SAFETY: in bounds of the mapping promised by `new`.
            unsafe { write_volatile(self.ptr::<u8>(offset), val) }
        }
    }

    fn write16(&self, offset: u32, val: u16) {
        if self.check(offset, 2, "write16") {
            // SAFETY: in bounds and 2-byte aligned relative to the window base.
            unsafe { write_volatile(self.ptr::<u16>(offset), val) }
        }
    }

    fn write32(&self, offset: u32, val: u32) {
        if self.check(offset, 4, "write32") {
            // SAFETY: in bounds and 4-byte aligned relative to the window base.
            unsafe { write_volatile(self.ptr::<u32>(offset), val) }
        }
    }

    fn address_space_size(&self) -> u32 {
        self.size
    }
}
