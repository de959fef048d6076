//! Plain-memory bus backend.

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::{fits, BusOps};

/// A bus whose address space is an ordinary byte buffer.
///
/// Values are stored little-endian, matching the AXI fabric the flink IP is
/// usually attached to. Every access that reaches the buffer is counted so
/// callers can assert that a rejected request never touched the bus.
pub struct RamBus {
    mem: Mutex<Vec<u8>>,
    accesses: AtomicUsize,
}

impl RamBus {
    /// Creates a zero-filled bus of `size` bytes.
    pub fn new(size: u32) -> Self {
        Self::from_bytes(vec![0; size as usize])
    }

    /// Creates a bus backed by the given bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            mem: Mutex::new(bytes),
            accesses: AtomicUsize::new(0),
        }
    }

    /// Number of in-bounds accesses performed so far.
    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::Relaxed)
    }

    fn load<const N: usize>(&self, offset: u32, op: &str) -> [u8; N] {
        let mem = self.mem.lock();
        let mut out = [0u8; N];
        if fits(mem.len() as u32, offset, N) {
            let start = offset as usize;
            out.copy_from_slice(&mem[start..start + N]);
            self.accesses.fetch_add(1, Ordering::Relaxed);
        } else {
            error!(
                "ram bus: {} at {:#x} outside the {:#x}-byte window",
                op,
                offset,
                mem.len()
            );
        }
        out
    }

    fn store<const N: usize>(&self, offset: u32, bytes: [u8; N], op: &str) {
        let mut mem = self.mem.lock();
        if fits(mem.len() as u32, offset, N) {
            let start = offset as usize;
            mem[start..start + N].copy_from_slice(&bytes);
            self.accesses.fetch_add(1, Ordering::Relaxed);
        } else {
            error!(
                "ram bus: {} at {:#x} outside the {:#x}-byte window",
                op,
                offset,
                mem.len()
            );
        }
    }
}

impl BusOps for RamBus {
    fn read8(&self, offset: u32) -> u8 {
        u8::from_le_bytes(self.load(offset, "read8"))
    }

    fn read16(&self, offset: u32) -> u16 {
        u16::from_le_bytes(self.load(offset, "read16"))
    }

    fn read32(&self, offset: u32) -> u32 {
        u32::from_le_bytes(self.load(offset, "read32"))
    }

    fn write8(&self, offset: u32, val: u8) {
        self.store(offset, val.to_le_bytes(), "write8");
    }

    fn write16(&self, offset: u32, val: u16) {
        self.store(offset, val.to_le_bytes(), "write16");
    }

    fn write32(&self, offset: u32, val: u32) {
        self.store(offset, val.to_le_bytes(), "write32");
    }

    fn address_space_size(&self) -> u32 {
        self.mem.lock().len() as u32
    }
}
