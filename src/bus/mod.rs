//! Bus access capability consumed by the flink core.
//!
//! A flink device is reached through some bus (AXI on Zynq, PCI, SPI, ...).
//! The core never touches hardware itself: every access goes through a
//! [`BusOps`] implementation supplied by the bus backend when the device is
//! registered.
//!
//! Two backends ship with the crate:
//! - [`RamBus`]: plain memory, used by tests and hosted simulations.
//! - [`MmioBus`]: volatile accesses over an already mapped register window.

mod mmio;
mod ram;

pub use mmio::MmioBus;
pub use ram::RamBus;

use axerrno::AxError;

/// Width of a single bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Word,
    /// 32-bit access.
    Dword,
}

impl AccessWidth {
    /// Number of bytes moved by one access of this width.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Word => 2,
            AccessWidth::Dword => 4,
        }
    }
}

impl TryFrom<usize> for AccessWidth {
    type Error = AxError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        match size {
            1 => Ok(AccessWidth::Byte),
            2 => Ok(AccessWidth::Word),
            4 => Ok(AccessWidth::Dword),
            _ => Err(AxError::InvalidInput),
        }
    }
}

/// Sized register accesses over one device's address space.
///
/// Offsets are byte offsets relative to the start of the device window.
/// Implementations must not fail silently for an offset outside
/// [`address_space_size`](BusOps::address_space_size): the access is logged
/// at error level, reads return zero and writes are dropped.
pub trait BusOps: Send + Sync {
    /// Reads one byte.
    fn read8(&self, offset: u32) -> u8;
    /// Reads two bytes.
    fn read16(&self, offset: u32) -> u16;
    /// Reads four bytes.
    fn read32(&self, offset: u32) -> u32;
    /// Writes one byte.
    fn write8(&self, offset: u32, val: u8);
    /// Writes two bytes.
    fn write16(&self, offset: u32, val: u16);
    /// Writes four bytes.
    fn write32(&self, offset: u32, val: u32);
    /// Size of the addressable window in bytes.
    fn address_space_size(&self) -> u32;

    /// Reads `width` bytes at `offset`, zero-extended to 32 bits.
    fn read(&self, offset: u32, width: AccessWidth) -> u32 {
        match width {
            AccessWidth::Byte => self.read8(offset) as u32,
            AccessWidth::Word => self.read16(offset) as u32,
            AccessWidth::Dword => self.read32(offset),
        }
    }

    /// Writes the low `width` bytes of `val` at `offset`.
    fn write(&self, offset: u32, width: AccessWidth, val: u32) {
        match width {
            AccessWidth::Byte => self.write8(offset, val as u8),
            AccessWidth::Word => self.write16(offset, val as u16),
            AccessWidth::Dword => self.write32(offset, val),
        }
    }
}

/// Returns whether an access of `width` bytes at `offset` fits in a window of
/// `size` bytes.
#[inline]
pub(crate) fn fits(size: u32, offset: u32, width: usize) -> bool {
    (offset as u64) + (width as u64) <= size as u64
}
