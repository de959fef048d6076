//! Subdevice discovery over the flink header chain.
//!
//! Every subdevice starts with a 16-byte main header followed by a 16-byte
//! sub header:
//!
//! ```text
//! 0x00  function word  (id 31..16 | sub-function 15..8 | version 7..0)
//! 0x04  size in bytes  (header included)
//! 0x08  number of channels
//! 0x0C  unique id
//! 0x10  sub header (function specific)
//! 0x20  first function register
//! ```
//!
//! The headers are chained back to back. A size that does not exceed the
//! combined header size terminates the chain. The info subdevice (function id
//! 0) stores the total length of the chain in its first register.

use axerrno::AxResult;

use crate::bus::BusOps;
use crate::subdevice::{FunctionType, SubdeviceHeader, SubdeviceTable, MAX_NOF_SUBDEVICES};

/// Size of the common header every subdevice starts with.
pub const MAIN_HEADER_SIZE: u32 = 16;
/// Size of the function specific header after the main one.
pub const SUB_HEADER_SIZE: u32 = 16;
/// Combined header size; a declared size at or below it ends the chain.
pub const HEADER_SIZE: u32 = MAIN_HEADER_SIZE + SUB_HEADER_SIZE;

/// Header offsets, relative to the subdevice base.
pub const FUNCTION_OFFSET: u32 = 0x0;
/// Declared size, header included.
pub const SIZE_OFFSET: u32 = 0x4;
/// Channel count.
pub const NOF_CHANNELS_OFFSET: u32 = 0x8;
/// Design-assigned unique id.
pub const UNIQUE_ID_OFFSET: u32 = 0xC;
/// Offset of the total memory length register of the info subdevice.
pub const INFO_MEMSIZE_OFFSET: u32 = HEADER_SIZE;

/// Result of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Number of subdevices appended to the table.
    pub count: usize,
    /// Upper bound the walk ended with; the bus size unless an info
    /// subdevice overrode it.
    pub scan_limit: u32,
}

/// Walks the header chain on `bus` and appends every subdevice to `table`.
///
/// The walk stops at the end-of-chain sentinel, at the upper bound, or after
/// [`MAX_NOF_SUBDEVICES`] entries. Malformed chains end the walk early with
/// a warning instead of failing; only allocation failure is an error.
pub fn scan_subdevices(bus: &dyn BusOps, table: &SubdeviceTable) -> AxResult<ScanOutcome> {
    let mut addr: u32 = 0;
    let mut limit = bus.address_space_size();
    let mut count = 0;

    while addr < limit && count < MAX_NOF_SUBDEVICES {
        if addr.checked_add(HEADER_SIZE).is_none() {
            warn!("{:?}: header at {:#x} wraps the address space", table.parent(), addr);
            break;
        }

        let function = FunctionType::from_raw(bus.read32(addr + FUNCTION_OFFSET));
        let size = bus.read32(addr + SIZE_OFFSET);
        if size <= HEADER_SIZE {
            break;
        }

        if function.is_info() {
            let total = bus.read32(addr + INFO_MEMSIZE_OFFSET);
            if total == 0 {
                warn!(
                    "{:?}: info subdevice at {:#x} reports zero length, ignored",
                    table.parent(),
                    addr
                );
            } else {
                limit = total;
            }
        }

        if addr as u64 + size as u64 > limit as u64 {
            warn!(
                "{:?}: subdevice at {:#x} of size {:#x} crosses the {:#x} bound",
                table.parent(),
                addr,
                size,
                limit
            );
            break;
        }

        table.append(SubdeviceHeader {
            function,
            base_addr: addr,
            mem_size: size,
            nof_channels: bus.read32(addr + NOF_CHANNELS_OFFSET),
            unique_id: bus.read32(addr + UNIQUE_ID_OFFSET),
        })?;
        count += 1;
        addr += size;
    }

    debug!(
        "{:?}: found {} subdevices within {:#x} bytes",
        table.parent(),
        count,
        limit
    );
    Ok(ScanOutcome {
        count,
        scan_limit: limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RamBus;
    use crate::device::DeviceId;
    use crate::subdevice::SubdeviceId;

    fn put_header(bus: &RamBus, addr: u32, function: u32, size: u32, channels: u32, uid: u32) {
        bus.write32(addr + FUNCTION_OFFSET, function);
        bus.write32(addr + SIZE_OFFSET, size);
        bus.write32(addr + NOF_CHANNELS_OFFSET, channels);
        bus.write32(addr + UNIQUE_ID_OFFSET, uid);
    }

    fn scan(bus: &RamBus) -> (ScanOutcome, SubdeviceTable) {
        let table = SubdeviceTable::new(DeviceId(0));
        let outcome = scan_subdevices(bus, &table).unwrap();
        (outcome, table)
    }

    #[test]
    fn test_scan_single_subdevice() {
        let bus = RamBus::new(48);
        put_header(&bus, 0, 0x0001_0203, 48, 1, 0xAAAA);

        let (outcome, table) = scan(&bus);
        assert_eq!(outcome, ScanOutcome { count: 1, scan_limit: 48 });
        let sd = table.get(SubdeviceId(0)).unwrap();
        assert_eq!(sd.base_addr, 0);
        assert_eq!(sd.mem_size, 48);
        assert_eq!(sd.nof_channels, 1);
        assert_eq!(sd.unique_id, 0xAAAA);
        assert_eq!(sd.function, FunctionType::from_raw(0x0001_0203));
    }

    #[test]
    fn test_scan_stops_at_sentinel() {
        let bus = RamBus::new(0x200);
        put_header(&bus, 0, 0x0005_0000, 0x40, 4, 1);
        put_header(&bus, 0x40, 0x0006_0000, 0x60, 2, 2);
        // Size 0 at 0xA0 terminates the chain.

        let (outcome, table) = scan(&bus);
        assert_eq!(outcome.count, 2);
        let ids: alloc::vec::Vec<u8> = table.list().iter().map(|sd| sd.id.0).collect();
        assert_eq!(ids, [0, 1]);
        assert_eq!(table.get(SubdeviceId(1)).unwrap().base_addr, 0x40);
    }

    #[test]
    fn test_scan_header_sized_entry_is_sentinel() {
        let bus = RamBus::new(0x100);
        put_header(&bus, 0, 0x0005_0000, HEADER_SIZE, 1, 1);
        let (outcome, _) = scan(&bus);
        assert_eq!(outcome.count, 0);
    }

    #[test]
    fn test_scan_empty_bus() {
        let bus = RamBus::new(0);
        let (outcome, table) = scan(&bus);
        assert_eq!(outcome, ScanOutcome { count: 0, scan_limit: 0 });
        assert!(table.is_empty());
        assert_eq!(bus.accesses(), 0);
    }

    #[test]
    fn test_scan_info_shrinks_bound() {
        let bus = RamBus::new(0x400);
        put_header(&bus, 0, 0x0000_0001, 0x40, 0, 0);
        bus.write32(INFO_MEMSIZE_OFFSET, 0x80);
        put_header(&bus, 0x40, 0x0005_0000, 0x40, 1, 1);
        // Past the advertised length; must not be discovered.
        put_header(&bus, 0x80, 0x0006_0000, 0x40, 1, 2);

        let (outcome, table) = scan(&bus);
        assert_eq!(outcome, ScanOutcome { count: 2, scan_limit: 0x80 });
        assert!(table.get(SubdeviceId(2)).is_none());
    }

    #[test]
    fn test_scan_info_zero_length_ignored() {
        let bus = RamBus::new(0x100);
        put_header(&bus, 0, 0x0000_0001, 0x40, 0, 0);
        put_header(&bus, 0x40, 0x0005_0000, 0x40, 1, 1);

        let (outcome, _) = scan(&bus);
        assert_eq!(outcome, ScanOutcome { count: 2, scan_limit: 0x100 });
    }

    #[test]
    fn test_scan_overrun_stops() {
        let bus = RamBus::new(0x80);
        put_header(&bus, 0, 0x0005_0000, 0x40, 1, 1);
        put_header(&bus, 0x40, 0x0006_0000, 0x100, 1, 2);

        let (outcome, table) = scan(&bus);
        assert_eq!(outcome.count, 1);
        for sd in table.list() {
            assert!(sd.base_addr as u64 + sd.mem_size as u64 <= 0x80);
        }
    }

    #[test]
    fn test_scan_caps_at_max_subdevices() {
        let size = 0x40;
        let bus = RamBus::new(size * (MAX_NOF_SUBDEVICES as u32 + 4));
        for i in 0..MAX_NOF_SUBDEVICES as u32 + 4 {
            put_header(&bus, i * size, 0x0005_0000, size, 1, i);
        }

        let (outcome, table) = scan(&bus);
        assert_eq!(outcome.count, MAX_NOF_SUBDEVICES);
        assert_eq!(table.len(), MAX_NOF_SUBDEVICES);
        assert_eq!(table.get(SubdeviceId(255)).unwrap().unique_id, 255);
    }
}
