//! A registered flink device.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use axerrno::{ax_err, AxResult};
use spin::Mutex;

use crate::bus::{AccessWidth, BusOps};
use crate::config::DeviceConfig;
use crate::lifecycle::{DeviceLifecycle, DeviceState};
use crate::notify::{InterruptRouter, SignalSink};
use crate::scan::scan_subdevices;
use crate::subdevice::SubdeviceTable;

/// Registry-assigned device identifier, increasing from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub usize);

/// Externally visible handle a session binds to, shown as `flink<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceHandle(pub u32);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flink{}", self.0)
    }
}

/// Identifies the bus backend that registered a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackendId(pub usize);

/// Bus access statistics for one device.
///
/// Counters are relaxed atomics: they are bumped from any session without
/// taking the device lock and are only meant for diagnostics.
#[derive(Debug, Default)]
pub struct DeviceStats {
    read_count: AtomicU64,
    write_count: AtomicU64,
    /// Accesses refused because the device was being removed.
    error_count: AtomicU64,
    /// Stream accesses dropped for lying beyond the selected subdevice.
    out_of_range_count: AtomicU64,
}

impl DeviceStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one completed bus read.
    #[inline]
    fn record_read(&self) {
        self.read_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one completed bus write.
    #[inline]
    fn record_write(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one access refused by the lifecycle.
    #[inline]
    fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one stream access past the end of a subdevice.
    #[inline]
    pub(crate) fn record_out_of_range(&self) {
        self.out_of_range_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets the total number of reads.
    #[inline]
    pub fn reads(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Gets the total number of writes.
    #[inline]
    pub fn writes(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Gets the number of rejected accesses.
    #[inline]
    pub fn errors(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Gets the number of stream accesses that fell outside the selected
    /// subdevice. These never reach the bus.
    #[inline]
    pub fn out_of_range(&self) -> u64 {
        self.out_of_range_count.load(Ordering::Relaxed)
    }
}

/// One flink FPGA design reachable over a bus.
///
/// A device owns:
/// - its bus capability,
/// - the subdevices discovered on that bus,
/// - one interrupt line per configured interrupt.
///
/// Devices are shared as `Arc<FlinkDevice>` between the registry and open
/// sessions. Removal goes through the [`DeviceLifecycle`]: once removal has
/// started every bus access is rejected with `BadState`.
pub struct FlinkDevice {
    id: DeviceId,
    handle: DeviceHandle,
    owner: BackendId,
    bus: Arc<dyn BusOps>,
    /// Effective address space size found by the scan.
    scan_limit: u32,
    subdevices: SubdeviceTable,
    interrupts: InterruptRouter,
    lifecycle: DeviceLifecycle,
    /// Serializes bus accesses so read-modify-write sequences are atomic.
    io_lock: Mutex<()>,
    stats: DeviceStats,
}

impl FlinkDevice {
    /// Builds a device: allocates the interrupt lines, then scans the bus for
    /// subdevices.
    pub fn probe(
        id: DeviceId,
        handle: DeviceHandle,
        owner: BackendId,
        bus: Arc<dyn BusOps>,
        config: DeviceConfig,
        sink: Arc<dyn SignalSink>,
    ) -> AxResult<Self> {
        let interrupts = InterruptRouter::new(config, sink)?;
        let subdevices = SubdeviceTable::new(id);
        let outcome = scan_subdevices(&*bus, &subdevices)?;

        Ok(Self {
            id,
            handle,
            owner,
            bus,
            scan_limit: outcome.scan_limit,
            subdevices,
            interrupts,
            lifecycle: DeviceLifecycle::new(),
            io_lock: Mutex::new(()),
            stats: DeviceStats::new(),
        })
    }

    /// Registry id.
    #[inline]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Handle sessions open the device by.
    #[inline]
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// Backend that registered the device.
    #[inline]
    pub fn owner(&self) -> BackendId {
        self.owner
    }

    /// Size of the address space covered by subdevices.
    #[inline]
    pub fn address_space_size(&self) -> u32 {
        self.scan_limit
    }

    /// Subdevices found by the scan.
    #[inline]
    pub fn subdevices(&self) -> &SubdeviceTable {
        &self.subdevices
    }

    /// Interrupt lines of the device.
    #[inline]
    pub fn interrupts(&self) -> &InterruptRouter {
        &self.interrupts
    }

    /// Bus access counters.
    #[inline]
    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> DeviceState {
        self.lifecycle.state()
    }

    /// Whether the device still accepts accesses and registrations.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state() == DeviceState::Active
    }

    /// Runs `f` on the bus with the device lock held, unless the device is
    /// being removed.
    fn with_bus<T>(&self, f: impl FnOnce(&dyn BusOps) -> T) -> AxResult<T> {
        let Some(_access) = self.lifecycle.try_begin_access() else {
            self.stats.record_error();
            return ax_err!(BadState, "device is not active");
        };
        let _guard = self.io_lock.lock();
        Ok(f(&*self.bus))
    }

    /// Reads `width` bytes at the absolute bus address `addr`.
    pub fn read(&self, addr: u32, width: AccessWidth) -> AxResult<u32> {
        let val = self.with_bus(|bus| bus.read(addr, width))?;
        self.stats.record_read();
        trace!("{}: read {:?} at {:#x} = {:#x}", self.handle, width, addr, val);
        Ok(val)
    }

    /// Writes the low `width` bytes of `val` at the absolute bus address
    /// `addr`.
    pub fn write(&self, addr: u32, width: AccessWidth, val: u32) -> AxResult {
        self.with_bus(|bus| bus.write(addr, width, val))?;
        self.stats.record_write();
        trace!("{}: write {:?} at {:#x} = {:#x}", self.handle, width, addr, val);
        Ok(())
    }

    /// Replaces the 32-bit word at `addr` by `f(old)` as one locked
    /// read-modify-write, returning the old value.
    pub fn update32(&self, addr: u32, f: impl FnOnce(u32) -> u32) -> AxResult<u32> {
        let old = self.with_bus(|bus| {
            let old = bus.read32(addr);
            bus.write32(addr, f(old));
            old
        })?;
        self.stats.record_read();
        self.stats.record_write();
        Ok(old)
    }

    /// Stops all bus traffic and releases the subdevices and interrupt
    /// subscriptions.
    ///
    /// Returns `false` if the device was already being torn down.
    pub fn teardown(&self) -> bool {
        if !self.lifecycle.begin_removal() {
            return false;
        }
        self.lifecycle.wait_idle();
        let subscriptions = self.interrupts.teardown();
        let subdevices = self.subdevices.destroy();
        self.lifecycle.complete_removal();
        debug!(
            "{}: removed, {} subdevices and {} subscriptions released",
            self.handle, subdevices, subscriptions
        );
        true
    }
}

impl fmt::Debug for FlinkDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlinkDevice")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("owner", &self.owner)
            .field("address_space_size", &self.scan_limit)
            .field("subdevices", &self.subdevices.len())
            .field("state", &self.state())
            .finish()
    }
}
