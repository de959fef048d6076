//! Per-open-handle state and the operations user space issues on it.
//!
//! A session is bound to one device for its whole life. Register accesses go
//! to the currently selected subdevice: stream offsets and bit offsets are
//! relative to its base address.

use alloc::sync::Arc;

use arrayvec::ArrayVec;
use axerrno::{ax_err, AxError, AxResult};

use crate::bus::AccessWidth;
use crate::device::{DeviceHandle, FlinkDevice};
use crate::notify::ProcessId;
use crate::registry::DeviceRegistry;
use crate::subdevice::{Subdevice, SubdeviceId, SubdeviceInfo};

/// Reference point of a [`Session::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// From offset 0 of the selected subdevice.
    Start,
    /// From the current position.
    Current,
    /// From the declared size of the selected subdevice.
    End,
}

/// An open handle on a flink device.
pub struct Session {
    device: Arc<FlinkDevice>,
    current: Option<Subdevice>,
    position: u64,
}

impl Session {
    /// Binds a new session to `device`.
    pub fn new(device: Arc<FlinkDevice>) -> Self {
        Self {
            device,
            current: None,
            position: 0,
        }
    }

    /// Opens a session on the device published under `handle`.
    pub fn open(registry: &DeviceRegistry, handle: DeviceHandle) -> AxResult<Self> {
        match registry.get_device_by_handle(handle) {
            Some(device) => {
                debug!("{}: session opened", handle);
                Ok(Self::new(device))
            }
            None => ax_err!(NotFound, "no device behind this handle"),
        }
    }

    pub fn device(&self) -> &Arc<FlinkDevice> {
        &self.device
    }

    /// The selected subdevice, if any.
    pub fn current_subdevice(&self) -> Option<&Subdevice> {
        self.current.as_ref()
    }

    /// Current stream position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Selects the subdevice `id` for subsequent accesses.
    ///
    /// `exclusive` is accepted for compatibility and has no effect. A failed
    /// selection leaves the session without a selected subdevice.
    pub fn select_subdevice(&mut self, id: u8, exclusive: bool) -> AxResult {
        self.current = self.device.subdevices().get(SubdeviceId(id));
        if self.current.is_none() {
            return ax_err!(NotFound, "no such subdevice");
        }
        if exclusive {
            debug!("{}: exclusive selection of subdevice {} is not enforced", self.device.handle(), id);
        }
        Ok(())
    }

    /// Number of subdevice ids handed out, saturated to 255.
    ///
    /// Detaching a subdevice does not lower the count, so every live id
    /// stays below it.
    pub fn read_subdevice_count(&self) -> u8 {
        u8::try_from(self.device.subdevices().id_count()).unwrap_or(u8::MAX)
    }

    /// Descriptor of subdevice `id`.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `id` is not below the subdevice count.
    /// - `NotFound` if the subdevice has been detached.
    pub fn read_subdevice_descriptor(&self, id: u8) -> AxResult<SubdeviceInfo> {
        if id as usize >= self.device.subdevices().id_count() {
            return ax_err!(InvalidInput, "subdevice id out of range");
        }
        match self.device.subdevices().get(SubdeviceId(id)) {
            Some(sd) => Ok(sd.info()),
            None => ax_err!(NotFound, "no such subdevice"),
        }
    }

    /// Absolute bus address of `offset` in the selected subdevice, for the
    /// ioctl bit operations.
    fn bit_address(&self, offset: u32, bit: u8) -> AxResult<u32> {
        let Some(sd) = self.current.as_ref() else {
            return ax_err!(NotFound, "no subdevice selected");
        };
        if bit >= 32 {
            return ax_err!(InvalidInput, "bit index out of range");
        }
        if !sd.accepts_offset(offset) {
            return ax_err!(InvalidInput, "offset beyond subdevice");
        }
        sd.base_addr
            .checked_add(offset)
            .ok_or_else(|| axerrno::ax_err_type!(InvalidInput, "offset overflows the bus"))
    }

    /// Reads one bit of the 32-bit word at `offset`.
    pub fn read_bit(&self, offset: u32, bit: u8) -> AxResult<bool> {
        let addr = self.bit_address(offset, bit)?;
        let word = self.device.read(addr, AccessWidth::Dword)?;
        Ok(word & (1 << bit) != 0)
    }

    /// Sets or clears one bit of the 32-bit word at `offset`.
    ///
    /// The read-modify-write is atomic with respect to other sessions on the
    /// same device.
    pub fn write_bit(&self, offset: u32, bit: u8, value: bool) -> AxResult {
        let addr = self.bit_address(offset, bit)?;
        self.device.update32(addr, |word| {
            if value {
                word | (1 << bit)
            } else {
                word & !(1 << bit)
            }
        })?;
        Ok(())
    }

    pub fn select_and_read_bit(&mut self, subdevice: u8, offset: u32, bit: u8) -> AxResult<bool> {
        self.select_subdevice(subdevice, false)?;
        self.read_bit(offset, bit)
    }

    pub fn select_and_write_bit(
        &mut self,
        subdevice: u8,
        offset: u32,
        bit: u8,
        value: bool,
    ) -> AxResult {
        self.select_subdevice(subdevice, false)?;
        self.write_bit(offset, bit, value)
    }

    /// Selects `subdevice` and reads `width` bytes at `offset`.
    ///
    /// Returns no bytes, without touching the bus, if `offset` lies beyond
    /// the subdevice. The selection persists.
    pub fn select_and_read(
        &mut self,
        subdevice: u8,
        offset: u32,
        width: usize,
    ) -> AxResult<ArrayVec<u8, 4>> {
        let width = AccessWidth::try_from(width)?;
        self.select_subdevice(subdevice, false)?;
        let Some(addr) = self.stream_address(offset as u64) else {
            return Ok(ArrayVec::new());
        };
        let val = self.device.read(addr, width)?;
        Ok(val.to_le_bytes()[..width.size()].iter().copied().collect())
    }

    /// Selects `subdevice` and writes the first `width` bytes of `data` at
    /// `offset`, returning the number of bytes written.
    pub fn select_and_write(
        &mut self,
        subdevice: u8,
        offset: u32,
        width: usize,
        data: &[u8],
    ) -> AxResult<usize> {
        let width = AccessWidth::try_from(width)?;
        if data.len() < width.size() {
            return ax_err!(InvalidInput, "buffer shorter than access width");
        }
        self.select_subdevice(subdevice, false)?;
        let Some(addr) = self.stream_address(offset as u64) else {
            return Ok(0);
        };
        self.device.write(addr, width, le_value(&data[..width.size()]))?;
        Ok(width.size())
    }

    /// Subscribes `caller` to interrupt `line` of the device.
    ///
    /// Fails with `BadState` once the device is being removed.
    pub fn register_interrupt(&self, caller: ProcessId, line: u32) -> AxResult<u32> {
        self.ensure_active()?;
        self.device.interrupts().register(line, caller)
    }

    /// Drops the subscription of `caller` on interrupt `line`.
    pub fn unregister_interrupt(&self, caller: ProcessId, line: u32) -> AxResult {
        self.ensure_active()?;
        self.device.interrupts().unregister(line, caller)
    }

    fn ensure_active(&self) -> AxResult {
        if !self.device.is_active() {
            return ax_err!(BadState, "device is not active");
        }
        Ok(())
    }

    /// Notification number of interrupt line 0.
    pub fn get_notification_offset(&self) -> u32 {
        self.device.interrupts().signal_offset()
    }

    /// Bus address for a stream access at `offset`, or `None` if nothing is
    /// selected or the offset lies beyond the selected subdevice.
    fn stream_address(&self, offset: u64) -> Option<u32> {
        let sd = self.current.as_ref()?;
        if offset > sd.mem_size as u64 {
            self.device.stats().record_out_of_range();
            return None;
        }
        sd.base_addr.checked_add(offset as u32)
    }

    /// Reads `buf.len()` bytes at `offset` of the selected subdevice.
    ///
    /// Returns the number of bytes read: `buf.len()` on success, 0 if
    /// nothing is selected, the offset lies beyond the subdevice, the length
    /// is not 1, 2 or 4, or the device is gone.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Ok(width) = AccessWidth::try_from(buf.len()) else {
            return 0;
        };
        let Some(addr) = self.stream_address(offset) else {
            return 0;
        };
        match self.device.read(addr, width) {
            Ok(val) => {
                buf.copy_from_slice(&val.to_le_bytes()[..width.size()]);
                buf.len()
            }
            Err(_) => 0,
        }
    }

    /// Writes `data` at `offset` of the selected subdevice, returning the
    /// number of bytes written under the same rules as [`read_at`](Self::read_at).
    pub fn write_at(&self, offset: u64, data: &[u8]) -> usize {
        let Ok(width) = AccessWidth::try_from(data.len()) else {
            return 0;
        };
        let Some(addr) = self.stream_address(offset) else {
            return 0;
        };
        match self.device.write(addr, width, le_value(data)) {
            Ok(()) => data.len(),
            Err(_) => 0,
        }
    }

    /// Reads at the current position. The position does not advance.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.read_at(self.position, buf)
    }

    /// Writes at the current position. The position does not advance.
    pub fn write(&self, data: &[u8]) -> usize {
        self.write_at(self.position, data)
    }

    /// Moves the stream position, returning the new one.
    pub fn seek(&mut self, origin: SeekOrigin, delta: i64) -> AxResult<u64> {
        let Some(sd) = self.current.as_ref() else {
            return ax_err!(InvalidInput, "seek without a selected subdevice");
        };
        let base = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => self.position,
            SeekOrigin::End => sd.mem_size as u64,
        };
        let position = base
            .checked_add_signed(delta)
            .ok_or(AxError::InvalidInput)?;
        self.position = position;
        Ok(position)
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device.handle())
            .field("subdevice", &self.current.map(|sd| sd.id))
            .field("position", &self.position)
            .finish()
    }
}

/// Little-endian value of up to four bytes.
fn le_value(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word[..bytes.len()].copy_from_slice(bytes);
    u32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusOps, RamBus};
    use crate::config::DeviceConfig;
    use crate::device::BackendId;
    use crate::notify::NullSink;

    /// Two subdevices: 0x00..0x40 and 0x40..0xC0.
    fn setup() -> (Arc<RamBus>, DeviceRegistry, Session) {
        let bus = Arc::new(RamBus::new(0x100));
        bus.write32(0x00, 0x0005_0102);
        bus.write32(0x04, 0x40);
        bus.write32(0x08, 4);
        bus.write32(0x0C, 0x1111);
        bus.write32(0x40, 0x0006_0001);
        bus.write32(0x44, 0x80);
        bus.write32(0x48, 2);
        bus.write32(0x4C, 0x2222);

        let registry = DeviceRegistry::new(Arc::new(NullSink));
        let id = registry
            .register(BackendId(0), bus.clone(), DeviceConfig::new(4, 55, 34))
            .unwrap();
        let handle = registry.get_device(id).unwrap().handle();
        let session = Session::open(&registry, handle).unwrap();
        (bus, registry, session)
    }

    #[test]
    fn test_open_unknown_handle() {
        let registry = DeviceRegistry::new(Arc::new(NullSink));
        assert_eq!(
            Session::open(&registry, DeviceHandle(4)).err(),
            Some(AxError::NotFound)
        );
    }

    #[test]
    fn test_select_subdevice() {
        let (_bus, _registry, mut session) = setup();
        assert!(session.current_subdevice().is_none());
        session.select_subdevice(1, true).unwrap();
        assert_eq!(session.current_subdevice().unwrap().base_addr, 0x40);

        assert_eq!(session.select_subdevice(2, false), Err(AxError::NotFound));
        assert!(session.current_subdevice().is_none());
    }

    #[test]
    fn test_subdevice_descriptors() {
        let (_bus, _registry, session) = setup();
        assert_eq!(session.read_subdevice_count(), 2);

        let info = session.read_subdevice_descriptor(0).unwrap();
        assert_eq!(info.function_id, 0x0005);
        assert_eq!(info.sub_function_id, 0x01);
        assert_eq!(info.function_version, 0x02);
        assert_eq!(info.nof_channels, 4);
        assert_eq!(info.unique_id, 0x1111);
        assert_eq!(session.read_subdevice_descriptor(1).unwrap().mem_size, 0x80);
        assert_eq!(
            session.read_subdevice_descriptor(2),
            Err(AxError::InvalidInput)
        );
    }

    #[test]
    fn test_stream_io() {
        let (bus, _registry, mut session) = setup();
        let mut buf = [0u8; 4];
        assert_eq!(session.read(&mut buf), 0);

        session.select_subdevice(1, false).unwrap();
        assert_eq!(session.seek(SeekOrigin::Start, 0x20), Ok(0x20));
        assert_eq!(session.write(&0xCAFE_F00Du32.to_le_bytes()), 4);
        assert_eq!(bus.read32(0x60), 0xCAFE_F00D);
        assert_eq!(session.read(&mut buf), 4);
        assert_eq!(u32::from_le_bytes(buf), 0xCAFE_F00D);
        assert_eq!(session.position(), 0x20);

        let mut half = [0u8; 2];
        assert_eq!(session.read_at(0x22, &mut half), 2);
        assert_eq!(u16::from_le_bytes(half), 0xCAFE);

        let mut odd = [0u8; 3];
        assert_eq!(session.read(&mut odd), 0);
        assert_eq!(session.write_at(0x81, &[1]), 0);
    }

    #[test]
    fn test_seek() {
        let (_bus, _registry, mut session) = setup();
        assert_eq!(session.seek(SeekOrigin::Start, 0), Err(AxError::InvalidInput));

        session.select_subdevice(0, false).unwrap();
        assert_eq!(session.seek(SeekOrigin::End, -4), Ok(0x3C));
        assert_eq!(session.seek(SeekOrigin::Current, -0x3C), Ok(0));
        assert_eq!(session.seek(SeekOrigin::Current, -1), Err(AxError::InvalidInput));
        assert_eq!(session.position(), 0);
    }

    #[test]
    fn test_select_and_rw_round_trip() {
        let (_bus, _registry, mut session) = setup();
        let value = 0x1234_5678u32.to_le_bytes();
        assert_eq!(session.select_and_write(1, 0x24, 4, &value), Ok(4));
        assert_eq!(
            session.select_and_read(1, 0x24, 4).unwrap().as_slice(),
            &value
        );
        assert_eq!(session.current_subdevice().unwrap().id, SubdeviceId(1));
        assert_eq!(
            session.select_and_read(1, 0x24, 3).err(),
            Some(AxError::InvalidInput)
        );
        assert_eq!(session.select_and_write(1, 0x24, 4, &[1, 2]), Err(AxError::InvalidInput));
    }

    #[test]
    fn test_select_and_read_beyond_subdevice() {
        let (bus, _registry, mut session) = setup();
        let before = bus.accesses();
        let bytes = session.select_and_read(0, 0x41, 4).unwrap();
        assert!(bytes.is_empty());
        assert_eq!(session.select_and_write(0, 0x41, 1, &[0xFF]), Ok(0));
        assert_eq!(bus.accesses(), before);
        assert_eq!(session.device().stats().out_of_range(), 2);
        assert_eq!(session.device().stats().errors(), 0);
    }

    #[test]
    fn test_bit_operations() {
        let (bus, _registry, mut session) = setup();
        assert_eq!(session.read_bit(0x20, 0), Err(AxError::NotFound));

        assert_eq!(session.select_and_write_bit(0, 0x20, 5, true), Ok(()));
        assert_eq!(bus.read32(0x20), 1 << 5);
        assert_eq!(session.read_bit(0x20, 5), Ok(true));
        assert_eq!(session.select_and_read_bit(0, 0x20, 4), Ok(false));

        session.write_bit(0x20, 31, true).unwrap();
        session.write_bit(0x20, 5, false).unwrap();
        assert_eq!(bus.read32(0x20), 1 << 31);

        assert_eq!(session.read_bit(0x20, 32), Err(AxError::InvalidInput));
        assert_eq!(session.write_bit(0x44, 0, true), Err(AxError::InvalidInput));
    }

    #[test]
    fn test_interrupt_registration() {
        let (_bus, _registry, session) = setup();
        assert_eq!(session.get_notification_offset(), 34);
        assert_eq!(session.register_interrupt(ProcessId(3), 2), Ok(36));
        assert_eq!(
            session.register_interrupt(ProcessId(3), 2),
            Err(AxError::AlreadyExists)
        );
        assert_eq!(session.unregister_interrupt(ProcessId(3), 2), Ok(()));
        assert_eq!(
            session.register_interrupt(ProcessId(3), 4),
            Err(AxError::InvalidInput)
        );
    }

    #[test]
    fn test_session_outlives_device() {
        let (bus, registry, mut session) = setup();
        session.select_subdevice(0, false).unwrap();
        let id = session.device().id();
        registry.unregister(id).unwrap();

        let before = bus.accesses();
        let mut buf = [0u8; 4];
        assert_eq!(session.read_at(0x20, &mut buf), 0);
        assert_eq!(session.write_at(0x20, &buf), 0);
        assert_eq!(session.read_bit(0x20, 0), Err(AxError::BadState));
        assert_eq!(bus.accesses(), before);

        assert_eq!(
            session.register_interrupt(ProcessId(1), 0),
            Err(AxError::BadState)
        );
        assert_eq!(
            session.unregister_interrupt(ProcessId(1), 0),
            Err(AxError::BadState)
        );
        let router = session.device().interrupts();
        assert_eq!(router.register(0, ProcessId(1)), Err(AxError::BadState));
        assert!(router.handle_irq(55).is_handled());
        assert_eq!(router.total_subscriptions(), 0);
    }

    #[test]
    fn test_descriptor_after_detach() {
        let (_bus, _registry, mut session) = setup();
        session
            .device()
            .subdevices()
            .detach(SubdeviceId(0))
            .unwrap();

        // The count keeps covering the highest id.
        assert_eq!(session.read_subdevice_count(), 2);
        assert_eq!(session.read_subdevice_descriptor(1).unwrap().base_addr, 0x40);
        assert_eq!(
            session.read_subdevice_descriptor(0),
            Err(AxError::NotFound)
        );
        assert_eq!(
            session.read_subdevice_descriptor(2),
            Err(AxError::InvalidInput)
        );
        assert_eq!(session.select_subdevice(0, false), Err(AxError::NotFound));
        session.select_subdevice(1, false).unwrap();
    }
}
