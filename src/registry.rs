//! Process-wide table of flink devices.
//!
//! Bus backends add devices when they probe hardware and remove them when
//! they unload; everything else only looks devices up. Lookups hand out
//! `Arc<FlinkDevice>` so a session keeps its device alive after removal.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use axerrno::{ax_err, AxResult};
use spin::RwLock;

use crate::bus::BusOps;
use crate::config::DeviceConfig;
use crate::device::{BackendId, DeviceHandle, DeviceId, FlinkDevice};
use crate::notify::SignalSink;

/// Device registry.
///
/// # Concurrency
///
/// The device map sits behind a read-write lock: lookups run concurrently,
/// registration and removal take it exclusively and only for the map update.
/// Probing (bus scan, line allocation) and teardown run outside the lock.
///
/// # Lifecycle
///
/// - `register()`: probe a device and publish it once fully built
/// - `unregister()`: unpublish it, then tear it down (state → Removing → Removed)
pub struct DeviceRegistry {
    devices: RwLock<BTreeMap<DeviceId, Arc<FlinkDevice>>>,
    /// Next device id; ids are never reused.
    next_id: AtomicUsize,
    /// Where every device delivers interrupt notifications.
    sink: Arc<dyn SignalSink>,
}

impl DeviceRegistry {
    /// Creates an empty registry delivering notifications to `sink`.
    pub fn new(sink: Arc<dyn SignalSink>) -> Self {
        Self {
            devices: RwLock::new(BTreeMap::new()),
            next_id: AtomicUsize::new(0),
            sink,
        }
    }

    fn next_device_id(&self) -> DeviceId {
        DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Probes a device on `bus` and publishes it.
    ///
    /// The device becomes visible to lookups only after its subdevices have
    /// been scanned and its interrupt lines allocated.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an interrupt layout that overflows.
    /// - `NoMemory` if the device cannot be allocated.
    ///
    /// Nothing is published on failure.
    pub fn register(
        &self,
        owner: BackendId,
        bus: Arc<dyn BusOps>,
        config: DeviceConfig,
    ) -> AxResult<DeviceId> {
        let id = self.next_device_id();
        let handle = match u32::try_from(id.0) {
            Ok(minor) => DeviceHandle(minor),
            Err(_) => return ax_err!(NoMemory, "device handle space exhausted"),
        };

        let device = FlinkDevice::probe(id, handle, owner, bus, config, self.sink.clone())?;
        debug!(
            "{}: registered by {:?} with {} subdevices and {} interrupt lines",
            handle,
            owner,
            device.subdevices().len(),
            config.nof_irqs
        );
        self.devices.write().insert(id, Arc::new(device));
        Ok(id)
    }

    /// Gets a device by its id.
    pub fn get_device(&self, id: DeviceId) -> Option<Arc<FlinkDevice>> {
        self.devices.read().get(&id).cloned()
    }

    /// Gets a device by its external handle.
    pub fn get_device_by_handle(&self, handle: DeviceHandle) -> Option<Arc<FlinkDevice>> {
        self.devices
            .read()
            .values()
            .find(|dev| dev.handle() == handle)
            .cloned()
    }

    /// Unpublishes a device and tears it down.
    pub fn unregister(&self, id: DeviceId) -> AxResult {
        let Some(device) = self.devices.write().remove(&id) else {
            return ax_err!(NotFound, "no such device");
        };
        device.teardown();
        Ok(())
    }

    /// Removes every device registered by `owner`, returning how many.
    pub fn unregister_owned_by(&self, owner: BackendId) -> usize {
        let removed: Vec<Arc<FlinkDevice>> = {
            let mut devices = self.devices.write();
            let ids: Vec<DeviceId> = devices
                .values()
                .filter(|dev| dev.owner() == owner)
                .map(|dev| dev.id())
                .collect();
            ids.iter().filter_map(|id| devices.remove(id)).collect()
        };
        for device in removed.iter() {
            device.teardown();
        }
        debug!("{:?}: {} devices removed", owner, removed.len());
        removed.len()
    }

    /// All published devices in id order.
    pub fn list_devices(&self) -> Vec<Arc<FlinkDevice>> {
        self.devices.read().values().cloned().collect()
    }

    /// Number of published devices.
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    /// Sink shared by every device of this registry.
    pub fn sink(&self) -> &Arc<dyn SignalSink> {
        &self.sink
    }
}

impl core::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.device_count())
            .finish()
    }
}
