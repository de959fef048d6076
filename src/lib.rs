#![no_std]

//! # flink device core
//!
//! This crate implements the core of a flink device stack: discovery of the
//! function blocks ("subdevices") an FPGA design exposes over a bus, and
//! routing of the design's interrupt lines to user-space processes as
//! notifications. It is designed for `no_std` environments and uses the
//! `alloc` crate for dynamic memory allocation.
//!
//! ## Architecture
//!
//! ### Bus access
//! - [`BusOps`]: sized register accesses supplied by a bus backend
//! - [`RamBus`], [`MmioBus`]: plain-memory and memory-mapped backends
//!
//! ### Discovery
//! - [`scan_subdevices`]: walks the header chain and fills a [`SubdeviceTable`]
//! - [`Subdevice`], [`SubdeviceInfo`]: one function block and its user-visible descriptor
//!
//! ### Device management
//! - [`DeviceRegistry`]: process-wide table of [`FlinkDevice`]s
//! - [`DeviceLifecycle`]: Active/Removing/Removed state machine used for teardown
//! - [`Session`]: per-open-handle state forwarding accesses to the selected subdevice
//!
//! ### Interrupt routing
//! - [`InterruptRouter`](notify::InterruptRouter): one [`InterruptLine`](notify::InterruptLine) per configured interrupt
//! - [`SignalSink`](notify::SignalSink): delivers notification numbers to processes
//!
//! ## Examples
//!
//! ### Registering a device and opening a session
//!
//! ```rust,ignore
//! use axflink::{init_registry, BackendId, DeviceConfig, DeviceHandle, MmioBus, SeekOrigin, Session};
//! use axflink::notify::{MailboxSink, ProcessId};
//!
//! let sink = Arc::new(MailboxSink::new());
//! let registry = init_registry(sink.clone());
//!
//! // Bus backend probe: 30 interrupt lines starting at hardware IRQ 55,
//! // notified as 34, 35, ...
//! let bus = Arc::new(unsafe { MmioBus::new(base, size) });
//! let id = registry.register(BackendId(0), bus, DeviceConfig::new(30, 55, 34))?;
//! for (hw_irq, _line) in registry.get_device(id).unwrap().interrupts().bindings() {
//!     host_request_irq(hw_irq);
//! }
//!
//! // Process side
//! let mut session = Session::open(registry, DeviceHandle(0))?;
//! session.select_subdevice(1, false)?;
//! session.seek(SeekOrigin::Start, 0x20)?;
//! let mut word = [0u8; 4];
//! session.read(&mut word);
//!
//! sink.attach(ProcessId(42))?;
//! let signal = session.register_interrupt(ProcessId(42), 1)?;
//! ```
//!
//! ### Interrupt handler
//!
//! ```rust,ignore
//! // `device` is the Arc<FlinkDevice> captured when the line was bound.
//! fn on_irq(device: &FlinkDevice, hw_irq: u32) -> bool {
//!     device.interrupts().handle_irq(hw_irq).is_handled()
//! }
//! ```

extern crate alloc;
#[macro_use]
extern crate log;

pub mod bus;
mod config;
mod device;
mod lifecycle;
pub mod notify;
mod registry;
pub mod scan;
mod session;
mod subdevice;

pub use bus::{AccessWidth, BusOps, MmioBus, RamBus};
pub use config::DeviceConfig;
pub use device::{BackendId, DeviceHandle, DeviceId, DeviceStats, FlinkDevice};
pub use lifecycle::{AccessGuard, DeviceLifecycle, DeviceState};
pub use registry::DeviceRegistry;
pub use scan::{scan_subdevices, ScanOutcome};
pub use session::{SeekOrigin, Session};
pub use subdevice::{
    FunctionType, Subdevice, SubdeviceHeader, SubdeviceId, SubdeviceInfo, SubdeviceTable,
    INFO_FUNCTION_ID, MAX_NOF_SUBDEVICES,
};

use alloc::sync::Arc;

use notify::SignalSink;

/// Process-wide device registry.
static GLOBAL_REGISTRY: spin::Once<DeviceRegistry> = spin::Once::new();

/// Installs the process-wide registry delivering notifications to `sink`.
///
/// Only the first call creates the registry; later calls return it and drop
/// their `sink`.
pub fn init_registry(sink: Arc<dyn SignalSink>) -> &'static DeviceRegistry {
    GLOBAL_REGISTRY.call_once(|| DeviceRegistry::new(sink))
}

/// The process-wide registry, if [`init_registry`] has run.
pub fn registry() -> Option<&'static DeviceRegistry> {
    GLOBAL_REGISTRY.get()
}
