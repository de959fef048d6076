use axerrno::AxError;
use axflink::notify::{IrqReturn, MailboxSink, ProcessId};
use axflink::{
    init_registry, registry, BackendId, BusOps, DeviceConfig, DeviceRegistry, DeviceState,
    RamBus, SeekOrigin, Session,
};
use std::sync::Arc;
use std::thread;

/// Lays out a header chain on a fresh bus: an info block covering `total`
/// bytes followed by the given `(function word, size)` blocks.
fn flink_bus(size: u32, total: u32, blocks: &[(u32, u32)]) -> Arc<RamBus> {
    let bus = RamBus::new(size);
    bus.write32(0x00, 0x0000_0001);
    bus.write32(0x04, 0x40);
    bus.write32(0x20, total);

    let mut addr = 0x40;
    for (i, &(function, len)) in blocks.iter().enumerate() {
        bus.write32(addr, function);
        bus.write32(addr + 4, len);
        bus.write32(addr + 8, 1);
        bus.write32(addr + 0xC, 0x100 + i as u32);
        addr += len;
    }
    Arc::new(bus)
}

#[test]
fn test_full_flow() {
    let sink = Arc::new(MailboxSink::new());
    let registry = DeviceRegistry::new(sink.clone());
    let bus = flink_bus(0x1000, 0x140, &[(0x0005_0000, 0x80), (0x0006_0000, 0x80)]);
    let id = registry
        .register(BackendId(1), bus.clone(), DeviceConfig::new(2, 55, 34))
        .unwrap();
    let device = registry.get_device(id).unwrap();
    assert_eq!(device.address_space_size(), 0x140);
    assert_eq!(device.handle().to_string(), "flink0");

    let mut session = Session::open(&registry, device.handle()).unwrap();
    assert_eq!(session.read_subdevice_count(), 3);
    let info = session.read_subdevice_descriptor(2).unwrap();
    assert_eq!((info.function_id, info.base_addr, info.mem_size), (0x0006, 0xC0, 0x80));
    assert_eq!(info.unique_id, 0x101);

    session.select_subdevice(1, false).unwrap();
    session.seek(SeekOrigin::Start, 0x24).unwrap();
    assert_eq!(session.write(&0xA5A5_0000u32.to_le_bytes()), 4);
    assert_eq!(bus.read32(0x64), 0xA5A5_0000);
    session.write_bit(0x24, 0, true).unwrap();
    assert_eq!(bus.read32(0x64), 0xA5A5_0001);

    let pid = ProcessId(77);
    sink.attach(pid).unwrap();
    assert_eq!(session.register_interrupt(pid, 1), Ok(35));
    let router = device.interrupts();
    assert_eq!(router.handle_irq(56), IrqReturn::Handled);
    assert_eq!(router.handle_irq(56), IrqReturn::Handled);
    assert_eq!(router.handle_irq(60), IrqReturn::NotHandled);
    assert_eq!(sink.take(pid).unwrap().as_slice(), &[35, 35]);

    session.unregister_interrupt(pid, 1).unwrap();
    assert_eq!(router.handle_irq(56), IrqReturn::Handled);
    assert_eq!(sink.pending(pid), 0);
}

#[test]
fn test_concurrent_registration() {
    let registry = DeviceRegistry::new(Arc::new(MailboxSink::new()));
    let id = registry
        .register(
            BackendId(0),
            flink_bus(0x100, 0x100, &[]),
            DeviceConfig::new(4, 55, 34),
        )
        .unwrap();
    let device = registry.get_device(id).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|pid| {
            let device = device.clone();
            thread::spawn(move || device.interrupts().register(3, ProcessId(pid)))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.iter().all(|r| *r == Ok(37)));
    let line = device.interrupts().line(3).unwrap();
    assert_eq!(line.subscription_count(), results.len());
    assert_eq!(line.subscribers().len(), 16);
}

#[test]
fn test_concurrent_register_unregister_same_process() {
    let registry = DeviceRegistry::new(Arc::new(MailboxSink::new()));
    let id = registry
        .register(BackendId(0), flink_bus(0x100, 0x100, &[]), DeviceConfig::new(1, 0, 10))
        .unwrap();
    let device = registry.get_device(id).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let device = device.clone();
            thread::spawn(move || {
                let router = device.interrupts();
                let mut ok = 0;
                for _ in 0..100 {
                    if router.register(0, ProcessId(1)).is_ok() {
                        ok += 1;
                        assert_eq!(router.line(0).unwrap().subscription_count(), 1);
                        router.unregister(0, ProcessId(1)).unwrap();
                    }
                }
                ok
            })
        })
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert!(total > 0);
    assert_eq!(device.interrupts().total_subscriptions(), 0);
}

#[test]
fn test_dispatch_while_registering() {
    let sink = Arc::new(MailboxSink::new());
    for pid in 0..8 {
        sink.attach(ProcessId(pid)).unwrap();
    }
    let registry = DeviceRegistry::new(sink.clone());
    let id = registry
        .register(BackendId(0), flink_bus(0x100, 0x100, &[]), DeviceConfig::new(1, 55, 34))
        .unwrap();
    let device = registry.get_device(id).unwrap();

    let dispatcher = {
        let device = device.clone();
        thread::spawn(move || {
            for _ in 0..1000 {
                assert!(device.interrupts().handle_irq(55).is_handled());
            }
        })
    };
    for pid in 0..8 {
        device.interrupts().register(0, ProcessId(pid)).unwrap();
    }
    dispatcher.join().unwrap();

    let line = device.interrupts().line(0).unwrap();
    assert_eq!(line.dispatched(), 1000);
    assert_eq!(line.subscription_count(), 8);
}

#[test]
fn test_backend_unload() {
    let registry = DeviceRegistry::new(Arc::new(MailboxSink::new()));
    let bus = flink_bus(0x200, 0xC0, &[(0x0005_0000, 0x80)]);
    let kept = registry
        .register(BackendId(1), bus.clone(), DeviceConfig::without_irqs())
        .unwrap();
    let dropped = registry
        .register(BackendId(2), bus.clone(), DeviceConfig::new(1, 55, 34))
        .unwrap();

    let device = registry.get_device(dropped).unwrap();
    let mut session = Session::new(device.clone());
    session.select_subdevice(1, false).unwrap();
    device.interrupts().register(0, ProcessId(5)).unwrap();

    assert_eq!(registry.unregister_owned_by(BackendId(2)), 1);
    assert_eq!(device.state(), DeviceState::Removed);
    assert_eq!(device.interrupts().total_subscriptions(), 0);
    assert_eq!(session.read_subdevice_count(), 0);
    let mut buf = [0u8; 4];
    assert_eq!(session.read_at(0x20, &mut buf), 0);

    assert!(registry.get_device(kept).is_some());
    assert!(registry.get_device(dropped).is_none());
    assert_eq!(registry.unregister(dropped), Err(AxError::NotFound));
}

#[test]
fn test_global_registry() {
    let first = init_registry(Arc::new(MailboxSink::new()));
    let second = init_registry(Arc::new(MailboxSink::new()));
    assert!(std::ptr::eq(first, second));
    assert!(std::ptr::eq(registry().unwrap(), first));
}
