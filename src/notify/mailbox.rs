//! Portable per-process notification queues.

use alloc::vec::Vec;

use arrayvec::ArrayVec;
use axerrno::{ax_err, AxError, AxResult};
use spin::Mutex;

use super::irq_lock::{reserve_one, IrqSpinLock};
use super::signal::{ProcessId, SignalSink};

/// Number of notifications one mailbox holds before deliveries fail.
pub const MAILBOX_DEPTH: usize = 32;

struct Endpoint {
    pid: ProcessId,
    queue: ArrayVec<u32, MAILBOX_DEPTH>,
}

/// A [`SignalSink`] that queues notifications in fixed-depth mailboxes.
///
/// Hosts without a native signal mechanism attach a mailbox per process and
/// let the process drain it with [`take`](Self::take). Delivery only touches
/// the preallocated endpoint list.
pub struct MailboxSink {
    /// Serializes attach/detach.
    attach_lock: Mutex<()>,
    endpoints: IrqSpinLock<Vec<Endpoint>>,
}

impl MailboxSink {
    pub const fn new() -> Self {
        Self {
            attach_lock: Mutex::new(()),
            endpoints: IrqSpinLock::new(Vec::new()),
        }
    }

    /// Creates an empty mailbox for `pid`.
    pub fn attach(&self, pid: ProcessId) -> AxResult {
        let _serialized = self.attach_lock.lock();
        if self.endpoints.lock().iter().any(|ep| ep.pid == pid) {
            return ax_err!(AlreadyExists, "mailbox already attached");
        }
        reserve_one(&self.endpoints)?;
        self.endpoints.lock().push(Endpoint {
            pid,
            queue: ArrayVec::new(),
        });
        debug!("mailbox attached for {:?}", pid);
        Ok(())
    }

    /// Drops the mailbox of `pid`, returning how many notifications were
    /// still queued.
    pub fn detach(&self, pid: ProcessId) -> AxResult<usize> {
        let _serialized = self.attach_lock.lock();
        let mut endpoints = self.endpoints.lock();
        let pos = endpoints
            .iter()
            .position(|ep| ep.pid == pid)
            .ok_or(AxError::NotFound)?;
        let dropped = endpoints.swap_remove(pos).queue.len();
        drop(endpoints);
        debug!("mailbox detached for {:?}, {} pending dropped", pid, dropped);
        Ok(dropped)
    }

    /// Removes and returns every notification queued for `pid`, oldest first.
    pub fn take(&self, pid: ProcessId) -> AxResult<ArrayVec<u32, MAILBOX_DEPTH>> {
        let mut endpoints = self.endpoints.lock();
        let ep = endpoints
            .iter_mut()
            .find(|ep| ep.pid == pid)
            .ok_or(AxError::NotFound)?;
        Ok(core::mem::take(&mut ep.queue))
    }

    /// Number of notifications waiting for `pid`; zero if it has no mailbox.
    pub fn pending(&self, pid: ProcessId) -> usize {
        self.endpoints
            .lock()
            .iter()
            .find(|ep| ep.pid == pid)
            .map_or(0, |ep| ep.queue.len())
    }
}

impl Default for MailboxSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSink for MailboxSink {
    fn send_signal(&self, pid: ProcessId, signal: u32) -> AxResult {
        // Runs inside the dispatch path, interrupts are already masked.
        let mut endpoints = self.endpoints.lock_in_irq();
        let ep = endpoints
            .iter_mut()
            .find(|ep| ep.pid == pid)
            .ok_or(AxError::NotFound)?;
        ep.queue.try_push(signal).map_err(|_| AxError::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_delivery_order() {
        let sink = MailboxSink::new();
        sink.attach(ProcessId(10)).unwrap();
        assert_eq!(sink.attach(ProcessId(10)), Err(AxError::AlreadyExists));

        sink.send_signal(ProcessId(10), 34).unwrap();
        sink.send_signal(ProcessId(10), 35).unwrap();
        assert_eq!(sink.pending(ProcessId(10)), 2);
        assert_eq!(sink.take(ProcessId(10)).unwrap().as_slice(), &[34, 35]);
        assert_eq!(sink.pending(ProcessId(10)), 0);
    }

    #[test]
    fn test_mailbox_unknown_process() {
        let sink = MailboxSink::new();
        assert_eq!(sink.send_signal(ProcessId(1), 34), Err(AxError::NotFound));
        assert_eq!(sink.take(ProcessId(1)).err(), Some(AxError::NotFound));
        assert_eq!(sink.detach(ProcessId(1)), Err(AxError::NotFound));
    }

    #[test]
    fn test_mailbox_full() {
        let sink = MailboxSink::new();
        sink.attach(ProcessId(2)).unwrap();
        for i in 0..MAILBOX_DEPTH as u32 {
            sink.send_signal(ProcessId(2), i).unwrap();
        }
        assert_eq!(sink.send_signal(ProcessId(2), 99), Err(AxError::WouldBlock));
        assert_eq!(sink.detach(ProcessId(2)), Ok(MAILBOX_DEPTH));
    }

    #[test]
    fn test_mailbox_many_endpoints() {
        let sink = MailboxSink::new();
        for pid in 0..20 {
            sink.attach(ProcessId(pid)).unwrap();
        }
        for pid in 0..20 {
            sink.send_signal(ProcessId(pid), pid + 100).unwrap();
        }
        for pid in 0..20 {
            assert_eq!(sink.take(ProcessId(pid)).unwrap().as_slice(), &[pid + 100]);
        }
    }
}
