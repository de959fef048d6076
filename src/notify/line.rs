//! One interrupt line and its subscribers.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use axerrno::{ax_err, AxResult};
use spin::Mutex;

use super::irq_lock::{reserve_one, IrqSpinLock};
use super::signal::{IrqReturn, ProcessId, SignalSink};

/// An interrupt line of a flink device.
///
/// Subscribers are kept in registration order; dispatch walks them backwards
/// so the most recent subscriber is notified first.
///
/// # Locking
///
/// - `ioctl_lock` serializes subscribe/unsubscribe and covers the duplicate
///   check and any allocation. It guards the closed flag set by
///   [`close`](Self::close). The interrupt handler never takes it.
/// - `subscribers` is only mutated with its spinlock held and interrupts
///   masked; dispatch reads it under the same spinlock.
pub struct InterruptLine {
    line: u32,
    hw_irq: u32,
    signal: u32,
    /// `true` once the line has been closed.
    ioctl_lock: Mutex<bool>,
    subscribers: IrqSpinLock<Vec<ProcessId>>,
    subscription_count: AtomicUsize,
    dispatched: AtomicU64,
    missed: AtomicU64,
}

impl InterruptLine {
    /// Creates an idle line. `hw_irq` and `signal` are precomputed by the
    /// router from the device configuration.
    pub const fn new(line: u32, hw_irq: u32, signal: u32) -> Self {
        Self {
            line,
            hw_irq,
            signal,
            ioctl_lock: Mutex::new(false),
            subscribers: IrqSpinLock::new(Vec::new()),
            subscription_count: AtomicUsize::new(0),
            dispatched: AtomicU64::new(0),
            missed: AtomicU64::new(0),
        }
    }

    /// Zero-based line number.
    #[inline]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Absolute hardware interrupt number.
    #[inline]
    pub fn hw_irq(&self) -> u32 {
        self.hw_irq
    }

    /// Notification number delivered to subscribers.
    #[inline]
    pub fn signal(&self) -> u32 {
        self.signal
    }

    #[inline]
    pub fn subscription_count(&self) -> usize {
        self.subscription_count.load(Ordering::Acquire)
    }

    /// Number of interrupts fanned out by this line.
    #[inline]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Number of notifications the sink refused.
    #[inline]
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    /// Whether `pid` is subscribed.
    pub fn contains(&self, pid: ProcessId) -> bool {
        self.subscribers.lock().contains(&pid)
    }

    /// Snapshot of the subscribers in registration order.
    pub fn subscribers(&self) -> Vec<ProcessId> {
        self.subscribers.lock().clone()
    }

    /// Whether the line has been closed by device teardown.
    pub fn is_closed(&self) -> bool {
        *self.ioctl_lock.lock()
    }

    /// Subscribes `pid`, returning the line's notification number.
    ///
    /// # Errors
    ///
    /// - `BadState` once the line is closed.
    /// - `AlreadyExists` if `pid` is subscribed already.
    /// - `NoMemory` if the subscriber list cannot grow.
    pub fn subscribe(&self, pid: ProcessId) -> AxResult<u32> {
        let closed = self.ioctl_lock.lock();
        if *closed {
            return ax_err!(BadState, "interrupt line is closed");
        }
        if self.subscribers.lock().contains(&pid) {
            return ax_err!(AlreadyExists, "process already registered for this line");
        }
        reserve_one(&self.subscribers)?;
        {
            let mut subscribers = self.subscribers.lock();
            subscribers.push(pid);
            self.subscription_count
                .store(subscribers.len(), Ordering::Release);
        }
        debug!(
            "line {} (irq {}): {:?} subscribed, signal {}",
            self.line, self.hw_irq, pid, self.signal
        );
        Ok(self.signal)
    }

    /// Removes the subscription of `pid`.
    pub fn unsubscribe(&self, pid: ProcessId) -> AxResult {
        let _serialized = self.ioctl_lock.lock();
        if self.subscription_count() == 0 {
            return ax_err!(NotFound, "no process registered for this line");
        }
        {
            let mut subscribers = self.subscribers.lock();
            let pos = subscribers.iter().position(|p| *p == pid);
            let Some(pos) = pos else {
                drop(subscribers);
                return ax_err!(NotFound, "process not registered for this line");
            };
            subscribers.remove(pos);
            self.subscription_count
                .store(subscribers.len(), Ordering::Release);
        }
        debug!("line {} (irq {}): {:?} unsubscribed", self.line, self.hw_irq, pid);
        Ok(())
    }

    /// Closes the line and drops every subscription, returning how many
    /// there were.
    ///
    /// Subscribers queued on the ioctl lock behind this call fail with
    /// `BadState`.
    pub fn close(&self) -> usize {
        let mut closed = self.ioctl_lock.lock();
        *closed = true;
        let old = {
            let mut subscribers = self.subscribers.lock();
            self.subscription_count.store(0, Ordering::Release);
            core::mem::take(&mut *subscribers)
        };
        old.len()
    }

    /// Offers the hardware interrupt `fired_irq` to this line.
    ///
    /// Runs in interrupt context: takes only the spinlock, never allocates
    /// and never logs. Sink failures are counted in [`missed`](Self::missed)
    /// and do not stop delivery to the remaining subscribers.
    pub fn dispatch(&self, fired_irq: u32, sink: &dyn SignalSink) -> IrqReturn {
        if fired_irq != self.hw_irq {
            return IrqReturn::NotHandled;
        }
        let subscribers = self.subscribers.lock_in_irq();
        for pid in subscribers.iter().rev() {
            if sink.send_signal(*pid, self.signal).is_err() {
                self.missed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        IrqReturn::Handled
    }
}

impl core::fmt::Debug for InterruptLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptLine")
            .field("line", &self.line)
            .field("hw_irq", &self.hw_irq)
            .field("signal", &self.signal)
            .field("subscription_count", &self.subscription_count())
            .finish()
    }
}
