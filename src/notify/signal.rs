use axerrno::AxResult;

/// Identifier of a user-space process subscribing to interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

/// Delivers a notification number to a process.
///
/// Called from interrupt context with a spinlock held: implementations must
/// not block, allocate or log.
pub trait SignalSink: Send + Sync {
    /// Queues `signal` for `pid`.
    fn send_signal(&self, pid: ProcessId, signal: u32) -> AxResult;
}

/// Outcome of offering an interrupt to a line.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// The interrupt belongs to this line and was fanned out.
    Handled,
    /// The interrupt number does not match this line.
    NotHandled,
}

impl IrqReturn {
    #[inline]
    pub fn is_handled(self) -> bool {
        self == IrqReturn::Handled
    }
}

/// A sink that accepts and drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SignalSink for NullSink {
    fn send_signal(&self, _pid: ProcessId, _signal: u32) -> AxResult {
        Ok(())
    }
}
