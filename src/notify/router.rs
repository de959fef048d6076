use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};

use super::line::InterruptLine;
use super::signal::{IrqReturn, ProcessId, SignalSink};
use crate::config::DeviceConfig;

/// Per-device table of interrupt lines.
///
/// The table is sized once from the [`DeviceConfig`] and never resized, so
/// line lookups from the interrupt handler are plain indexing.
pub struct InterruptRouter {
    config: DeviceConfig,
    lines: Box<[InterruptLine]>,
    sink: Arc<dyn SignalSink>,
}

impl InterruptRouter {
    /// Allocates one idle line per configured interrupt.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the configuration overflows the interrupt or
    ///   notification number space.
    /// - `NoMemory` if the line table cannot be allocated.
    pub fn new(config: DeviceConfig, sink: Arc<dyn SignalSink>) -> AxResult<Self> {
        config.validate()?;

        let mut lines = Vec::new();
        lines
            .try_reserve_exact(config.nof_irqs as usize)
            .map_err(|_| axerrno::ax_err_type!(NoMemory, "cannot allocate interrupt lines"))?;
        for line in 0..config.nof_irqs {
            lines.push(InterruptLine::new(
                line,
                config.irq_offset + line,
                config.signal_offset + line,
            ));
        }

        Ok(Self {
            config,
            lines: lines.into_boxed_slice(),
            sink,
        })
    }

    /// Number of lines.
    #[inline]
    pub fn nof_irqs(&self) -> u32 {
        self.config.nof_irqs
    }

    /// Hardware interrupt number of line 0.
    #[inline]
    pub fn irq_offset(&self) -> u32 {
        self.config.irq_offset
    }

    /// Notification number of line 0.
    #[inline]
    pub fn signal_offset(&self) -> u32 {
        self.config.signal_offset
    }

    pub fn lines(&self) -> &[InterruptLine] {
        &self.lines
    }

    /// Looks up a line for an ioctl-context request.
    pub fn line(&self, line: u32) -> AxResult<&InterruptLine> {
        if self.lines.is_empty() {
            return ax_err!(Unsupported, "device has no interrupt lines");
        }
        match self.lines.get(line as usize) {
            Some(l) => Ok(l),
            None => ax_err!(InvalidInput, "interrupt line out of range"),
        }
    }

    /// Subscribes `pid` to `line`, returning the notification number it will
    /// receive.
    pub fn register(&self, line: u32, pid: ProcessId) -> AxResult<u32> {
        self.line(line)?.subscribe(pid)
    }

    /// Drops the subscription of `pid` on `line`.
    pub fn unregister(&self, line: u32, pid: ProcessId) -> AxResult {
        self.line(line)?.unsubscribe(pid)
    }

    /// Offers `fired_irq` to one line. Interrupt context.
    pub fn dispatch(&self, line: u32, fired_irq: u32) -> IrqReturn {
        match self.lines.get(line as usize) {
            Some(l) => l.dispatch(fired_irq, &*self.sink),
            None => IrqReturn::NotHandled,
        }
    }

    /// Maps an absolute hardware interrupt to its line and dispatches it.
    /// Interrupt context.
    pub fn handle_irq(&self, fired_irq: u32) -> IrqReturn {
        match fired_irq.checked_sub(self.config.irq_offset) {
            Some(line) => self.dispatch(line, fired_irq),
            None => IrqReturn::NotHandled,
        }
    }

    /// `(hw_irq, line)` pairs the host must route to
    /// [`handle_irq`](Self::handle_irq).
    pub fn bindings(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.lines.iter().map(|l| (l.hw_irq(), l.line()))
    }

    /// Removes every subscription `pid` holds, returning how many there were.
    pub fn release_process(&self, pid: ProcessId) -> usize {
        let released = self
            .lines
            .iter()
            .filter(|l| l.contains(pid) && l.unsubscribe(pid).is_ok())
            .count();
        if released != 0 {
            debug!("released {} interrupt subscriptions of {:?}", released, pid);
        }
        released
    }

    /// Total subscriptions across all lines.
    pub fn total_subscriptions(&self) -> usize {
        self.lines.iter().map(InterruptLine::subscription_count).sum()
    }

    /// Closes every line, returning the number of dropped subscriptions.
    ///
    /// Registration on a torn-down router fails with `BadState`.
    pub fn teardown(&self) -> usize {
        self.lines.iter().map(InterruptLine::close).sum()
    }
}

impl core::fmt::Debug for InterruptRouter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptRouter")
            .field("config", &self.config)
            .field("subscriptions", &self.total_subscriptions())
            .finish()
    }
}
