//! Interrupt-to-notification routing.
//!
//! Each flink device exposes a number of interrupt lines. User-space processes
//! subscribe to a line and receive the line's notification number whenever
//! the hardware interrupt fires.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ register / unregister ┌──────────────────┐
//! │   Session    │ ─────────────────────>│  InterruptRouter │
//! └──────────────┘                       │  [InterruptLine] │
//!                                        └────────┬─────────┘
//! ┌──────────────┐   handle_irq(hw_irq)           │ dispatch
//! │ IRQ handler  │ ──────────────────────────────>│
//! └──────────────┘                                ▼
//!                                        ┌──────────────────┐
//!                                        │    SignalSink    │ send_signal(pid, signal)
//!                                        └──────────────────┘
//! ```
//!
//! Subscribing may allocate and runs under a per-line mutex. Dispatch runs
//! in interrupt context: it takes only the line's [`IrqSpinLock`], never
//! allocates and never blocks.
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use axflink::notify::{InterruptRouter, MailboxSink, ProcessId};
//! use axflink::DeviceConfig;
//!
//! let sink = Arc::new(MailboxSink::new());
//! let router = InterruptRouter::new(DeviceConfig::new(30, 55, 34), sink.clone())?;
//!
//! sink.attach(ProcessId(42))?;
//! let signal = router.register(1, ProcessId(42))?; // 35
//!
//! // From the interrupt handler:
//! let _ = router.handle_irq(56);
//!
//! assert_eq!(sink.take(ProcessId(42))?.as_slice(), &[signal]);
//! ```

mod irq_lock;
mod line;
mod mailbox;
mod router;
mod signal;

pub use irq_lock::{register_irq_mask, IrqMask, IrqSpinLock, IrqSpinLockGuard};
pub use line::InterruptLine;
pub use mailbox::{MailboxSink, MAILBOX_DEPTH};
pub use router::InterruptRouter;
pub use signal::{IrqReturn, NullSink, ProcessId, SignalSink};
