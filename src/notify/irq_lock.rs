//! Interrupt-masking spinlock shared between thread context and the
//! interrupt handler.
//!
//! Taking a plain spinlock from thread context while the local interrupt
//! handler may spin on the same lock deadlocks the CPU. [`IrqSpinLock::lock`]
//! therefore masks local interrupts first, through the [`IrqMask`] the host
//! registered, and restores them after releasing the lock. The handler itself
//! already runs with interrupts masked and uses [`IrqSpinLock::lock_in_irq`].

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

use axerrno::AxResult;
use spin::{Mutex, MutexGuard, Once};

/// Local interrupt control provided by the host.
pub trait IrqMask: Send + Sync {
    /// Masks interrupts on the current CPU and returns the previous state.
    fn save_and_disable(&self) -> usize;
    /// Restores a state returned by [`save_and_disable`](Self::save_and_disable).
    fn restore(&self, flags: usize);
}

static IRQ_MASK: Once<&'static dyn IrqMask> = Once::new();

/// Installs the host's interrupt control.
///
/// Only the first registration takes effect; returns whether this call
/// installed `mask`. Until a mask is registered, locking does not touch the
/// interrupt state, which is what hosted builds and tests want.
pub fn register_irq_mask(mask: &'static dyn IrqMask) -> bool {
    let mut installed = false;
    IRQ_MASK.call_once(|| {
        installed = true;
        mask
    });
    installed
}

/// Saved interrupt state, restored on drop.
struct IrqState(Option<usize>);

impl IrqState {
    fn mask() -> Self {
        IrqState(IRQ_MASK.get().map(|mask| mask.save_and_disable()))
    }
}

impl Drop for IrqState {
    fn drop(&mut self) {
        if let (Some(flags), Some(mask)) = (self.0, IRQ_MASK.get()) {
            mask.restore(flags);
        }
    }
}

/// A spinlock whose thread-context holders run with local interrupts masked.
pub struct IrqSpinLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    /// Masks local interrupts, then spins for the lock.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = IrqState::mask();
        IrqSpinLockGuard {
            guard: self.inner.lock(),
            _irq: irq,
        }
    }

    /// Spins for the lock without touching the interrupt state.
    ///
    /// Only for callers already running with interrupts masked.
    pub fn lock_in_irq(&self) -> IrqSpinLockGuard<'_, T> {
        IrqSpinLockGuard {
            guard: self.inner.lock(),
            _irq: IrqState(None),
        }
    }
}

/// Guard of an [`IrqSpinLock`].
///
/// Releases the lock before the interrupt state is restored.
pub struct IrqSpinLockGuard<'a, T> {
    // Field order matters: the lock is released before `_irq` restores.
    guard: MutexGuard<'a, T>,
    _irq: IrqState,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

const MIN_CAPACITY: usize = 4;

/// Makes room for one more element in `slot` without allocating under the
/// spinlock.
///
/// When the vector is full, a larger one is allocated with the lock released,
/// the elements are moved over under the lock, and the old buffer is freed
/// after unlocking. The caller must hold the lock that serializes mutators of
/// `slot`, so the length cannot change between the check and the swap.
pub(crate) fn reserve_one<T>(slot: &IrqSpinLock<Vec<T>>) -> AxResult {
    let (len, capacity) = {
        let v = slot.lock();
        (v.len(), v.capacity())
    };
    if len < capacity {
        return Ok(());
    }

    let mut grown = Vec::new();
    grown
        .try_reserve_exact(capacity.saturating_mul(2).max(MIN_CAPACITY))
        .map_err(|_| axerrno::ax_err_type!(NoMemory, "cannot grow subscriber list"))?;

    let old = {
        let mut v = slot.lock();
        grown.extend(v.drain(..));
        core::mem::replace(&mut *v, grown)
    };
    drop(old);
    Ok(())
}
