//! Device lifecycle tracking for teardown while sessions are still open.
//!
//! Sessions keep a shared reference to their device, so a removed device is
//! never freed under them. What removal must guarantee is that no bus access is
//! in flight once the bus backend releases its mapping. The lifecycle packs
//! the state and the number of in-flight accesses into one atomic word so that
//! "check state, then count the access" cannot race with removal.
//!
//! Layout: `[state(8 bits) | access_count(24 bits)]`

use core::sync::atomic::{AtomicU32, Ordering};

/// Device lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    /// Visible and accepting bus accesses.
    Active = 0,
    /// Unpublished; new accesses are rejected while in-flight ones drain.
    Removing = 1,
    /// Subdevices and interrupt lines have been torn down.
    Removed = 2,
}

impl DeviceState {
    const fn from_bits(bits: u32) -> Self {
        match bits {
            0 => DeviceState::Active,
            1 => DeviceState::Removing,
            _ => DeviceState::Removed,
        }
    }
}

/// State machine guarding bus accesses against device removal.
///
/// ```text
/// ┌────────┐ begin_removal() ┌──────────┐ complete_removal() ┌─────────┐
/// │ Active │ ───────────────>│ Removing │ ──────────────────>│ Removed │
/// └────────┘                 └──────────┘                    └─────────┘
/// ```
pub struct DeviceLifecycle {
    word: AtomicU32,
}

impl DeviceLifecycle {
    const STATE_SHIFT: u32 = 24;
    const COUNT_MASK: u32 = (1 << Self::STATE_SHIFT) - 1;

    /// Creates a lifecycle in the `Active` state with no access in flight.
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new((DeviceState::Active as u32) << Self::STATE_SHIFT),
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> DeviceState {
        DeviceState::from_bits(self.word.load(Ordering::Acquire) >> Self::STATE_SHIFT)
    }

    /// Number of accesses currently in flight.
    #[inline]
    pub fn active_accesses(&self) -> u32 {
        self.word.load(Ordering::Acquire) & Self::COUNT_MASK
    }

    /// Starts an access if the device is still `Active`.
    ///
    /// The returned guard ends the access when dropped.
    pub fn try_begin_access(&self) -> Option<AccessGuard<'_>> {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if DeviceState::from_bits(current >> Self::STATE_SHIFT) != DeviceState::Active {
                return None;
            }
            if current & Self::COUNT_MASK == Self::COUNT_MASK {
                return None;
            }
            match self.word.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(AccessGuard { lifecycle: self }),
                Err(actual) => current = actual,
            }
        }
    }

    fn end_access(&self) {
        self.word.fetch_sub(1, Ordering::AcqRel);
    }

    /// Moves `Active` to `Removing`, keeping the in-flight count.
    ///
    /// Returns `false` if removal had already started.
    pub fn begin_removal(&self) -> bool {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if DeviceState::from_bits(current >> Self::STATE_SHIFT) != DeviceState::Active {
                return false;
            }
            let removing = ((DeviceState::Removing as u32) << Self::STATE_SHIFT)
                | (current & Self::COUNT_MASK);
            match self.word.compare_exchange_weak(
                current,
                removing,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Spins until every in-flight access has finished.
    pub fn wait_idle(&self) {
        while self.active_accesses() != 0 {
            core::hint::spin_loop();
        }
    }

    /// Marks the device as `Removed`. Call after [`wait_idle`](Self::wait_idle).
    pub fn complete_removal(&self) {
        self.word
            .store((DeviceState::Removed as u32) << Self::STATE_SHIFT, Ordering::Release);
    }
}

impl Default for DeviceLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for DeviceLifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceLifecycle")
            .field("state", &self.state())
            .field("active_accesses", &self.active_accesses())
            .finish()
    }
}

/// An in-flight access; ends it on drop.
pub struct AccessGuard<'a> {
    lifecycle: &'a DeviceLifecycle,
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.end_access();
    }
}
