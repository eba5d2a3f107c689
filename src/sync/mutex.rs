//! Mutex that masks interrupts while held
//!
//! The channel table is shared between submitters and the deferred
//! completion pass, and the interrupt handler runs on the same core as
//! both. A plain spinlock would deadlock if the mailbox IRQ fired while a
//! submitter held the table lock and the handler path ever needed it, so
//! the lock masks IRQs for as long as it is held:
//!
//! ```text
//! 1. Save current IRQ state
//! 2. Disable interrupts
//! 3. Acquire spinlock
//! 4. On drop: Release lock, restore IRQ state
//! ```
//!
//! This is the kernel pattern Linux spells `spin_lock_irqsave()`. On
//! hosted targets (test builds, tooling) there is no DAIF register to
//! touch and the lock degrades to a plain spinlock.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Mutex that disables interrupts while locked
///
/// # Example
/// ```ignore
/// static TABLE: Mutex<ChannelTable> = Mutex::new(ChannelTable::new());
///
/// let mut table = TABLE.lock();
/// table.drain_and_fail_all();
/// // Interrupts re-enabled when guard is dropped
/// ```
pub struct Mutex<T> {
    inner: UnsafeCell<T>,
    locked: AtomicBool,
}

// SAFETY: Mutex is Sync because:
// - Access to inner data is protected by atomic `locked` flag
// - IRQs are disabled while lock is held (prevents concurrent interrupt access)
// - Only one thread/CPU can hold the lock at a time
unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create a new mutex
    pub const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire the lock (disables interrupts)
    ///
    /// Spins while another CPU holds the lock. Critical sections in this
    /// crate are a handful of queue operations plus at most one bounded
    /// register write, so the spin is short.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let irq_state = IrqState::disable();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        MutexGuard {
            mutex: self,
            irq_state,
        }
    }
}

/// Guard returned by `Mutex::lock()`
///
/// Restores interrupt state when dropped.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    irq_state: IrqState,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Lock is held, so we have exclusive access
        unsafe { &*self.mutex.inner.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Lock is held, so we have exclusive access
        unsafe { &mut *self.mutex.inner.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        self.irq_state.restore();
    }
}

/// Saved IRQ state (from DAIF register)
///
/// DAIF = Debug, SError, IRQ, FIQ mask bits. Only the IRQ bit is set
/// here, the restore writes back whatever was saved.
struct IrqState {
    #[cfg_attr(not(all(target_arch = "aarch64", target_os = "none")), allow(dead_code))]
    daif: u64,
}

impl IrqState {
    /// Disable IRQs and return previous state
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    fn disable() -> Self {
        let daif: u64;

        // SAFETY: Reading/writing DAIF is safe because:
        // 1. DAIF is accessible at EL1 (our exception level)
        // 2. MSR daifset disables interrupts atomically
        // 3. We save the old value to restore later
        unsafe {
            core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
            core::arch::asm!("msr daifset, #2", options(nomem, nostack));
        }

        Self { daif }
    }

    /// Hosted targets have no interrupt mask to save
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    fn disable() -> Self {
        Self { daif: 0 }
    }

    /// Restore previous IRQ state
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    fn restore(&self) {
        // SAFETY: Restoring a DAIF value we saved ourselves; MSR is atomic
        unsafe {
            core::arch::asm!("msr daif, {}", in(reg) self.daif, options(nomem, nostack));
        }
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    fn restore(&self) {}
}

// ============================================================================
// Tests
// ============================================================================
