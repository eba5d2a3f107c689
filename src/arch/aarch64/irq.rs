//! AArch64 IRQ entry.
//!
//! Called from the IRQ slot of the exception vector table. Acknowledges the
//! interrupt at the GIC, routes it to its driver and signals end of
//! interrupt. Driver handlers do the minimum in IRQ context; the mailbox
//! leaves response matching to `drivers::mailbox::run_deferred()`, which
//! the kernel runs from its idle or bottom-half loop.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::drivers::irqchip::gic_v2::{GIC, SPURIOUS_INTERRUPT};
use crate::drivers::mailbox::{self, IrqReturn};
use crate::println;

/// Log at most this many of each kind of stray interrupt
const LOG_LIMIT: u32 = 10;

static SPURIOUS_COUNT: AtomicU32 = AtomicU32::new(0);
static UNCLAIMED_COUNT: AtomicU32 = AtomicU32::new(0);

/// Handle one IRQ exception
pub fn handle_irq() {
    // Drop the lock immediately after acknowledging
    let int_id = GIC.lock().acknowledge_interrupt();

    if int_id == SPURIOUS_INTERRUPT {
        let count = SPURIOUS_COUNT.fetch_add(1, Ordering::Relaxed);
        if count < LOG_LIMIT {
            println!("[IRQ] Spurious interrupt (count: {})", count + 1);
        }
        return;
    }

    if dispatch(int_id) == IrqReturn::NotClaimed {
        let count = UNCLAIMED_COUNT.fetch_add(1, Ordering::Relaxed);
        if count < LOG_LIMIT {
            println!("[IRQ] Interrupt {} not claimed (count: {})", int_id, count + 1);
        }
    }

    GIC.lock().end_of_interrupt(int_id);
}

/// Route an acknowledged interrupt ID to its driver
pub fn dispatch(int_id: u32) -> IrqReturn {
    if mailbox::irq_line() == Some(int_id) {
        return mailbox::handle_interrupt();
    }
    IrqReturn::NotClaimed
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_interrupt_not_claimed() {
        assert_eq!(dispatch(153), IrqReturn::NotClaimed);
    }

    #[test]
    fn test_mailbox_without_engine_not_claimed() {
        assert_eq!(dispatch(crate::drivers::irqchip::gic_v2::irq::MAILBOX), IrqReturn::NotClaimed);
    }
}
