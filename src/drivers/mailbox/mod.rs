//! VideoCore Mailbox Interface
//!
//! The BCM2711 SoC contains the VideoCore GPU which controls initial boot
//! and provides various system services via a mailbox protocol. The mailbox
//! hardware passes 32-bit words between the ARM CPU and VideoCore, one
//! outstanding request per channel.
//!
//! This driver is interrupt-driven: callers submit a buffer and get a
//! handle back, the mailbox IRQ moves responses into a deferred queue, and
//! a deferred pass matches them to the waiting exchange.
//!
//! # Module Layout
//!
//! - `videocore`: register access and the `MailboxHardware` backend trait
//! - `channel`: per-channel in-flight slot and wait queue
//! - `exchange`: exchange state and caller handles
//! - `deferred`: interrupt-to-deferred handoff ring
//! - `engine`: the driver itself (`MailboxEngine`)
//!
//! # Usage
//!
//! ```ignore
//! let config = MailboxConfig::from_device_tree(&hw).unwrap_or_default();
//! let mbox = unsafe { mailbox::init(&config) };
//! mbox.start()?;
//!
//! let reply = mbox.call(channels::PROPERTY_ARM_TO_VC, request)?;
//! ```
//!
//! # References
//!
//! - U-Boot: arch/arm/mach-bcm283x/mbox.c
//! - Linux: drivers/mailbox/bcm2835-mailbox.c
//! - Firmware docs: <https://github.com/raspberrypi/firmware/wiki/Mailboxes>

pub mod buffer;
pub mod channel;
pub mod config;
pub mod deferred;
pub mod engine;
pub mod error;
pub mod exchange;
#[cfg(test)]
pub(crate) mod sim;
pub mod videocore;

pub use buffer::MessageBuffer;
pub use channel::{ChannelSnapshot, MAX_CHANNELS, channels};
pub use config::MailboxConfig;
pub use engine::{IrqReturn, LifecycleState, MailboxEngine, MailboxStats};
pub use error::{ExchangeFailure, MailboxError, SubmitError};
pub use exchange::{ExchangeHandle, ExchangeId, ExchangeResult, ExchangeState};
pub use videocore::{Bcm2711Mailbox, MailboxHardware};

use spin::Once;

use crate::println;

/// The board's mailbox, created once by `init`
static MAILBOX: Once<MailboxEngine<Bcm2711Mailbox>> = Once::new();

/// Create the global mailbox engine (stopped)
///
/// Later calls return the existing engine and ignore `config`.
///
/// # Safety
///
/// `config.base_addr` must be the identity-mapped address of the mailbox
/// register block and nothing else may drive that block.
pub unsafe fn init(config: &MailboxConfig) -> &'static MailboxEngine<Bcm2711Mailbox> {
    MAILBOX.call_once(|| {
        println!(
            "[MBOX] VideoCore mailbox at {:#x}, IRQ {}",
            config.base_addr, config.irq
        );
        // SAFETY: Forwarded from the caller
        let hw = unsafe { Bcm2711Mailbox::new(config.base_addr, config.irq) };
        MailboxEngine::new(hw, config)
    })
}

/// The global engine, if `init` has run
pub fn get() -> Option<&'static MailboxEngine<Bcm2711Mailbox>> {
    MAILBOX.r#try()
}

/// GIC interrupt ID the global engine listens on
pub fn irq_line() -> Option<u32> {
    get().map(|engine| engine.hardware().irq())
}

/// IRQ entry point for the mailbox line
pub fn handle_interrupt() -> IrqReturn {
    match get() {
        Some(engine) => engine.handle_interrupt(),
        None => IrqReturn::NotClaimed,
    }
}

/// Run the deferred completion pass of the global engine
///
/// Call from the kernel's bottom-half or idle loop after the IRQ handler
/// returns `Handled`. Returns the number of responses processed.
pub fn run_deferred() -> usize {
    get().map_or(0, MailboxEngine::run_deferred)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_global_is_inert() {
        // No test creates the global engine: it would map real registers
        assert!(get().is_none());
        assert_eq!(irq_line(), None);
        assert_eq!(handle_interrupt(), IrqReturn::NotClaimed);
        assert_eq!(run_deferred(), 0);
    }
}
