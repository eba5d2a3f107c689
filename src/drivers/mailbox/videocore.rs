//! VideoCore Mailbox Hardware Interface
//!
//! Register-level access to the BCM2711 mailbox used to talk to the
//! VideoCore firmware. Nothing in here knows about channels beyond packing
//! and unpacking the channel field of a mailbox word.
//!
//! # Protocol
//!
//! The mailbox passes 32-bit values where:
//! - Lower 4 bits: channel ID (0-15)
//! - Upper 28 bits: data payload (16-byte aligned bus address of the message)
//!
//! # Hardware Operation
//!
//! The ARM side sees two mailboxes:
//! - Mailbox 0: VideoCore → ARM. Read register, status (EMPTY flag) and a
//!   config register whose bit 0 raises an interrupt while data is pending
//! - Mailbox 1: ARM → VideoCore. Write register and status (FULL flag)
//!
//! The interrupt is level-triggered and clears once mailbox 0 is drained.
//!
//! # References
//!
//! - U-Boot: arch/arm/mach-bcm283x/mbox.c
//! - Linux: drivers/mailbox/bcm2835-mailbox.c
//! - BCM2711 ARM Peripherals §1.3

use volatile::Volatile;

use super::buffer::MessageBuffer;
use super::error::MailboxError;
use crate::drivers::irqchip::gic_v2::GIC;
use crate::println;

/// Mailbox base address (BCM2711)
/// Source: BCM2711 ARM Peripherals §1.3
pub const MAILBOX_BASE: usize = 0xFE00_B880;

/// Mailbox status flags
pub const STATUS_READ_EMPTY: u32 = 0x4000_0000;
pub const STATUS_WRITE_FULL: u32 = 0x8000_0000;

/// Mailbox 0 config: raise IRQ while data is available
const CONFIG_DATA_IRQ_ENABLE: u32 = 1 << 0;

/// Channel mask (lower 4 bits)
pub const CHANNEL_MASK: u32 = 0xF;

/// Default ceiling on write-FIFO-full polls before giving up
pub const DEFAULT_WRITE_RETRY_LIMIT: u32 = 100_000;

/// VideoCore sees ARM DRAM through the uncached alias at 0xC0000000
/// Source: U-Boot arch/arm/mach-bcm283x/phys2bus.c
const VC_BUS_ALIAS: u32 = 0xC000_0000;

/// Highest ARM physical address reachable through the alias (1 GB)
const VC_BUS_WINDOW: usize = 0x4000_0000;

/// Mailbox hardware registers
#[repr(C)]
struct MailboxRegisters {
    read: Volatile<u32>, // 0x00: Mailbox 0 read (ARM receives)
    _reserved0: [u32; 5],
    status0: Volatile<u32>, // 0x18: Mailbox 0 status
    config0: Volatile<u32>, // 0x1C: Mailbox 0 config
    write: Volatile<u32>,   // 0x20: Mailbox 1 write (ARM sends)
    _reserved1: [u32; 5],
    status1: Volatile<u32>, // 0x38: Mailbox 1 status
    _config1: Volatile<u32>, // 0x3C: Mailbox 1 config
}

/// One 32-bit mailbox FIFO entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RawWord(u32);

impl RawWord {
    /// Wrap a value read from the FIFO
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Pack channel and data into mailbox value
    /// Data must have lower 4 bits clear (16-byte aligned address)
    pub const fn pack(channel: u32, data: u32) -> Self {
        Self((data & !CHANNEL_MASK) | (channel & CHANNEL_MASK))
    }

    /// Extract channel from mailbox value
    pub const fn channel(self) -> u32 {
        self.0 & CHANNEL_MASK
    }

    /// Extract data from mailbox value
    pub const fn data(self) -> u32 {
        self.0 & !CHANNEL_MASK
    }

    /// Raw register value
    pub const fn value(self) -> u32 {
        self.0
    }
}

/// Decoded mailbox status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Mailbox 0 holds at least one response (EMPTY clear)
    pub read_available: bool,
    /// Mailbox 1 can take a request (FULL clear)
    pub write_available: bool,
}

impl MailboxStatus {
    /// Decode the two status registers
    pub const fn from_registers(status0: u32, status1: u32) -> Self {
        Self {
            read_available: status0 & STATUS_READ_EMPTY == 0,
            write_available: status1 & STATUS_WRITE_FULL == 0,
        }
    }
}

/// Raw mailbox register backend
///
/// Implemented by the BCM2711 MMIO block and by the simulated coprocessor
/// used in tests. Methods take `&self`: the read side is only touched by
/// the interrupt handler and the write side only under the channel table
/// lock, so the backend itself needs no locking.
pub trait MailboxHardware: Sync {
    /// Mailbox 0 status register
    fn read_status(&self) -> u32;

    /// Pop one word from mailbox 0
    fn read_data(&self) -> u32;

    /// Mailbox 1 status register
    fn write_status(&self) -> u32;

    /// Push one word into mailbox 1
    fn write_data(&self, value: u32);

    /// Mask or unmask the data-available interrupt
    fn set_interrupt_enabled(&self, enabled: bool);

    /// Address the VideoCore uses for `buffer`, if it can reach it
    fn bus_address(&self, buffer: &MessageBuffer) -> Option<u32>;
}

/// BCM2711 mailbox MMIO block
pub struct Bcm2711Mailbox {
    base_addr: usize,
    irq: u32,
}

impl Bcm2711Mailbox {
    /// Create a driver for the mailbox at `base_addr` raising GIC `irq`
    ///
    /// # Safety
    ///
    /// `base_addr` must be the ARM physical (identity-mapped) address of a
    /// BCM283x-compatible mailbox register block, and no other driver may
    /// touch that block while this instance exists.
    pub const unsafe fn new(base_addr: usize, irq: u32) -> Self {
        Self { base_addr, irq }
    }

    /// GIC interrupt ID of the data-available line
    pub fn irq(&self) -> u32 {
        self.irq
    }

    /// Get pointer to mailbox registers
    fn regs(&self) -> *mut MailboxRegisters {
        self.base_addr as *mut MailboxRegisters
    }
}

impl MailboxHardware for Bcm2711Mailbox {
    fn read_status(&self) -> u32 {
        // SAFETY: Register block validity is the contract of `new`
        unsafe { (*self.regs()).status0.read() }
    }

    fn read_data(&self) -> u32 {
        // SAFETY: Register block validity is the contract of `new`
        unsafe { (*self.regs()).read.read() }
    }

    fn write_status(&self) -> u32 {
        // SAFETY: Register block validity is the contract of `new`
        unsafe { (*self.regs()).status1.read() }
    }

    fn write_data(&self, value: u32) {
        // SAFETY: Data Memory Barrier orders the buffer cache clean before
        // the store that hands the address to the VideoCore
        unsafe {
            #[cfg(all(target_arch = "aarch64", target_os = "none"))]
            core::arch::asm!("dmb sy", options(nostack));
            (*self.regs()).write.write(value);
        }
    }

    fn set_interrupt_enabled(&self, enabled: bool) {
        // SAFETY: Register block validity is the contract of `new`
        unsafe {
            let config = &mut (*self.regs()).config0;
            let value = config.read();
            if enabled {
                config.write(value | CONFIG_DATA_IRQ_ENABLE);
            } else {
                config.write(value & !CONFIG_DATA_IRQ_ENABLE);
            }
        }

        let gic = GIC.lock();
        let result = if enabled {
            gic.enable_interrupt(self.irq)
        } else {
            gic.disable_interrupt(self.irq)
        };
        if let Err(e) = result {
            println!("[MBOX] GIC line {} not updated: {}", self.irq, e);
        }
    }

    fn bus_address(&self, buffer: &MessageBuffer) -> Option<u32> {
        let phys = buffer.as_ptr() as usize;
        if phys + buffer.len() > VC_BUS_WINDOW {
            return None;
        }
        Some(VC_BUS_ALIAS | phys as u32)
    }
}

/// Register-level mailbox contract
///
/// Wraps a backend with the bounded write spin and the empty check on
/// reads. No buffering, no channel bookkeeping.
pub struct RegisterInterface<H> {
    hw: H,
    write_retry_limit: u32,
}

impl<H: MailboxHardware> RegisterInterface<H> {
    pub fn new(hw: H, write_retry_limit: u32) -> Self {
        Self {
            hw,
            write_retry_limit,
        }
    }

    /// Underlying backend
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Current FIFO status
    pub fn status(&self) -> MailboxStatus {
        MailboxStatus::from_registers(self.hw.read_status(), self.hw.write_status())
    }

    /// Write one request word
    ///
    /// Polls the FULL flag at most `write_retry_limit` times after the first
    /// check. A FIFO that never drains means the VideoCore stopped
    /// servicing the mailbox; that is reported, never waited out.
    ///
    /// # Errors
    ///
    /// `HardwareBusy` once the retry ceiling is reached.
    pub fn write_request(&self, word: RawWord) -> Result<(), MailboxError> {
        let mut retries = 0;
        while self.hw.write_status() & STATUS_WRITE_FULL != 0 {
            if retries >= self.write_retry_limit {
                return Err(MailboxError::HardwareBusy);
            }
            retries += 1;
            core::hint::spin_loop();
        }

        self.hw.write_data(word.value());
        Ok(())
    }

    /// Read one response word
    ///
    /// # Errors
    ///
    /// `Empty` if mailbox 0 has nothing pending.
    pub fn read_response(&self) -> Result<RawWord, MailboxError> {
        if self.hw.read_status() & STATUS_READ_EMPTY != 0 {
            return Err(MailboxError::Empty);
        }
        Ok(RawWord::new(self.hw.read_data()))
    }

    /// Discard up to `limit` words left over from before we owned the mailbox
    ///
    /// Returns the number of words dropped.
    pub fn drain_stale(&self, limit: usize) -> usize {
        let mut drained = 0;
        while drained < limit && self.read_response().is_ok() {
            drained += 1;
        }
        drained
    }

    /// Mask or unmask the mailbox interrupt
    pub fn set_interrupt_enabled(&self, enabled: bool) {
        self.hw.set_interrupt_enabled(enabled);
    }

    /// Bus address for `buffer`
    pub fn bus_address(&self, buffer: &MessageBuffer) -> Option<u32> {
        self.hw.bus_address(buffer)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mailbox::sim::SimulatedMailbox;

    fn interface() -> RegisterInterface<SimulatedMailbox> {
        RegisterInterface::new(SimulatedMailbox::new(), 16)
    }

    #[test]
    fn test_pack_and_unpack() {
        let word = RawWord::pack(8, 0xC000_1230);
        assert_eq!(word.channel(), 8);
        assert_eq!(word.data(), 0xC000_1230);
        assert_eq!(word.value(), 0xC000_1238);
    }

    #[test]
    fn test_pack_masks_channel_and_data() {
        // Stray low data bits must never leak into the channel field
        let word = RawWord::pack(0x12, 0xC000_123F);
        assert_eq!(word.channel(), 2);
        assert_eq!(word.data(), 0xC000_1230);
    }

    #[test]
    fn test_status_mirrors_register_bits() {
        assert_eq!(
            MailboxStatus::from_registers(STATUS_READ_EMPTY, STATUS_WRITE_FULL),
            MailboxStatus {
                read_available: false,
                write_available: false
            }
        );
        assert_eq!(
            MailboxStatus::from_registers(0, 0),
            MailboxStatus {
                read_available: true,
                write_available: true
            }
        );
    }

    #[test]
    fn test_read_response_empty() {
        let regs = interface();
        assert_eq!(regs.read_response(), Err(MailboxError::Empty));
        assert!(!regs.status().read_available);
    }

    #[test]
    fn test_read_response_returns_word() {
        let regs = interface();
        regs.hardware().inject(0xC000_0042);
        assert!(regs.status().read_available);
        assert_eq!(regs.read_response(), Ok(RawWord::new(0xC000_0042)));
        assert_eq!(regs.read_response(), Err(MailboxError::Empty));
    }

    #[test]
    fn test_write_request_posts_word() {
        let regs = interface();
        assert!(regs.status().write_available);
        regs.write_request(RawWord::pack(3, 0x100)).unwrap();
        assert_eq!(regs.hardware().writes(), 1);
        assert_eq!(regs.hardware().outstanding(3), 1);
    }

    #[test]
    fn test_write_request_gives_up_when_full() {
        let regs = interface();
        regs.hardware().set_write_stalled(true);
        assert!(!regs.status().write_available);
        assert_eq!(
            regs.write_request(RawWord::pack(1, 0x100)),
            Err(MailboxError::HardwareBusy)
        );
        assert_eq!(regs.hardware().writes(), 0, "stalled write reached the FIFO");
        // First check plus one poll per retry
        assert_eq!(regs.hardware().write_status_reads(), 17);
    }

    #[test]
    fn test_drain_stale_is_bounded() {
        let regs = interface();
        for i in 0..5 {
            regs.hardware().inject(i << 4);
        }
        assert_eq!(regs.drain_stale(3), 3);
        assert_eq!(regs.drain_stale(10), 2);
        assert_eq!(regs.drain_stale(10), 0);
    }
}
