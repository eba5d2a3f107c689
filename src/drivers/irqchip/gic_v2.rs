//! GIC-400 (Generic Interrupt Controller v2) driver for BCM2711.
//!
//! Only what the mailbox needs: bring up the distributor and CPU interface,
//! route and unmask single SPI lines, and the acknowledge/EOI pair used by
//! the IRQ entry path.
//!
//! Reference: [ARM GIC-400 Architecture Specification](https://developer.arm.com/documentation/ihi0069/latest/)

use core::fmt;
use core::ptr::{read_volatile, write_volatile};

use lazy_static::lazy_static;
use spin::Mutex;

/// GIC Distributor base address (BCM2711).
///
/// Source: BCM2711 ARM Peripherals, Section 6
const GICD_BASE: usize = 0xFF84_1000;

/// GIC CPU Interface base address (BCM2711).
const GICC_BASE: usize = 0xFF84_2000;

/// GIC Distributor register offsets.
mod gicd_offsets {
    pub const CTLR: usize = 0x000; // Distributor Control Register
    pub const TYPER: usize = 0x004; // Interrupt Controller Type Register
    pub const IGROUPR: usize = 0x080; // Interrupt Group Registers
    pub const ISENABLER: usize = 0x100; // Interrupt Set-Enable Registers
    pub const ICENABLER: usize = 0x180; // Interrupt Clear-Enable Registers
    pub const IPRIORITYR: usize = 0x400; // Interrupt Priority Registers
    pub const ITARGETSR: usize = 0x800; // Interrupt Processor Targets Registers
    pub const ICFGR: usize = 0xC00; // Interrupt Configuration Registers
}

/// GIC CPU Interface register offsets.
mod gicc_offsets {
    pub const CTLR: usize = 0x000; // CPU Interface Control Register
    pub const PMR: usize = 0x004; // Interrupt Priority Mask Register
    pub const BPR: usize = 0x008; // Binary Point Register
    pub const IAR: usize = 0x00C; // Interrupt Acknowledge Register
    pub const EOIR: usize = 0x010; // End Of Interrupt Register
}

/// Group 0 and Group 1 enable bits (same layout in GICD_CTLR and GICC_CTLR)
const CTLR_ENABLE_GRP0_GRP1: u32 = 0b11;

/// First shared peripheral interrupt ID
const FIRST_SPI: u32 = 32;

/// IAR value meaning "nothing pending"
pub const SPURIOUS_INTERRUPT: u32 = 1023;

/// Priority given to routed SPIs (middle of the range)
const DEFAULT_PRIORITY: u8 = 0xA0;

/// Known interrupt IDs for BCM2711 peripherals.
///
/// Source: BCM2711 device tree (arch/arm/boot/dts/broadcom/bcm2711.dtsi)
pub mod irq {
    /// VideoCore mailbox, `<GIC_SPI 33 IRQ_TYPE_LEVEL_HIGH>`: 32 + 33 = 65
    pub const MAILBOX: u32 = 65;
}

/// GIC errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GicError {
    /// `init()` has not run
    NotInitialized,
    /// ID is not an SPI this distributor implements
    InvalidInterrupt(u32),
}

impl fmt::Display for GicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GicError::NotInitialized => write!(f, "GIC not initialized"),
            GicError::InvalidInterrupt(id) => write!(f, "Invalid interrupt ID {}", id),
        }
    }
}

lazy_static! {
    pub static ref GIC: Mutex<Gic> = Mutex::new(Gic::new());
}

/// GIC-400 driver instance
pub struct Gic {
    gicd_base: usize,
    gicc_base: usize,
    /// Interrupt lines implemented (from GICD_TYPER), 0 until init
    num_interrupts: u32,
}

impl Gic {
    pub const fn new() -> Self {
        Gic {
            gicd_base: GICD_BASE,
            gicc_base: GICC_BASE,
            num_interrupts: 0,
        }
    }

    /// Initialize the GIC distributor and CPU interface.
    ///
    /// Leaves every line as firmware configured it; lines are routed one at
    /// a time by `enable_interrupt`.
    ///
    /// NOTE: Requires `enable_gic=1` in config.txt for bare metal Pi 4.
    pub fn init(&mut self) {
        self.gicd_write(gicd_offsets::CTLR, 0);

        let it_lines_number = self.gicd_read(gicd_offsets::TYPER) & 0x1F;
        self.num_interrupts = 32 * (it_lines_number + 1);

        self.gicd_write(gicd_offsets::CTLR, CTLR_ENABLE_GRP0_GRP1);

        // Accept every priority, all bits used for preemption
        self.gicc_write(gicc_offsets::PMR, 0xFF);
        self.gicc_write(gicc_offsets::BPR, 0);
        self.gicc_write(gicc_offsets::CTLR, CTLR_ENABLE_GRP0_GRP1);
    }

    pub fn is_initialized(&self) -> bool {
        self.num_interrupts != 0
    }

    fn check_spi(&self, int_id: u32) -> Result<(), GicError> {
        if !self.is_initialized() {
            return Err(GicError::NotInitialized);
        }
        if !(FIRST_SPI..self.num_interrupts).contains(&int_id) {
            return Err(GicError::InvalidInterrupt(int_id));
        }
        Ok(())
    }

    /// Route an SPI to CPU 0 as a level-sensitive Group 0 interrupt and
    /// unmask it
    pub fn enable_interrupt(&self, int_id: u32) -> Result<(), GicError> {
        self.check_spi(int_id)?;

        self.set_group0(int_id);
        self.set_priority(int_id, DEFAULT_PRIORITY);
        self.set_target(int_id, 0x01);
        self.set_level_sensitive(int_id);
        self.gicd_write(gicd_offsets::ISENABLER + ((int_id / 32) * 4) as usize, 1 << (int_id % 32));
        Ok(())
    }

    /// Mask an SPI
    pub fn disable_interrupt(&self, int_id: u32) -> Result<(), GicError> {
        self.check_spi(int_id)?;
        self.gicd_write(gicd_offsets::ICENABLER + ((int_id / 32) * 4) as usize, 1 << (int_id % 32));
        Ok(())
    }

    /// Acknowledge the highest priority pending interrupt.
    ///
    /// Returns its ID, or `SPURIOUS_INTERRUPT` if nothing is pending.
    pub fn acknowledge_interrupt(&self) -> u32 {
        self.gicc_read(gicc_offsets::IAR) & 0x3FF
    }

    /// Signal end of interrupt processing for an ID from `acknowledge_interrupt()`.
    pub fn end_of_interrupt(&self, int_id: u32) {
        self.gicc_write(gicc_offsets::EOIR, int_id);
    }

    fn set_priority(&self, int_id: u32, priority: u8) {
        // SAFETY: GICD_IPRIORITYR is a byte-accessible array
        unsafe {
            let addr = (self.gicd_base + gicd_offsets::IPRIORITYR + int_id as usize) as *mut u8;
            write_volatile(addr, priority);
        }
    }

    fn set_group0(&self, int_id: u32) {
        let offset = gicd_offsets::IGROUPR + ((int_id / 32) * 4) as usize;
        let val = self.gicd_read(offset) & !(1u32 << (int_id % 32));
        self.gicd_write(offset, val);
    }

    fn set_target(&self, int_id: u32, cpu_mask: u8) {
        // SAFETY: GICD_ITARGETSR is a byte-accessible array
        unsafe {
            let addr = (self.gicd_base + gicd_offsets::ITARGETSR + int_id as usize) as *mut u8;
            write_volatile(addr, cpu_mask);
        }
    }

    fn set_level_sensitive(&self, int_id: u32) {
        let offset = gicd_offsets::ICFGR + ((int_id / 16) * 4) as usize;
        let shift = (int_id % 16) * 2;
        let val = self.gicd_read(offset) & !(0b11 << shift);
        self.gicd_write(offset, val);
    }

    fn gicd_read(&self, offset: usize) -> u32 {
        // SAFETY: gicd_base is the BCM2711 distributor, offset is in range
        unsafe { read_volatile((self.gicd_base + offset) as *const u32) }
    }

    fn gicd_write(&self, offset: usize, value: u32) {
        // SAFETY: See gicd_read
        unsafe { write_volatile((self.gicd_base + offset) as *mut u32, value) }
    }

    fn gicc_read(&self, offset: usize) -> u32 {
        // SAFETY: gicc_base is the BCM2711 CPU interface, offset is in range
        unsafe { read_volatile((self.gicc_base + offset) as *const u32) }
    }

    fn gicc_write(&self, offset: usize, value: u32) {
        // SAFETY: See gicc_read
        unsafe { write_volatile((self.gicc_base + offset) as *mut u32, value) }
    }
}

impl Default for Gic {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_uninitialized_gic_refuses_lines() {
        // Checked before any register access
        let gic = Gic::new();
        assert!(!gic.is_initialized());
        assert_eq!(gic.enable_interrupt(irq::MAILBOX), Err(GicError::NotInitialized));
        assert_eq!(gic.disable_interrupt(irq::MAILBOX), Err(GicError::NotInitialized));
    }

    #[test]
    fn test_spi_range_check() {
        let gic = Gic {
            gicd_base: GICD_BASE,
            gicc_base: GICC_BASE,
            num_interrupts: 256,
        };
        assert_eq!(gic.check_spi(irq::MAILBOX), Ok(()));
        assert_eq!(gic.check_spi(30), Err(GicError::InvalidInterrupt(30)));
        assert_eq!(gic.check_spi(256), Err(GicError::InvalidInterrupt(256)));
        assert_eq!(GicError::InvalidInterrupt(7).to_string(), "Invalid interrupt ID 7");
    }
}
