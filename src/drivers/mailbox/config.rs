//! Mailbox configuration
//!
//! Register base, interrupt line and polling bounds. Defaults match the
//! Raspberry Pi 4; `from_device_tree` reads the first two from firmware.

use super::videocore::{DEFAULT_WRITE_RETRY_LIMIT, MAILBOX_BASE};
use crate::drivers::irqchip::gic_v2::irq;
use crate::dt::{DeviceNode, HardwareInfo, MAILBOX_COMPATIBLE, bus_to_physical};
use crate::println;

/// Most words `start()` discards before giving up on a chattering FIFO
pub const DEFAULT_STALE_DRAIN_LIMIT: usize = 64;

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxConfig {
    /// ARM physical address of the mailbox register block
    pub base_addr: usize,
    /// GIC interrupt ID of the data-available interrupt
    pub irq: u32,
    /// Write-FIFO-full polls before `HardwareBusy`
    pub write_retry_limit: u32,
    /// Upper bound on stale words drained at start
    pub stale_drain_limit: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            base_addr: MAILBOX_BASE,
            irq: irq::MAILBOX,
            write_retry_limit: DEFAULT_WRITE_RETRY_LIMIT,
            stale_drain_limit: DEFAULT_STALE_DRAIN_LIMIT,
        }
    }
}

impl MailboxConfig {
    /// Locate the mailbox in the firmware device tree
    ///
    /// # Errors
    ///
    /// Returns error if the node is missing or lacks a usable "reg" or
    /// "interrupts" property.
    pub fn from_device_tree(hw: &HardwareInfo) -> Result<Self, &'static str> {
        let node = hw
            .find_device(MAILBOX_COMPATIBLE)
            .ok_or("Mailbox node not found in device tree")?;
        Self::from_node(&node)
    }

    /// Build from an already located mailbox node
    ///
    /// Only the first register range and the first interrupt are used.
    pub fn from_node(node: &DeviceNode) -> Result<Self, &'static str> {
        let bus_addr = node
            .base_address()
            .ok_or("Mailbox node has no usable reg property")?;
        let irq = node
            .first_gic_interrupt()
            .ok_or("Mailbox node has no usable interrupts property")?;

        if node.interrupt_count() > 1 {
            println!(
                "[DT] {}: {} interrupts listed, using the first (ID {})",
                node.name(),
                node.interrupt_count(),
                irq
            );
        }

        Ok(Self {
            base_addr: bus_to_physical(bus_addr),
            irq,
            ..Self::default()
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_pi4() {
        let config = MailboxConfig::default();
        assert_eq!(config.base_addr, 0xFE00_B880);
        assert_eq!(config.irq, 65);
        assert_eq!(config.write_retry_limit, DEFAULT_WRITE_RETRY_LIMIT);
    }

    #[test]
    fn test_from_node_translates_address() {
        let node = DeviceNode::new("mailbox@7e00b880", Some(0x7E00_B880), &[0, 33, 4]);
        let config = MailboxConfig::from_node(&node).unwrap();
        assert_eq!(config, MailboxConfig::default());
    }

    #[test]
    fn test_from_node_uses_first_interrupt() {
        let node = DeviceNode::new("mailbox@7e00b880", Some(0x7E00_B880), &[0, 40, 4, 0, 33, 4]);
        let config = MailboxConfig::from_node(&node).unwrap();
        assert_eq!(config.irq, 72);
    }

    #[test]
    fn test_from_node_missing_properties() {
        let no_reg = DeviceNode::new("mailbox", None, &[0, 33, 4]);
        assert!(MailboxConfig::from_node(&no_reg).is_err());

        let no_irq = DeviceNode::new("mailbox", Some(0x7E00_B880), &[]);
        assert!(MailboxConfig::from_node(&no_irq).is_err());
    }
}
