//! Device Tree Parsing
//!
//! Reads the Flattened Device Tree (FDT/DTB) passed by firmware to locate
//! the mailbox block and its interrupt line instead of hard-coding them.
//!
//! # Address Translation
//!
//! Device tree uses **bus addresses**, ARM CPU requires **physical addresses**:
//! - Bus: 0x7E00B880 (mailbox in DT) → Physical: 0xFE00B880
//! - Bus: 0x40041000 (GIC in DT)     → Physical: 0xFF841000
//!
//! # Interrupt Specifiers
//!
//! Under the GIC-400 each interrupt is three cells `<type number flags>`.
//! The mailbox node on BCM2711 is:
//!
//! ```text
//! mailbox@7e00b880 {
//!     compatible = "brcm,bcm2835-mbox";
//!     reg = <0x7e00b880 0x40>;
//!     interrupts = <GIC_SPI 33 IRQ_TYPE_LEVEL_HIGH>;   // GIC ID 65
//! };
//! ```
//!
//! # References
//!
//! - [Devicetree Specification](https://devicetree-specification.readthedocs.io/)
//! - Linux: Documentation/devicetree/bindings/mailbox/brcm,bcm2835-mbox.txt
//! - Linux: Documentation/devicetree/bindings/interrupt-controller/arm,gic.yaml

use alloc::string::String;
use alloc::vec::Vec;

use fdt_rs::base::DevTree;
use fdt_rs::prelude::*;

/// Compatible string of the VideoCore mailbox node
pub const MAILBOX_COMPATIBLE: &str = "brcm,bcm2835-mbox";

/// Cells per GIC interrupt specifier
pub const GIC_INTERRUPT_CELLS: usize = 3;

/// FDT header magic
const FDT_MAGIC: u32 = 0xd00dfeed;

/// Hardware information parsed from device tree
///
/// # Safety
///
/// Contains a raw pointer to the firmware DTB, which must stay valid for
/// the lifetime of this struct. Firmware DTBs are never freed.
pub struct HardwareInfo {
    dtb_ptr: *const u8,
    dtb_size: usize,
}

impl HardwareInfo {
    /// Parse DTB from firmware-provided pointer
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Pointer is null
    /// - Magic number is not 0xd00dfeed
    /// - Header size field cannot be read
    #[allow(clippy::not_unsafe_ptr_arg_deref)]
    pub fn from_firmware(dtb_ptr: *const u8) -> Result<Self, &'static str> {
        if dtb_ptr.is_null() {
            return Err("DTB pointer is null");
        }

        // SAFETY: Non-null firmware DTB pointer, header is at least 4 bytes
        let magic = unsafe { u32::from_be_bytes(*(dtb_ptr as *const [u8; 4])) };
        if magic != FDT_MAGIC {
            return Err("Invalid DTB magic number");
        }

        // SAFETY: Magic matched, the 40-byte FDT header follows
        let size = unsafe {
            let header = core::slice::from_raw_parts(dtb_ptr, 40);
            DevTree::read_totalsize(header).map_err(|_| "Failed to read DTB size")?
        };

        Ok(Self {
            dtb_ptr,
            dtb_size: size,
        })
    }

    /// Size of DTB in bytes
    pub fn size(&self) -> usize {
        self.dtb_size
    }

    /// Find the first node with a matching `compatible` entry
    ///
    /// Returns `None` if no such node exists or the tree fails to parse.
    pub fn find_device(&self, compatible: &str) -> Option<DeviceNode> {
        // SAFETY: dtb_ptr and dtb_size were validated in from_firmware
        let dtb_bytes = unsafe { core::slice::from_raw_parts(self.dtb_ptr, self.dtb_size) };

        // SAFETY: dtb_bytes holds a DTB whose header passed validation
        let dt = unsafe { DevTree::new(dtb_bytes).ok()? };

        // Iterator.next() returns Result<Option<Node>, Error>
        let mut compatible_iter = dt.compatible_nodes(compatible);
        let node = match compatible_iter.next() {
            Ok(Some(n)) => n,
            _ => return None,
        };

        Some(DeviceNode {
            name: node.name().unwrap_or(compatible).into(),
            base_addr: Self::extract_base_address(&node),
            interrupts: Self::read_cells(&node, "interrupts"),
        })
    }

    fn find_property<'a, 'b, 'dt>(
        node: &'a fdt_rs::base::DevTreeNode<'b, 'dt>,
        name: &str,
    ) -> Option<fdt_rs::base::DevTreeProp<'a, 'dt>> {
        let mut props = node.props();
        while let Ok(Some(prop)) = props.next() {
            if prop.name() == Ok(name) {
                return Some(prop);
            }
        }
        None
    }

    /// Bus address from the first "reg" entry
    ///
    /// The mailbox sits under `/soc` with one address cell and one size cell,
    /// but a two-cell parent would put the low word at index 1, so both
    /// layouts are tried and the one inside a peripheral window wins.
    fn extract_base_address(node: &fdt_rs::base::DevTreeNode) -> Option<usize> {
        let prop = Self::find_property(node, "reg")?;

        [1, 0]
            .into_iter()
            .filter_map(|i| prop.u32(i).ok())
            .map(|addr| addr as usize)
            .find(|&addr| is_peripheral_bus_address(addr))
    }

    /// All u32 cells of property `name`
    fn read_cells(node: &fdt_rs::base::DevTreeNode, name: &str) -> Vec<u32> {
        let Some(prop) = Self::find_property(node, name) else {
            return Vec::new();
        };
        (0..prop.length() / 4)
            .filter_map(|i| prop.u32(i).ok())
            .collect()
    }
}

/// Properties of one device tree node
pub struct DeviceNode {
    name: String,
    base_addr: Option<usize>,
    interrupts: Vec<u32>,
}

impl DeviceNode {
    /// Build a node by hand (boards without a DTB, tests)
    pub fn new(name: &str, base_addr: Option<usize>, interrupts: &[u32]) -> Self {
        Self {
            name: name.into(),
            base_addr,
            interrupts: interrupts.to_vec(),
        }
    }

    /// Node name (e.g., "mailbox@7e00b880")
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bus address from the first "reg" entry
    ///
    /// Translate with `bus_to_physical()` before touching registers.
    pub fn base_address(&self) -> Option<usize> {
        self.base_addr
    }

    /// Raw "interrupts" cells, `None` if the property is absent
    pub fn interrupts(&self) -> Option<&[u32]> {
        if self.interrupts.is_empty() {
            None
        } else {
            Some(&self.interrupts)
        }
    }

    /// Number of complete GIC interrupt specifiers
    pub fn interrupt_count(&self) -> usize {
        self.interrupts.len() / GIC_INTERRUPT_CELLS
    }

    /// GIC interrupt ID of the first specifier
    pub fn first_gic_interrupt(&self) -> Option<u32> {
        gic_interrupt_id(self.interrupts.get(..GIC_INTERRUPT_CELLS)?)
    }
}

fn is_peripheral_bus_address(addr: usize) -> bool {
    (0x7C00_0000..=0x7FFF_FFFF).contains(&addr) || (0x4000_0000..=0x407F_FFFF).contains(&addr)
}

/// Decode a GIC interrupt specifier into a GIC interrupt ID
///
/// `<0 n flags>` is SPI n (ID 32 + n), `<1 n flags>` is PPI n (ID 16 + n).
/// Returns `None` for any other type or a short specifier.
pub fn gic_interrupt_id(cells: &[u32]) -> Option<u32> {
    match cells {
        [0, n, ..] => n.checked_add(32),
        [1, n, ..] if *n < 16 => Some(16 + n),
        _ => None,
    }
}

/// Translate BCM2711 bus address to ARM physical address
///
/// From BCM2711 device tree `ranges` property:
/// - 0x7E000000-0x7F7FFFFF → 0xFE000000-0xFFF7FFFF (BCM283x peripherals)
/// - 0x7C000000-0x7DFFFFFF → 0xFC000000-0xFDFFFFFF (BCM2711 peripherals)
/// - 0x40000000-0x407FFFFF → 0xFF800000-0xFFFFFFFF (ARM local/GIC)
///
/// Source: U-Boot dts/upstream/src/arm/broadcom/bcm2711.dtsi `ranges` property
pub fn bus_to_physical(bus_addr: usize) -> usize {
    match bus_addr {
        addr if (0x7C00_0000..0x7F80_0000).contains(&addr) => addr + 0x8000_0000,
        addr if (0x4000_0000..0x4080_0000).contains(&addr) => addr + 0xBF80_0000,
        // Already physical or unknown
        addr => addr,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_to_physical() {
        assert_eq!(bus_to_physical(0x7E00_B880), 0xFE00_B880);
        assert_eq!(bus_to_physical(0x7D58_0000), 0xFD58_0000);
        assert_eq!(bus_to_physical(0x4004_1000), 0xFF84_1000);
        assert_eq!(bus_to_physical(0xFE00_B880), 0xFE00_B880);
    }

    #[test]
    fn test_gic_interrupt_id() {
        assert_eq!(gic_interrupt_id(&[0, 33, 4]), Some(65));
        assert_eq!(gic_interrupt_id(&[1, 14, 0xF08]), Some(30));
        assert_eq!(gic_interrupt_id(&[1, 16, 0]), None);
        assert_eq!(gic_interrupt_id(&[2, 33, 4]), None);
        assert_eq!(gic_interrupt_id(&[0]), None);
    }

    #[test]
    fn test_device_node_interrupts() {
        let node = DeviceNode::new("mailbox@7e00b880", Some(0x7E00_B880), &[0, 33, 4]);
        assert_eq!(node.name(), "mailbox@7e00b880");
        assert_eq!(node.base_address(), Some(0x7E00_B880));
        assert_eq!(node.interrupt_count(), 1);
        assert_eq!(node.first_gic_interrupt(), Some(65));

        let bare = DeviceNode::new("mailbox", None, &[]);
        assert!(bare.interrupts().is_none());
        assert_eq!(bare.first_gic_interrupt(), None);
    }

    #[test]
    fn test_from_firmware_rejects_bad_blobs() {
        assert!(HardwareInfo::from_firmware(core::ptr::null()).is_err());

        let junk = [0u8; 64];
        assert_eq!(
            HardwareInfo::from_firmware(junk.as_ptr()).err(),
            Some("Invalid DTB magic number")
        );
    }
}
