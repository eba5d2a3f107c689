//! PL011 UART console output.
//!
//! Polling transmit-only driver for UART0, backing the crate's `print!` and
//! `println!` on bare metal. Receive and interrupts stay off.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;
use volatile::Volatile;

/// PL011 UART base address (BCM2711 Low Peripheral mode).
const UART_BASE: usize = 0xFE20_1000;

/// PL011 UART register bits.
///
/// Reference: [ARM PL011 TRM](https://developer.arm.com/documentation/ddi0183/latest/)
mod pl011_flags {
    pub const FR_TXFF: u32 = 1 << 5; // Transmit FIFO full
    pub const LCRH_FEN: u32 = 1 << 4; // FIFO enable
    pub const LCRH_WLEN_8BIT: u32 = 0b11 << 5; // 8-bit word length
    pub const CR_UARTEN: u32 = 1 << 0; // UART enable
    pub const CR_TXE: u32 = 1 << 8; // Transmit enable
    pub const ICR_ALL: u32 = 0x7FF; // Clear all interrupts
}

lazy_static! {
    pub static ref WRITER: Mutex<UartWriter> = Mutex::new(UartWriter::new(UART_BASE));
}

#[repr(C)]
struct Pl011Registers {
    dr: Volatile<u32>, // 0x00 - Data Register
    _rsv0: [u32; 5],
    fr: Volatile<u32>, // 0x18 - Flag Register
    _rsv1: [u32; 2],
    ibrd: Volatile<u32>, // 0x24 - Integer Baud Rate Divisor
    fbrd: Volatile<u32>, // 0x28 - Fractional Baud Rate Divisor
    lcrh: Volatile<u32>, // 0x2C - Line Control Register
    cr: Volatile<u32>,   // 0x30 - Control Register
    _rsv2: [u32; 1],
    imsc: Volatile<u32>, // 0x38 - Interrupt Mask Set/Clear
    _rsv3: [u32; 2],
    icr: Volatile<u32>, // 0x44 - Interrupt Clear Register
}

/// UART writer for serial console output
pub struct UartWriter {
    base_addr: usize,
    initialized: bool,
}

impl UartWriter {
    pub const fn new(base_addr: usize) -> Self {
        UartWriter {
            base_addr,
            initialized: false,
        }
    }

    fn regs(&mut self) -> &mut Pl011Registers {
        // SAFETY: base_addr is the PL011 UART0 block, always mapped on
        // BCM2711, and WRITER's mutex serializes access
        unsafe { &mut *(self.base_addr as *mut Pl011Registers) }
    }

    /// Configure 115200 baud 8N1 with FIFOs (48 MHz UART clock: IBRD=26, FBRD=3)
    ///
    /// GPIO 14/15 are left as firmware set them (Alt0 with `enable_uart=1`).
    pub fn init(&mut self) {
        let regs = self.regs();
        regs.cr.write(0);
        regs.imsc.write(0);
        regs.icr.write(pl011_flags::ICR_ALL);
        regs.ibrd.write(26);
        regs.fbrd.write(3);
        regs.lcrh
            .write(pl011_flags::LCRH_FEN | pl011_flags::LCRH_WLEN_8BIT);
        regs.cr.write(pl011_flags::CR_UARTEN | pl011_flags::CR_TXE);
        self.initialized = true;
    }

    pub fn write_byte(&mut self, byte: u8) {
        if !self.initialized {
            self.init();
        }

        let regs = self.regs();
        while regs.fr.read() & pl011_flags::FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        regs.dr.write(byte as u32);
    }
}

impl fmt::Write for UartWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}
