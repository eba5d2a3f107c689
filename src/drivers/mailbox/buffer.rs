//! Message Buffers
//!
//! Request/response memory handed to the VideoCore. The coprocessor reads
//! the request and writes the response in place through DMA, so a buffer
//! must be:
//!
//! 1. 16-byte aligned (the low 4 bits of the mailbox word carry the channel)
//! 2. Cleaned from the data cache before the address is posted
//! 3. Invalidated after the response arrives, before the CPU reads it
//!
//! Buffers are cache-line aligned, which covers (1) and keeps the
//! maintenance in (2) and (3) from touching neighbouring allocations.
//!
//! # References
//!
//! - Firmware wiki: <https://github.com/raspberrypi/firmware/wiki/Accessing-mailboxes>

use alloc::boxed::Box;
use alloc::vec;
use core::fmt;

/// Cache line size (ARM Cortex-A72)
pub const CACHE_LINE_SIZE: usize = 64;

/// One cache line of backing storage
#[repr(C, align(64))]
#[derive(Clone, Copy)]
struct CacheLine([u8; CACHE_LINE_SIZE]);

/// Cache-line aligned byte buffer owned by a mailbox caller
///
/// The engine takes the buffer for the duration of one exchange and gives
/// it back through the completion, whatever the outcome.
pub struct MessageBuffer {
    lines: Box<[CacheLine]>,
    len: usize,
}

impl MessageBuffer {
    /// Allocate a zeroed buffer of `len` bytes
    pub fn new(len: usize) -> Self {
        let count = len.div_ceil(CACHE_LINE_SIZE);
        Self {
            lines: vec![CacheLine([0; CACHE_LINE_SIZE]); count].into_boxed_slice(),
            len,
        }
    }

    /// Allocate a buffer holding a copy of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::new(bytes.len());
        buffer.as_bytes_mut().copy_from_slice(bytes);
        buffer
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length buffer
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start of the buffer memory
    pub fn as_ptr(&self) -> *const u8 {
        self.lines.as_ptr() as *const u8
    }

    /// Buffer contents
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `lines` holds at least `len` initialized bytes laid out
        // contiguously (CacheLine is repr(C) over a byte array, no padding)
        unsafe { core::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Mutable buffer contents
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `as_bytes`, and `&mut self` gives exclusive access
        unsafe { core::slice::from_raw_parts_mut(self.lines.as_mut_ptr() as *mut u8, self.len) }
    }

    /// Write dirty lines back so the VideoCore sees the request
    pub fn clean_dcache(&self) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        {
            let start = self.as_ptr() as usize;
            let end = start + self.lines.len() * CACHE_LINE_SIZE;

            // SAFETY: Cleaning lines we own; DSB orders the clean before the
            // mailbox write that publishes the address
            unsafe {
                let mut line = start;
                while line < end {
                    core::arch::asm!("dc cvac, {addr}", addr = in(reg) line, options(nostack));
                    line += CACHE_LINE_SIZE;
                }
                core::arch::asm!("dsb sy", options(nostack));
            }
        }
    }

    /// Drop cached lines so the CPU sees the VideoCore's response
    pub fn invalidate_dcache(&self) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        {
            let start = self.as_ptr() as usize;
            let end = start + self.lines.len() * CACHE_LINE_SIZE;

            // SAFETY: Invalidating lines we own. The buffer is cache-line
            // aligned and padded, so no other data shares these lines
            unsafe {
                core::arch::asm!("dsb sy", options(nostack));
                let mut line = start;
                while line < end {
                    core::arch::asm!("dc ivac, {addr}", addr = in(reg) line, options(nostack));
                    line += CACHE_LINE_SIZE;
                }
                core::arch::asm!("dsb sy", options(nostack));
            }
        }
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("addr", &self.as_ptr())
            .field("len", &self.len)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
