#![cfg_attr(not(test), no_std)]

//! VideoCore mailbox channel engine for the BCM2711.
//!
//! Multiplexes the ten firmware mailbox channels over the single
//! read/write register pair and interrupt line the ARM side sees. Requests
//! are queued per channel, written to the hardware when their channel is
//! idle, and completed from a deferred pass fed by the interrupt handler.
//!
//! See [`drivers::mailbox`] for the engine itself.

extern crate alloc;

pub mod arch;
pub mod drivers;
pub mod dt;
pub mod sync;

use core::fmt;

/// Initialize the console used for engine diagnostics
pub fn init() {
    drivers::tty::serial::WRITER.lock().init();
}

/// Print implementation that acquires the UART writer lock
#[cfg(not(test))]
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    // Console output is best effort; a failed write has nowhere to go
    let _ = drivers::tty::serial::WRITER.lock().write_fmt(args);
}

/// Host test builds send console output to stdout
#[cfg(test)]
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    std::print!("{}", args);
}

/// Print macro for console output
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::_print(format_args!($($arg)*)));
}

/// Println macro for console output
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
