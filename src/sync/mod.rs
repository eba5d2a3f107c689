//! Synchronization primitives
//!
//! Interrupt-safe locking for state shared with the mailbox IRQ path.

pub mod mutex;

pub use mutex::Mutex;
