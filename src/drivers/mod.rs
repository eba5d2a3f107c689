//! Device drivers subsystem
//!
//! Organized by device class:
//! - `mailbox`: VideoCore mailbox channel engine
//! - `irqchip`: Interrupt controllers
//! - `tty`: Serial console

pub mod irqchip;
pub mod mailbox;
pub mod tty;
