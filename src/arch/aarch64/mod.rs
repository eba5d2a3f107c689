//! AArch64-specific architecture code
//!
//! IRQ entry routing for the GIC-400.

pub mod irq;
