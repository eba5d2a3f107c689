//! Serial drivers

pub mod amba_pl011;

pub use amba_pl011::WRITER;
