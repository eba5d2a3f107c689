//! Interrupt controllers

pub mod gic_v2;
