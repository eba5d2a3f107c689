//! Architecture-specific code
//!
//! This module contains platform-specific implementations for different architectures.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
