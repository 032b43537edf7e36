//! AArch64 (ARMv8-A) encoder surface.
//!
//! Fixed 32-bit instruction encoding, register-register ALU operations
//! only (no reg-mem forms), large immediates built with MOVZ/MOVK,
//! PC-relative branches. [`regs`] holds the register and NEON
//! arrangement types; [`encode`] holds the pure operand-to-u32 encoder
//! functions used by every kernel generator in [`crate::kernels`].

pub mod encode;
pub mod regs;
