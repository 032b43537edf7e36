//! Architecture layer.
//!
//! This crate targets exactly one instruction set: AArch64 with the
//! NEON/ASIMD vector extension. There is no architecture-abstraction
//! trait here the way a multi-target JIT would have one; the register
//! model, instruction encoders, and code buffer are all AArch64-specific
//! by design (see the Non-goals in the top-level spec).

pub mod aarch64;
