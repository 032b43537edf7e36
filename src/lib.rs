//! tensorjit — a just-in-time compiler and execution engine for tensor
//! contraction and element-wise tensor expressions targeting AArch64
//! (ARMv8-A with NEON/ASIMD).
//!
//! Given a tensor-operation specification — dimensions tagged with
//! semantic roles (`M`/`N`/`K`/`C`), per-tensor strides, and a choice of
//! pre-accumulation, main, and post-accumulation primitives — this
//! crate emits native AArch64 machine code for inner micro-kernels,
//! composes those kernels under nested loops (optionally distributed
//! across a scoped thread pool), and executes the result against
//! caller-supplied contiguous buffers. A higher layer ([`einsum`])
//! parses tree-structured einsum expressions that compose several
//! contractions and permutations into one executable plan.
//!
//! # Layout
//!
//! - [`arch`] — components A/B: typed register identifiers and the pure
//!   AArch64 instruction encoders.
//! - [`codebuf`] — component C: the append-only, label-aware code
//!   buffer and its executable-memory materialization.
//! - [`kernels`] — component D: GEMM/BRGEMM and element-wise
//!   unary/binary micro-kernel generators.
//! - [`ir`] — components E/F: the per-dimension loop record
//!   ([`ir::Dimension`]) and the four-phase optimizer.
//! - [`driver`] — component G: [`driver::TensorOp`], which compiles a
//!   validated dimension list into kernels and runs them sequentially
//!   or across a worker pool.
//! - [`einsum`] — component H: the bracketed-expression parser and
//!   tree executor built on top of the driver.
//! - [`config`] — the `tensorjit.toml` optimizer/executor tuning
//!   surface.
//!
//! # Example
//!
//! ```no_run
//! use tensorjit::{DType, Dimension, DimRole, ExecMode, PrimitiveType, TensorOp};
//!
//! // C[m, n] += A[k, m] * B[n, k], a 16x6x1 GEMM tile.
//! let dims = vec![
//!     Dimension::new(DimRole::K, ExecMode::Primitive, 1, 1, 6, 0).unwrap(),
//!     Dimension::new(DimRole::N, ExecMode::Primitive, 6, 0, 1, 16).unwrap(),
//!     Dimension::new(DimRole::M, ExecMode::Primitive, 16, 1, 0, 1).unwrap(),
//! ];
//! let op = TensorOp::setup(
//!     DType::Fp32,
//!     PrimitiveType::None,
//!     PrimitiveType::Gemm,
//!     PrimitiveType::None,
//!     dims,
//! )
//! .unwrap();
//!
//! let a = [0.0f32; 16];
//! let b = [0.0f32; 6];
//! let mut c = [0.0f32; 96];
//! unsafe {
//!     op.execute(a.as_ptr(), Some(b.as_ptr()), c.as_mut_ptr());
//! }
//! ```

#![allow(clippy::too_many_arguments)]

pub mod arch;
pub mod codebuf;
pub mod config;
pub mod driver;
pub mod einsum;
pub mod ir;
pub mod kernels;

pub use codebuf::{BufferError, BufferResult, Code};
pub use config::{ConfigError, ConfigResult, ExecutorConfig, OptimizerConfig, TensorJitConfig};
pub use driver::{MainKernel, SetupError, SetupResult, TensorOp};
pub use einsum::{parse_einsum_expression, EinsumNode, ExprError, ExprResult};
pub use ir::{validate, DType, DimRole, Dimension, ExecMode, IrError, IrResult, PrimitiveType};

/// Crate version, re-exported from Cargo metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_reexports_are_reachable() {
        let cfg = TensorJitConfig::default();
        assert_eq!(cfg.optimizer.max_kernel_size, 64);
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn einsum_parser_is_reachable_from_the_crate_root() {
        let root = parse_einsum_expression("[2,0],[1,2]->[1,0]").unwrap();
        assert_eq!(root.output_dimension_ids, vec![1, 0]);
    }
}
