//! Micro-kernel generators (component D): JIT-emitted GEMM/BRGEMM,
//! element-wise unary, and element-wise binary kernels, all sharing the
//! C-ABI entry contract from the top-level design notes (pointer
//! arguments followed by leading-dimension element counts).

pub mod binary;
pub mod matmul;
pub mod sigmoid;
pub mod support;
pub mod unary;

use crate::arch::aarch64::encode::EncodeError;
use thiserror::Error;

/// Errors raised while generating a kernel (distinct from [`EncodeError`],
/// which is about a single instruction's operands; `SetupError` covers
/// kernel-level shape/parameter validity).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("dimension {name} must be positive, got {value}")]
    NonPositiveDimension { name: &'static str, value: i64 },

    #[error("encoding failed while generating the kernel body: {0}")]
    Encode(#[from] EncodeError),

    #[error("buffer error while generating the kernel body: {0}")]
    Buffer(#[from] crate::codebuf::BufferError),

    #[error("shape unsupported by this generator: {0}")]
    UnsupportedShape(&'static str),
}

pub type SetupResult<T> = Result<T, SetupError>;
