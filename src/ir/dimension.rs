//! The tensor-operation intermediate representation (component E): the
//! per-dimension loop record the optimizer and driver both operate on.
//!
//! Grounded on `examples/original_source/include/mlc/ir/Dimension.h`
//! (the six-field record and its positive-size constructor check) and
//! `examples/original_source/src/types.h` (`dim_t`, `exec_t`, `dtype_t`,
//! `ptype_t`).

use thiserror::Error;

/// Errors raised while constructing or validating a dimension list.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("dimension size must be positive, got {0}")]
    NonPositiveSize(i64),

    #[error("stride vectors must have equal length: {roles} roles vs {strides} strides")]
    LengthMismatch { roles: usize, strides: usize },

    #[error("{main} expects {expected} primitive dimensions, found {found}")]
    WrongPrimitiveCount {
        main: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("sequential dimension at index {0} follows a primitive dimension")]
    SequentialAfterPrimitive(usize),

    #[error("shared dimensions must form a contiguous prefix of only M/N roles")]
    SharedPrefixViolation,
}

pub type IrResult<T> = Result<T, IrError>;

/// A dimension's role in the contraction: `M`/`N` are the output's two
/// axes, `K` is a reduction axis (and, for BRGEMM, the second `K`-role
/// primitive dimension doubles as the batch-reduce axis), `C` is a
/// permutation axis with no natural M/N role of its own (resolved from
/// stride-1 position during driver setup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimRole {
    M,
    N,
    K,
    C,
}

/// A dimension's execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecMode {
    Sequential,
    Primitive,
    Shared,
    Undefined,
}

/// Scalar element type. Only `Fp32` has generated kernels (§4.3); `Fp64`
/// exists so the IR and driver can reject it explicitly rather than by
/// omission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Fp32,
    Fp64,
}

impl DType {
    pub fn size_bytes(self) -> i64 {
        match self {
            DType::Fp32 => 4,
            DType::Fp64 => 8,
        }
    }
}

/// The kernel a tensor operation's first-touch, main, or last-touch slot
/// requests. Main-slot variants beyond `Identity`/`Gemm`/`Brgemm` are
/// this crate's extension of the original design to cover the six
/// binary element-wise primitives (§4.1 D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    None,
    Zero,
    Relu,
    Identity,
    Gemm,
    Brgemm,
    Square,
    Reciprocal,
    SigmoidPoly,
    SigmoidTable,
    SigmoidFast,
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

impl PrimitiveType {
    /// Number of primitive dimensions a main-slot selection requires, if
    /// it constrains the count at all (first/last-touch slots don't).
    pub fn required_primitive_count(self) -> Option<usize> {
        match self {
            PrimitiveType::Identity
            | PrimitiveType::Add
            | PrimitiveType::Sub
            | PrimitiveType::Mul
            | PrimitiveType::Div
            | PrimitiveType::Min
            | PrimitiveType::Max
            | PrimitiveType::Square
            | PrimitiveType::Reciprocal
            | PrimitiveType::SigmoidPoly
            | PrimitiveType::SigmoidTable
            | PrimitiveType::SigmoidFast => Some(2),
            PrimitiveType::Gemm => Some(3),
            PrimitiveType::Brgemm => Some(4),
            PrimitiveType::None | PrimitiveType::Zero | PrimitiveType::Relu => None,
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(
            self,
            PrimitiveType::Add
                | PrimitiveType::Sub
                | PrimitiveType::Mul
                | PrimitiveType::Div
                | PrimitiveType::Min
                | PrimitiveType::Max
        )
    }
}

/// One loop dimension: its role, how it executes, its trip count, and
/// its per-tensor strides (in elements, not bytes — the executor scales
/// by `DType::size_bytes` when advancing pointers, per §5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimension {
    pub role: DimRole,
    pub exec_mode: ExecMode,
    pub size: i64,
    pub stride_in0: i64,
    pub stride_in1: i64,
    pub stride_out: i64,
}

impl Dimension {
    pub fn new(
        role: DimRole,
        exec_mode: ExecMode,
        size: i64,
        stride_in0: i64,
        stride_in1: i64,
        stride_out: i64,
    ) -> IrResult<Self> {
        if size <= 0 {
            return Err(IrError::NonPositiveSize(size));
        }
        Ok(Dimension {
            role,
            exec_mode,
            size,
            stride_in0,
            stride_in1,
            stride_out,
        })
    }
}

/// Checks the well-formedness invariants from §4.4/§8: every primitive
/// dimension count matches `main`'s requirement (when it constrains one),
/// no sequential dimension follows a primitive one, and shared
/// dimensions form a contiguous M/N-only prefix.
pub fn validate(dims: &[Dimension], main: PrimitiveType) -> IrResult<()> {
    if let Some(expected) = main.required_primitive_count() {
        let found = dims.iter().filter(|d| d.exec_mode == ExecMode::Primitive).count();
        if found != expected {
            return Err(IrError::WrongPrimitiveCount {
                main: "main primitive",
                expected,
                found,
            });
        }
    }

    let mut seen_primitive = false;
    for (i, d) in dims.iter().enumerate() {
        match d.exec_mode {
            ExecMode::Primitive => seen_primitive = true,
            ExecMode::Sequential if seen_primitive => {
                return Err(IrError::SequentialAfterPrimitive(i));
            }
            _ => {}
        }
    }

    let mut in_shared_prefix = true;
    for d in dims {
        match d.exec_mode {
            ExecMode::Shared => {
                if !in_shared_prefix || !matches!(d.role, DimRole::M | DimRole::N) {
                    return Err(IrError::SharedPrefixViolation);
                }
            }
            _ => in_shared_prefix = false,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(role: DimRole, mode: ExecMode, size: i64) -> Dimension {
        Dimension::new(role, mode, size, 1, 1, 1).unwrap()
    }

    #[test]
    fn rejects_non_positive_size() {
        assert_eq!(
            Dimension::new(DimRole::M, ExecMode::Primitive, 0, 1, 1, 1),
            Err(IrError::NonPositiveSize(0))
        );
    }

    #[test]
    fn gemm_requires_three_primitive_dims() {
        let dims = vec![
            dim(DimRole::M, ExecMode::Primitive, 16),
            dim(DimRole::N, ExecMode::Primitive, 6),
        ];
        assert!(matches!(
            validate(&dims, PrimitiveType::Gemm),
            Err(IrError::WrongPrimitiveCount { .. })
        ));
    }

    #[test]
    fn sequential_after_primitive_is_rejected() {
        let dims = vec![
            dim(DimRole::M, ExecMode::Primitive, 16),
            dim(DimRole::N, ExecMode::Sequential, 4),
        ];
        assert!(matches!(
            validate(&dims, PrimitiveType::None),
            Err(IrError::SequentialAfterPrimitive(1))
        ));
    }

    #[test]
    fn shared_prefix_must_be_m_or_n() {
        let dims = vec![
            dim(DimRole::K, ExecMode::Shared, 4),
            dim(DimRole::M, ExecMode::Primitive, 16),
            dim(DimRole::N, ExecMode::Primitive, 6),
        ];
        assert!(matches!(validate(&dims, PrimitiveType::None), Err(IrError::SharedPrefixViolation)));
    }

    #[test]
    fn well_formed_gemm_list_validates() {
        let dims = vec![
            dim(DimRole::M, ExecMode::Sequential, 4),
            dim(DimRole::M, ExecMode::Primitive, 16),
            dim(DimRole::N, ExecMode::Primitive, 6),
            dim(DimRole::K, ExecMode::Primitive, 1),
        ];
        assert!(validate(&dims, PrimitiveType::Gemm).is_ok());
    }
}
