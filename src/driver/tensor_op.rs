//! [`TensorOp`]: `setup` validates and compiles a dimension list into
//! kernels; `execute`/`execute_parallel` run them.

use crate::ir::dimension::{validate, DType, DimRole, Dimension, ExecMode, IrError, PrimitiveType};
use crate::kernels::{binary, matmul, sigmoid, unary};
use thiserror::Error;

/// Errors raised while validating a dimension list and compiling its
/// kernels (§6/§7: *shape-mismatch*, *bad-primitive-count*,
/// *unsupported-primitive*, *unsupported-dtype*, *bad-exec-type*, plus a
/// wrapped kernel-generation failure).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("{main} requires {expected} primitive dimensions, found {found}")]
    BadPrimitiveCount {
        main: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("primitive {0:?} is not supported by this driver")]
    UnsupportedPrimitive(PrimitiveType),

    #[error("dtype {0:?} has no generated kernels")]
    UnsupportedDtype(DType),

    #[error("execution-mode arrangement is invalid: {0}")]
    BadExecType(String),

    #[error("kernel generation failed: {0}")]
    Kernel(#[from] crate::kernels::SetupError),
}

pub type SetupResult<T> = Result<T, SetupError>;

impl From<IrError> for SetupError {
    fn from(e: IrError) -> Self {
        match e {
            IrError::NonPositiveSize(_) | IrError::LengthMismatch { .. } => SetupError::ShapeMismatch(e.to_string()),
            IrError::WrongPrimitiveCount { main, expected, found } => {
                SetupError::BadPrimitiveCount { main, expected, found }
            }
            IrError::SequentialAfterPrimitive(_) | IrError::SharedPrefixViolation => {
                SetupError::BadExecType(e.to_string())
            }
        }
    }
}

/// The compiled main-slot kernel, tagged by which C-ABI contract it
/// implements (every variant shares pointer-then-leading-dimensions
/// argument order, but the arities differ).
pub enum MainKernel {
    Gemm(matmul::MatmulKernelFn),
    Brgemm(matmul::MatmulKernelFn),
    Unary(unary::UnaryKernelFn),
    Binary(binary::BinaryKernelFn),
}

/// A validated, JIT-compiled tensor operation: a first-touch kernel
/// (optional), a main kernel, a last-touch kernel (optional), and the
/// index bookkeeping both executors need (which dimension is M/N/K/BR,
/// and whether the output is transposed relative to input 0).
pub struct TensorOp {
    dims: Vec<Dimension>,
    br_size: i64,

    // The `Code` buffers outlive their extracted function pointers —
    // materialized memory doesn't move when the owning `Code` does, but
    // we keep it alive here so the region is never unmapped.
    _first_touch_code: Option<crate::codebuf::Code>,
    _main_code: crate::codebuf::Code,
    _last_touch_code: Option<crate::codebuf::Code>,

    first_touch: Option<unary::UnaryKernelFn>,
    main: MainKernel,
    last_touch: Option<unary::UnaryKernelFn>,

    idx_m: Option<usize>,
    idx_n: Option<usize>,
    idx_k: Option<usize>,
    idx_br: Option<usize>,
}

impl TensorOp {
    /// Validates `dims` against `main` (and, if given, `prim_first`/
    /// `prim_last`), locates the M/N/K/BR primitive dimensions, and
    /// JIT-compiles the requested kernels.
    #[allow(clippy::too_many_arguments)]
    pub fn setup(
        dtype: DType,
        prim_first: PrimitiveType,
        prim_main: PrimitiveType,
        prim_last: PrimitiveType,
        dims: Vec<Dimension>,
    ) -> SetupResult<TensorOp> {
        if dtype != DType::Fp32 {
            return Err(SetupError::UnsupportedDtype(dtype));
        }

        validate(&dims, prim_main)?;

        let primitive_start = dims
            .iter()
            .position(|d| d.exec_mode == ExecMode::Primitive)
            .unwrap_or(dims.len());
        let primitive = &dims[primitive_start..];

        let idx_m = find_last_role(primitive, DimRole::M).map(|i| primitive_start + i);
        let idx_n = find_last_role(primitive, DimRole::N).map(|i| primitive_start + i);
        let k_positions: Vec<usize> = primitive
            .iter()
            .enumerate()
            .filter(|(_, d)| d.role == DimRole::K)
            .map(|(i, _)| primitive_start + i)
            .collect();
        let idx_k = k_positions.last().copied();
        let idx_br = if k_positions.len() >= 2 {
            k_positions.get(k_positions.len() - 2).copied()
        } else {
            None
        };

        let transposed_out = idx_m.map(|i| dims[i].stride_in0 != dims[i].stride_out).unwrap_or(false);

        if prim_main.is_binary() && transposed_out {
            return Err(SetupError::UnsupportedPrimitive(prim_main));
        }

        let m_size = idx_m.map(|i| dims[i].size).unwrap_or(1);
        let n_size = idx_n.map(|i| dims[i].size).unwrap_or(1);

        let first_touch = match prim_first {
            PrimitiveType::None => None,
            PrimitiveType::Zero => Some(materialize_unary(unary::generate_zero(m_size, n_size)?)?),
            PrimitiveType::Relu => Some(materialize_unary(unary::generate_relu(m_size, n_size)?)?),
            other => return Err(SetupError::UnsupportedPrimitive(other)),
        };
        let last_touch = match prim_last {
            PrimitiveType::None => None,
            PrimitiveType::Zero => Some(materialize_unary(unary::generate_zero(m_size, n_size)?)?),
            PrimitiveType::Relu => Some(materialize_unary(unary::generate_relu(m_size, n_size)?)?),
            other => return Err(SetupError::UnsupportedPrimitive(other)),
        };
        let (_first_touch_code, first_touch) = unzip_opt(first_touch);
        let (_last_touch_code, last_touch) = unzip_opt(last_touch);

        let k_size = idx_k.map(|i| dims[i].size).unwrap_or(1);
        let br_size = idx_br.map(|i| dims[i].size).unwrap_or(1);

        let (main_code_raw, main) = match prim_main {
            PrimitiveType::Gemm => {
                let code = matmul::generate_gemm(m_size, n_size, k_size)?;
                let (code, f) = materialize_matmul(code)?;
                (code, MainKernel::Gemm(f))
            }
            PrimitiveType::Brgemm => {
                let code = matmul::generate_brgemm(m_size, n_size, k_size, br_size)?;
                let (code, f) = materialize_matmul(code)?;
                (code, MainKernel::Brgemm(f))
            }
            PrimitiveType::Identity => {
                let code = unary::generate_identity(m_size, n_size, transposed_out)?;
                let (code, f) = materialize_unary_owned(code)?;
                (code, MainKernel::Unary(f))
            }
            PrimitiveType::Square => {
                let (code, f) = materialize_unary_owned(unary::generate_square(m_size, n_size)?)?;
                (code, MainKernel::Unary(f))
            }
            PrimitiveType::Reciprocal => {
                let (code, f) = materialize_unary_owned(unary::generate_reciprocal(m_size, n_size)?)?;
                (code, MainKernel::Unary(f))
            }
            PrimitiveType::SigmoidPoly => {
                let (code, f) = materialize_unary_owned(sigmoid::generate_poly(m_size, n_size)?)?;
                (code, MainKernel::Unary(f))
            }
            PrimitiveType::SigmoidTable => {
                let (code, f) = materialize_unary_owned(sigmoid::generate_table(m_size, n_size)?)?;
                (code, MainKernel::Unary(f))
            }
            PrimitiveType::SigmoidFast => {
                let (code, f) = materialize_unary_owned(sigmoid::generate_fast(m_size, n_size)?)?;
                (code, MainKernel::Unary(f))
            }
            PrimitiveType::Add => {
                let (code, f) = materialize_binary(binary::generate_add(m_size, n_size)?)?;
                (code, MainKernel::Binary(f))
            }
            PrimitiveType::Sub => {
                let (code, f) = materialize_binary(binary::generate_sub(m_size, n_size)?)?;
                (code, MainKernel::Binary(f))
            }
            PrimitiveType::Mul => {
                let (code, f) = materialize_binary(binary::generate_mul(m_size, n_size)?)?;
                (code, MainKernel::Binary(f))
            }
            PrimitiveType::Div => {
                let (code, f) = materialize_binary(binary::generate_div(m_size, n_size)?)?;
                (code, MainKernel::Binary(f))
            }
            PrimitiveType::Min => {
                let (code, f) = materialize_binary(binary::generate_min(m_size, n_size)?)?;
                (code, MainKernel::Binary(f))
            }
            PrimitiveType::Max => {
                let (code, f) = materialize_binary(binary::generate_max(m_size, n_size)?)?;
                (code, MainKernel::Binary(f))
            }
            other => return Err(SetupError::UnsupportedPrimitive(other)),
        };

        Ok(TensorOp {
            dims,
            br_size,
            _first_touch_code,
            _main_code: main_code_raw,
            _last_touch_code,
            first_touch,
            main,
            last_touch,
            idx_m,
            idx_n,
            idx_k,
            idx_br,
        })
    }

    /// Runs the operation sequentially, recursing over every
    /// non-primitive dimension before invoking the compiled kernels at
    /// the primitive tail. `in1` is `None` for unary/GEMM mains.
    ///
    /// # Safety
    /// `in0`, `in1`, and `out` must be valid for the full extent the
    /// dimension list describes, per their respective strides.
    pub unsafe fn execute(&self, in0: *const f32, in1: Option<*const f32>, out: *mut f32) {
        super::executor::run_sequential(self, in0, in1, out);
    }

    /// Runs the operation using a scoped thread pool over the promoted
    /// shared-loop prefix. `worker_threads` bounds the pool size; `0`
    /// means "use as many workers as the shared-loop index space has
    /// slots for" (capped by the prefix's own trip count).
    ///
    /// # Safety
    /// Same contract as [`TensorOp::execute`]; additionally, the shared
    /// M/N tiles the parallel executor distributes must not overlap in
    /// `out` (guaranteed by construction when `dims` came from the
    /// optimizer, since shared dimensions are always M/N-role).
    pub unsafe fn execute_parallel(&self, in0: *const f32, in1: Option<*const f32>, out: *mut f32, worker_threads: usize) {
        super::executor::run_parallel(self, in0, in1, out, worker_threads);
    }

    pub(super) fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub(super) fn br_size(&self) -> i64 {
        self.br_size
    }

    pub(super) fn idx_k(&self) -> Option<usize> {
        self.idx_k
    }

    pub(super) fn idx_m(&self) -> Option<usize> {
        self.idx_m
    }

    pub(super) fn idx_n(&self) -> Option<usize> {
        self.idx_n
    }

    pub(super) fn idx_br(&self) -> Option<usize> {
        self.idx_br
    }

    pub(super) fn first_touch(&self) -> Option<unary::UnaryKernelFn> {
        self.first_touch
    }

    pub(super) fn last_touch(&self) -> Option<unary::UnaryKernelFn> {
        self.last_touch
    }

    pub(super) fn main(&self) -> &MainKernel {
        &self.main
    }

    /// Leading dimensions (in elements) the main kernel's call site must
    /// supply, derived from the M/N dimension's own per-tensor strides
    /// (§9: A/C are contiguous in M, B is contiguous in K — a generator
    /// assumption the driver relies on but doesn't re-validate).
    pub(super) fn leading_dims(&self) -> (i64, i64, i64) {
        let ld_a = self.idx_k.map(|i| self.dims[i].stride_in0).unwrap_or(0);
        let ld_b = self.idx_n.map(|i| self.dims[i].stride_in1).unwrap_or(0);
        let ld_c = self.idx_n.map(|i| self.dims[i].stride_out).unwrap_or(0);
        (ld_a, ld_b, ld_c)
    }

    pub(super) fn br_strides(&self) -> (i64, i64) {
        match self.idx_br {
            Some(i) => (self.dims[i].stride_in0, self.dims[i].stride_in1),
            None => (0, 0),
        }
    }

    pub(super) fn unary_leading_dims(&self) -> (i64, i64) {
        let ld_in = self.idx_n.map(|i| self.dims[i].stride_in0).unwrap_or(1);
        let ld_out = self.idx_n.map(|i| self.dims[i].stride_out).unwrap_or(1);
        (ld_in, ld_out)
    }

    pub(super) fn binary_leading_dims(&self) -> (i64, i64, i64) {
        let ld_a = self.idx_n.map(|i| self.dims[i].stride_in0).unwrap_or(1);
        let ld_b = self.idx_n.map(|i| self.dims[i].stride_in1).unwrap_or(1);
        let ld_c = self.idx_n.map(|i| self.dims[i].stride_out).unwrap_or(1);
        (ld_a, ld_b, ld_c)
    }
}

fn find_last_role(dims: &[Dimension], role: DimRole) -> Option<usize> {
    dims.iter().enumerate().filter(|(_, d)| d.role == role).map(|(i, _)| i).last()
}

fn materialize_unary(mut code: crate::codebuf::Code) -> SetupResult<(crate::codebuf::Code, unary::UnaryKernelFn)> {
    code.materialize().map_err(crate::kernels::SetupError::from)?;
    let f: unary::UnaryKernelFn = unsafe { code.as_fn() };
    Ok((code, f))
}

fn materialize_unary_owned(code: crate::codebuf::Code) -> SetupResult<(crate::codebuf::Code, unary::UnaryKernelFn)> {
    materialize_unary(code)
}

fn materialize_binary(mut code: crate::codebuf::Code) -> SetupResult<(crate::codebuf::Code, binary::BinaryKernelFn)> {
    code.materialize().map_err(crate::kernels::SetupError::from)?;
    let f: binary::BinaryKernelFn = unsafe { code.as_fn() };
    Ok((code, f))
}

fn materialize_matmul(mut code: crate::codebuf::Code) -> SetupResult<(crate::codebuf::Code, matmul::MatmulKernelFn)> {
    code.materialize().map_err(crate::kernels::SetupError::from)?;
    let f: matmul::MatmulKernelFn = unsafe { code.as_fn() };
    Ok((code, f))
}

fn unzip_opt<A, B>(opt: Option<(A, B)>) -> (Option<A>, Option<B>) {
    match opt {
        Some((a, b)) => (Some(a), Some(b)),
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dimension::ExecMode;

    fn prim(role: DimRole, size: i64, s0: i64, s1: i64, so: i64) -> Dimension {
        Dimension::new(role, ExecMode::Primitive, size, s0, s1, so).unwrap()
    }

    #[test]
    fn rejects_non_fp32_dtype() {
        let dims = vec![prim(DimRole::M, 4, 1, 0, 1), prim(DimRole::N, 4, 0, 1, 4)];
        let res = TensorOp::setup(DType::Fp64, PrimitiveType::None, PrimitiveType::Add, PrimitiveType::None, dims);
        assert!(matches!(res, Err(SetupError::UnsupportedDtype(DType::Fp64))));
    }

    #[test]
    fn rejects_transposed_binary_output() {
        // stride_in0 != stride_out on the M dimension.
        let dims = vec![prim(DimRole::N, 4, 0, 1, 4), prim(DimRole::M, 4, 1, 0, 4)];
        let res = TensorOp::setup(DType::Fp32, PrimitiveType::None, PrimitiveType::Add, PrimitiveType::None, dims);
        assert!(matches!(res, Err(SetupError::UnsupportedPrimitive(PrimitiveType::Add))));
    }

    #[test]
    fn rejects_wrong_primitive_count_for_gemm() {
        let dims = vec![prim(DimRole::M, 16, 1, 0, 1), prim(DimRole::N, 6, 0, 1, 16)];
        let res = TensorOp::setup(DType::Fp32, PrimitiveType::None, PrimitiveType::Gemm, PrimitiveType::None, dims);
        assert!(matches!(res, Err(SetupError::BadPrimitiveCount { expected: 3, found: 2, .. })));
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn sets_up_a_plain_gemm() {
        let dims = vec![
            prim(DimRole::K, 4, 1, 6, 0),
            prim(DimRole::N, 6, 0, 1, 16),
            prim(DimRole::M, 16, 1, 0, 1),
        ];
        let op = TensorOp::setup(DType::Fp32, PrimitiveType::None, PrimitiveType::Gemm, PrimitiveType::None, dims).unwrap();
        assert!(matches!(op.main(), MainKernel::Gemm(_)));
        assert_eq!(op.idx_m(), Some(2));
    }
}
