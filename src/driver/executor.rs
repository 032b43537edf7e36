//! The two ways to run a [`TensorOp`]: a recursive sequential walk over
//! every non-primitive dimension, and a `std::thread::scope`-based
//! parallel walk that flattens the shared M/N prefix into one index
//! space and statically partitions it across worker threads.
//!
//! Grounded on `examples/original_source/src/TensorOperation.cpp`'s
//! `run` method for the recursive shape (nested loops down to the
//! primitive tail, with first/last-touch gated by the outermost
//! reduction dimension only); the parallel variant has no single
//! grounding file, since the original distributes its shared loop with
//! `#pragma omp parallel for` and this crate has no OpenMP equivalent —
//! see `DESIGN.md` for why `std::thread::scope` with static partitioning
//! was chosen instead.

use crate::ir::dimension::{DimRole, Dimension, ExecMode};

use super::tensor_op::{MainKernel, TensorOp};

/// Runs `op` as nested loops, one per non-primitive dimension, in
/// declaration order (outermost first), invoking the compiled kernels
/// once the walk reaches the primitive tail.
///
/// # Safety
/// See [`TensorOp::execute`].
pub(super) unsafe fn run_sequential(op: &TensorOp, in0: *const f32, in1: Option<*const f32>, out: *mut f32) {
    let dims = op.dims();
    let primitive_start = dims.iter().position(|d| d.exec_mode == ExecMode::Primitive).unwrap_or(dims.len());
    recurse(op, dims, 0, primitive_start, in0, in1, out, true, true);
}

/// Runs `op` over the flattened shared M/N prefix using up to
/// `worker_threads` workers (`0` means "pick one worker per available
/// core, capped by the prefix's own trip count"). Everything below the
/// shared prefix — sequential dimensions and the primitive tail — runs
/// sequentially within each worker, same as [`run_sequential`].
///
/// # Safety
/// See [`TensorOp::execute_parallel`].
pub(super) unsafe fn run_parallel(op: &TensorOp, in0: *const f32, in1: Option<*const f32>, out: *mut f32, worker_threads: usize) {
    let dims = op.dims();
    let shared_count = dims.iter().take_while(|d| d.exec_mode == ExecMode::Shared).count();
    let primitive_start = dims.iter().position(|d| d.exec_mode == ExecMode::Primitive).unwrap_or(dims.len());

    if shared_count == 0 {
        return run_sequential(op, in0, in1, out);
    }

    let shared = &dims[..shared_count];
    let total: i64 = shared.iter().map(|d| d.size).product();
    if total <= 1 {
        return run_sequential(op, in0, in1, out);
    }
    let total = total as usize;

    let workers = if worker_threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        worker_threads
    }
    .min(total)
    .max(1);

    let chunk = (total + workers - 1) / workers;

    // Raw pointers aren't `Send`; the shared prefix is M/N-only (§8), so
    // distinct flat indices always address disjoint output tiles and this
    // is sound even though the borrow checker can't see it.
    struct SendPtr<T>(*const T);
    unsafe impl<T> Send for SendPtr<T> {}
    unsafe impl<T> Sync for SendPtr<T> {}
    struct SendMutPtr<T>(*mut T);
    unsafe impl<T> Send for SendMutPtr<T> {}
    unsafe impl<T> Sync for SendMutPtr<T> {}

    let in0_p = SendPtr(in0);
    let in1_p = in1.map(SendPtr);
    let out_p = SendMutPtr(out);

    std::thread::scope(|scope| {
        for w in 0..workers {
            let start = w * chunk;
            if start >= total {
                break;
            }
            let end = ((w + 1) * chunk).min(total);
            let in0_p = &in0_p;
            let in1_p = &in1_p;
            let out_p = &out_p;
            scope.spawn(move || {
                for flat in start..end {
                    let (off0, off1, off_out) = flat_offsets(shared, flat as i64);
                    unsafe {
                        let p0 = in0_p.0.offset(off0 as isize);
                        let p1 = in1_p.as_ref().map(|p| p.0.offset(off1 as isize));
                        let pout = out_p.0.offset(off_out as isize);
                        recurse(op, dims, shared_count, primitive_start, p0, p1, pout, true, true);
                    }
                }
            });
        }
    });
}

/// Decomposes a flat index over `shared`'s combined trip count back into
/// per-tensor element offsets, row-major over `shared` (last dimension
/// fastest-varying, matching the optimizer's own ordering convention).
fn flat_offsets(shared: &[Dimension], mut flat: i64) -> (i64, i64, i64) {
    let mut off0 = 0;
    let mut off1 = 0;
    let mut off_out = 0;
    for d in shared.iter().rev() {
        let idx = flat % d.size;
        flat /= d.size;
        off0 += d.stride_in0 * idx;
        off1 += d.stride_in1 * idx;
        off_out += d.stride_out * idx;
    }
    (off0, off1, off_out)
}

/// Walks dimensions `[level, primitive_start)` as nested loops, tracking
/// `is_first`/`is_last` gated only by ancestor sequential `K`-role
/// dimensions — an M/N loop position never changes whether a given
/// primitive invocation is the reduction's first or last touch.
#[allow(clippy::too_many_arguments)]
unsafe fn recurse(
    op: &TensorOp,
    dims: &[Dimension],
    level: usize,
    primitive_start: usize,
    in0: *const f32,
    in1: Option<*const f32>,
    out: *mut f32,
    is_first: bool,
    is_last: bool,
) {
    if level == primitive_start {
        invoke(op, in0, in1, out, is_first, is_last);
        return;
    }

    let d = &dims[level];
    for i in 0..d.size {
        let next_in0 = in0.offset((d.stride_in0 * i) as isize);
        let next_in1 = in1.map(|p| p.offset((d.stride_in1 * i) as isize));
        let next_out = out.offset((d.stride_out * i) as isize);

        let (first, last) = if d.role == DimRole::K && d.exec_mode == ExecMode::Sequential {
            (is_first && i == 0, is_last && i == d.size - 1)
        } else {
            (is_first, is_last)
        };

        recurse(op, dims, level + 1, primitive_start, next_in0, next_in1, next_out, first, last);
    }
}

/// Invokes first-touch (if `is_first`), the main kernel (always), and
/// last-touch (if `is_last`) against one primitive tile, translating the
/// driver's tensor-agnostic pointers into each kernel's specific C-ABI
/// signature.
unsafe fn invoke(op: &TensorOp, in0: *const f32, in1: Option<*const f32>, out: *mut f32, is_first: bool, is_last: bool) {
    if is_first {
        if let Some(ft) = op.first_touch() {
            let (ld_in, ld_out) = op.unary_leading_dims();
            // First/last-touch kernels run in place against `out`; `Zero`
            // ignores its input argument entirely, and a non-`Zero` choice
            // (e.g. `Relu` as a last-touch) reads the tile it's about to
            // overwrite, which is exactly what an in-place activation wants.
            ft(out as *const f32, out, ld_in, ld_out);
        }
    }

    match op.main() {
        MainKernel::Gemm(f) => {
            let (ld_a, ld_b, ld_c) = op.leading_dims();
            f(in0, in1.expect("gemm requires a second input"), out, ld_a, ld_b, ld_c, 0, 0);
        }
        MainKernel::Brgemm(f) => {
            let (ld_a, ld_b, ld_c) = op.leading_dims();
            let (br_a, br_b) = op.br_strides();
            f(in0, in1.expect("brgemm requires a second input"), out, ld_a, ld_b, ld_c, br_a, br_b);
        }
        MainKernel::Unary(f) => {
            let (ld_in, ld_out) = op.unary_leading_dims();
            f(in0, out, ld_in, ld_out);
        }
        MainKernel::Binary(f) => {
            let (ld_a, ld_b, ld_c) = op.binary_leading_dims();
            f(in0, in1.expect("binary primitive requires a second input"), out, ld_a, ld_b, ld_c);
        }
    }

    if is_last {
        if let Some(lt) = op.last_touch() {
            let (ld_in, ld_out) = op.unary_leading_dims();
            lt(out as *const f32, out, ld_in, ld_out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dimension::{DType, ExecMode, PrimitiveType};

    fn dim(role: DimRole, mode: ExecMode, size: i64, s0: i64, s1: i64, so: i64) -> Dimension {
        Dimension::new(role, mode, size, s0, s1, so).unwrap()
    }

    #[test]
    fn flat_offsets_is_row_major_over_shared_prefix() {
        let shared = vec![
            dim(DimRole::M, ExecMode::Shared, 2, 100, 0, 100),
            dim(DimRole::N, ExecMode::Shared, 3, 0, 10, 10),
        ];
        assert_eq!(flat_offsets(&shared, 0), (0, 0, 0));
        assert_eq!(flat_offsets(&shared, 1), (0, 10, 10));
        assert_eq!(flat_offsets(&shared, 3), (100, 0, 100));
        assert_eq!(flat_offsets(&shared, 4), (100, 10, 110));
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn sequential_executor_runs_a_plain_add() {
        let dims = vec![
            dim(DimRole::N, ExecMode::Primitive, 4, 0, 1, 4),
            dim(DimRole::M, ExecMode::Primitive, 4, 1, 0, 1),
        ];
        let op = TensorOp::setup(DType::Fp32, PrimitiveType::None, PrimitiveType::Add, PrimitiveType::None, dims).unwrap();

        let a = [1.0f32, 2.0, 3.0, 4.0];
        let b = [10.0f32, 20.0, 30.0, 40.0];
        let mut c = [0.0f32; 4];
        unsafe {
            op.execute(a.as_ptr(), Some(b.as_ptr()), c.as_mut_ptr());
        }
        assert_eq!(c, [11.0, 22.0, 33.0, 44.0]);
    }
}
