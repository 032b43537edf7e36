//! GEMM/BRGEMM micro-kernel generator (component D, matmul family).
//!
//! Grounded on `examples/original_source/src/kernels/matmul/subkernels/matmul_16_6_k.cpp`
//! for the 16x6 accumulator scheme (24 resident NEON accumulators,
//! v0..v23, a runtime K-loop broadcasting one B scalar per column against
//! a 16-wide A column) and on `TensorOperation.cpp`'s kernel-invocation
//! contract (a GEMM call is a BRGEMM call with `br_size` forced to 1; the
//! main kernel always reads the existing C tile before accumulating, so
//! repeated invocations against the same output — as the optimizer's
//! split phase can produce — accumulate rather than overwrite).
//!
//! `generate_gemm`/`generate_brgemm` tile the requested M/N shape into
//! 16x6 blocks and emit the fast vectorized tile body for every full
//! block. M%16 or N%6 remainder tiles fall back to a plain scalar FMA
//! loop (one accumulator, no register tiling) rather than a family of
//! hand-written partial-tile subkernels — the tail shapes are small and
//! performance-secondary, and a single always-correct fallback is a
//! simpler artifact than ~30 bespoke shapes the composition rules in the
//! design notes only ask to be *possible*, not necessarily bespoke.

use crate::arch::aarch64::encode::base::{add_imm, add_reg, cbnz, mov_imm, mov_reg, sub_imm};
use crate::arch::aarch64::encode::simd::{fmadd_scalar, fmla_elem0, ldp_vec, ldr_vec_imm, ldr_vec_post, stp_vec, str_vec_imm};
use crate::arch::aarch64::regs::{ArrSpec, GpWidth, Gpr, NeonSize, Vreg};
use crate::codebuf::Code;
use crate::kernels::support;
use crate::kernels::{SetupError, SetupResult};

const TILE_M: i64 = 16;
const TILE_N: i64 = 6;

/// The shared GEMM/BRGEMM kernel entry contract: `A`, `B`, `C`, then the
/// three leading dimensions (in elements), then the two batch-reduce
/// strides (in elements; a GEMM kernel ignores its own, since generation
/// bakes `br_size = 1`, but the call site always supplies the uniform
/// eight-argument signature).
pub type MatmulKernelFn =
    unsafe extern "C" fn(*const f32, *const f32, *mut f32, i64, i64, i64, i64, i64);

/// Generates a GEMM kernel (`C += A * B`, `A` is M x K, `B` is K x N,
/// single batch).
pub fn generate_gemm(m: i64, n: i64, k: i64) -> SetupResult<Code> {
    generate(m, n, k, 1)
}

/// Generates a BRGEMM kernel: `br_size` independent M x K by K x N
/// products accumulated into the same C tile, `A`/`B` advanced between
/// batches by the runtime `br_stride_a`/`br_stride_b` arguments.
pub fn generate_brgemm(m: i64, n: i64, k: i64, br_size: i64) -> SetupResult<Code> {
    generate(m, n, k, br_size)
}

fn generate(m: i64, n: i64, k: i64, br_size: i64) -> SetupResult<Code> {
    for (name, value) in [("m", m), ("n", n), ("k", k), ("br_size", br_size)] {
        if value <= 0 {
            return Err(SetupError::NonPositiveDimension { name, value });
        }
    }

    let mut code = Code::new();
    support::prologue(&mut code)?;

    // ld_a/ld_b/ld_c/br_stride_a/br_stride_b arrive as element counts;
    // scale each to a byte stride once, up front.
    support::scale_to_bytes(&mut code, Gpr::X3)?;
    support::scale_to_bytes(&mut code, Gpr::X4)?;
    support::scale_to_bytes(&mut code, Gpr::X5)?;
    support::scale_to_bytes(&mut code, Gpr::X6)?;
    support::scale_to_bytes(&mut code, Gpr::X7)?;

    for &(row_off, row_size) in &tile_offsets(m, TILE_M) {
        for &(col_off, col_size) in &tile_offsets(n, TILE_N) {
            support::add_const_bytes(&mut code, Gpr::X19, Gpr::X0, row_off * 4, Gpr(13))?;
            support::add_const_times_reg(&mut code, Gpr::X20, Gpr::X1, col_off, Gpr::X4, Gpr(13))?;
            support::add_const_times_reg(&mut code, Gpr::X21, Gpr::X2, col_off, Gpr::X5, Gpr(13))?;
            support::add_const_bytes(&mut code, Gpr::X21, Gpr::X21, row_off * 4, Gpr(13))?;

            if row_size == TILE_M && col_size == TILE_N {
                emit_fast_tile(&mut code, k, br_size)?;
            } else {
                emit_scalar_tile(&mut code, row_size, col_size, k, br_size)?;
            }
        }
    }

    support::epilogue(&mut code)?;
    Ok(code)
}

/// Splits `total` into `(offset, tile)` pairs of size `tile`, plus a
/// trailing `(offset, remainder)` pair if `total` isn't a multiple.
fn tile_offsets(total: i64, tile: i64) -> Vec<(i64, i64)> {
    let (full, rem) = support::full_and_remainder(total, tile);
    let mut out = Vec::with_capacity(full as usize + if rem > 0 { 1 } else { 0 });
    for t in 0..full {
        out.push((t * tile, tile));
    }
    if rem > 0 {
        out.push((full * tile, rem));
    }
    out
}

/// The fast path: a full 16x6 tile, vectorized across 24 resident
/// accumulators (`v0..v23`, four Q-register quads per column). `x19`,
/// `x20`, `x21` hold the tile's A/B/C base pointers; `x3..x7` hold the
/// already-byte-scaled leading dimensions and batch-reduce strides.
fn emit_fast_tile(code: &mut Code, k: i64, br_size: i64) -> SetupResult<()> {
    // Load the existing C tile into the accumulators: repeated
    // invocations against the same output tile (the optimizer's split
    // phase can produce an outer sequential K wrapping this primitive)
    // must accumulate, not overwrite.
    for j in 0..6i64 {
        if j == 0 {
            code.add_instr(mov_reg(GpWidth::X, Gpr(27), Gpr::X21))?;
        } else {
            code.add_instr(add_reg(GpWidth::X, Gpr(27), Gpr(27), Gpr::X5, 0, 0))?;
        }
        let base = (j * 4) as u8;
        code.add_instr(ldp_vec(Vreg(base), Vreg(base + 1), Gpr(27), 0, NeonSize::Q)?)?;
        code.add_instr(ldp_vec(Vreg(base + 2), Vreg(base + 3), Gpr(27), 32, NeonSize::Q)?)?;
    }

    code.add_instr(mov_reg(GpWidth::X, Gpr(23), Gpr::X19))?;
    code.add_instr(mov_reg(GpWidth::X, Gpr(24), Gpr::X20))?;
    for w in mov_imm(GpWidth::X, Gpr(9), br_size as u64) {
        code.add_instr(w)?;
    }
    code.add_label("fast_br_loop")?;
    code.add_instr(mov_reg(GpWidth::X, Gpr(14), Gpr(23)))?;
    code.add_instr(mov_reg(GpWidth::X, Gpr(15), Gpr(24)))?;
    for w in mov_imm(GpWidth::X, Gpr(8), k as u64) {
        code.add_instr(w)?;
    }
    code.add_label("fast_k_loop")?;
    // 16 contiguous A elements (four Q quads), non-destructive read.
    code.add_instr(ldp_vec(Vreg(24), Vreg(25), Gpr(14), 0, NeonSize::Q)?)?;
    code.add_instr(ldp_vec(Vreg(26), Vreg(27), Gpr(14), 32, NeonSize::Q)?)?;
    for j in 0..6i64 {
        if j == 0 {
            code.add_instr(mov_reg(GpWidth::X, Gpr(22), Gpr(15)))?;
        } else {
            code.add_instr(add_reg(GpWidth::X, Gpr(22), Gpr(22), Gpr::X4, 0, 0))?;
        }
        code.add_instr(ldr_vec_imm(Vreg(29), Gpr(22), 0, NeonSize::S)?)?;
        let base = (j * 4) as u8;
        for i in 0..4u8 {
            code.add_instr(fmla_elem0(Vreg(base + i), Vreg(24 + i), Vreg(29), ArrSpec::S4))?;
        }
    }
    // Advance: A by the runtime K-stride (ld_a), B by one contiguous element.
    code.add_instr(add_reg(GpWidth::X, Gpr(14), Gpr(14), Gpr::X3, 0, 0))?;
    code.add_instr(add_imm(GpWidth::X, Gpr(15), Gpr(15), 4, false)?)?;
    code.add_instr(sub_imm(GpWidth::X, Gpr(8), Gpr(8), 1, false)?)?;
    let back = code.instrs_since_label("fast_k_loop")?;
    code.add_instr(cbnz(GpWidth::X, Gpr(8), -((back as i32) * 4))?)?;

    code.add_instr(add_reg(GpWidth::X, Gpr(23), Gpr(23), Gpr::X6, 0, 0))?;
    code.add_instr(add_reg(GpWidth::X, Gpr(24), Gpr(24), Gpr::X7, 0, 0))?;
    code.add_instr(sub_imm(GpWidth::X, Gpr(9), Gpr(9), 1, false)?)?;
    let back = code.instrs_since_label("fast_br_loop")?;
    code.add_instr(cbnz(GpWidth::X, Gpr(9), -((back as i32) * 4))?)?;

    for j in 0..6i64 {
        if j == 0 {
            code.add_instr(mov_reg(GpWidth::X, Gpr(27), Gpr::X21))?;
        } else {
            code.add_instr(add_reg(GpWidth::X, Gpr(27), Gpr(27), Gpr::X5, 0, 0))?;
        }
        let base = (j * 4) as u8;
        code.add_instr(stp_vec(Vreg(base), Vreg(base + 1), Gpr(27), 0, NeonSize::Q)?)?;
        code.add_instr(stp_vec(Vreg(base + 2), Vreg(base + 3), Gpr(27), 32, NeonSize::Q)?)?;
    }
    Ok(())
}

/// The tail path: an `tile_m` x `tile_n` block, `tile_m <= 16`,
/// `tile_n <= 6`, at least one strictly smaller than its fast-path
/// counterpart. Processes one output cell at a time with a single
/// scalar accumulator (`v30`), fully unrolled over `m`/`n` (both small
/// by construction) with runtime BR/K loops inside.
fn emit_scalar_tile(code: &mut Code, tile_m: i64, tile_n: i64, k: i64, br_size: i64) -> SetupResult<()> {
    for n in 0..tile_n {
        for m in 0..tile_m {
            support::add_const_bytes(code, Gpr(10), Gpr::X19, m * 4, Gpr(13))?;
            support::add_const_times_reg(code, Gpr(11), Gpr::X20, n, Gpr::X4, Gpr(13))?;
            support::add_const_times_reg(code, Gpr(12), Gpr::X21, n, Gpr::X5, Gpr(13))?;
            support::add_const_bytes(code, Gpr(12), Gpr(12), m * 4, Gpr(13))?;

            code.add_instr(ldr_vec_imm(Vreg(30), Gpr(12), 0, NeonSize::S)?)?;

            code.add_instr(mov_reg(GpWidth::X, Gpr(23), Gpr(10)))?;
            code.add_instr(mov_reg(GpWidth::X, Gpr(24), Gpr(11)))?;
            for w in mov_imm(GpWidth::X, Gpr(9), br_size as u64) {
                code.add_instr(w)?;
            }
            code.add_label("scalar_br_loop")?;
            code.add_instr(mov_reg(GpWidth::X, Gpr(14), Gpr(23)))?;
            code.add_instr(mov_reg(GpWidth::X, Gpr(15), Gpr(24)))?;
            for w in mov_imm(GpWidth::X, Gpr(8), k as u64) {
                code.add_instr(w)?;
            }
            code.add_label("scalar_k_loop")?;
            code.add_instr(ldr_vec_imm(Vreg(31), Gpr(14), 0, NeonSize::S)?)?;
            code.add_instr(ldr_vec_post(Vreg(28), Gpr(15), 4, NeonSize::S)?)?;
            code.add_instr(fmadd_scalar(Vreg(30), Vreg(31), Vreg(28), Vreg(30)))?;
            code.add_instr(add_reg(GpWidth::X, Gpr(14), Gpr(14), Gpr::X3, 0, 0))?;
            code.add_instr(sub_imm(GpWidth::X, Gpr(8), Gpr(8), 1, false)?)?;
            let back = code.instrs_since_label("scalar_k_loop")?;
            code.add_instr(cbnz(GpWidth::X, Gpr(8), -((back as i32) * 4))?)?;

            code.add_instr(add_reg(GpWidth::X, Gpr(23), Gpr(23), Gpr::X6, 0, 0))?;
            code.add_instr(add_reg(GpWidth::X, Gpr(24), Gpr(24), Gpr::X7, 0, 0))?;
            code.add_instr(sub_imm(GpWidth::X, Gpr(9), Gpr(9), 1, false)?)?;
            let back = code.instrs_since_label("scalar_br_loop")?;
            code.add_instr(cbnz(GpWidth::X, Gpr(9), -((back as i32) * 4))?)?;

            code.add_instr(str_vec_imm(Vreg(30), Gpr(12), 0, NeonSize::S)?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_dimensions() {
        assert!(matches!(
            generate_gemm(0, 6, 4),
            Err(SetupError::NonPositiveDimension { name: "m", .. })
        ));
    }

    #[test]
    fn tile_offsets_covers_exact_multiple() {
        assert_eq!(tile_offsets(32, 16), vec![(0, 16), (16, 16)]);
    }

    #[test]
    fn tile_offsets_covers_remainder() {
        assert_eq!(tile_offsets(20, 16), vec![(0, 16), (16, 4)]);
    }

    #[test]
    fn generate_gemm_produces_nonempty_fast_tile_body() {
        let code = generate_gemm(16, 6, 4).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn generate_gemm_handles_remainder_tile() {
        let code = generate_gemm(20, 8, 2).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn generate_brgemm_accepts_batch_count() {
        let code = generate_brgemm(16, 6, 4, 3).unwrap();
        assert!(code.size_bytes() > 0);
    }
}
