//! Element-wise unary micro-kernel generator (component D, unary family):
//! zero, relu, identity (plain copy and transposing copy), square, and
//! reciprocal.
//!
//! Grounded on `examples/original_source/src/kernels/unary/zero_primitive.cpp`
//! for the column-major N-outer/M-inner walk and the PCS prologue/epilogue
//! (reused here via [`super::support`]); this crate uses a 16-element
//! inner stride (four Q-register quads) rather than the original's 8,
//! matching the accumulator width `D`'s GEMM kernel already standardizes
//! on. Reciprocal's Newton step and the transposing-copy's TRN/ZIP tiling
//! are grounded on the same `examples/original_source/src/instructions/simd_fp/`
//! headers the encoders in [`crate::arch::aarch64::encode::simd`] transcribe.

use crate::arch::aarch64::encode::simd::{
    fmax_scalar, fmax_vec, fmul_scalar, fmul_vec, frecpe_scalar, frecpe_vec, frecps_scalar,
    frecps_vec, ldp_vec, ldr_vec_imm, stp_vec, str_vec_imm, trn1, trn2, zero, zip1, zip2,
};
use crate::arch::aarch64::regs::{ArrSpec, ByteArr, Gpr, NeonSize, Vreg};
use crate::codebuf::Code;
use crate::kernels::support;
use crate::kernels::{SetupError, SetupResult};

const CHUNK: i64 = 16;

/// The shared unary kernel entry contract: input, output, then the two
/// leading dimensions (element counts). `generate_zero` ignores its
/// first argument; first/last-touch call sites pass the output pointer
/// for both, running the kernel in place.
pub type UnaryKernelFn = unsafe extern "C" fn(*const f32, *mut f32, i64, i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Zero,
    Relu,
    Square,
    Reciprocal,
    Identity,
}

pub fn generate_zero(m: i64, n: i64) -> SetupResult<Code> {
    generate_unary(m, n, UnaryOp::Zero)
}

pub fn generate_relu(m: i64, n: i64) -> SetupResult<Code> {
    generate_unary(m, n, UnaryOp::Relu)
}

pub fn generate_square(m: i64, n: i64) -> SetupResult<Code> {
    generate_unary(m, n, UnaryOp::Square)
}

pub fn generate_reciprocal(m: i64, n: i64) -> SetupResult<Code> {
    generate_unary(m, n, UnaryOp::Reciprocal)
}

/// `transpose = false` is a plain strided copy; `transpose = true` emits
/// the 4x4 TRN/ZIP tiling in [`generate_identity_transposed`], which
/// covers any `m`/`n` via a scalar tail past the last full 4x4 tile.
pub fn generate_identity(m: i64, n: i64, transpose: bool) -> SetupResult<Code> {
    if transpose {
        generate_identity_transposed(m, n)
    } else {
        generate_unary(m, n, UnaryOp::Identity)
    }
}

fn generate_unary(m: i64, n: i64, op: UnaryOp) -> SetupResult<Code> {
    if m <= 0 {
        return Err(SetupError::NonPositiveDimension { name: "m", value: m });
    }
    if n <= 0 {
        return Err(SetupError::NonPositiveDimension { name: "n", value: n });
    }

    let mut code = Code::new();
    support::prologue(&mut code)?;
    support::scale_to_bytes(&mut code, Gpr::X2)?;
    support::scale_to_bytes(&mut code, Gpr::X3)?;

    // A standing zero register, reused both as Relu's comparand and as
    // the source of every Zero store (its low 32/128 bits are always 0).
    code.add_instr(zero(Vreg(28), ByteArr::B16))?;

    let (full_m, rem_m) = support::full_and_remainder(m, CHUNK);

    for col in 0..n {
        support::add_const_times_reg(&mut code, Gpr(11), Gpr::X1, col, Gpr::X3, Gpr(13))?;
        if op != UnaryOp::Zero {
            support::add_const_times_reg(&mut code, Gpr(10), Gpr::X0, col, Gpr::X2, Gpr(13))?;
        }

        for chunk in 0..full_m {
            let off0 = chunk * 64;
            let off1 = off0 + 32;
            let regs = [Vreg(24), Vreg(25), Vreg(26), Vreg(27)];

            if op != UnaryOp::Zero {
                code.add_instr(ldp_vec(regs[0], regs[1], Gpr(10), off0, NeonSize::Q)?)?;
                code.add_instr(ldp_vec(regs[2], regs[3], Gpr(10), off1, NeonSize::Q)?)?;
            }
            for &v in &regs {
                apply_vec(&mut code, op, v, Vreg(28))?;
            }
            if op == UnaryOp::Zero {
                code.add_instr(stp_vec(Vreg(28), Vreg(28), Gpr(11), off0, NeonSize::Q)?)?;
                code.add_instr(stp_vec(Vreg(28), Vreg(28), Gpr(11), off1, NeonSize::Q)?)?;
            } else {
                code.add_instr(stp_vec(regs[0], regs[1], Gpr(11), off0, NeonSize::Q)?)?;
                code.add_instr(stp_vec(regs[2], regs[3], Gpr(11), off1, NeonSize::Q)?)?;
            }
        }

        for r in 0..rem_m {
            let off = full_m * 64 + r * 4;
            if op == UnaryOp::Zero {
                code.add_instr(str_vec_imm(Vreg(28), Gpr(11), off, NeonSize::S)?)?;
                continue;
            }
            code.add_instr(ldr_vec_imm(Vreg(24), Gpr(10), off, NeonSize::S)?)?;
            apply_scalar(&mut code, op, Vreg(24), Vreg(28))?;
            code.add_instr(str_vec_imm(Vreg(24), Gpr(11), off, NeonSize::S)?)?;
        }
    }

    support::epilogue(&mut code)?;
    Ok(code)
}

fn apply_vec(code: &mut Code, op: UnaryOp, v: Vreg, zero_reg: Vreg) -> SetupResult<()> {
    match op {
        UnaryOp::Zero | UnaryOp::Identity => {}
        UnaryOp::Relu => {
            code.add_instr(fmax_vec(v, v, zero_reg, ArrSpec::S4))?;
        }
        UnaryOp::Square => {
            code.add_instr(fmul_vec(v, v, v, ArrSpec::S4))?;
        }
        UnaryOp::Reciprocal => {
            code.add_instr(frecpe_vec(Vreg(29), v, ArrSpec::S4))?;
            code.add_instr(frecps_vec(Vreg(30), v, Vreg(29), ArrSpec::S4))?;
            code.add_instr(fmul_vec(v, Vreg(29), Vreg(30), ArrSpec::S4))?;
        }
    }
    Ok(())
}

fn apply_scalar(code: &mut Code, op: UnaryOp, v: Vreg, zero_reg: Vreg) -> SetupResult<()> {
    match op {
        UnaryOp::Zero | UnaryOp::Identity => {}
        UnaryOp::Relu => {
            code.add_instr(fmax_scalar(NeonSize::S, v, v, zero_reg))?;
        }
        UnaryOp::Square => {
            code.add_instr(fmul_scalar(NeonSize::S, v, v, v))?;
        }
        UnaryOp::Reciprocal => {
            code.add_instr(frecpe_scalar(NeonSize::S, Vreg(29), v))?;
            code.add_instr(frecps_scalar(NeonSize::S, Vreg(30), v, Vreg(29)))?;
            code.add_instr(fmul_scalar(NeonSize::S, v, Vreg(29), Vreg(30)))?;
        }
    }
    Ok(())
}

/// A transposing identity copy: reads `m` (contiguous) x `n` (strided by
/// `ld_in`) and writes `n` (contiguous) x `m` (strided by `ld_out`), via
/// 4x4 register-tile transposes (`TRN1`/`TRN2` then `ZIP1`/`ZIP2`
/// reinterpreting the 128-bit tile as two 64-bit lanes, the standard
/// NEON 4x4 f32 transpose recipe) over the largest 4x4-tileable
/// sub-rectangle, with a scalar element-by-element tail covering any
/// row or column past the last full tile — the same "one template plus
/// a uniform tail" shape the GEMM tail subkernels use, rather than a
/// hand-written routine per (m_tail, n_tail) pair.
fn generate_identity_transposed(m: i64, n: i64) -> SetupResult<Code> {
    if m <= 0 {
        return Err(SetupError::NonPositiveDimension { name: "m", value: m });
    }
    if n <= 0 {
        return Err(SetupError::NonPositiveDimension { name: "n", value: n });
    }

    let mut code = Code::new();
    support::prologue(&mut code)?;
    support::scale_to_bytes(&mut code, Gpr::X2)?;
    support::scale_to_bytes(&mut code, Gpr::X3)?;

    let m_tiled = (m / 4) * 4;
    let n_tiled = (n / 4) * 4;

    for bi in 0..(m / 4) {
        for bj in 0..(n / 4) {
            let a = [Vreg(24), Vreg(25), Vreg(26), Vreg(27)];
            for (i, &ai) in a.iter().enumerate() {
                // Column (fixed N = bj*4+i) base pointer, then the
                // compile-time M offset for this row-of-4 block.
                support::add_const_times_reg(&mut code, Gpr(10), Gpr::X0, bj * 4 + i as i64, Gpr::X2, Gpr(13))?;
                code.add_instr(ldr_vec_imm(ai, Gpr(10), bi * 16, NeonSize::Q)?)?;
            }

            let t0 = Vreg(28);
            let u0 = Vreg(29);
            let t1 = Vreg(30);
            let u1 = Vreg(31);
            code.add_instr(trn1(t0, a[0], a[1], ArrSpec::S4))?;
            code.add_instr(trn2(u0, a[0], a[1], ArrSpec::S4))?;
            code.add_instr(trn1(t1, a[2], a[3], ArrSpec::S4))?;
            code.add_instr(trn2(u1, a[2], a[3], ArrSpec::S4))?;

            let b = [Vreg(24), Vreg(25), Vreg(26), Vreg(27)];
            code.add_instr(zip1(b[0], t0, t1, ArrSpec::D2))?;
            code.add_instr(zip1(b[1], u0, u1, ArrSpec::D2))?;
            code.add_instr(zip2(b[2], t0, t1, ArrSpec::D2))?;
            code.add_instr(zip2(b[3], u0, u1, ArrSpec::D2))?;

            for (j, &bj_reg) in b.iter().enumerate() {
                support::add_const_times_reg(&mut code, Gpr(11), Gpr::X1, bi * 4 + j as i64, Gpr::X3, Gpr(13))?;
                code.add_instr(str_vec_imm(bj_reg, Gpr(11), bj * 16, NeonSize::Q)?)?;
            }
        }
    }

    // Scalar tail: every (row, col) not covered by a full 4x4 tile above,
    // i.e. row >= m_tiled or col >= n_tiled. Input element (row, col) is
    // addressed at X0 + col*ld_a_bytes + row*4; its transposed output
    // element lands at X1 + row*ld_out_bytes + col*4.
    for col in 0..n {
        let row_start = if col < n_tiled { m_tiled } else { 0 };
        if row_start >= m {
            continue;
        }
        support::add_const_times_reg(&mut code, Gpr(10), Gpr::X0, col, Gpr::X2, Gpr(13))?;
        for row in row_start..m {
            code.add_instr(ldr_vec_imm(Vreg(24), Gpr(10), row * 4, NeonSize::S)?)?;
            support::add_const_times_reg(&mut code, Gpr(11), Gpr::X1, row, Gpr::X3, Gpr(13))?;
            code.add_instr(str_vec_imm(Vreg(24), Gpr(11), col * 4, NeonSize::S)?)?;
        }
    }

    support::epilogue(&mut code)?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_dimensions() {
        assert!(matches!(
            generate_relu(0, 4),
            Err(SetupError::NonPositiveDimension { name: "m", .. })
        ));
    }

    #[test]
    fn zero_handles_remainder_tail() {
        let code = generate_zero(17, 3).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn reciprocal_full_tile() {
        let code = generate_reciprocal(32, 4).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn identity_plain_copy() {
        let code = generate_identity(16, 6, false).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn identity_transpose_handles_non_multiple_of_four_via_scalar_tail() {
        let code = generate_identity(5, 4, true).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn identity_transpose_handles_tails_on_both_axes() {
        let code = generate_identity(6, 7, true).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn identity_transpose_generates() {
        let code = generate_identity(8, 8, true).unwrap();
        assert!(code.size_bytes() > 0);
    }
}
