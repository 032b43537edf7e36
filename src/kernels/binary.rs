//! Element-wise binary micro-kernel generator (component D, binary
//! family): add, sub, mul, div, min, max. This crate's extension of the
//! kernel set beyond identity/gemm/brgemm (see `DESIGN.md`); structured
//! identically to [`super::unary`]'s column-major walk but with two
//! independently-strided inputs instead of one, and no transposing
//! variant (an Open Question in the design notes settles this as
//! unsupported — the tensor-operation driver rejects a transposed
//! binary main before a kernel is ever generated).

use crate::arch::aarch64::encode::simd::{
    fadd_scalar, fadd_vec, fdiv_scalar, fdiv_vec, fmax_scalar, fmax_vec, fmin_scalar, fmin_vec,
    fmul_scalar, fmul_vec, fsub_scalar, fsub_vec, ldp_vec, ldr_vec_imm, stp_vec, str_vec_imm,
};
use crate::arch::aarch64::regs::{ArrSpec, Gpr, NeonSize, Vreg};
use crate::codebuf::Code;
use crate::kernels::support;
use crate::kernels::{SetupError, SetupResult};

const CHUNK: i64 = 16;

/// The shared binary kernel entry contract: `a`, `b`, `c`, then the
/// three leading dimensions (element counts).
pub type BinaryKernelFn = unsafe extern "C" fn(*const f32, *const f32, *mut f32, i64, i64, i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

pub fn generate_add(m: i64, n: i64) -> SetupResult<Code> {
    generate_binary(m, n, BinaryOp::Add)
}

pub fn generate_sub(m: i64, n: i64) -> SetupResult<Code> {
    generate_binary(m, n, BinaryOp::Sub)
}

pub fn generate_mul(m: i64, n: i64) -> SetupResult<Code> {
    generate_binary(m, n, BinaryOp::Mul)
}

pub fn generate_div(m: i64, n: i64) -> SetupResult<Code> {
    generate_binary(m, n, BinaryOp::Div)
}

pub fn generate_min(m: i64, n: i64) -> SetupResult<Code> {
    generate_binary(m, n, BinaryOp::Min)
}

pub fn generate_max(m: i64, n: i64) -> SetupResult<Code> {
    generate_binary(m, n, BinaryOp::Max)
}

pub fn generate_binary(m: i64, n: i64, op: BinaryOp) -> SetupResult<Code> {
    if m <= 0 {
        return Err(SetupError::NonPositiveDimension { name: "m", value: m });
    }
    if n <= 0 {
        return Err(SetupError::NonPositiveDimension { name: "n", value: n });
    }

    let mut code = Code::new();
    support::prologue(&mut code)?;
    support::scale_to_bytes(&mut code, Gpr::X3)?;
    support::scale_to_bytes(&mut code, Gpr::X4)?;
    support::scale_to_bytes(&mut code, Gpr::X5)?;

    let (full_m, rem_m) = support::full_and_remainder(m, CHUNK);

    for col in 0..n {
        support::add_const_times_reg(&mut code, Gpr(10), Gpr::X0, col, Gpr::X3, Gpr(13))?;
        support::add_const_times_reg(&mut code, Gpr(11), Gpr::X1, col, Gpr::X4, Gpr(13))?;
        support::add_const_times_reg(&mut code, Gpr(12), Gpr::X2, col, Gpr::X5, Gpr(13))?;

        for chunk in 0..full_m {
            let off0 = chunk * 64;
            let off1 = off0 + 32;
            let a = [Vreg(24), Vreg(25), Vreg(26), Vreg(27)];
            let b = [Vreg(20), Vreg(21), Vreg(22), Vreg(23)];

            code.add_instr(ldp_vec(a[0], a[1], Gpr(10), off0, NeonSize::Q)?)?;
            code.add_instr(ldp_vec(a[2], a[3], Gpr(10), off1, NeonSize::Q)?)?;
            code.add_instr(ldp_vec(b[0], b[1], Gpr(11), off0, NeonSize::Q)?)?;
            code.add_instr(ldp_vec(b[2], b[3], Gpr(11), off1, NeonSize::Q)?)?;

            for i in 0..4 {
                code.add_instr(apply_vec(op, a[i], a[i], b[i]))?;
            }

            code.add_instr(stp_vec(a[0], a[1], Gpr(12), off0, NeonSize::Q)?)?;
            code.add_instr(stp_vec(a[2], a[3], Gpr(12), off1, NeonSize::Q)?)?;
        }

        for r in 0..rem_m {
            let off = full_m * 64 + r * 4;
            code.add_instr(ldr_vec_imm(Vreg(24), Gpr(10), off, NeonSize::S)?)?;
            code.add_instr(ldr_vec_imm(Vreg(25), Gpr(11), off, NeonSize::S)?)?;
            code.add_instr(apply_scalar(op, Vreg(24), Vreg(24), Vreg(25)))?;
            code.add_instr(str_vec_imm(Vreg(24), Gpr(12), off, NeonSize::S)?)?;
        }
    }

    support::epilogue(&mut code)?;
    Ok(code)
}

fn apply_vec(op: BinaryOp, vd: Vreg, vn: Vreg, vm: Vreg) -> u32 {
    match op {
        BinaryOp::Add => fadd_vec(vd, vn, vm, ArrSpec::S4),
        BinaryOp::Sub => fsub_vec(vd, vn, vm, ArrSpec::S4),
        BinaryOp::Mul => fmul_vec(vd, vn, vm, ArrSpec::S4),
        BinaryOp::Div => fdiv_vec(vd, vn, vm, ArrSpec::S4),
        BinaryOp::Min => fmin_vec(vd, vn, vm, ArrSpec::S4),
        BinaryOp::Max => fmax_vec(vd, vn, vm, ArrSpec::S4),
    }
}

fn apply_scalar(op: BinaryOp, vd: Vreg, vn: Vreg, vm: Vreg) -> u32 {
    match op {
        BinaryOp::Add => fadd_scalar(NeonSize::S, vd, vn, vm),
        BinaryOp::Sub => fsub_scalar(NeonSize::S, vd, vn, vm),
        BinaryOp::Mul => fmul_scalar(NeonSize::S, vd, vn, vm),
        BinaryOp::Div => fdiv_scalar(NeonSize::S, vd, vn, vm),
        BinaryOp::Min => fmin_scalar(NeonSize::S, vd, vn, vm),
        BinaryOp::Max => fmax_scalar(NeonSize::S, vd, vn, vm),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_dimensions() {
        assert!(matches!(
            generate_add(0, 4),
            Err(SetupError::NonPositiveDimension { name: "m", .. })
        ));
    }

    #[test]
    fn each_op_generates_a_nonempty_kernel() {
        for op in [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Min,
            BinaryOp::Max,
        ] {
            let code = generate_binary(20, 5, op).unwrap();
            assert!(code.size_bytes() > 0);
        }
    }

    #[test]
    fn handles_remainder_tail() {
        let code = generate_mul(17, 2).unwrap();
        assert!(code.size_bytes() > 0);
    }
}
