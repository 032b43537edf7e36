//! Shared code-generation helpers used by every micro-kernel generator:
//! the callee-saved prologue/epilogue (grounded on the PCS save/restore
//! sequence in `examples/original_source/src/kernels/unary/zero_primitive.cpp`
//! and `examples/original_source/src/kernels/matmul/subkernels/matmul_16_6_k.cpp`)
//! and small pointer-arithmetic emitters reused by the M/N tiling loops
//! in [`super::matmul`], [`super::unary`], and [`super::binary`].

use crate::arch::aarch64::encode::base::{add_imm, add_reg, mov_reg, mul, sub_imm};
use crate::arch::aarch64::encode::simd::{ldp_vec, stp_vec};
use crate::arch::aarch64::regs::{GpWidth, Gpr, NeonSize};
use crate::codebuf::Code;
use crate::kernels::{SetupError, SetupResult};

/// Total callee-saved frame size: `x29`/`x30`, five `x19..x28` pairs,
/// four `d8..d15` pairs. 16-byte aligned, as the PCS requires.
pub const FRAME_BYTES: i64 = 160;

/// Allocates the frame and spills every callee-saved register the
/// kernel generators use as scratch, so each generator is free to use
/// `x19..x28` and `v8..v15` without tracking caller state itself.
pub fn prologue(code: &mut Code) -> SetupResult<()> {
    code.add_instr(sub_imm(GpWidth::X, Gpr::SP, Gpr::SP, FRAME_BYTES as u32, false)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::stp(GpWidth::X, Gpr::X19, Gpr(20), Gpr::SP, 0)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::stp(GpWidth::X, Gpr(21), Gpr(22), Gpr::SP, 16)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::stp(GpWidth::X, Gpr(23), Gpr(24), Gpr::SP, 32)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::stp(GpWidth::X, Gpr(25), Gpr(26), Gpr::SP, 48)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::stp(GpWidth::X, Gpr(27), Gpr(28), Gpr::SP, 64)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::stp(GpWidth::X, Gpr::FP, Gpr::LR, Gpr::SP, 80)?)?;
    code.add_instr(stp_vec(crate::arch::aarch64::regs::Vreg(8), crate::arch::aarch64::regs::Vreg(9), Gpr::SP, 96, NeonSize::D)?)?;
    code.add_instr(stp_vec(crate::arch::aarch64::regs::Vreg(10), crate::arch::aarch64::regs::Vreg(11), Gpr::SP, 112, NeonSize::D)?)?;
    code.add_instr(stp_vec(crate::arch::aarch64::regs::Vreg(12), crate::arch::aarch64::regs::Vreg(13), Gpr::SP, 128, NeonSize::D)?)?;
    code.add_instr(stp_vec(crate::arch::aarch64::regs::Vreg(14), crate::arch::aarch64::regs::Vreg(15), Gpr::SP, 144, NeonSize::D)?)?;
    code.add_instr(mov_reg(GpWidth::X, Gpr::FP, Gpr::SP))?;
    Ok(())
}

/// Restores every register [`prologue`] spilled and returns.
pub fn epilogue(code: &mut Code) -> SetupResult<()> {
    code.add_instr(ldp_vec(crate::arch::aarch64::regs::Vreg(8), crate::arch::aarch64::regs::Vreg(9), Gpr::SP, 96, NeonSize::D)?)?;
    code.add_instr(ldp_vec(crate::arch::aarch64::regs::Vreg(10), crate::arch::aarch64::regs::Vreg(11), Gpr::SP, 112, NeonSize::D)?)?;
    code.add_instr(ldp_vec(crate::arch::aarch64::regs::Vreg(12), crate::arch::aarch64::regs::Vreg(13), Gpr::SP, 128, NeonSize::D)?)?;
    code.add_instr(ldp_vec(crate::arch::aarch64::regs::Vreg(14), crate::arch::aarch64::regs::Vreg(15), Gpr::SP, 144, NeonSize::D)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::ldp(GpWidth::X, Gpr::X19, Gpr(20), Gpr::SP, 0)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::ldp(GpWidth::X, Gpr(21), Gpr(22), Gpr::SP, 16)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::ldp(GpWidth::X, Gpr(23), Gpr(24), Gpr::SP, 32)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::ldp(GpWidth::X, Gpr(25), Gpr(26), Gpr::SP, 48)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::ldp(GpWidth::X, Gpr(27), Gpr(28), Gpr::SP, 64)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::ldp(GpWidth::X, Gpr::FP, Gpr::LR, Gpr::SP, 80)?)?;
    code.add_instr(add_imm(GpWidth::X, Gpr::SP, Gpr::SP, FRAME_BYTES as u32, false)?)?;
    code.add_instr(crate::arch::aarch64::encode::base::ret(Gpr::LR))?;
    Ok(())
}

/// `rd := rn + bytes`, `bytes` a compile-time-known immediate (tile
/// offsets along a contiguous axis), using `ADD #imm{, LSL #12}` when it
/// fits and falling back to a `MOVZ`/`MOVK` chain plus register add
/// otherwise. `scratch` must not alias `rd`/`rn`.
pub fn add_const_bytes(code: &mut Code, rd: Gpr, rn: Gpr, bytes: i64, scratch: Gpr) -> SetupResult<()> {
    if bytes == 0 {
        if rd != rn {
            code.add_instr(mov_reg(GpWidth::X, rd, rn))?;
        }
        return Ok(());
    }
    if bytes < 0 {
        return sub_const_bytes(code, rd, rn, -bytes, scratch);
    }
    if bytes <= 0xfff {
        code.add_instr(add_imm(GpWidth::X, rd, rn, bytes as u32, false)?)?;
    } else if bytes % 4096 == 0 && bytes / 4096 <= 0xfff {
        code.add_instr(add_imm(GpWidth::X, rd, rn, (bytes / 4096) as u32, true)?)?;
    } else {
        for w in crate::arch::aarch64::encode::base::mov_imm(GpWidth::X, scratch, bytes as u64) {
            code.add_instr(w)?;
        }
        code.add_instr(add_reg(GpWidth::X, rd, rn, scratch, 0, 0))?;
    }
    Ok(())
}

fn sub_const_bytes(code: &mut Code, rd: Gpr, rn: Gpr, bytes: i64, scratch: Gpr) -> SetupResult<()> {
    if bytes <= 0xfff {
        code.add_instr(sub_imm(GpWidth::X, rd, rn, bytes as u32, false)?)?;
    } else {
        for w in crate::arch::aarch64::encode::base::mov_imm(GpWidth::X, scratch, bytes as u64) {
            code.add_instr(w)?;
        }
        code.add_instr(crate::arch::aarch64::encode::base::sub_reg(GpWidth::X, rd, rn, scratch, 0, 0))?;
    }
    Ok(())
}

/// `rd := rn + constant * stride_reg`, `constant` compile-time-known
/// (a tile's column/row count), `stride_reg` a runtime leading-dimension
/// value. `scratch` must not alias `rd`/`rn`/`stride_reg`.
pub fn add_const_times_reg(code: &mut Code, rd: Gpr, rn: Gpr, constant: i64, stride_reg: Gpr, scratch: Gpr) -> SetupResult<()> {
    if constant == 0 {
        if rd != rn {
            code.add_instr(mov_reg(GpWidth::X, rd, rn))?;
        }
        return Ok(());
    }
    if constant == 1 {
        code.add_instr(add_reg(GpWidth::X, rd, rn, stride_reg, 0, 0))?;
        return Ok(());
    }
    if constant < 0 {
        return Err(SetupError::NonPositiveDimension {
            name: "tile offset constant",
            value: constant,
        });
    }
    for w in crate::arch::aarch64::encode::base::mov_imm(GpWidth::X, scratch, constant as u64) {
        code.add_instr(w)?;
    }
    code.add_instr(mul(GpWidth::X, scratch, scratch, stride_reg))?;
    code.add_instr(add_reg(GpWidth::X, rd, rn, scratch, 0, 0))?;
    Ok(())
}

/// Emits `LSL Xd, Xd, #2` to scale an element-count leading dimension
/// into a byte stride (single-precision only, per §4.3).
pub fn scale_to_bytes(code: &mut Code, rd: Gpr) -> SetupResult<()> {
    code.add_instr(crate::arch::aarch64::encode::base::lsl_imm(GpWidth::X, rd, rd, 2))?;
    Ok(())
}

/// Splits a dimension of `total` elements into full chunks of `chunk`
/// plus a remainder, for tile-grid / lane-grouping decomposition.
pub fn full_and_remainder(total: i64, chunk: i64) -> (i64, i64) {
    (total / chunk, total % chunk)
}
