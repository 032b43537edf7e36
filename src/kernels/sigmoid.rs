//! Sigmoid micro-kernel generator (component D): the two variants named
//! in the top-level design notes, a polynomial approximation and a
//! table-interpolated one. Neither is grounded directly on a single
//! `original_source/` file (the original kernel set doesn't have a
//! sigmoid primitive at all); both follow the activation-kernel shape
//! `examples/original_source/src/kernels/unary/zero_primitive.cpp`
//! establishes (PCS prologue/epilogue, a strided M/N walk) and are
//! scalar rather than lane-vectorized, since neither the polynomial's
//! odd-power terms nor the table's per-lane index computation map onto
//! a single NEON instruction without a gather — see `DESIGN.md`.

use crate::arch::aarch64::encode::base::{add_reg, lsl_imm, mov_imm};
use crate::arch::aarch64::encode::simd::{
    fabs_scalar, fadd_scalar, fcvtzs_scalar, fdiv_scalar, fmadd_scalar, fmax_scalar, fmin_scalar,
    fmov_scalar_from_gpr, fmul_scalar, fsub_scalar, ldp_vec, ldr_vec_imm, scvtf_scalar,
    str_vec_imm, zero,
};
use crate::arch::aarch64::regs::{ByteArr, GpWidth, Gpr, NeonSize, Vreg};
use crate::codebuf::Code;
use crate::kernels::support;
use crate::kernels::{SetupError, SetupResult};
use once_cell::sync::Lazy;

/// The shared unary kernel entry contract, same as [`super::unary::UnaryKernelFn`].
pub type SigmoidKernelFn = unsafe extern "C" fn(*const f32, *mut f32, i64, i64);

const TABLE_SIZE: usize = 256;
const TABLE_LO: f32 = -8.0;
const TABLE_HI: f32 = 8.0;
const TABLE_STEP: f32 = (TABLE_HI - TABLE_LO) / TABLE_SIZE as f32;

#[repr(C)]
#[derive(Clone, Copy)]
struct TableEntry {
    value: f32,
    slope: f32,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// A process-wide 256-entry table spanning `[-8, 8)`: entry `i` holds
/// `sigmoid(x_i)` and the per-bucket slope `sigmoid(x_i + step) -
/// sigmoid(x_i)`, so the kernel reconstructs a linear interpolant as
/// `value + slope * frac` without recomputing the table per operation.
static SIGMOID_TABLE: Lazy<[TableEntry; TABLE_SIZE]> = Lazy::new(|| {
    let mut table = [TableEntry { value: 0.0, slope: 0.0 }; TABLE_SIZE];
    for (i, entry) in table.iter_mut().enumerate() {
        let x = TABLE_LO + i as f32 * TABLE_STEP;
        let v = sigmoid(x);
        entry.value = v;
        entry.slope = sigmoid(x + TABLE_STEP) - v;
    }
    table
});

/// Generates the polynomial-approximation sigmoid kernel: the 5th-order
/// Taylor expansion around zero, `0.5 + 0.25x - x^3/48 + x^5/480`,
/// evaluated per element via Horner's scheme with fused multiply-adds.
pub fn generate_poly(m: i64, n: i64) -> SetupResult<Code> {
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

    let c_half = Vreg(28);
    let c_quarter = Vreg(27);
    let c_neg_1_48 = Vreg(26);
    let c_inv_480 = Vreg(25);
    load_const(&mut code, c_half, 0.5)?;
    load_const(&mut code, c_quarter, 0.25)?;
    load_const(&mut code, c_neg_1_48, -1.0 / 48.0)?;
    load_const(&mut code, c_inv_480, 1.0 / 480.0)?;

    for col in 0..n {
        support::add_const_times_reg(&mut code, Gpr(10), Gpr::X0, col, Gpr::X2, Gpr(13))?;
        support::add_const_times_reg(&mut code, Gpr(11), Gpr::X1, col, Gpr::X3, Gpr(13))?;

        for row in 0..m {
            let x = Vreg(20);
            let x2 = Vreg(21);
            let x3 = Vreg(22);
            let x5 = Vreg(23);
            let r = Vreg(24);

            code.add_instr(ldr_vec_imm(x, Gpr(10), row * 4, NeonSize::S)?)?;
            code.add_instr(fmul_scalar(NeonSize::S, x2, x, x))?;
            code.add_instr(fmul_scalar(NeonSize::S, x3, x2, x))?;
            code.add_instr(fmul_scalar(NeonSize::S, x5, x3, x2))?;

            code.add_instr(fmadd_scalar(r, x, c_quarter, c_half))?;
            code.add_instr(fmadd_scalar(r, x3, c_neg_1_48, r))?;
            code.add_instr(fmadd_scalar(r, x5, c_inv_480, r))?;

            code.add_instr(str_vec_imm(r, Gpr(11), row * 4, NeonSize::S)?)?;
        }
    }

    support::epilogue(&mut code)?;
    Ok(code)
}

/// Generates the fast-sigmoid kernel: `0.5 * (x / (1 + |x|) + 1)`, one
/// `FABS`, one `FADD` against the constant 1, one `FDIV`, and a closing
/// `FMADD` per element. Cheaper than either the polynomial or the
/// table variant (no odd powers, no memory indirection) at the cost of
/// accuracy away from the origin.
pub fn generate_fast(m: i64, n: i64) -> SetupResult<Code> {
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

    let c_one = Vreg(28);
    let c_half = Vreg(27);
    load_const(&mut code, c_one, 1.0)?;
    load_const(&mut code, c_half, 0.5)?;

    for col in 0..n {
        support::add_const_times_reg(&mut code, Gpr(10), Gpr::X0, col, Gpr::X2, Gpr(13))?;
        support::add_const_times_reg(&mut code, Gpr(11), Gpr::X1, col, Gpr::X3, Gpr(13))?;

        for row in 0..m {
            let x = Vreg(20);
            let abs_x = Vreg(21);
            let denom = Vreg(22);
            let quot = Vreg(23);
            let r = Vreg(24);

            code.add_instr(ldr_vec_imm(x, Gpr(10), row * 4, NeonSize::S)?)?;
            code.add_instr(fabs_scalar(NeonSize::S, abs_x, x))?;
            code.add_instr(fadd_scalar(NeonSize::S, denom, abs_x, c_one))?;
            code.add_instr(fdiv_scalar(NeonSize::S, quot, x, denom))?;
            code.add_instr(fadd_scalar(NeonSize::S, r, quot, c_one))?;
            code.add_instr(fmul_scalar(NeonSize::S, r, r, c_half))?;
            code.add_instr(str_vec_imm(r, Gpr(11), row * 4, NeonSize::S)?)?;
        }
    }

    support::epilogue(&mut code)?;
    Ok(code)
}

/// Generates the table-interpolated sigmoid kernel. For each element:
/// clamp to `[-8, 8)`, scale by the table's resolution, truncate to an
/// integer index, load the `(value, slope)` pair at that index, and
/// evaluate `value + slope * frac`.
pub fn generate_table(m: i64, n: i64) -> SetupResult<Code> {
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

    let table_addr = Lazy::force(&SIGMOID_TABLE).as_ptr() as u64;
    for w in mov_imm(GpWidth::X, Gpr(9), table_addr) {
        code.add_instr(w)?;
    }

    let c_lo = Vreg(29);
    let c_scale = Vreg(28);
    let c_max_idx = Vreg(27);
    let c_zero = Vreg(26);
    load_const(&mut code, c_lo, -TABLE_LO)?;
    load_const(&mut code, c_scale, 1.0 / TABLE_STEP)?;
    load_const(&mut code, c_max_idx, (TABLE_SIZE - 1) as f32)?;
    code.add_instr(zero(c_zero, ByteArr::B8))?;

    for col in 0..n {
        support::add_const_times_reg(&mut code, Gpr(10), Gpr::X0, col, Gpr::X2, Gpr(13))?;
        support::add_const_times_reg(&mut code, Gpr(11), Gpr::X1, col, Gpr::X3, Gpr(13))?;

        for row in 0..m {
            let x = Vreg(20);
            let idx_f = Vreg(21);
            let frac = Vreg(22);
            let value = Vreg(23);
            let slope = Vreg(24);
            let result = Vreg(25);
            let idx_reg = Gpr(14);
            let addr_reg = Gpr(15);

            code.add_instr(ldr_vec_imm(x, Gpr(10), row * 4, NeonSize::S)?)?;
            // idx_f := clamp((x - table_lo) * scale, 0, table_size - 1)
            code.add_instr(fadd_scalar(NeonSize::S, idx_f, x, c_lo))?;
            code.add_instr(fmul_scalar(NeonSize::S, idx_f, idx_f, c_scale))?;
            code.add_instr(fmax_scalar(NeonSize::S, idx_f, idx_f, c_zero))?;
            code.add_instr(fmin_scalar(NeonSize::S, idx_f, idx_f, c_max_idx))?;

            // Truncate toward zero; writing the 32-bit Wd form also
            // zeroes the upper half of the same-numbered Xd, so the
            // register is immediately usable as a 64-bit byte offset.
            code.add_instr(fcvtzs_scalar(GpWidth::W, idx_reg, idx_f))?;
            code.add_instr(scvtf_scalar(GpWidth::W, frac, idx_reg))?;
            code.add_instr(fsub_scalar(NeonSize::S, frac, idx_f, frac))?;

            code.add_instr(lsl_imm(GpWidth::X, idx_reg, idx_reg, 3))?;
            code.add_instr(add_reg(GpWidth::X, addr_reg, Gpr(9), idx_reg, 0, 0))?;
            code.add_instr(ldp_vec(value, slope, addr_reg, 0, NeonSize::S)?)?;

            code.add_instr(fmadd_scalar(result, slope, frac, value))?;
            code.add_instr(str_vec_imm(result, Gpr(11), row * 4, NeonSize::S)?)?;
        }
    }

    support::epilogue(&mut code)?;
    Ok(code)
}

/// Loads an arbitrary `f32` constant into a scalar vector register via a
/// 32-bit general-register immediate and `FMOV` — used in place of the
/// 8-bit `FMOV` immediate form, which can't represent most of these
/// constants (`-1/48`, `1/480`, the table's resolution, ...).
fn load_const(code: &mut Code, vd: Vreg, value: f32) -> SetupResult<()> {
    for w in mov_imm(GpWidth::W, Gpr(13), value.to_bits() as u64) {
        code.add_instr(w)?;
    }
    code.add_instr(fmov_scalar_from_gpr(vd, Gpr(13)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_dimensions() {
        assert!(matches!(
            generate_poly(0, 4),
            Err(SetupError::NonPositiveDimension { name: "m", .. })
        ));
        assert!(matches!(
            generate_table(4, 0),
            Err(SetupError::NonPositiveDimension { name: "n", .. })
        ));
    }

    #[test]
    fn poly_generates_nonempty_kernel() {
        let code = generate_poly(4, 3).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn fast_generates_nonempty_kernel() {
        let code = generate_fast(4, 3).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn fast_rejects_non_positive_dimensions() {
        assert!(matches!(
            generate_fast(0, 4),
            Err(SetupError::NonPositiveDimension { name: "m", .. })
        ));
    }

    #[test]
    fn table_generates_nonempty_kernel() {
        let code = generate_table(4, 3).unwrap();
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn table_endpoints_match_closed_form_sigmoid() {
        let table = &*SIGMOID_TABLE;
        assert!((table[0].value - sigmoid(TABLE_LO)).abs() < 1e-4);
        let mid = TABLE_SIZE / 2;
        assert!((table[mid].value - sigmoid(0.0)).abs() < 1e-3);
    }

    #[test]
    fn table_is_process_wide_and_stable() {
        let a = Lazy::force(&SIGMOID_TABLE).as_ptr();
        let b = Lazy::force(&SIGMOID_TABLE).as_ptr();
        assert_eq!(a, b);
    }
}
