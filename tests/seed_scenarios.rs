//! End-to-end coverage of the six literal seed scenarios (SPEC_FULL §8):
//! materializes real kernels and invokes them through the compiled
//! function pointers, so these only run where the host can execute
//! AArch64 machine code.

#![cfg(target_arch = "aarch64")]

use std::collections::HashMap;

use tensorjit::{parse_einsum_expression, DType, DimRole, Dimension, ExecMode, PrimitiveType, TensorOp};

fn dim(role: DimRole, mode: ExecMode, size: i64, s0: i64, s1: i64, so: i64) -> Dimension {
    Dimension::new(role, mode, size, s0, s1, so).unwrap()
}

/// Scenario 1: 16x6x1 reference product. `A` is a column of 16, `B` a
/// row of 6; `C[r, c] = r * c`.
#[test]
fn sixteen_by_six_by_one_reference_product() {
    let dims = vec![
        dim(DimRole::K, ExecMode::Primitive, 1, 1, 6, 0),
        dim(DimRole::N, ExecMode::Primitive, 6, 0, 1, 16),
        dim(DimRole::M, ExecMode::Primitive, 16, 1, 0, 1),
    ];
    let op = TensorOp::setup(DType::Fp32, PrimitiveType::None, PrimitiveType::Gemm, PrimitiveType::None, dims).unwrap();

    let a: Vec<f32> = (0..16).map(|r| r as f32).collect();
    let b: Vec<f32> = (0..6).map(|c| c as f32).collect();
    let mut c = vec![0.0f32; 96];
    unsafe {
        op.execute(a.as_ptr(), Some(b.as_ptr()), c.as_mut_ptr());
    }

    for r in 0..16i64 {
        for col in 0..6i64 {
            let got = c[(col * 16 + r) as usize];
            assert_eq!(got, (r * col) as f32, "r={r} c={col}");
        }
    }
}

/// Scenario 2: identity on a 64x64 matrix; the output must match the
/// input bitwise.
#[test]
fn identity_on_64x64_matches_input_bitwise() {
    let dims = vec![dim(DimRole::N, ExecMode::Primitive, 64, 64, 64, 64), dim(DimRole::M, ExecMode::Primitive, 64, 1, 1, 1)];
    let op = TensorOp::setup(DType::Fp32, PrimitiveType::None, PrimitiveType::Identity, PrimitiveType::None, dims).unwrap();

    let mut seed = 0x2545F4914F6CDD1Du64;
    let mut next = || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        (seed >> 40) as u32 as f32 / u32::MAX as f32
    };
    let a: Vec<f32> = (0..64 * 64).map(|_| next()).collect();
    let mut b = vec![0.0f32; 64 * 64];
    unsafe {
        op.execute(a.as_ptr(), None, b.as_mut_ptr());
    }

    assert_eq!(a, b);
}

/// Scenario 3: ReLU on a 2x3 matrix via an Identity main with a Relu
/// last-touch.
#[test]
fn relu_on_2x3() {
    let dims = vec![dim(DimRole::N, ExecMode::Primitive, 3, 1, 1, 1), dim(DimRole::M, ExecMode::Primitive, 2, 3, 3, 3)];
    let op = TensorOp::setup(DType::Fp32, PrimitiveType::None, PrimitiveType::Identity, PrimitiveType::Relu, dims).unwrap();

    let a = [-1.0f32, 2.0, -3.0, 4.0, -5.0, 6.0];
    let mut b = [0.0f32; 6];
    unsafe {
        op.execute(a.as_ptr(), None, b.as_mut_ptr());
    }
    assert_eq!(b, [0.0, 2.0, 0.0, 4.0, 0.0, 6.0]);
}

/// Scenario 4: Zero + GEMM + ReLU with the reduction split into an
/// R=P=T=3 outer sequential grid over an S=Q=U=5 primitive tile (total
/// 15x15x15), equivalent to `relu(A . B)` over plain 15x15 row-major
/// matrices.
#[test]
fn zero_gemm_relu_with_split_reduction() {
    const OUTER: i64 = 3;
    const INNER: i64 = 5;
    const TOTAL: i64 = OUTER * INNER;

    let dims = vec![
        dim(DimRole::M, ExecMode::Sequential, OUTER, INNER * TOTAL, 0, INNER * TOTAL),
        dim(DimRole::N, ExecMode::Sequential, OUTER, 0, INNER, INNER),
        dim(DimRole::K, ExecMode::Sequential, OUTER, INNER, INNER * TOTAL, 0),
        dim(DimRole::M, ExecMode::Primitive, INNER, TOTAL, 0, TOTAL),
        dim(DimRole::N, ExecMode::Primitive, INNER, 0, 1, 1),
        dim(DimRole::K, ExecMode::Primitive, INNER, 1, TOTAL, 0),
    ];
    let op = TensorOp::setup(DType::Fp32, PrimitiveType::Zero, PrimitiveType::Gemm, PrimitiveType::Relu, dims).unwrap();

    let total = TOTAL as usize;
    let mut seed = 0x9E3779B97F4A7C15u64;
    let mut next = || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        ((seed >> 40) as u32 as f32 / u32::MAX as f32) - 0.5
    };
    let a: Vec<f32> = (0..total * total).map(|_| next()).collect();
    let b: Vec<f32> = (0..total * total).map(|_| next()).collect();
    let mut c = vec![f32::NAN; total * total];

    unsafe {
        op.execute(a.as_ptr(), Some(b.as_ptr()), c.as_mut_ptr());
    }

    let mut expected = vec![0.0f32; total * total];
    for m in 0..total {
        for n in 0..total {
            let mut acc = 0.0f32;
            for k in 0..total {
                acc += a[m * total + k] * b[k * total + n];
            }
            expected[m * total + n] = acc.max(0.0);
        }
    }

    for i in 0..expected.len() {
        assert!((c[i] - expected[i]).abs() < 1e-4, "index {i}: got {} want {}", c[i], expected[i]);
    }
}

/// Scenario 5: einsum matmul `[2,0],[1,2]->[1,0]` with sizes {3,3,3}.
#[test]
fn einsum_matmul_scenario() {
    let mut root = parse_einsum_expression("[2,0],[1,2]->[1,0]").unwrap();
    let sizes = vec![3i64, 3, 3];
    root.lower(&sizes, DType::Fp32, 1, 64, 2).unwrap();

    // left ids [2,0]: row-major (id2 slowest, id0 fastest).
    let left: Vec<f32> = (0..9).map(|i| i as f32).collect();
    // right ids [1,2]: row-major (id1 slowest, id2 fastest).
    let right: Vec<f32> = (0..9).map(|i| (i + 100) as f32).collect();

    let mut inputs = HashMap::new();
    inputs.insert("2,0".to_string(), left.as_ptr());
    inputs.insert("1,2".to_string(), right.as_ptr());

    let out_ptr = root.execute(&inputs).unwrap();
    let out = unsafe { std::slice::from_raw_parts(out_ptr, 9) };

    // output ids [1,0]: row-major (id1 slowest, id0 fastest).
    for id1 in 0..3usize {
        for id0 in 0..3usize {
            let mut acc = 0.0f32;
            for id2 in 0..3usize {
                let l = left[id2 * 3 + id0];
                let r = right[id1 * 3 + id2];
                acc += l * r;
            }
            let got = out[id1 * 3 + id0];
            assert!((got - acc).abs() < 1e-4, "id1={id1} id0={id0}: got {got} want {acc}");
        }
    }
}

/// Scenario 6: einsum permutation `[3,2,1,0]->[3,1,2,0]` with sizes
/// {3,3,3,3}. The output at (t,r,u,s) equals the input at (t,u,r,s).
#[test]
fn einsum_permutation_scenario() {
    let mut root = parse_einsum_expression("[3,2,1,0]->[3,1,2,0]").unwrap();
    let sizes = vec![3i64, 3, 3, 3];
    root.lower(&sizes, DType::Fp32, 1, 64, 2).unwrap();

    // leaf ids [3,2,1,0], i.e. (t,u,r,s) row-major.
    let input: Vec<f32> = (0..81).map(|i| i as f32).collect();
    let mut inputs = HashMap::new();
    inputs.insert("3,2,1,0".to_string(), input.as_ptr());

    let out_ptr = root.execute(&inputs).unwrap();
    let out = unsafe { std::slice::from_raw_parts(out_ptr, 81) };

    for t in 0..3usize {
        for r in 0..3usize {
            for u in 0..3usize {
                for s in 0..3usize {
                    let want = input[((t * 3 + u) * 3 + r) * 3 + s];
                    let got = out[((t * 3 + r) * 3 + u) * 3 + s];
                    assert_eq!(got, want, "t={t} r={r} u={u} s={s}");
                }
            }
        }
    }
}
