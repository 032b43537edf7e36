//! Integration coverage for the einsum-tree layer (component H) beyond
//! the literal seed scenarios: parse-error surfaces, tree rendering,
//! and lowering/execution of a three-tensor chained contraction that
//! exercises an internal node feeding another internal node.

use tensorjit::{parse_einsum_expression, DType, ExprError};

#[test]
fn rejects_an_expression_with_no_arrow() {
    assert_eq!(parse_einsum_expression("[2,0],[1,2]"), Err(ExprError::MalformedDims("[2,0],[1,2]".to_string())));
}

#[test]
fn rejects_empty_dimension_list() {
    assert!(matches!(parse_einsum_expression("[],[1,2]->[1,0]"), Err(ExprError::MalformedDims(_))));
}

#[test]
fn rejects_non_numeric_dimension_ids() {
    assert_eq!(parse_einsum_expression("[x,0]->[x,0]"), Err(ExprError::InvalidChar('x')));
}

#[test]
fn renders_a_three_tensor_chain_as_a_nested_tree_string() {
    let expr = "[[2,0],[1,2]->[1,0]],[3,1]->[3,0]";
    let root = parse_einsum_expression(expr).unwrap();
    assert_eq!(root.to_string_tree(), "(([2,0] . [1,2] -> [1,0]) . [3,1] -> [3,0])");
}

/// Lowering alone (validating the derived IR, running the optimizer,
/// and JIT-compiling kernels) never executes generated code, so this
/// runs on any host regardless of its own architecture.
#[test]
fn lowers_a_three_tensor_chain_without_executing_it() {
    let mut root = parse_einsum_expression("[[2,0],[1,2]->[1,0]],[3,1]->[3,0]").unwrap();
    let sizes = vec![3i64, 3, 3, 3];
    root.lower(&sizes, DType::Fp32, 1, 64, 2).unwrap();
    assert!(!root.is_leaf());
    assert!(!root.left.as_ref().unwrap().is_leaf());
    assert!(root.left.as_ref().unwrap().left.as_ref().unwrap().is_leaf());
}

#[test]
fn lowering_an_unknown_dimension_id_fails() {
    let mut root = parse_einsum_expression("[2,0],[1,2]->[1,0]").unwrap();
    let sizes = vec![3i64, 3]; // id 2 has no registered size
    assert!(matches!(root.lower(&sizes, DType::Fp32, 1, 64, 2), Err(ExprError::UnknownDimensionId(2))));
}

#[cfg(target_arch = "aarch64")]
mod execution {
    use std::collections::HashMap;
    use tensorjit::DType;

    /// A chained contraction: `L = left012 . right012` (a 3x3 matmul,
    /// same shape as the literal seed scenario), then `Root = L . right2`
    /// (another matmul reducing over `L`'s own output axis). The root's
    /// intermediate buffer is produced and consumed entirely within
    /// `execute` without the caller ever seeing `L`'s output directly.
    #[test]
    fn chained_contraction_through_an_internal_node() {
        let mut root = tensorjit::parse_einsum_expression("[[2,0],[1,2]->[1,0]],[3,1]->[3,0]").unwrap();
        let sizes = vec![3i64, 3, 3, 3];
        root.lower(&sizes, DType::Fp32, 1, 64, 2).unwrap();

        let left02: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let right12: Vec<f32> = (0..9).map(|i| (i + 10) as f32).collect();
        let right31: Vec<f32> = (0..9).map(|i| (i + 20) as f32).collect();

        let mut inputs: HashMap<String, *const f32> = HashMap::new();
        inputs.insert("2,0".to_string(), left02.as_ptr());
        inputs.insert("1,2".to_string(), right12.as_ptr());
        inputs.insert("3,1".to_string(), right31.as_ptr());

        let out_ptr = root.execute(&inputs).unwrap();
        let out = unsafe { std::slice::from_raw_parts(out_ptr, 9) };

        // L[id1, id0] = sum_id2 left02[id2, id0] * right12[id1, id2]
        let mut l = [[0.0f32; 3]; 3];
        for id1 in 0..3usize {
            for id0 in 0..3usize {
                let mut acc = 0.0f32;
                for id2 in 0..3usize {
                    acc += left02[id2 * 3 + id0] * right12[id1 * 3 + id2];
                }
                l[id1][id0] = acc;
            }
        }

        // Root[id3, id0] = sum_id1 L[id1, id0] * right31[id3, id1]
        for id3 in 0..3usize {
            for id0 in 0..3usize {
                let mut acc = 0.0f32;
                for id1 in 0..3usize {
                    acc += l[id1][id0] * right31[id3 * 3 + id1];
                }
                let got = out[id3 * 3 + id0];
                assert!((got - acc).abs() < 1e-3, "id3={id3} id0={id0}: got {got} want {acc}");
            }
        }
    }

    /// Re-executing the same tree against different inputs must reflect
    /// only the new inputs — the internal node's reused buffer is
    /// re-zeroed, not accumulated across calls.
    #[test]
    fn re_executing_reuses_the_internal_buffer_without_accumulating() {
        let mut root = tensorjit::parse_einsum_expression("[2,0],[1,2]->[1,0]").unwrap();
        let sizes = vec![3i64, 3, 3];
        root.lower(&sizes, DType::Fp32, 1, 64, 2).unwrap();

        let left: Vec<f32> = vec![1.0; 9];
        let right: Vec<f32> = vec![1.0; 9];
        let mut inputs: HashMap<String, *const f32> = HashMap::new();
        inputs.insert("2,0".to_string(), left.as_ptr());
        inputs.insert("1,2".to_string(), right.as_ptr());

        let first = unsafe { std::slice::from_raw_parts(root.execute(&inputs).unwrap(), 9).to_vec() };
        let second = unsafe { std::slice::from_raw_parts(root.execute(&inputs).unwrap(), 9).to_vec() };
        assert_eq!(first, second);
    }
}
