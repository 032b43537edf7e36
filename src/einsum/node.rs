//! The einsum tree node (component H): a binary tree of
//! contraction/permutation operations over named dimension-id lists.
//!
//! Grounded on `examples/original_source/src/einsum/EinsumNode.h` for
//! the field layout (`output_dimension_ids`, `dimension_ids`,
//! `tensor_expression`, `leftChild`/`rightChild`, `computational_operations`)
//! and `examples/original_source/src/einsum/EinsumTree.cpp`'s
//! `initialize_einsum_nodes`/`execute` for the per-node IR derivation and
//! post-order execution walk. Node ownership is strict parent-owned
//! (§9): a node's children are `Box`-owned and dropped with it, while
//! leaves never own the memory behind their output pointer — they
//! alias a caller-supplied input (§3, §9), unlike the original C++
//! which copies into an owned leaf buffer; this crate follows the
//! distilled spec's aliasing contract instead (see `DESIGN.md`).

use std::cell::RefCell;
use std::collections::HashMap;

use thiserror::Error;

use crate::driver::{SetupError, TensorOp};
use crate::ir::dimension::{DType, DimRole, Dimension, ExecMode, PrimitiveType};
use crate::ir::optimizer;

/// Errors raised while parsing or lowering/executing an einsum
/// expression (§7: *bad-expression*).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("invalid character {0:?} in einsum expression")]
    InvalidChar(char),

    #[error("unbalanced brackets in einsum expression {0:?}")]
    UnbalancedBrackets(String),

    #[error("malformed dimension list {0:?}")]
    MalformedDims(String),

    #[error("empty einsum expression")]
    EmptyExpression,

    #[error("no input tensor supplied for leaf expression {0:?}")]
    MissingInput(String),

    #[error("dimension id {0} has no registered size")]
    UnknownDimensionId(i64),

    #[error("lowering node {0:?} failed: {1}")]
    Lowering(String, SetupError),
}

pub type ExprResult<T> = Result<T, ExprError>;

/// One node of the einsum tree. Leaves have no children and no
/// `operation`; internal nodes own an intermediate output buffer
/// (allocated lazily on first execute, reused — and re-zeroed — on
/// every subsequent one) and a compiled [`TensorOp`].
pub struct EinsumNode {
    /// The IDs of the dimensions in this node's output tensor, in the
    /// node's own (row-major) layout order.
    pub output_dimension_ids: Vec<i64>,

    /// The full textual sub-expression this node was parsed from;
    /// doubles as the lookup key into the caller's input-tensor map
    /// for leaf nodes.
    pub tensor_expression: String,

    pub left: Option<Box<EinsumNode>>,
    pub right: Option<Box<EinsumNode>>,

    /// Number of floating-point operations attributed to this node
    /// (2*size for every dimension, for GEMM/BRGEMM mains; 0 for a
    /// pure permutation), including its children's — a diagnostic
    /// counter from §4.5's supplement, not consumed by this crate's
    /// own execution path.
    pub computational_operations: f64,

    tensor_size: usize,
    operation: Option<TensorOp>,
    output: RefCell<Option<Vec<f32>>>,
}

impl EinsumNode {
    pub(super) fn new(
        output_dimension_ids: Vec<i64>,
        tensor_expression: String,
        left: Option<Box<EinsumNode>>,
        right: Option<Box<EinsumNode>>,
    ) -> Self {
        EinsumNode {
            output_dimension_ids,
            tensor_expression,
            left,
            right,
            computational_operations: 0.0,
            tensor_size: 0,
            operation: None,
            output: RefCell::new(None),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    fn child_count(&self) -> usize {
        self.left.is_some() as usize + self.right.is_some() as usize
    }

    /// Renders the tree as a parenthesized debug string, e.g.
    /// `([2,0] . [1,2] -> [1,0])`, useful for test assertions and
    /// troubleshooting (§4.5's supplement over the distilled spec).
    pub fn to_string_tree(&self) -> String {
        match (&self.left, &self.right) {
            (None, None) => format!("[{}]", self.tensor_expression),
            (Some(l), None) => format!("({} -> [{}])", l.to_string_tree(), self.tensor_expression),
            (Some(l), Some(r)) => {
                format!("({} . {} -> [{}])", l.to_string_tree(), r.to_string_tree(), self.tensor_expression)
            }
            (None, Some(_)) => unreachable!("a right-only node cannot be parsed"),
        }
    }

    /// Recursively derives this node's dimension-role IR (per §4.5),
    /// runs the optimizer, and compiles the resulting kernels into a
    /// [`TensorOp`] — for internal nodes only; leaves need no operation.
    pub fn lower(
        &mut self,
        dimension_sizes: &[i64],
        dtype: DType,
        thread_target: i64,
        max_kernel_size: i64,
        min_kernel_size: i64,
    ) -> ExprResult<()> {
        self.tensor_size = dim_product(&self.output_dimension_ids, dimension_sizes)?;

        if let Some(left) = &mut self.left {
            left.lower(dimension_sizes, dtype, thread_target, max_kernel_size, min_kernel_size)?;
        }
        if let Some(right) = &mut self.right {
            right.lower(dimension_sizes, dtype, thread_target, max_kernel_size, min_kernel_size)?;
        }

        if self.is_leaf() {
            return Ok(());
        }

        let mut dims = self.derive_dimensions(dimension_sizes)?;
        optimizer::optimize(&mut dims, thread_target, max_kernel_size, min_kernel_size);

        let prim_count = dims.iter().filter(|d| d.exec_mode == ExecMode::Primitive).count();
        let main = match (self.child_count(), prim_count) {
            (1, _) => PrimitiveType::Identity,
            (2, 3) => PrimitiveType::Gemm,
            (2, 4) => PrimitiveType::Brgemm,
            _ => PrimitiveType::Identity,
        };

        if matches!(main, PrimitiveType::Gemm | PrimitiveType::Brgemm) {
            let flops: f64 = 2.0 * dims.iter().map(|d| d.size as f64).product::<f64>();
            self.computational_operations = flops;
        }
        self.computational_operations += self.left.as_ref().map(|c| c.computational_operations).unwrap_or(0.0);
        self.computational_operations += self.right.as_ref().map(|c| c.computational_operations).unwrap_or(0.0);

        let op = TensorOp::setup(dtype, PrimitiveType::None, main, PrimitiveType::None, dims)
            .map_err(|e| ExprError::Lowering(self.tensor_expression.clone(), e))?;
        self.operation = Some(op);

        Ok(())
    }

    /// Gathers every dimension id used at this node (its own output ids
    /// first, then any unseen ids from the left child, then the
    /// right), assigns each a role, and computes per-tensor strides by
    /// treating each child's (and this node's own) dimension-id list as
    /// a row-major contiguous layout (§4.5).
    fn derive_dimensions(&self, dimension_sizes: &[i64]) -> ExprResult<Vec<Dimension>> {
        let left = self.left.as_ref().expect("derive_dimensions called on a leaf");
        let right = self.right.as_ref();

        let mut ids = self.output_dimension_ids.clone();
        for &id in &left.output_dimension_ids {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if let Some(right) = right {
            for &id in &right.output_dimension_ids {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        let mut dims = Vec::with_capacity(ids.len());
        for &id in &ids {
            let size = dim_size(id, dimension_sizes)?;

            let role = if right.is_none() {
                DimRole::C
            } else if self.output_dimension_ids.contains(&id) && left.output_dimension_ids.contains(&id) {
                DimRole::M
            } else if self.output_dimension_ids.contains(&id) && right.unwrap().output_dimension_ids.contains(&id) {
                DimRole::N
            } else {
                DimRole::K
            };

            let stride_in0 = row_major_stride(&left.output_dimension_ids, id, dimension_sizes)?;
            let stride_in1 = match right {
                Some(r) => row_major_stride(&r.output_dimension_ids, id, dimension_sizes)?,
                None => 0,
            };
            let stride_out = row_major_stride(&self.output_dimension_ids, id, dimension_sizes)?;

            dims.push(Dimension::new(role, ExecMode::Undefined, size, stride_in0, stride_in1, stride_out).map_err(|e| {
                ExprError::Lowering(self.tensor_expression.clone(), SetupError::ShapeMismatch(e.to_string()))
            })?);
        }

        Ok(dims)
    }

    /// Post-order execution: recursively computes both children, then
    /// (re)zeroes this node's own intermediate buffer and runs its
    /// compiled operation against the children's output pointers. Leaf
    /// nodes look themselves up in `inputs` by `tensor_expression` and
    /// alias the caller-supplied pointer directly — they never own or
    /// copy tensor data. Returns a pointer valid until this node (or its
    /// owning ancestor) is dropped or executed again.
    pub fn execute(&self, inputs: &HashMap<String, *const f32>) -> ExprResult<*const f32> {
        if self.is_leaf() {
            return inputs
                .get(&self.tensor_expression)
                .copied()
                .ok_or_else(|| ExprError::MissingInput(self.tensor_expression.clone()));
        }

        let in0 = self.left.as_ref().unwrap().execute(inputs)?;
        let in1 = match &self.right {
            Some(r) => Some(r.execute(inputs)?),
            None => None,
        };

        let out_ptr = {
            let mut guard = self.output.borrow_mut();
            match guard.as_mut() {
                Some(buf) => {
                    buf.iter_mut().for_each(|v| *v = 0.0);
                    buf.as_mut_ptr()
                }
                None => {
                    *guard = Some(vec![0.0f32; self.tensor_size]);
                    guard.as_mut().unwrap().as_mut_ptr()
                }
            }
        };

        let op = self.operation.as_ref().expect("internal node must be lowered before execute");
        unsafe {
            op.execute(in0, in1, out_ptr);
        }

        Ok(out_ptr as *const f32)
    }
}

fn dim_size(id: i64, dimension_sizes: &[i64]) -> ExprResult<i64> {
    dimension_sizes
        .get(usize::try_from(id).map_err(|_| ExprError::UnknownDimensionId(id))?)
        .copied()
        .ok_or(ExprError::UnknownDimensionId(id))
}

fn dim_product(ids: &[i64], dimension_sizes: &[i64]) -> ExprResult<usize> {
    let mut total: i64 = 1;
    for &id in ids {
        total *= dim_size(id, dimension_sizes)?;
    }
    Ok(total as usize)
}

/// The stride of dimension `id` within `ids`, treated as a row-major
/// contiguous layout (last-listed id varies fastest). `0` if `id` does
/// not appear in `ids` at all.
fn row_major_stride(ids: &[i64], id: i64, dimension_sizes: &[i64]) -> ExprResult<i64> {
    match ids.iter().position(|&x| x == id) {
        None => Ok(0),
        Some(pos) => {
            let mut stride = 1i64;
            for &later in &ids[pos + 1..] {
                stride *= dim_size(later, dimension_sizes)?;
            }
            Ok(stride)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(ids: &[i64]) -> Box<EinsumNode> {
        let expr = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        Box::new(EinsumNode::new(ids.to_vec(), expr, None, None))
    }

    #[test]
    fn row_major_stride_last_dim_is_contiguous() {
        let ids = vec![2, 0, 1];
        let sizes = vec![3, 4, 5];
        assert_eq!(row_major_stride(&ids, 1, &sizes).unwrap(), 1);
        assert_eq!(row_major_stride(&ids, 0, &sizes).unwrap(), 5);
        assert_eq!(row_major_stride(&ids, 2, &sizes).unwrap(), 20);
        assert_eq!(row_major_stride(&ids, 9, &sizes).unwrap(), 0);
    }

    #[test]
    fn matmul_node_derives_m_n_k_roles() {
        // [2,0],[1,2]->[1,0]: left has ids {2,0}, right {1,2}, output {1,0}.
        let left = leaf(&[2, 0]);
        let right = leaf(&[1, 2]);
        let node = EinsumNode::new(vec![1, 0], "1,0".into(), Some(left), Some(right));
        let sizes = vec![3, 3, 3];
        let dims = node.derive_dimensions(&sizes).unwrap();

        let roles: Vec<DimRole> = dims.iter().map(|d| d.role).collect();
        assert!(roles.contains(&DimRole::M));
        assert!(roles.contains(&DimRole::N));
        assert!(roles.contains(&DimRole::K));
    }

    #[test]
    fn unary_node_is_all_copy_role() {
        let left = leaf(&[3, 2, 1, 0]);
        let node = EinsumNode::new(vec![3, 1, 2, 0], "3,1,2,0".into(), Some(left), None);
        let sizes = vec![3, 3, 3, 3];
        let dims = node.derive_dimensions(&sizes).unwrap();
        assert!(dims.iter().all(|d| d.role == DimRole::C));
    }

    #[test]
    fn leaf_execute_returns_missing_input_error() {
        let node = leaf(&[0, 1]);
        let inputs = HashMap::new();
        assert!(matches!(node.execute(&inputs), Err(ExprError::MissingInput(_))));
    }
}
