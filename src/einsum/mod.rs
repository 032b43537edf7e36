//! The einsum-tree layer (component H): parses a bracketed expression
//! into a binary tree of contraction/permutation nodes, derives each
//! node's IR, lowers it through the optimizer (component F) and the
//! tensor-operation driver (component G), and executes the tree in
//! post-order against caller-supplied input tensors.

pub mod node;
pub mod tree;

pub use node::{EinsumNode, ExprError, ExprResult};
pub use tree::parse_einsum_expression;
