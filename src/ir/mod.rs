//! Tensor-operation IR and optimizer (components E and F).

pub mod dimension;
pub mod optimizer;

pub use dimension::{validate, DType, DimRole, Dimension, ExecMode, IrError, IrResult, PrimitiveType};
