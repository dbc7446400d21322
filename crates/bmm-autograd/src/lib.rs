//! Symbolic reverse-mode differentiation over operator defs.
//!
//! Rather than computing gradients, this crate emits the operator defs that
//! compute them, so the backward pass can be built and shape-checked like
//! any other net.

pub mod gradient;
pub mod registry;

pub use gradient::{
    GradientError, Operand, OperatorEdgeNames, Term, TransposeCase, derive, grad_name,
};
pub use registry::{BatchMatMulGradient, GradientMaker, GradientRegistry, build_backward};
