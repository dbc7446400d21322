//! Shared types for BatchMatMul shape inference and gradient synthesis.
//!
//! `bmm-core` provides the shape/dtype vocabulary (`Shape`, `DType`,
//! `TensorMeta`) and the untyped operator IR (`OperatorDef`, `Argument`,
//! `NetDef`) that the graph builder hands to the ops and autograd crates.

pub mod graph;
pub mod types;

pub use graph::{ArgMap, Argument, NetDef, OperatorDef, TensorMeta};
pub use types::{DType, Shape};

pub type Result<T> = std::result::Result<T, ArgumentError>;

/// Error raised when reading a typed value out of an untyped argument map.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("argument `{name}` has kind {got}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        got: &'static str,
    },
}
