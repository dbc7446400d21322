//! BatchMatMul schema, operand-flag decoding, and static shape inference.

pub mod flags;
pub mod propagate;
pub mod schema;
pub mod shape_inference;

pub use flags::OperandFlags;
pub use propagate::{PropagateError, ShapeRegistry};
pub use schema::{BATCH_MATMUL, OpSchema, SchemaError};
pub use shape_inference::{ShapeError, infer_batch_matmul, infer_batch_matmul_meta, infer_outputs};
