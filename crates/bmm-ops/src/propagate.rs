//! Net-wide static shape propagation.

use std::collections::HashMap;

use bmm_core::{NetDef, OperatorDef, TensorMeta};
use tracing::trace;

use crate::schema::BATCH_MATMUL;
use crate::shape_inference::{ShapeError, infer_outputs};

/// Per-op inference entry point: input metas in, output metas out.
pub type InferFn = fn(&OperatorDef, &[TensorMeta]) -> Result<Vec<TensorMeta>, ShapeError>;

#[derive(Debug, thiserror::Error)]
pub enum PropagateError {
    #[error("op #{index} ({op_type}) reads edge `{edge}` with no known shape")]
    UnknownEdge {
        index: usize,
        op_type: String,
        edge: String,
    },

    #[error("no shape inference registered for op type {0}")]
    UnsupportedOp(String),

    #[error("op #{index} inferred {got} outputs but declares {expected}")]
    OutputCount {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("op #{index} ({op_type}): {source}")]
    Shape {
        index: usize,
        op_type: String,
        #[source]
        source: ShapeError,
    },
}

/// Maps op types to their shape-inference function.
#[derive(Debug, Clone, Default)]
pub struct ShapeRegistry {
    fns: HashMap<String, InferFn>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every op type this crate knows about.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(BATCH_MATMUL.op_type, infer_outputs);
        reg
    }

    pub fn register(&mut self, op_type: impl Into<String>, f: InferFn) {
        self.fns.insert(op_type.into(), f);
    }

    pub fn get(&self, op_type: &str) -> Option<InferFn> {
        self.fns.get(op_type).copied()
    }

    /// Walk `net` in order, inferring every op's outputs from `metas` and
    /// inserting the results back into `metas`.
    ///
    /// `metas` must already hold the net's external inputs.
    pub fn propagate(
        &self,
        net: &NetDef,
        metas: &mut HashMap<String, TensorMeta>,
    ) -> Result<(), PropagateError> {
        for (index, op) in net.iter().enumerate() {
            let infer = self
                .get(&op.op_type)
                .ok_or_else(|| PropagateError::UnsupportedOp(op.op_type.clone()))?;

            let inputs = op
                .inputs
                .iter()
                .map(|edge| {
                    metas
                        .get(edge)
                        .cloned()
                        .ok_or_else(|| PropagateError::UnknownEdge {
                            index,
                            op_type: op.op_type.clone(),
                            edge: edge.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let outputs = infer(op, &inputs).map_err(|source| PropagateError::Shape {
                index,
                op_type: op.op_type.clone(),
                source,
            })?;
            if outputs.len() != op.outputs.len() {
                return Err(PropagateError::OutputCount {
                    index,
                    expected: op.outputs.len(),
                    got: outputs.len(),
                });
            }

            for (edge, meta) in op.outputs.iter().zip(outputs) {
                trace!(
                    index,
                    edge = %edge,
                    shape = %meta.shape,
                    dtype = %meta.dtype,
                    "propagated"
                );
                metas.insert(edge.clone(), meta);
            }
        }
        Ok(())
    }
}
