//! Static operator schema for BatchMatMul.

use bmm_core::OperatorDef;

use crate::flags::{BROADCAST, TRANS_A, TRANS_B, USE_SCRATCH};

/// Error returned when a def does not fit its operator schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("expected op type {expected}, got {got}")]
    OpTypeMismatch { expected: &'static str, got: String },

    #[error("{op_type} takes {expected} inputs, got {got}")]
    InputArity {
        op_type: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{op_type} produces {expected} outputs, got {got}")]
    OutputArity {
        op_type: &'static str,
        expected: usize,
        got: usize,
    },
}

/// A named, documented slot (input, output, or argument).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub name: &'static str,
    pub doc: &'static str,
}

/// Arity and documentation of one operator type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSchema {
    pub op_type: &'static str,
    pub doc: &'static str,
    pub inputs: &'static [Slot],
    pub outputs: &'static [Slot],
    pub args: &'static [Slot],
}

impl OpSchema {
    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Check op type and input/output counts of `def`.
    pub fn verify(&self, def: &OperatorDef) -> Result<(), SchemaError> {
        if def.op_type != self.op_type {
            return Err(SchemaError::OpTypeMismatch {
                expected: self.op_type,
                got: def.op_type.clone(),
            });
        }
        if def.inputs.len() != self.num_inputs() {
            return Err(SchemaError::InputArity {
                op_type: self.op_type,
                expected: self.num_inputs(),
                got: def.inputs.len(),
            });
        }
        if def.outputs.len() != self.num_outputs() {
            return Err(SchemaError::OutputArity {
                op_type: self.op_type,
                expected: self.num_outputs(),
                got: def.outputs.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for OpSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.op_type)?;
        writeln!(f, "  {}", self.doc)?;
        for (title, slots) in [
            ("inputs", self.inputs),
            ("outputs", self.outputs),
            ("args", self.args),
        ] {
            writeln!(f, "{title}:")?;
            for slot in slots {
                writeln!(f, "  {:<12} {}", slot.name, slot.doc)?;
            }
        }
        Ok(())
    }
}

pub const BATCH_MATMUL: OpSchema = OpSchema {
    op_type: "BatchMatMul",
    doc: "Batched matrix multiplication Y[i] = A[i] * B[i]. A has shape \
          (dim0, dim1, ... M, K), B has shape (dim0, dim1, ... K, N) and Y has \
          shape (dim0, dim1, ... M, N). Requires rank(A) == rank(B) >= 2 unless \
          broadcast is set, in which case numpy.matmul vector promotion applies.",
    inputs: &[
        Slot {
            name: "A",
            doc: "tensor of shape (dim0, dim1, ... M, K)",
        },
        Slot {
            name: "B",
            doc: "tensor of shape (dim0, dim1, ... K, N)",
        },
    ],
    outputs: &[Slot {
        name: "Y",
        doc: "tensor of shape (dim0, dim1, ... M, N)",
    }],
    args: &[
        Slot {
            name: TRANS_A,
            doc: "1 to transpose the last two dimensions of A first",
        },
        Slot {
            name: TRANS_B,
            doc: "1 to transpose the last two dimensions of B first",
        },
        Slot {
            name: BROADCAST,
            doc: "1 to allow rank mismatch and vector operands; no gradient",
        },
        Slot {
            name: USE_SCRATCH,
            doc: "kernel hint to use a scratch buffer; carried onto gradient ops",
        },
    ],
};
