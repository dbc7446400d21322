//! Shape inference for BatchMatMul.
//!
//! Computes the output shape from the two operand shapes and the decoded
//! `OperandFlags`. The graph builder calls this while propagating shapes
//! through a net; nothing is executed.
//!
//! The contraction dimension is not compared between A and B. A mismatch
//! there is reported by the kernel at execution time.

use std::borrow::Cow;

use bmm_core::{ArgumentError, OperatorDef, Shape, TensorMeta};
use tracing::debug;

use crate::flags::OperandFlags;
use crate::schema::{BATCH_MATMUL, SchemaError};

/// Error returned when operand shapes cannot be multiplied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("operand {operand} has rank {rank}, need at least {min}")]
    RankTooSmall {
        operand: &'static str,
        rank: usize,
        min: usize,
    },

    #[error("operand {operand} has negative dimension in {shape}")]
    NegativeDim { operand: &'static str, shape: Shape },

    #[error("operand ranks differ without broadcast: A has {a}, B has {b}")]
    RankMismatch { a: usize, b: usize },

    #[error("expected {expected} input shapes, got {got}")]
    InputCount { expected: usize, got: usize },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Argument(#[from] ArgumentError),
}

/// Infer the output shape of `BatchMatMul(A, B)` under `flags`.
pub fn infer_batch_matmul(a: &Shape, b: &Shape, flags: OperandFlags) -> Result<Shape, ShapeError> {
    for (operand, shape) in [("A", a), ("B", b)] {
        if shape.dims().iter().any(|&d| d < 0) {
            return Err(ShapeError::NegativeDim {
                operand,
                shape: shape.clone(),
            });
        }
    }
    let out = if flags.broadcast {
        infer_broadcast(a, b, flags)?
    } else {
        infer_batched(a, b, flags)?
    };
    debug!(%a, %b, %flags, %out, "inferred BatchMatMul shape");
    Ok(out)
}

/// Like [`infer_batch_matmul`], carrying A's dtype onto the output.
pub fn infer_batch_matmul_meta(
    a: &TensorMeta,
    b: &TensorMeta,
    flags: OperandFlags,
) -> Result<TensorMeta, ShapeError> {
    Ok(TensorMeta {
        shape: infer_batch_matmul(&a.shape, &b.shape, flags)?,
        dtype: a.dtype,
    })
}

/// Node-level inference: checks `def` against the schema, decodes its
/// flags, and returns the single output's metadata.
pub fn infer_outputs(
    def: &OperatorDef,
    inputs: &[TensorMeta],
) -> Result<Vec<TensorMeta>, ShapeError> {
    BATCH_MATMUL.verify(def)?;
    let [a, b] = inputs else {
        return Err(ShapeError::InputCount {
            expected: BATCH_MATMUL.num_inputs(),
            got: inputs.len(),
        });
    };
    let flags = OperandFlags::from_def(def)?;
    Ok(vec![infer_batch_matmul_meta(a, b, flags)?])
}

/// Row count of a matrix whose trailing pair is `dims[n-2..]`.
fn rows(dims: &[i64], trans: bool) -> i64 {
    let n = dims.len();
    if trans { dims[n - 1] } else { dims[n - 2] }
}

fn cols(dims: &[i64], trans: bool) -> i64 {
    let n = dims.len();
    if trans { dims[n - 2] } else { dims[n - 1] }
}

/// Equal-rank path: batch dims come from A, trailing pair is `[M, N]`.
fn infer_batched(a: &Shape, b: &Shape, flags: OperandFlags) -> Result<Shape, ShapeError> {
    let ndim = a.ndim();
    if ndim < 2 {
        return Err(ShapeError::RankTooSmall {
            operand: "A",
            rank: ndim,
            min: 2,
        });
    }
    if b.ndim() != ndim {
        return Err(ShapeError::RankMismatch { a: ndim, b: b.ndim() });
    }

    let mut dims = Vec::with_capacity(ndim);
    dims.extend_from_slice(a.batch_dims());
    dims.push(rows(a.dims(), flags.trans_a));
    dims.push(cols(b.dims(), flags.trans_b));
    Ok(Shape::new(dims))
}

/// numpy.matmul-style path with vector promotion.
///
/// The batch prefix is copied wholesale from the higher-rank operand (A on
/// ties); batch dims are not broadcast elementwise.
fn infer_broadcast(a: &Shape, b: &Shape, flags: OperandFlags) -> Result<Shape, ShapeError> {
    for (operand, shape) in [("A", a), ("B", b)] {
        if shape.ndim() < 1 {
            return Err(ShapeError::RankTooSmall {
                operand,
                rank: shape.ndim(),
                min: 1,
            });
        }
    }

    // [K] -> [1, K] for A, [K] -> [K, 1] for B
    let a_vector = a.ndim() == 1;
    let b_vector = b.ndim() == 1;
    let a_dims: Cow<'_, [i64]> = if a_vector {
        Cow::Owned(vec![1, a.0[0]])
    } else {
        Cow::Borrowed(a.dims())
    };
    let b_dims: Cow<'_, [i64]> = if b_vector {
        Cow::Owned(vec![b.0[0], 1])
    } else {
        Cow::Borrowed(b.dims())
    };

    let m = rows(&a_dims, flags.trans_a);
    let n = cols(&b_dims, flags.trans_b);

    let longer = if a_dims.len() >= b_dims.len() {
        &a_dims
    } else {
        &b_dims
    };
    let mut dims = longer[..longer.len() - 2].to_vec();
    if !a_vector {
        dims.push(m);
    }
    if !b_vector {
        dims.push(n);
    }
    if a_vector && b_vector {
        dims.push(1);
    }
    Ok(Shape::new(dims))
}
