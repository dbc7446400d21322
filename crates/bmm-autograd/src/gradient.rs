//! Gradient defs for BatchMatMul.
//!
//! For `Y = op(A) · op(B)` with output gradient `G`, each input gradient is
//! itself a BatchMatMul over two of `{A, B, G}`:
//!
//! | trans_a | trans_b | Y     | dA    | dB    |
//! |---------|---------|-------|-------|-------|
//! | 0       | 0       | A·B   | G·B'  | A'·G  |
//! | 0       | 1       | A·B'  | G·B   | G'·A  |
//! | 1       | 0       | A'·B  | B·G'  | A·G   |
//! | 1       | 1       | A'·B' | B'·G' | G'·A' |

use bmm_core::{Argument, ArgumentError, OperatorDef};
use bmm_ops::flags::{TRANS_A, TRANS_B, USE_SCRATCH};
use bmm_ops::{BATCH_MATMUL, OperandFlags};
use smallvec::SmallVec;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GradientError {
    #[error("gradient is not supported for BatchMatMul with broadcast=1")]
    UnsupportedConfiguration,

    #[error("forward op must have exactly {expected} {what}, got {got}")]
    Arity {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("no gradient registered for op type {0}")]
    NoGradient(String),

    #[error("gradient edge `{0}` is produced more than once")]
    DuplicateGradient(String),

    #[error(transparent)]
    Argument(#[from] ArgumentError),
}

/// Name of the gradient edge paired with `edge`.
pub fn grad_name(edge: &str) -> String {
    format!("{edge}_grad")
}

/// Edge names of a forward node and of the gradients flowing through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorEdgeNames {
    /// Forward inputs, `[A, B]`.
    pub inputs: SmallVec<[String; 2]>,
    pub output: String,
    /// `GO(0)`
    pub grad_output: String,
    /// `[GI(0), GI(1)]`
    pub grad_inputs: SmallVec<[String; 2]>,
}

impl OperatorEdgeNames {
    pub fn new(
        a: impl Into<String>,
        b: impl Into<String>,
        output: impl Into<String>,
        grad_output: impl Into<String>,
        grad_a: impl Into<String>,
        grad_b: impl Into<String>,
    ) -> Self {
        Self {
            inputs: SmallVec::from_iter([a.into(), b.into()]),
            output: output.into(),
            grad_output: grad_output.into(),
            grad_inputs: SmallVec::from_iter([grad_a.into(), grad_b.into()]),
        }
    }

    /// Edge names for `def`, with gradients named by [`grad_name`].
    ///
    /// Input arity is left for [`derive`] to check.
    pub fn for_forward(def: &OperatorDef) -> Result<Self, GradientError> {
        let [output] = def.outputs.as_slice() else {
            return Err(GradientError::Arity {
                what: "outputs",
                expected: BATCH_MATMUL.num_outputs(),
                got: def.outputs.len(),
            });
        };
        Ok(Self {
            inputs: def.inputs.clone(),
            output: output.clone(),
            grad_output: grad_name(output),
            grad_inputs: def.inputs.iter().map(|i| grad_name(i)).collect(),
        })
    }
}

/// One of the three tensors a gradient op can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    A,
    B,
    GradOutput,
}

/// A BatchMatMul term `op(lhs) · op(rhs)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Term {
    pub lhs: Operand,
    pub rhs: Operand,
    pub trans_a: bool,
    pub trans_b: bool,
}

impl Term {
    const fn new(lhs: Operand, rhs: Operand, trans_a: bool, trans_b: bool) -> Self {
        Self {
            lhs,
            rhs,
            trans_a,
            trans_b,
        }
    }
}

/// The four `{trans_a, trans_b}` combinations of a forward node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransposeCase {
    /// A·B
    Plain,
    /// A·B'
    TransB,
    /// A'·B
    TransA,
    /// A'·B'
    TransBoth,
}

impl TransposeCase {
    pub fn from_flags(flags: OperandFlags) -> Self {
        match (flags.trans_a, flags.trans_b) {
            (false, false) => TransposeCase::Plain,
            (false, true) => TransposeCase::TransB,
            (true, false) => TransposeCase::TransA,
            (true, true) => TransposeCase::TransBoth,
        }
    }

    /// The `(dA, dB)` terms for this case.
    pub fn plan(self) -> (Term, Term) {
        use Operand::{A, B, GradOutput as G};
        match self {
            TransposeCase::Plain => (Term::new(G, B, false, true), Term::new(A, G, true, false)),
            TransposeCase::TransB => (Term::new(G, B, false, false), Term::new(G, A, true, false)),
            TransposeCase::TransA => (Term::new(B, G, false, true), Term::new(A, G, false, false)),
            TransposeCase::TransBoth => (Term::new(B, G, true, true), Term::new(G, A, true, true)),
        }
    }
}

/// Build the two BatchMatMul defs computing `GI(0)` and `GI(1)`.
///
/// `scratch` is the forward node's `use_scratch` argument; when present it
/// is copied as-is onto both defs. No other forward argument is carried.
pub fn derive(
    flags: OperandFlags,
    edges: &OperatorEdgeNames,
    scratch: Option<&Argument>,
) -> Result<(OperatorDef, OperatorDef), GradientError> {
    let [a, b] = edges.inputs.as_slice() else {
        return Err(GradientError::Arity {
            what: "inputs",
            expected: BATCH_MATMUL.num_inputs(),
            got: edges.inputs.len(),
        });
    };
    let [grad_a, grad_b] = edges.grad_inputs.as_slice() else {
        return Err(GradientError::Arity {
            what: "input gradients",
            expected: BATCH_MATMUL.num_inputs(),
            got: edges.grad_inputs.len(),
        });
    };
    if flags.broadcast {
        return Err(GradientError::UnsupportedConfiguration);
    }

    let case = TransposeCase::from_flags(flags);
    let (da, db) = case.plan();
    debug!(
        ?case,
        a = %a,
        b = %b,
        grad_output = %edges.grad_output,
        "deriving BatchMatMul gradient"
    );

    let edge = |op: Operand| match op {
        Operand::A => a.as_str(),
        Operand::B => b.as_str(),
        Operand::GradOutput => edges.grad_output.as_str(),
    };
    let emit = |term: Term, output: &str| {
        let inputs = [edge(term.lhs), edge(term.rhs)];
        let mut def = OperatorDef::new(BATCH_MATMUL.op_type, inputs, [output]);
        if term.trans_a {
            def.args.insert(TRANS_A.into(), Argument::Int(1));
        }
        if term.trans_b {
            def.args.insert(TRANS_B.into(), Argument::Int(1));
        }
        if let Some(arg) = scratch {
            def.args.insert(USE_SCRATCH.into(), arg.clone());
        }
        def
    };

    Ok((emit(da, grad_a.as_str()), emit(db, grad_b.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges() -> OperatorEdgeNames {
        OperatorEdgeNames::new("A", "B", "Y", "GO", "GA", "GB")
    }

    fn flags(trans_a: bool, trans_b: bool) -> OperandFlags {
        OperandFlags::new(trans_a, trans_b, false)
    }

    fn inputs(def: &OperatorDef) -> Vec<&str> {
        def.inputs.iter().map(String::as_str).collect()
    }

    fn trans(def: &OperatorDef) -> (bool, bool) {
        (def.flag(TRANS_A).unwrap(), def.flag(TRANS_B).unwrap())
    }

    #[test]
    fn test_plain() {
        let (da, db) = derive(flags(false, false), &edges(), None).unwrap();
        assert_eq!(inputs(&da), ["GO", "B"]);
        assert_eq!(trans(&da), (false, true));
        assert_eq!(da.outputs.as_slice(), ["GA"]);
        assert_eq!(inputs(&db), ["A", "GO"]);
        assert_eq!(trans(&db), (true, false));
        assert_eq!(db.outputs.as_slice(), ["GB"]);
    }

    #[test]
    fn test_trans_b() {
        let (da, db) = derive(flags(false, true), &edges(), None).unwrap();
        assert_eq!(inputs(&da), ["GO", "B"]);
        assert_eq!(trans(&da), (false, false));
        assert_eq!(inputs(&db), ["GO", "A"]);
        assert_eq!(trans(&db), (true, false));
    }

    #[test]
    fn test_trans_a() {
        let (da, db) = derive(flags(true, false), &edges(), None).unwrap();
        assert_eq!(inputs(&da), ["B", "GO"]);
        assert_eq!(trans(&da), (false, true));
        assert_eq!(inputs(&db), ["A", "GO"]);
        assert_eq!(trans(&db), (false, false));
    }

    #[test]
    fn test_trans_both() {
        let (da, db) = derive(flags(true, true), &edges(), None).unwrap();
        assert_eq!(inputs(&da), ["B", "GO"]);
        assert_eq!(trans(&da), (true, true));
        assert_eq!(inputs(&db), ["GO", "A"]);
        assert_eq!(trans(&db), (true, true));
    }

    #[test]
    fn test_unset_flags_are_absent() {
        let (da, db) = derive(flags(false, true), &edges(), None).unwrap();
        assert!(da.args.is_empty());
        assert_eq!(db.args.len(), 1);
        assert_eq!(db.arg(TRANS_A), Some(&Argument::Int(1)));
    }

    #[test]
    fn test_broadcast_rejected() {
        for (ta, tb) in [(false, false), (false, true), (true, false), (true, true)] {
            let err = derive(OperandFlags::new(ta, tb, true), &edges(), None).unwrap_err();
            assert_eq!(err, GradientError::UnsupportedConfiguration);
        }
    }

    #[test]
    fn test_arity() {
        let mut e = edges();
        e.inputs.push("C".into());
        let err = derive(flags(false, false), &e, None).unwrap_err();
        assert_eq!(
            err,
            GradientError::Arity {
                what: "inputs",
                expected: 2,
                got: 3,
            }
        );
    }

    #[test]
    fn test_arity_checked_before_broadcast() {
        let mut e = edges();
        e.inputs.truncate(1);
        let err = derive(OperandFlags::new(false, false, true), &e, None).unwrap_err();
        assert!(matches!(err, GradientError::Arity { got: 1, .. }));
    }

    #[test]
    fn test_scratch_passthrough() {
        let scratch = Argument::Int(3);
        let (da, db) = derive(flags(true, false), &edges(), Some(&scratch)).unwrap();
        assert_eq!(da.arg(USE_SCRATCH), Some(&scratch));
        assert_eq!(db.arg(USE_SCRATCH), Some(&scratch));
    }

    #[test]
    fn test_no_scratch_when_absent() {
        let (da, db) = derive(flags(true, true), &edges(), None).unwrap();
        assert!(!da.has_arg(USE_SCRATCH));
        assert!(!db.has_arg(USE_SCRATCH));
    }

    #[test]
    fn test_for_forward_names() {
        let def = OperatorDef::new("BatchMatMul", ["x", "w"], ["y"]);
        let e = OperatorEdgeNames::for_forward(&def).unwrap();
        assert_eq!(e, OperatorEdgeNames::new("x", "w", "y", "y_grad", "x_grad", "w_grad"));
    }

    #[test]
    fn test_for_forward_needs_one_output() {
        let def = OperatorDef::new("BatchMatMul", ["x", "w"], Vec::<String>::new());
        assert!(matches!(
            OperatorEdgeNames::for_forward(&def),
            Err(GradientError::Arity { what: "outputs", .. })
        ));
    }
}
