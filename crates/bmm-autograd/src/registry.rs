//! Gradient makers keyed by op type, and backward-net construction.

use std::collections::{HashMap, HashSet};

use bmm_core::{NetDef, OperatorDef};
use bmm_ops::flags::USE_SCRATCH;
use bmm_ops::{BATCH_MATMUL, OperandFlags};
use tracing::debug;

use crate::gradient::{GradientError, OperatorEdgeNames, derive};

/// Produces the gradient defs for one forward def.
pub trait GradientMaker {
    fn gradient_defs(&self, def: &OperatorDef) -> Result<Vec<OperatorDef>, GradientError>;
}

/// Gradient maker for `BatchMatMul`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchMatMulGradient;

impl GradientMaker for BatchMatMulGradient {
    fn gradient_defs(&self, def: &OperatorDef) -> Result<Vec<OperatorDef>, GradientError> {
        if def.inputs.len() != BATCH_MATMUL.num_inputs() {
            return Err(GradientError::Arity {
                what: "inputs",
                expected: BATCH_MATMUL.num_inputs(),
                got: def.inputs.len(),
            });
        }
        let edges = OperatorEdgeNames::for_forward(def)?;
        let flags = OperandFlags::from_def(def)?;
        let (grad_a, grad_b) = derive(flags, &edges, def.arg(USE_SCRATCH))?;
        Ok(vec![grad_a, grad_b])
    }
}

type BoxedMaker = Box<dyn GradientMaker + Send + Sync>;

/// Maps op types to their gradient makers.
#[derive(Default)]
pub struct GradientRegistry {
    makers: HashMap<String, BoxedMaker>,
}

impl GradientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every op type this crate can differentiate.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(BATCH_MATMUL.op_type, BatchMatMulGradient);
        reg
    }

    pub fn register(
        &mut self,
        op_type: impl Into<String>,
        maker: impl GradientMaker + Send + Sync + 'static,
    ) {
        self.makers.insert(op_type.into(), Box::new(maker));
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.makers.contains_key(op_type)
    }

    pub fn gradient_defs(&self, def: &OperatorDef) -> Result<Vec<OperatorDef>, GradientError> {
        let maker = self
            .makers
            .get(&def.op_type)
            .ok_or_else(|| GradientError::NoGradient(def.op_type.clone()))?;
        maker.gradient_defs(def)
    }
}

impl std::fmt::Debug for GradientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ops: Vec<_> = self.makers.keys().collect();
        ops.sort();
        f.debug_struct("GradientRegistry").field("ops", &ops).finish()
    }
}

/// Build the backward net of `net`: gradient defs of each forward op, last
/// op first.
///
/// Gradient accumulation is not inserted, so a forward edge read more than
/// once is rejected with [`GradientError::DuplicateGradient`]. That covers
/// an edge feeding two ops, and also one op reading the same edge twice
/// (`BatchMatMul(x, x)`).
pub fn build_backward(net: &NetDef, registry: &GradientRegistry) -> Result<NetDef, GradientError> {
    let mut backward = NetDef::new(format!("{}_backward", net.name));
    let mut produced = HashSet::new();

    for op in net.ops.iter().rev() {
        for grad in registry.gradient_defs(op)? {
            for out in &grad.outputs {
                if !produced.insert(out.clone()) {
                    return Err(GradientError::DuplicateGradient(out.clone()));
                }
            }
            backward.push(grad);
        }
    }

    debug!(
        forward = net.len(),
        backward = backward.len(),
        "built backward net"
    );
    Ok(backward)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmm_core::Argument;

    #[test]
    fn test_maker_uses_forward_args() {
        let def = OperatorDef::new("BatchMatMul", ["x", "w"], ["y"])
            .with_arg("trans_b", 1i64)
            .with_arg("use_scratch", 1i64);
        let grads = BatchMatMulGradient.gradient_defs(&def).unwrap();
        assert_eq!(grads.len(), 2);
        assert_eq!(grads[0].inputs.as_slice(), ["y_grad", "w"]);
        assert_eq!(grads[0].outputs.as_slice(), ["x_grad"]);
        assert_eq!(grads[1].inputs.as_slice(), ["y_grad", "x"]);
        assert_eq!(grads[1].outputs.as_slice(), ["w_grad"]);
        assert_eq!(grads[1].arg("trans_a"), Some(&Argument::Int(1)));
        for g in &grads {
            assert_eq!(g.arg("use_scratch"), Some(&Argument::Int(1)));
        }
    }

    #[test]
    fn test_maker_does_not_copy_other_args() {
        let def = OperatorDef::new("BatchMatMul", ["x", "w"], ["y"]).with_arg("engine", "fast");
        let grads = BatchMatMulGradient.gradient_defs(&def).unwrap();
        assert!(grads.iter().all(|g| !g.has_arg("engine")));
    }

    #[test]
    fn test_maker_rejects_three_inputs() {
        let def = OperatorDef::new("BatchMatMul", ["x", "w", "z"], ["y"]);
        assert!(matches!(
            BatchMatMulGradient.gradient_defs(&def),
            Err(GradientError::Arity { what: "inputs", got: 3, .. })
        ));
    }

    #[test]
    fn test_maker_input_arity_before_flags() {
        let def =
            OperatorDef::new("BatchMatMul", ["x", "w", "z"], ["y"]).with_arg("trans_a", "yes");
        assert!(matches!(
            BatchMatMulGradient.gradient_defs(&def),
            Err(GradientError::Arity { what: "inputs", got: 3, .. })
        ));
    }

    #[test]
    fn test_registry_unknown_op() {
        let def = OperatorDef::new("Relu", ["x"], ["y"]);
        assert_eq!(
            GradientRegistry::with_defaults().gradient_defs(&def),
            Err(GradientError::NoGradient("Relu".into()))
        );
    }

    #[test]
    fn test_registry_debug_lists_ops() {
        let reg = GradientRegistry::with_defaults();
        assert!(reg.contains("BatchMatMul"));
        assert_eq!(format!("{reg:?}"), r#"GradientRegistry { ops: ["BatchMatMul"] }"#);
    }

    #[test]
    fn test_backward_reverse_order() {
        let mut net = NetDef::new("mlp");
        net.push(OperatorDef::new("BatchMatMul", ["x", "w1"], ["h"]));
        net.push(OperatorDef::new("BatchMatMul", ["h", "w2"], ["y"]));
        let bwd = build_backward(&net, &GradientRegistry::with_defaults()).unwrap();

        assert_eq!(bwd.name, "mlp_backward");
        let outputs: Vec<&str> = bwd.iter().map(|op| op.outputs[0].as_str()).collect();
        assert_eq!(outputs, ["h_grad", "w2_grad", "x_grad", "w1_grad"]);
    }

    #[test]
    fn test_backward_fan_out_rejected() {
        let mut net = NetDef::new("fan");
        net.push(OperatorDef::new("BatchMatMul", ["x", "w1"], ["h1"]));
        net.push(OperatorDef::new("BatchMatMul", ["x", "w2"], ["h2"]));
        assert_eq!(
            build_backward(&net, &GradientRegistry::with_defaults()),
            Err(GradientError::DuplicateGradient("x_grad".into()))
        );
    }

    #[test]
    fn test_backward_self_product_rejected() {
        let mut net = NetDef::new("gram");
        net.push(OperatorDef::new("BatchMatMul", ["x", "x"], ["g"]).with_arg("trans_b", 1i64));
        assert_eq!(
            build_backward(&net, &GradientRegistry::with_defaults()),
            Err(GradientError::DuplicateGradient("x_grad".into()))
        );
    }
}
