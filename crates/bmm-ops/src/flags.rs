//! Typed view of the BatchMatMul configuration arguments.

use bmm_core::graph::{self, ArgMap};
use bmm_core::{OperatorDef, Result};

pub const TRANS_A: &str = "trans_a";
pub const TRANS_B: &str = "trans_b";
pub const BROADCAST: &str = "broadcast";
pub const USE_SCRATCH: &str = "use_scratch";

/// Decoded `{trans_a, trans_b, broadcast}` flags of one BatchMatMul node.
///
/// Absent arguments decode to `false`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OperandFlags {
    pub trans_a: bool,
    pub trans_b: bool,
    pub broadcast: bool,
}

impl OperandFlags {
    pub const fn new(trans_a: bool, trans_b: bool, broadcast: bool) -> Self {
        Self {
            trans_a,
            trans_b,
            broadcast,
        }
    }

    /// Decode flags from an untyped argument map.
    pub fn from_args(args: &ArgMap) -> Result<Self> {
        Ok(Self {
            trans_a: graph::flag(args, TRANS_A)?,
            trans_b: graph::flag(args, TRANS_B)?,
            broadcast: graph::flag(args, BROADCAST)?,
        })
    }

    pub fn from_def(def: &OperatorDef) -> Result<Self> {
        Self::from_args(&def.args)
    }
}

impl std::fmt::Display for OperandFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "trans_a={} trans_b={} broadcast={}",
            self.trans_a as u8, self.trans_b as u8, self.broadcast as u8
        )
    }
}
