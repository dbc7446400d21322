//! Operator-definition IR.
//!
//! A graph is a flat list of `OperatorDef`s wired together by edge names.
//! Each def carries an untyped `ArgMap`; consumers decode the arguments they
//! care about into typed structs once, at the boundary.

use crate::types::{DType, Shape};
use crate::{ArgumentError, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Metadata about a tensor (known before materialization).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorMeta {
    pub shape: Shape,
    pub dtype: DType,
}

impl TensorMeta {
    pub fn new(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
        }
    }
}

/// A single operator argument value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Argument {
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

impl Argument {
    /// Short name of the value kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Argument::Int(_) => "int",
            Argument::Float(_) => "float",
            Argument::Str(_) => "string",
            Argument::Ints(_) => "ints",
            Argument::Floats(_) => "floats",
            Argument::Strings(_) => "strings",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Argument::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Int(v)
    }
}

impl From<bool> for Argument {
    fn from(v: bool) -> Self {
        Argument::Int(v as i64)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Float(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::Str(v.to_string())
    }
}

/// Named arguments of an operator. Ordered so serialization is stable.
pub type ArgMap = BTreeMap<String, Argument>;

/// Read a single integer argument, falling back to `default` when absent.
pub fn single_int(args: &ArgMap, name: &str, default: i64) -> Result<i64> {
    match args.get(name) {
        None => Ok(default),
        Some(arg) => arg.as_int().ok_or_else(|| ArgumentError::TypeMismatch {
            name: name.to_string(),
            expected: "int",
            got: arg.kind(),
        }),
    }
}

/// Read an integer argument as a flag: absent means `false`, any non-zero
/// value means `true`.
pub fn flag(args: &ArgMap, name: &str) -> Result<bool> {
    single_int(args, name, 0).map(|v| v != 0)
}

/// A node description: operator type, wiring, and arguments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorDef {
    pub op_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub inputs: SmallVec<[String; 2]>,
    pub outputs: SmallVec<[String; 1]>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: ArgMap,
}

impl OperatorDef {
    pub fn new<I, O>(op_type: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            op_type: op_type.into(),
            name: String::new(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            args: ArgMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Argument>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn arg(&self, name: &str) -> Option<&Argument> {
        self.args.get(name)
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn flag(&self, name: &str) -> Result<bool> {
        flag(&self.args, name)
    }
}

/// An ordered list of operators.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetDef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub ops: Vec<OperatorDef>,
}

impl NetDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
        }
    }

    pub fn push(&mut self, op: OperatorDef) {
        self.ops.push(op);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OperatorDef> {
        self.ops.iter()
    }

    /// Number of operators.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the net is empty.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl<'a> IntoIterator for &'a NetDef {
    type Item = &'a OperatorDef;
    type IntoIter = std::slice::Iter<'a, OperatorDef>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}
