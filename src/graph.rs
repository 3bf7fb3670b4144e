//! Declarative description of a dataset pipeline.

use crate::datatypes::DataType;
use crate::shape::PartialShape;
use crate::tensor::TensorProto;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dataset operation together with its inputs and attributes.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GraphNode {
    pub op: String,
    pub inputs: Vec<NodeInput>,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
}

/// A positional input of a `GraphNode`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeInput {
    Dataset(Box<GraphNode>),
    Scalar(ScalarValue),
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarValue {
    Int(i64),
    Bool(bool),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Types(Vec<DataType>),
    Shapes(Vec<PartialShape>),
    Tensors(Vec<TensorProto>),
}

impl GraphNode {
    #[must_use]
    pub fn new(op: &str) -> Self {
        Self {
            op: op.to_string(),
            inputs: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn input(mut self, input: NodeInput) -> Self {
        self.inputs.push(input);
        self
    }

    #[must_use]
    pub fn attr(mut self, name: &str, value: AttrValue) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    /// Returns the scalar at input position `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no such input or it isn't a scalar.
    pub fn scalar_input(&self, index: usize) -> Result<ScalarValue, Error> {
        match self.inputs.get(index) {
            Some(NodeInput::Scalar(v)) => Ok(*v),
            Some(NodeInput::Dataset(_)) => Err(Error::InvalidArgument(format!(
                "input {} of {} is a dataset, not a scalar",
                index, self.op
            ))),
            None => Err(Error::InvalidArgument(format!(
                "{} has no input {}",
                self.op, index
            ))),
        }
    }

    /// Encodes this node as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a node produced by `to_json`.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid node.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}
