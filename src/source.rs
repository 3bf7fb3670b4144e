//! An in-memory dataset, mainly useful as the input of other datasets.

use crate::checkpoint::{full_name, StateReader, StateWriter};
use crate::context::IteratorContext;
use crate::dataset::{iterator_prefix, Cardinality, Dataset, DatasetIterator, Element};
use crate::datatypes::DataType;
use crate::graph::{AttrValue, GraphNode};
use crate::shape::PartialShape;
use crate::tensor::{Tensor, TensorProto};
use crate::Error;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

const DATASET_TYPE: &str = "FromElements";
const ELEMENTS_ATTR: &str = "elements";
const POSITION: &str = "i";

/// A dataset yielding a fixed list of elements.
#[derive(Debug)]
pub struct ElementsDataset {
    elements: Vec<Element>,
    dtypes: Vec<DataType>,
    shapes: Vec<PartialShape>,
}

impl ElementsDataset {
    /// Creates a dataset yielding `elements` in order.
    ///
    /// Slot types come from the first element. A slot's shape is known only
    /// where all elements agree on it.
    ///
    /// # Errors
    ///
    /// Returns an error if `elements` is empty, or the elements differ in
    /// arity, slot types, or slot ranks.
    pub fn new(elements: Vec<Element>) -> Result<Self, Error> {
        let first = elements.first().ok_or_else(|| {
            Error::InvalidArgument("cannot infer the structure of an empty dataset".to_string())
        })?;
        let dtypes: Vec<DataType> = first.iter().map(Tensor::dtype).collect();
        let mut shapes: Vec<PartialShape> = first.iter().map(|t| t.shape().into()).collect();
        for (i, element) in elements.iter().enumerate().skip(1) {
            if element.len() != dtypes.len() {
                return Err(Error::InvalidArgument(format!(
                    "element {} has {} slots, but element 0 has {}",
                    i,
                    element.len(),
                    dtypes.len()
                )));
            }
            for (slot, (value, shape)) in element.iter().zip(shapes.iter_mut()).enumerate() {
                if value.dtype() != dtypes[slot] || value.shape().rank() != shape.rank() {
                    return Err(Error::InvalidArgument(format!(
                        "slot {} of element {} is a {} tensor of shape {}, expected {} of shape {}",
                        slot,
                        i,
                        value.dtype(),
                        value.shape(),
                        dtypes[slot],
                        shape
                    )));
                }
                *shape = PartialShape::new(
                    shape
                        .dims()
                        .iter()
                        .zip(value.shape().dims())
                        .map(|(known, dim)| known.filter(|d| d == dim))
                        .collect(),
                );
            }
        }
        Ok(Self {
            elements,
            dtypes,
            shapes,
        })
    }
}

impl Dataset for ElementsDataset {
    fn output_dtypes(&self) -> &[DataType] {
        &self.dtypes
    }

    fn output_shapes(&self) -> &[PartialShape] {
        &self.shapes
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::Finite(self.elements.len() as u64)
    }

    fn make_iterator(self: Arc<Self>, prefix: &str) -> Box<dyn DatasetIterator> {
        Box::new(ElementsIterator {
            prefix: iterator_prefix(DATASET_TYPE, prefix),
            dataset: self,
            position: Mutex::new(0),
        })
    }

    fn as_graph_node(&self) -> Result<GraphNode, Error> {
        let tensors: Vec<TensorProto> = self
            .elements
            .iter()
            .flat_map(|element| element.iter().map(Tensor::to_proto))
            .collect();
        Ok(GraphNode::new(DATASET_TYPE)
            .attr(ELEMENTS_ATTR, AttrValue::Tensors(tensors))
            .attr("output_types", AttrValue::Types(self.dtypes.clone()))
            .attr("output_shapes", AttrValue::Shapes(self.shapes.clone())))
    }
}

impl ElementsDataset {
    /// Rebuilds a dataset from the node produced by `as_graph_node`.
    ///
    /// # Errors
    ///
    /// Returns an error if `node` doesn't describe an `ElementsDataset`.
    pub fn from_graph_node(node: &GraphNode) -> Result<Self, Error> {
        let arity = match node.attrs.get("output_types") {
            Some(AttrValue::Types(types)) if !types.is_empty() => types.len(),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "{} node lacks output_types",
                    node.op
                )))
            }
        };
        let tensors = match node.attrs.get(ELEMENTS_ATTR) {
            Some(AttrValue::Tensors(tensors)) => tensors,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "{} node lacks {}",
                    node.op, ELEMENTS_ATTR
                )))
            }
        };
        if tensors.len() % arity != 0 {
            return Err(Error::InvalidArgument(format!(
                "{} tensors cannot form elements of {} slots",
                tensors.len(),
                arity
            )));
        }
        let elements = tensors
            .chunks(arity)
            .map(|chunk| chunk.iter().map(Tensor::from_proto).collect())
            .collect::<Result<Vec<Element>, Error>>()?;
        Self::new(elements)
    }
}

struct ElementsIterator {
    prefix: String,
    dataset: Arc<ElementsDataset>,
    position: Mutex<usize>,
}

impl DatasetIterator for ElementsIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn initialize(&self, _ctx: &IteratorContext) -> Result<(), Error> {
        Ok(())
    }

    fn get_next(&self, ctx: &IteratorContext) -> Result<Option<Element>, Error> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut position = self.position.lock();
        let element = self.dataset.elements.get(*position).cloned();
        if element.is_some() {
            *position += 1;
        }
        Ok(element)
    }

    fn save(&self, writer: &mut dyn StateWriter) -> Result<(), Error> {
        let position = self.position.lock();
        writer.write_scalar(&full_name(&self.prefix, POSITION), Value::from(*position))
    }

    fn restore(&self, _ctx: &IteratorContext, reader: &dyn StateReader) -> Result<(), Error> {
        let key = full_name(&self.prefix, POSITION);
        let saved = reader
            .read_scalar(&key)?
            .as_u64()
            .and_then(|p| usize::try_from(p).ok())
            .ok_or_else(|| Error::DataLoss(format!("{} is not a valid position", key)))?;
        if saved > self.dataset.elements.len() {
            return Err(Error::DataLoss(format!(
                "position {} is past the end of {} elements",
                saved,
                self.dataset.elements.len()
            )));
        }
        *self.position.lock() = saved;
        Ok(())
    }
}
