use crate::checkpoint::{StateReader, StateWriter};
use crate::context::IteratorContext;
use crate::datatypes::DataType;
use crate::graph::GraphNode;
use crate::shape::PartialShape;
use crate::tensor::Tensor;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One tuple of values produced by an iterator.
pub type Element = Vec<Tensor>;

/// Integer encoding of an infinite cardinality.
pub const INFINITE_CARDINALITY: i64 = -1;
/// Integer encoding of an unknown cardinality.
pub const UNKNOWN_CARDINALITY: i64 = -2;

/// The number of elements a dataset produces.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Cardinality {
    Finite(u64),
    Infinite,
    Unknown,
}

impl From<Cardinality> for i64 {
    fn from(c: Cardinality) -> Self {
        match c {
            Cardinality::Finite(n) => i64::try_from(n).unwrap_or(i64::MAX),
            Cardinality::Infinite => INFINITE_CARDINALITY,
            Cardinality::Unknown => UNKNOWN_CARDINALITY,
        }
    }
}

impl From<i64> for Cardinality {
    fn from(n: i64) -> Self {
        match n {
            INFINITE_CARDINALITY => Self::Infinite,
            n if n >= 0 => Self::Finite(n.unsigned_abs()),
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(n) => write!(f, "{}", n),
            Self::Infinite => write!(f, "infinite"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// An immutable, lazily evaluated sequence of elements.
pub trait Dataset: fmt::Debug + Send + Sync {
    /// The data type of each slot of the produced elements.
    fn output_dtypes(&self) -> &[DataType];

    /// The shape of each slot of the produced elements, as far as it is known.
    fn output_shapes(&self) -> &[PartialShape];

    fn cardinality(&self) -> Cardinality;

    /// Creates an uninitialized iterator whose checkpoint keys are derived from
    /// `prefix`.
    fn make_iterator(self: Arc<Self>, prefix: &str) -> Box<dyn DatasetIterator>;

    /// Describes how to rebuild this dataset.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset or one of its inputs cannot be described.
    fn as_graph_node(&self) -> Result<GraphNode, Error>;
}

/// A stateful cursor over a `Dataset`.
///
/// Methods take `&self`; implementations serialize access internally.
pub trait DatasetIterator: Send + Sync {
    /// The name this iterator uses for its checkpoint keys.
    fn prefix(&self) -> &str;

    /// Prepares the iterator for `get_next`.
    ///
    /// # Errors
    ///
    /// Returns an error if the iterator or one of its inputs cannot be opened.
    fn initialize(&self, ctx: &IteratorContext) -> Result<(), Error>;

    /// Returns the next element, or `None` at the end of the sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the element cannot be produced. No element is
    /// consumed from the caller's point of view.
    fn get_next(&self, ctx: &IteratorContext) -> Result<Option<Element>, Error>;

    /// Writes the iterator's position to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    fn save(&self, writer: &mut dyn StateWriter) -> Result<(), Error>;

    /// Moves the iterator to the position recorded in `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is missing or malformed.
    fn restore(&self, ctx: &IteratorContext, reader: &dyn StateReader) -> Result<(), Error>;
}

/// Creates an iterator over `dataset` and initializes it.
///
/// # Errors
///
/// Returns an error if the iterator cannot be initialized.
pub fn make_initialized_iterator(
    dataset: Arc<dyn Dataset>,
    ctx: &IteratorContext,
    prefix: &str,
) -> Result<Box<dyn DatasetIterator>, Error> {
    let iter = dataset.make_iterator(prefix);
    iter.initialize(ctx)?;
    Ok(iter)
}

/// Returns the prefix for an iterator of the given kind nested under `prefix`.
#[must_use]
pub fn iterator_prefix(kind: &str, prefix: &str) -> String {
    format!("{}::{}", prefix, kind)
}
