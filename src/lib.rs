//! A checkpointable batching operator for lazy, pull-based tensor datasets.

pub mod batch;
pub mod checkpoint;
pub mod context;
pub mod dataset;
pub mod datatypes;
mod error;
pub mod graph;
pub mod memory;
pub mod shape;
pub mod source;
pub mod tensor;

pub use batch::{BatchConfig, BatchDataset, BatchDatasetOp, BatchOp};
pub use checkpoint::{Checkpoint, StateReader, StateWriter};
pub use context::IteratorContext;
pub use dataset::{Cardinality, Dataset, DatasetIterator, Element};
pub use datatypes::{DataType, NativeType};
pub use error::Error;
pub use shape::{PartialShape, TensorShape};
pub use source::ElementsDataset;
pub use tensor::Tensor;
pub use tokio_util::sync::CancellationToken;
