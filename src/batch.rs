//! Groups consecutive elements of a dataset into batches.

mod assemble;

use crate::checkpoint::{full_name, StateReader, StateWriter};
use crate::context::IteratorContext;
use crate::dataset::{
    iterator_prefix, make_initialized_iterator, Cardinality, Dataset, DatasetIterator, Element,
};
use crate::datatypes::DataType;
use crate::graph::{AttrValue, GraphNode, NodeInput, ScalarValue};
use crate::shape::PartialShape;
use crate::Error;
use num_traits::ToPrimitive;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use strum_macros::{Display, EnumString};
use tracing::{debug, trace};

const INPUT_IMPL_EMPTY: &str = "input_impl_empty";
const PARALLEL_COPY: &str = "parallel_copy";

/// The operation kinds that build a `BatchDataset`.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
pub enum BatchOp {
    /// Always keeps a trailing partial batch.
    BatchDataset,
    /// Also accepts `drop_remainder`.
    BatchDatasetV2,
}

impl BatchOp {
    fn iterator_kind(self) -> &'static str {
        match self {
            Self::BatchDataset => "Batch",
            Self::BatchDatasetV2 => "BatchV2",
        }
    }
}

/// Arguments of a batch operation, as found in a pipeline definition.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BatchConfig {
    pub batch_size: i64,
    #[serde(default)]
    pub drop_remainder: bool,
    #[serde(default)]
    pub parallel_copy: bool,
}

/// A dataset whose elements are batches of consecutive elements of its input.
#[derive(Debug)]
pub struct BatchDataset {
    op: BatchOp,
    batch_size: usize,
    drop_remainder: bool,
    parallel_copy: bool,
    input: Arc<dyn Dataset>,
    output_shapes: Vec<PartialShape>,
}

impl BatchDataset {
    /// Creates a `BatchDatasetV2` over `input`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `batch_size` is not positive.
    pub fn new(
        input: Arc<dyn Dataset>,
        batch_size: i64,
        drop_remainder: bool,
        parallel_copy: bool,
    ) -> Result<Self, Error> {
        Self::with_op(
            BatchOp::BatchDatasetV2,
            input,
            batch_size,
            drop_remainder,
            parallel_copy,
        )
    }

    fn with_op(
        op: BatchOp,
        input: Arc<dyn Dataset>,
        batch_size: i64,
        drop_remainder: bool,
        parallel_copy: bool,
    ) -> Result<Self, Error> {
        if batch_size <= 0 {
            return Err(Error::InvalidArgument(
                "Batch size must be greater than zero.".to_string(),
            ));
        }
        let batch_size = batch_size.to_usize().ok_or_else(|| {
            Error::InvalidArgument(format!("batch size {} is too large", batch_size))
        })?;

        // The outer dimension is only known when partial batches are dropped.
        let outer = PartialShape::new(vec![if drop_remainder {
            Some(batch_size)
        } else {
            None
        }]);
        let output_shapes = input
            .output_shapes()
            .iter()
            .map(|shape| outer.concatenate(shape))
            .collect();
        Ok(Self {
            op,
            batch_size,
            drop_remainder,
            parallel_copy,
            input,
            output_shapes,
        })
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn drop_remainder(&self) -> bool {
        self.drop_remainder
    }

    #[must_use]
    pub fn parallel_copy(&self) -> bool {
        self.parallel_copy
    }

    #[must_use]
    pub fn op(&self) -> BatchOp {
        self.op
    }

    #[must_use]
    pub fn input(&self) -> &Arc<dyn Dataset> {
        &self.input
    }
}

impl fmt::Display for BatchDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.op {
            BatchOp::BatchDataset => "BatchDatasetOp",
            BatchOp::BatchDatasetV2 => "BatchDatasetV2Op",
        };
        write!(f, "{}({})::Dataset", name, self.batch_size)
    }
}

impl Dataset for BatchDataset {
    fn output_dtypes(&self) -> &[DataType] {
        self.input.output_dtypes()
    }

    fn output_shapes(&self) -> &[PartialShape] {
        &self.output_shapes
    }

    fn cardinality(&self) -> Cardinality {
        match self.input.cardinality() {
            Cardinality::Finite(n) => {
                let batch_size = self.batch_size as u64;
                let remainder = n % batch_size != 0 && !self.drop_remainder;
                Cardinality::Finite(n / batch_size + u64::from(remainder))
            }
            other => other,
        }
    }

    fn make_iterator(self: Arc<Self>, prefix: &str) -> Box<dyn DatasetIterator> {
        Box::new(BatchIterator {
            prefix: iterator_prefix(self.op.iterator_kind(), prefix),
            dataset: self,
            input: Mutex::new(InputState::Uninitialized),
        })
    }

    fn as_graph_node(&self) -> Result<GraphNode, Error> {
        let input = self.input.as_graph_node()?;
        let batch_size = i64::try_from(self.batch_size).map_err(|_| {
            Error::InvalidArgument(format!("batch size {} is too large", self.batch_size))
        })?;
        Ok(GraphNode::new(&self.op.to_string())
            .input(NodeInput::Dataset(Box::new(input)))
            .input(NodeInput::Scalar(ScalarValue::Int(batch_size)))
            .input(NodeInput::Scalar(ScalarValue::Bool(self.drop_remainder)))
            .attr(PARALLEL_COPY, AttrValue::Bool(self.parallel_copy))
            .attr(
                "output_types",
                AttrValue::Types(self.output_dtypes().to_vec()),
            )
            .attr("output_shapes", AttrValue::Shapes(self.output_shapes.clone())))
    }
}

/// Builds `BatchDataset`s from operation arguments.
#[derive(Clone, Copy, Debug)]
pub struct BatchDatasetOp {
    op: BatchOp,
}

impl BatchDatasetOp {
    /// Returns the builder for the operation named `op_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if `op_name` is not a batch operation.
    pub fn new(op_name: &str) -> Result<Self, Error> {
        let op = BatchOp::from_str(op_name)
            .map_err(|_| Error::InvalidArgument(format!("unknown batch operation {}", op_name)))?;
        Ok(Self { op })
    }

    /// Creates a dataset batching `input` as described by `config`.
    ///
    /// `drop_remainder` is ignored by `BatchDataset`, which predates it.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the batch size is not positive.
    pub fn make_dataset(
        &self,
        input: Arc<dyn Dataset>,
        config: &BatchConfig,
    ) -> Result<BatchDataset, Error> {
        let drop_remainder = match self.op {
            BatchOp::BatchDataset => {
                if config.drop_remainder {
                    debug!("{} does not support drop_remainder; ignoring it", self.op);
                }
                false
            }
            BatchOp::BatchDatasetV2 => config.drop_remainder,
        };
        BatchDataset::with_op(
            self.op,
            input,
            config.batch_size,
            drop_remainder,
            config.parallel_copy,
        )
    }

    /// Rebuilds a dataset from the node produced by `BatchDataset::as_graph_node`,
    /// given its already rebuilt input.
    ///
    /// # Errors
    ///
    /// Returns an error if `node` doesn't describe a batch operation.
    pub fn from_graph_node(node: &GraphNode, input: Arc<dyn Dataset>) -> Result<BatchDataset, Error> {
        let builder = Self::new(&node.op)?;
        let batch_size = match node.scalar_input(1)? {
            ScalarValue::Int(v) => v,
            ScalarValue::Bool(_) => {
                return Err(Error::InvalidArgument(
                    "batch_size must be an integer".to_string(),
                ))
            }
        };
        let drop_remainder = match builder.op {
            BatchOp::BatchDataset => false,
            BatchOp::BatchDatasetV2 => match node.scalar_input(2)? {
                ScalarValue::Bool(v) => v,
                ScalarValue::Int(_) => {
                    return Err(Error::InvalidArgument(
                        "drop_remainder must be a boolean".to_string(),
                    ))
                }
            },
        };
        let parallel_copy = match node.attrs.get(PARALLEL_COPY) {
            Some(AttrValue::Bool(v)) => *v,
            None => false,
            Some(_) => {
                return Err(Error::InvalidArgument(
                    "parallel_copy must be a boolean".to_string(),
                ))
            }
        };
        builder.make_dataset(
            input,
            &BatchConfig {
                batch_size,
                drop_remainder,
                parallel_copy,
            },
        )
    }
}

enum InputState {
    Uninitialized,
    Active(Box<dyn DatasetIterator>),
    Exhausted,
}

struct BatchIterator {
    prefix: String,
    dataset: Arc<BatchDataset>,
    input: Mutex<InputState>,
}

impl BatchIterator {
    fn open_input(&self, ctx: &IteratorContext) -> Result<Box<dyn DatasetIterator>, Error> {
        make_initialized_iterator(Arc::clone(&self.dataset.input), ctx, &self.prefix)
    }

    /// Pulls up to `batch_size` elements from the input. Returns `None` if the
    /// input was already exhausted.
    fn pull(&self, ctx: &IteratorContext) -> Result<Option<Vec<Element>>, Error> {
        let mut state = self.input.lock();
        if let InputState::Uninitialized = *state {
            *state = InputState::Active(self.open_input(ctx)?);
        }
        let input = match &*state {
            InputState::Active(input) => input,
            _ => return Ok(None),
        };

        let batch_size = self.dataset.batch_size;
        let mut elements = Vec::with_capacity(batch_size);
        let mut end_of_sequence = false;
        while elements.len() < batch_size {
            match input.get_next(ctx)? {
                Some(element) => elements.push(element),
                None => {
                    end_of_sequence = true;
                    break;
                }
            }
        }
        if end_of_sequence {
            debug!(prefix = %self.prefix, "input exhausted");
            *state = InputState::Exhausted;
        }
        Ok(Some(elements))
    }
}

impl DatasetIterator for BatchIterator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn initialize(&self, ctx: &IteratorContext) -> Result<(), Error> {
        let mut state = self.input.lock();
        if let InputState::Uninitialized = *state {
            *state = InputState::Active(self.open_input(ctx)?);
        }
        Ok(())
    }

    fn get_next(&self, ctx: &IteratorContext) -> Result<Option<Element>, Error> {
        let elements = match self.pull(ctx)? {
            Some(elements) if !elements.is_empty() => elements,
            _ => return Ok(None),
        };

        if self.dataset.drop_remainder && elements.len() < self.dataset.batch_size {
            debug!(
                prefix = %self.prefix,
                dropped = elements.len(),
                "dropping partial batch"
            );
            return Ok(None);
        }

        let batch_len = elements.len();
        let batch = assemble::assemble(ctx, elements, self.dataset.parallel_copy)?;
        debug_assert!(batch
            .iter()
            .zip(self.dataset.output_shapes())
            .all(|(component, shape)| shape.is_compatible_with(component.shape())));
        trace!(prefix = %self.prefix, batch_len, "produced batch");
        Ok(Some(batch))
    }

    fn save(&self, writer: &mut dyn StateWriter) -> Result<(), Error> {
        let mut state = self.input.lock();
        if let InputState::Uninitialized = *state {
            // Opening the input pulls nothing, so any context will do.
            *state = InputState::Active(self.open_input(&IteratorContext::default())?);
        }
        match &*state {
            InputState::Active(input) => input.save(writer),
            InputState::Exhausted => writer.write_scalar(
                &full_name(&self.prefix, INPUT_IMPL_EMPTY),
                Value::String(String::new()),
            ),
            InputState::Uninitialized => Err(Error::FailedPrecondition(format!(
                "{} has no input to save",
                self.prefix
            ))),
        }
    }

    fn restore(&self, ctx: &IteratorContext, reader: &dyn StateReader) -> Result<(), Error> {
        let mut state = self.input.lock();
        if reader.contains(&full_name(&self.prefix, INPUT_IMPL_EMPTY)) {
            debug!(prefix = %self.prefix, "restored exhausted iterator");
            *state = InputState::Exhausted;
            return Ok(());
        }
        match &mut *state {
            InputState::Active(input) => input.restore(ctx, reader)?,
            other => {
                let input = self.open_input(ctx)?;
                input.restore(ctx, reader)?;
                *other = InputState::Active(input);
            }
        }
        debug!(prefix = %self.prefix, "restored iterator");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::memory::BoundedAllocator;
    use crate::source::ElementsDataset;
    use crate::tensor::Tensor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn range(n: i64) -> Arc<dyn Dataset> {
        let elements = (0..n).map(|i| vec![Tensor::scalar(i).unwrap()]).collect();
        Arc::new(ElementsDataset::new(elements).unwrap())
    }

    fn batch(input: Arc<dyn Dataset>, size: i64, drop_remainder: bool) -> Arc<dyn Dataset> {
        Arc::new(BatchDataset::new(input, size, drop_remainder, false).unwrap())
    }

    fn collect(iter: &dyn DatasetIterator, ctx: &IteratorContext) -> Vec<Vec<i64>> {
        let mut out = Vec::new();
        while let Some(batch) = iter.get_next(ctx).unwrap() {
            out.push(batch[0].to_vec::<i64>().unwrap());
        }
        out
    }

    /// Yields the same scalar forever.
    #[derive(Debug)]
    struct Forever {
        dtypes: Vec<DataType>,
        shapes: Vec<PartialShape>,
    }

    impl Forever {
        fn new() -> Self {
            Self {
                dtypes: vec![DataType::Int64],
                shapes: vec![PartialShape::default()],
            }
        }
    }

    struct ForeverIterator {
        pulls: Arc<AtomicUsize>,
        fail_after: Option<usize>,
    }

    impl Dataset for Forever {
        fn output_dtypes(&self) -> &[DataType] {
            &self.dtypes
        }

        fn output_shapes(&self) -> &[PartialShape] {
            &self.shapes
        }

        fn cardinality(&self) -> Cardinality {
            Cardinality::Infinite
        }

        fn make_iterator(self: Arc<Self>, _prefix: &str) -> Box<dyn DatasetIterator> {
            Box::new(ForeverIterator {
                pulls: Arc::new(AtomicUsize::new(0)),
                fail_after: None,
            })
        }

        fn as_graph_node(&self) -> Result<GraphNode, Error> {
            Ok(GraphNode::new("Forever"))
        }
    }

    impl DatasetIterator for ForeverIterator {
        fn prefix(&self) -> &str {
            "Forever"
        }

        fn initialize(&self, _ctx: &IteratorContext) -> Result<(), Error> {
            Ok(())
        }

        fn get_next(&self, _ctx: &IteratorContext) -> Result<Option<Element>, Error> {
            let pulled = self.pulls.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.map_or(false, |n| pulled >= n) {
                return Err(Error::DataLoss("corrupted record".to_string()));
            }
            Ok(Some(vec![Tensor::scalar(7_i64)?]))
        }

        fn save(&self, _writer: &mut dyn StateWriter) -> Result<(), Error> {
            Ok(())
        }

        fn restore(&self, _ctx: &IteratorContext, _reader: &dyn StateReader) -> Result<(), Error> {
            Ok(())
        }
    }

    /// Fails once its pulls reach `fail_after`, counting every pull.
    #[derive(Debug)]
    struct Flaky {
        inner: Forever,
        pulls: Arc<AtomicUsize>,
        fail_after: usize,
    }

    impl Dataset for Flaky {
        fn output_dtypes(&self) -> &[DataType] {
            self.inner.output_dtypes()
        }

        fn output_shapes(&self) -> &[PartialShape] {
            self.inner.output_shapes()
        }

        fn cardinality(&self) -> Cardinality {
            Cardinality::Unknown
        }

        fn make_iterator(self: Arc<Self>, _prefix: &str) -> Box<dyn DatasetIterator> {
            Box::new(ForeverIterator {
                pulls: Arc::clone(&self.pulls),
                fail_after: Some(self.fail_after),
            })
        }

        fn as_graph_node(&self) -> Result<GraphNode, Error> {
            Err(Error::FailedPrecondition("not serializable".to_string()))
        }
    }

    #[test]
    fn zero_batch_size() {
        for size in [0, -3] {
            let err = BatchDataset::new(range(3), size, false, false).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn cardinality() {
        assert_eq!(batch(range(10), 3, false).cardinality(), Cardinality::Finite(4));
        assert_eq!(batch(range(10), 3, true).cardinality(), Cardinality::Finite(3));
        assert_eq!(batch(range(9), 3, false).cardinality(), Cardinality::Finite(3));
        assert_eq!(batch(range(2), 3, true).cardinality(), Cardinality::Finite(0));
        let forever: Arc<dyn Dataset> = Arc::new(Forever::new());
        assert_eq!(
            batch(forever.clone(), 3, false).cardinality(),
            Cardinality::Infinite
        );
        assert_eq!(batch(forever, 3, true).cardinality(), Cardinality::Infinite);
    }

    #[test]
    fn output_shapes_and_types() {
        let elements = vec![
            vec![Tensor::from_slice([2], &[1.0_f64, 2.0]).unwrap()],
            vec![Tensor::from_slice([2], &[3.0_f64, 4.0]).unwrap()],
        ];
        let input: Arc<dyn Dataset> = Arc::new(ElementsDataset::new(elements).unwrap());
        let kept = batch(input.clone(), 2, false);
        assert_eq!(kept.output_shapes()[0].to_string(), "[?,2]");
        assert_eq!(kept.output_dtypes(), &[DataType::Float64]);
        let dropped = batch(input, 2, true);
        assert_eq!(dropped.output_shapes()[0].to_string(), "[2,2]");
    }

    #[test]
    fn keeps_partial_batch() {
        let ctx = IteratorContext::new();
        let iter = batch(range(10), 3, false).make_iterator("Iterator");
        assert_eq!(
            collect(iter.as_ref(), &ctx),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8], vec![9]]
        );
    }

    #[test]
    fn drops_partial_batch() {
        let ctx = IteratorContext::new();
        let iter = batch(range(7), 3, true).make_iterator("Iterator");
        iter.initialize(&ctx).unwrap();
        assert_eq!(
            collect(iter.as_ref(), &ctx),
            vec![vec![0, 1, 2], vec![3, 4, 5]]
        );
    }

    #[test]
    fn exact_multiple() {
        let ctx = IteratorContext::new();
        let iter = batch(range(6), 2, true).make_iterator("Iterator");
        assert_eq!(collect(iter.as_ref(), &ctx).len(), 3);
    }

    #[test]
    fn end_of_sequence_is_sticky() {
        let ctx = IteratorContext::new();
        let iter = batch(range(2), 5, false).make_iterator("Iterator");
        assert_eq!(collect(iter.as_ref(), &ctx), vec![vec![0, 1]]);
        for _ in 0..3 {
            assert!(iter.get_next(&ctx).unwrap().is_none());
        }
    }

    #[test]
    fn error_mid_batch_discards_pulled_elements() {
        let ctx = IteratorContext::new();
        let pulls = Arc::new(AtomicUsize::new(0));
        let input: Arc<dyn Dataset> = Arc::new(Flaky {
            inner: Forever::new(),
            pulls: Arc::clone(&pulls),
            fail_after: 5,
        });
        let iter = batch(input, 3, true).make_iterator("Iterator");
        assert!(iter.get_next(&ctx).unwrap().is_some());
        // The second pull consumes two elements, then fails on the sixth.
        assert!(matches!(iter.get_next(&ctx), Err(Error::DataLoss(_))));
        assert_eq!(pulls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn partial_batch_dropped_after_exhaustion_is_lost() {
        let ctx = IteratorContext::new();
        let dataset = batch(range(4), 3, true);
        let iter = dataset.make_iterator("Iterator");
        assert!(iter.get_next(&ctx).unwrap().is_some());
        assert!(iter.get_next(&ctx).unwrap().is_none());

        let mut ckpt = Checkpoint::new();
        iter.save(&mut ckpt).unwrap();
        assert!(ckpt.contains("Iterator::BatchV2:input_impl_empty"));
    }

    #[test]
    fn upstream_error_propagates() {
        let ctx = IteratorContext::new();
        let input: Arc<dyn Dataset> = Arc::new(Flaky {
            inner: Forever::new(),
            pulls: Arc::new(AtomicUsize::new(0)),
            fail_after: 0,
        });
        let iter = batch(input, 2, false).make_iterator("Iterator");
        assert!(matches!(iter.get_next(&ctx), Err(Error::DataLoss(_))));
    }

    #[test]
    fn shape_mismatch_keeps_iterator_usable() {
        let elements = vec![
            vec![Tensor::from_slice([2, 3], &[0_i32; 6]).unwrap()],
            vec![Tensor::from_slice([2, 3], &[0_i32; 6]).unwrap()],
            vec![Tensor::from_slice([2, 4], &[0_i32; 8]).unwrap()],
            vec![Tensor::from_slice([2, 4], &[0_i32; 8]).unwrap()],
        ];
        let input: Arc<dyn Dataset> = Arc::new(ElementsDataset::new(elements).unwrap());
        let ctx = IteratorContext::new();
        let iter = batch(input, 3, false).make_iterator("Iterator");
        match iter.get_next(&ctx) {
            Err(Error::InvalidArgument(msg)) => assert!(msg.contains("element 2"), "{}", msg),
            other => panic!("unexpected result: {:?}", other.map(|b| b.map(|b| b.len()))),
        }
        let last = iter.get_next(&ctx).unwrap().unwrap();
        assert_eq!(last[0].shape().dims(), &[1, 2, 4]);
        assert!(iter.get_next(&ctx).unwrap().is_none());
    }

    #[test]
    fn allocation_failure_is_resource_exhausted() {
        let ctx = IteratorContext::new().with_allocator(Arc::new(BoundedAllocator::new(8)));
        let iter = batch(range(4), 2, false).make_iterator("Iterator");
        assert!(matches!(
            iter.get_next(&ctx),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn parallel_copy_matches_sequential() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(3)
            .build()
            .unwrap();
        let ctx = IteratorContext::new().with_runner(Arc::new(pool));
        let elements: Vec<Element> = (0..23)
            .map(|i| {
                vec![
                    Tensor::from_slice([2, 2], &[i, -i, i * 2, i * 3]).unwrap(),
                    Tensor::scalar(f64::from(i) / 4.0).unwrap(),
                ]
            })
            .collect();
        let input: Arc<dyn Dataset> = Arc::new(ElementsDataset::new(elements).unwrap());
        let sequential = Arc::new(BatchDataset::new(input.clone(), 5, false, false).unwrap())
            .make_iterator("Iterator");
        let parallel =
            Arc::new(BatchDataset::new(input, 5, false, true).unwrap()).make_iterator("Iterator");
        loop {
            let a = sequential.get_next(&ctx).unwrap();
            let b = parallel.get_next(&ctx).unwrap();
            assert_eq!(a, b);
            if a.is_none() {
                break;
            }
        }
    }

    #[test]
    fn save_then_restore_reproduces_output() {
        let ctx = IteratorContext::new();
        let dataset = batch(range(11), 3, false);
        let iter = dataset.clone().make_iterator("Iterator");
        iter.get_next(&ctx).unwrap();

        let mut ckpt = Checkpoint::new();
        iter.save(&mut ckpt).unwrap();
        let bytes = ckpt.to_bytes().unwrap();

        let expected = collect(iter.as_ref(), &ctx);
        let restored = dataset.make_iterator("Iterator");
        restored
            .restore(&ctx, &Checkpoint::from_bytes(&bytes).unwrap())
            .unwrap();
        assert_eq!(collect(restored.as_ref(), &ctx), expected);
        assert_eq!(expected, vec![vec![3, 4, 5], vec![6, 7, 8], vec![9, 10]]);
    }

    #[test]
    fn restore_into_active_iterator() {
        let ctx = IteratorContext::new();
        let iter = batch(range(6), 2, false).make_iterator("Iterator");
        iter.initialize(&ctx).unwrap();
        let mut ckpt = Checkpoint::new();
        iter.save(&mut ckpt).unwrap();

        assert_eq!(collect(iter.as_ref(), &ctx).len(), 3);
        iter.restore(&ctx, &ckpt).unwrap();
        assert_eq!(
            collect(iter.as_ref(), &ctx),
            vec![vec![0, 1], vec![2, 3], vec![4, 5]]
        );
    }

    #[test]
    fn restore_exhausted() {
        let ctx = IteratorContext::new();
        let dataset = batch(range(2), 2, false);
        let iter = dataset.clone().make_iterator("Iterator");
        collect(iter.as_ref(), &ctx);
        let mut ckpt = Checkpoint::new();
        iter.save(&mut ckpt).unwrap();

        let restored = dataset.make_iterator("Iterator");
        restored.restore(&ctx, &ckpt).unwrap();
        assert!(restored.get_next(&ctx).unwrap().is_none());
    }

    #[test]
    fn save_before_first_pull() {
        let ctx = IteratorContext::new();
        let dataset = batch(range(5), 2, false);
        let iter = dataset.clone().make_iterator("Iterator");
        let mut ckpt = Checkpoint::new();
        iter.save(&mut ckpt).unwrap();
        assert!(ckpt.contains("Iterator::BatchV2::FromElements:i"));

        let restored = dataset.make_iterator("Iterator");
        restored.restore(&ctx, &ckpt).unwrap();
        let expected = vec![vec![0, 1], vec![2, 3], vec![4]];
        assert_eq!(collect(restored.as_ref(), &ctx), expected);
        assert_eq!(collect(iter.as_ref(), &ctx), expected);
    }

    #[test]
    fn concurrent_pulls_share_one_input() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        let ctx = IteratorContext::new().with_runner(Arc::new(pool));
        let dataset: Arc<dyn Dataset> =
            Arc::new(BatchDataset::new(range(1000), 7, false, true).unwrap());
        let iter: Arc<dyn DatasetIterator> = Arc::from(dataset.make_iterator("Iterator"));

        let batches: Vec<Vec<i64>> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let iter = Arc::clone(&iter);
                    let ctx = &ctx;
                    s.spawn(move || collect(iter.as_ref(), ctx))
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect()
        });

        for b in &batches {
            assert!(b.windows(2).all(|w| w[1] == w[0] + 1), "{:?}", b);
        }
        assert_eq!(batches.iter().filter(|b| b.len() < 7).count(), 1);
        let mut all: Vec<i64> = batches.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<i64>>());
    }

    #[test]
    fn nested_batches() {
        let ctx = IteratorContext::new();
        let dataset = batch(batch(range(8), 2, false), 2, false);
        assert_eq!(dataset.cardinality(), Cardinality::Finite(2));
        assert_eq!(dataset.output_shapes()[0].to_string(), "[?,?]");
        let iter = dataset.clone().make_iterator("Iterator");
        let first = iter.get_next(&ctx).unwrap().unwrap();
        assert_eq!(first[0].shape().dims(), &[2, 2]);
        assert_eq!(first[0].to_vec::<i64>().unwrap(), vec![0, 1, 2, 3]);

        let mut ckpt = Checkpoint::new();
        iter.save(&mut ckpt).unwrap();
        assert!(ckpt.contains("Iterator::BatchV2::BatchV2::FromElements:i"));
        let restored = dataset.make_iterator("Iterator");
        restored.restore(&ctx, &ckpt).unwrap();
        let second = restored.get_next(&ctx).unwrap().unwrap();
        assert_eq!(second[0].to_vec::<i64>().unwrap(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn op_versions() {
        let config: BatchConfig =
            serde_json::from_str(r#"{"batch_size": 3, "drop_remainder": true}"#).unwrap();
        assert!(!config.parallel_copy);

        let v1 = BatchDatasetOp::new("BatchDataset")
            .unwrap()
            .make_dataset(range(10), &config)
            .unwrap();
        assert!(!v1.drop_remainder());
        assert_eq!(v1.to_string(), "BatchDatasetOp(3)::Dataset");
        assert_eq!(
            Arc::new(v1).make_iterator("Iterator").prefix(),
            "Iterator::Batch"
        );

        let v2 = BatchDatasetOp::new("BatchDatasetV2")
            .unwrap()
            .make_dataset(range(10), &config)
            .unwrap();
        assert!(v2.drop_remainder());
        assert_eq!(v2.to_string(), "BatchDatasetV2Op(3)::Dataset");

        assert!(BatchDatasetOp::new("PaddedBatchDataset").is_err());
    }

    #[test]
    fn graph_node_round_trip() {
        let input = range(5);
        let dataset = BatchDataset::new(input.clone(), 2, true, true).unwrap();
        let node = dataset.as_graph_node().unwrap();
        assert_eq!(node.op, "BatchDatasetV2");
        assert_eq!(node.inputs.len(), 3);
        assert_eq!(node.attrs.get("parallel_copy"), Some(&AttrValue::Bool(true)));

        let node = GraphNode::from_json(&node.to_json().unwrap()).unwrap();
        let input_node = match &node.inputs[0] {
            NodeInput::Dataset(input) => input.as_ref().clone(),
            NodeInput::Scalar(_) => panic!("first input must be a dataset"),
        };
        let rebuilt_input: Arc<dyn Dataset> =
            Arc::new(ElementsDataset::from_graph_node(&input_node).unwrap());
        let rebuilt = BatchDatasetOp::from_graph_node(&node, rebuilt_input).unwrap();
        assert_eq!(rebuilt.batch_size(), 2);
        assert!(rebuilt.drop_remainder());
        assert!(rebuilt.parallel_copy());
        assert_eq!(rebuilt.cardinality(), Cardinality::Finite(2));
    }

    #[test]
    fn v1_graph_node_round_trip() {
        let config = BatchConfig {
            batch_size: 2,
            drop_remainder: false,
            parallel_copy: false,
        };
        let dataset = BatchDatasetOp::new("BatchDataset")
            .unwrap()
            .make_dataset(range(5), &config)
            .unwrap();
        let node = dataset.as_graph_node().unwrap();
        assert_eq!(node.op, "BatchDataset");
        assert_eq!(node.inputs.len(), 3);
        assert_eq!(
            node.scalar_input(2).unwrap(),
            ScalarValue::Bool(false)
        );

        let rebuilt = BatchDatasetOp::from_graph_node(&node, range(5)).unwrap();
        assert_eq!(rebuilt.op(), BatchOp::BatchDataset);
        assert!(!rebuilt.drop_remainder());
        assert_eq!(rebuilt.cardinality(), Cardinality::Finite(3));
    }
}
