//! Tensor shapes, both fully and partially known.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fully-defined tensor shape.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct TensorShape {
    dims: Vec<usize>,
}

impl TensorShape {
    #[must_use]
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// The shape of a scalar.
    #[must_use]
    pub fn scalar() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the number of values a tensor of this shape holds, or `None` if
    /// the product overflows `usize`.
    #[must_use]
    pub fn num_elements(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1_usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Appends all dimensions of `other` after the dimensions of `self`.
    pub fn append_shape(&mut self, other: &Self) {
        self.dims.extend_from_slice(&other.dims);
    }
}

impl From<Vec<usize>> for TensorShape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for TensorShape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.dims.iter().join(","))
    }
}

/// A tensor shape of known rank whose dimensions may be unknown.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct PartialShape {
    dims: Vec<Option<usize>>,
}

impl PartialShape {
    #[must_use]
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Self { dims }
    }

    #[must_use]
    pub fn dims(&self) -> &[Option<usize>] {
        &self.dims
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns a new shape with the dimensions of `other` following those of
    /// `self`.
    #[must_use]
    pub fn concatenate(&self, other: &Self) -> Self {
        let mut dims = Vec::with_capacity(self.rank() + other.rank());
        dims.extend_from_slice(&self.dims);
        dims.extend_from_slice(&other.dims);
        Self { dims }
    }

    /// Returns whether `shape` could be an instance of this partial shape.
    #[must_use]
    pub fn is_compatible_with(&self, shape: &TensorShape) -> bool {
        self.rank() == shape.rank()
            && self
                .dims
                .iter()
                .zip(shape.dims())
                .all(|(expected, actual)| expected.map_or(true, |d| d == *actual))
    }
}

impl From<&TensorShape> for PartialShape {
    fn from(shape: &TensorShape) -> Self {
        Self::new(shape.dims().iter().copied().map(Some).collect())
    }
}

impl From<TensorShape> for PartialShape {
    fn from(shape: TensorShape) -> Self {
        Self::from(&shape)
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self.dims.iter().map(|d| match d {
            Some(d) => d.to_string(),
            None => "?".to_string(),
        });
        write!(f, "[{}]", dims.format(","))
    }
}
