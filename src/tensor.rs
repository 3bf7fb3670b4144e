//! Dense, immutable tensors and the slice copy used to stack them.

use crate::datatypes::{DataType, NativeType};
use crate::memory::{Buffer, BufferMut};
use crate::shape::TensorShape;
use crate::Error;
use serde::{Deserialize, Serialize};

/// A dense tensor: a data type, a shape, and a little-endian value buffer.
///
/// Cloning a tensor shares its buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    dtype: DataType,
    shape: TensorShape,
    buffer: Buffer,
}

impl Tensor {
    /// Wraps `buffer` as a tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer length doesn't match `dtype` and `shape`.
    pub fn from_buffer(dtype: DataType, shape: TensorShape, buffer: Buffer) -> Result<Self, Error> {
        let expected = byte_len(dtype, &shape)?;
        if buffer.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "a {} tensor of shape {} needs {} bytes, but {} were given",
                dtype,
                shape,
                expected,
                buffer.len()
            )));
        }
        Ok(Self {
            dtype,
            shape,
            buffer,
        })
    }

    /// Builds a tensor of `shape` from values laid out in row-major order.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of values doesn't match `shape`, or
    /// memory cannot be allocated.
    pub fn from_slice<T: NativeType>(
        shape: impl Into<TensorShape>,
        values: &[T],
    ) -> Result<Self, Error> {
        let shape = shape.into();
        if shape.num_elements() != Some(values.len()) {
            return Err(Error::InvalidArgument(format!(
                "{} values cannot fill a tensor of shape {}",
                values.len(),
                shape
            )));
        }
        let width = T::DATA_TYPE.byte_width();
        let mut buf = BufferMut::zeroed(values.len() * width)
            .map_err(|e| Error::ResourceExhausted(e.to_string()))?;
        for (out, v) in buf.data_mut().chunks_exact_mut(width).zip(values) {
            v.encode(out);
        }
        Ok(Self {
            dtype: T::DATA_TYPE,
            shape,
            buffer: buf.build(),
        })
    }

    /// Builds a rank-0 tensor.
    ///
    /// # Errors
    ///
    /// Returns an error if memory cannot be allocated.
    pub fn scalar<T: NativeType>(value: T) -> Result<Self, Error> {
        Self::from_slice(TensorShape::scalar(), &[value])
    }

    #[must_use]
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    #[must_use]
    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    /// Returns the raw little-endian bytes of this tensor.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.buffer.data()
    }

    /// Returns the number of values in this tensor.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len() / self.dtype.byte_width()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Decodes all values in row-major order.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` doesn't match the tensor's data type.
    pub fn to_vec<T: NativeType>(&self) -> Result<Vec<T>, Error> {
        if T::DATA_TYPE != self.dtype {
            return Err(Error::InvalidArgument(format!(
                "cannot read a {} tensor as {}",
                self.dtype,
                T::DATA_TYPE
            )));
        }
        Ok(self
            .data()
            .chunks_exact(self.dtype.byte_width())
            .map(T::decode)
            .collect())
    }

    /// Returns the serializable form of this tensor.
    #[must_use]
    pub fn to_proto(&self) -> TensorProto {
        TensorProto {
            dtype: self.dtype,
            shape: self.shape.clone(),
            content: self.data().to_vec(),
        }
    }

    /// Rebuilds a tensor from its serializable form.
    ///
    /// # Errors
    ///
    /// Returns an error if the content doesn't match the dtype and shape.
    pub fn from_proto(proto: &TensorProto) -> Result<Self, Error> {
        let buffer = Buffer::from_slice(&proto.content)
            .map_err(|e| Error::ResourceExhausted(e.to_string()))?;
        Self::from_buffer(proto.dtype, proto.shape.clone(), buffer)
    }
}

/// Serializable form of a `Tensor`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TensorProto {
    pub dtype: DataType,
    pub shape: TensorShape,
    pub content: Vec<u8>,
}

fn byte_len(dtype: DataType, shape: &TensorShape) -> Result<usize, Error> {
    shape
        .num_elements()
        .and_then(|n| n.checked_mul(dtype.byte_width()))
        .ok_or_else(|| {
            Error::InvalidArgument(format!("a {} tensor of shape {} is too large", dtype, shape))
        })
}

/// Moves `element` into `slice`, one row of a batch whose values are of type
/// `dtype`.
///
/// # Errors
///
/// Returns an error if the element's type or size doesn't match the slice.
pub fn copy_element_to_slice(
    element: Tensor,
    dtype: DataType,
    slice: &mut [u8],
) -> Result<(), Error> {
    if element.dtype != dtype {
        return Err(Error::InvalidArgument(format!(
            "cannot copy an element of type {} into a batch of type {}",
            element.dtype, dtype
        )));
    }
    if element.data().len() != slice.len() {
        return Err(Error::InvalidArgument(format!(
            "element of shape {} has {} bytes, but the batch slice has {}",
            element.shape,
            element.data().len(),
            slice.len()
        )));
    }
    slice.copy_from_slice(element.data());
    Ok(())
}
