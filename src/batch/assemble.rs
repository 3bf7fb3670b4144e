use crate::context::IteratorContext;
use crate::dataset::Element;
use crate::datatypes::DataType;
use crate::shape::TensorShape;
use crate::tensor::{copy_element_to_slice, Tensor};
use crate::Error;
use parking_lot::Mutex;

/// Stacks `elements` into one tensor per slot, with the element index as the
/// outer dimension.
pub(crate) fn assemble(
    ctx: &IteratorContext,
    elements: Vec<Element>,
    parallel_copy: bool,
) -> Result<Element, Error> {
    let num_elements = elements.len();
    let num_components = elements.first().map_or(0, Vec::len);
    let mut components: Vec<Vec<Tensor>> = (0..num_components)
        .map(|_| Vec::with_capacity(num_elements))
        .collect();
    for (i, element) in elements.into_iter().enumerate() {
        if element.len() != num_components {
            return Err(Error::InvalidArgument(format!(
                "Cannot batch elements with different numbers of components. First \
                 element had {} components and element {} had {}.",
                num_components,
                i,
                element.len()
            )));
        }
        for (component, value) in components.iter_mut().zip(element) {
            component.push(value);
        }
    }

    components
        .into_iter()
        .enumerate()
        .map(|(index, values)| batch_component(ctx, index, values, parallel_copy))
        .collect()
}

fn batch_component(
    ctx: &IteratorContext,
    component_index: usize,
    values: Vec<Tensor>,
    parallel_copy: bool,
) -> Result<Tensor, Error> {
    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let (dtype, first_shape) = match values.first() {
        Some(first) => (first.dtype(), first.shape().clone()),
        None => {
            return Err(Error::InvalidArgument(format!(
                "no elements to batch in component {}",
                component_index
            )))
        }
    };
    let num_values = values.len();
    let mut batch_shape = TensorShape::new(vec![num_values]);
    batch_shape.append_shape(&first_shape);

    let slice_len = first_shape
        .num_elements()
        .and_then(|n| n.checked_mul(dtype.byte_width()));
    let batch_len = slice_len.and_then(|len| len.checked_mul(num_values));
    let (slice_len, batch_len) = match (slice_len, batch_len) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            return Err(Error::ResourceExhausted(format!(
                "Failed to allocate memory for the batch of component {}: shape {} is too large",
                component_index, batch_shape
            )))
        }
    };
    let mut buffer = ctx.allocator().allocate_zeroed(batch_len).map_err(|e| {
        Error::ResourceExhausted(format!(
            "Failed to allocate memory for the batch of component {}: {}",
            component_index, e
        ))
    })?;

    {
        let slices: Vec<&mut [u8]> = if slice_len == 0 {
            (0..num_values).map(|_| <&mut [u8]>::default()).collect()
        } else {
            buffer.data_mut().chunks_mut(slice_len).collect()
        };
        let check = ShapeCheck {
            component_index,
            first_shape: &first_shape,
        };
        if parallel_copy {
            copy_parallel(ctx, &check, dtype, values, slices)?;
        } else {
            copy_sequential(&check, dtype, values, slices)?;
        }
    }

    Tensor::from_buffer(dtype, batch_shape, buffer.build())
}

struct ShapeCheck<'a> {
    component_index: usize,
    first_shape: &'a TensorShape,
}

impl ShapeCheck<'_> {
    fn verify(&self, index: usize, value: &Tensor) -> Result<(), Error> {
        if value.shape() == self.first_shape {
            return Ok(());
        }
        Err(Error::InvalidArgument(format!(
            "Cannot batch tensors with different shapes in component {}. First element \
             had shape {} and element {} had shape {}.",
            self.component_index,
            self.first_shape,
            index,
            value.shape()
        )))
    }
}

fn copy_sequential(
    check: &ShapeCheck,
    dtype: DataType,
    values: Vec<Tensor>,
    slices: Vec<&mut [u8]>,
) -> Result<(), Error> {
    for (index, (value, slice)) in values.into_iter().zip(slices).enumerate() {
        check.verify(index, &value)?;
        copy_element_to_slice(value, dtype, slice)?;
    }
    Ok(())
}

/// Spawns one copy per element. A shape mismatch stops further spawning; the
/// copies already spawned are joined before any error is returned.
fn copy_parallel(
    ctx: &IteratorContext,
    check: &ShapeCheck,
    dtype: DataType,
    values: Vec<Tensor>,
    slices: Vec<&mut [u8]>,
) -> Result<(), Error> {
    let first_error: Mutex<Option<Error>> = Mutex::new(None);
    let mut mismatch = None;
    ctx.scope(|scope| {
        for (index, (value, slice)) in values.into_iter().zip(slices).enumerate() {
            if let Err(e) = check.verify(index, &value) {
                mismatch = Some(e);
                break;
            }
            let first_error = &first_error;
            scope.spawn(move |_| {
                let result = if ctx.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    copy_element_to_slice(value, dtype, slice)
                };
                if let Err(e) = result {
                    let mut first = first_error.lock();
                    if first.is_none() {
                        *first = Some(e);
                    }
                }
            });
        }
    });
    if let Some(e) = mismatch {
        return Err(e);
    }
    match first_error.into_inner() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
