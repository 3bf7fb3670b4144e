use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cmp;
use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::slice;
use std::sync::Arc;
use thiserror::Error;

const ALIGNMENT: usize = 64;

/// A contiguous, immutable memory region of fixed size.
///
/// Cloning a `Buffer` shares the underlying memory.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer {
    data: Arc<BufferData>,
}

impl Buffer {
    /// Copies `bytes` into a newly allocated buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if memory cannot be allocated.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AllocationError> {
        let mut buf = BufferMut::zeroed(bytes.len())?;
        buf.data_mut().copy_from_slice(bytes);
        Ok(buf.build())
    }

    /// Returns the number of bytes in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        // `ptr` is non-null and valid for `len` bytes for the lifetime of `data`.
        unsafe { slice::from_raw_parts(self.data.ptr, self.data.len) }
    }
}

struct BufferData {
    ptr: *const u8, // Must be 64-byte aligned.
    len: usize,
    capacity: usize,
}

/// Release the underlying memory when the last buffer referring to it goes out of scope
impl Drop for BufferData {
    fn drop(&mut self) {
        unsafe {
            dealloc(
                self.ptr as *mut u8,
                Layout::from_size_align_unchecked(self.capacity, ALIGNMENT),
            );
        }
    }
}

impl PartialEq for BufferData {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        unsafe {
            slice::from_raw_parts(self.ptr, self.len) == slice::from_raw_parts(other.ptr, other.len)
        }
    }
}

impl Debug for BufferData {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "BufferData {{ len: {}, data: ", self.len)?;

        unsafe {
            f.debug_list()
                .entries(slice::from_raw_parts(self.ptr, self.len).iter())
                .finish()?;
        }

        write!(f, " }}")
    }
}

unsafe impl Send for BufferData {}
unsafe impl Sync for BufferData {}

/// A contiguous, mutable memory region, zero-filled on allocation.
#[derive(Debug)]
pub struct BufferMut {
    data: *mut u8,
    len: usize,
    capacity: usize,
}

impl BufferMut {
    /// Allocates `len` zeroed bytes aligned on a 64-byte boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if `len` is too large or the allocation fails.
    pub fn zeroed(len: usize) -> Result<Self, AllocationError> {
        if len > usize::MAX - (ALIGNMENT - 1) {
            return Err(AllocationError::TooLarge);
        }
        // Zero-sized layouts cannot be allocated; always reserve one aligned block.
        let capacity = cmp::max(round_upto_multiple_of_64(len), ALIGNMENT);
        let layout =
            Layout::from_size_align(capacity, ALIGNMENT).map_err(|_| AllocationError::TooLarge)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(AllocationError::Other);
        }
        Ok(Self {
            data: ptr,
            len,
            capacity,
        })
    }

    /// Returns the total capacity of this buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of usable bytes in this buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data, self.len) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.data, self.len) }
    }

    /// Freezes this buffer into an immutable, shareable `Buffer`.
    #[must_use]
    pub fn build(self) -> Buffer {
        let buffer_data = BufferData {
            ptr: self.data,
            len: self.len,
            capacity: self.capacity,
        };
        mem::forget(self);
        Buffer {
            data: Arc::new(buffer_data),
        }
    }
}

impl Drop for BufferMut {
    fn drop(&mut self) {
        unsafe {
            dealloc(
                self.data,
                Layout::from_size_align_unchecked(self.capacity, ALIGNMENT),
            );
        }
    }
}

unsafe impl Send for BufferMut {}
unsafe impl Sync for BufferMut {}

/// Returns the nearest number that is `>=` than `num` and is a multiple of 64.
fn round_upto_multiple_of_64(num: usize) -> usize {
    (num + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("cannot allocate memory larger than usize::MAX - 63 bytes")]
    TooLarge,
    #[error("requested {requested} bytes, exceeding the limit of {limit} bytes")]
    LimitExceeded { requested: usize, limit: usize },
    #[error("allocation failed")]
    Other,
}

/// Source of memory for tensors produced by an iterator.
pub trait Allocator: Debug + Send + Sync {
    /// Allocates a zero-filled buffer of exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory cannot be provided.
    fn allocate_zeroed(&self, len: usize) -> Result<BufferMut, AllocationError>;
}

/// Allocates 64-byte aligned memory from the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlignedAllocator;

impl Allocator for AlignedAllocator {
    fn allocate_zeroed(&self, len: usize) -> Result<BufferMut, AllocationError> {
        BufferMut::zeroed(len)
    }
}

/// Refuses any single allocation larger than a fixed number of bytes.
#[derive(Clone, Copy, Debug)]
pub struct BoundedAllocator {
    limit: usize,
}

impl BoundedAllocator {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Allocator for BoundedAllocator {
    fn allocate_zeroed(&self, len: usize) -> Result<BufferMut, AllocationError> {
        if len > self.limit {
            return Err(AllocationError::LimitExceeded {
                requested: len,
                limit: self.limit,
            });
        }
        BufferMut::zeroed(len)
    }
}
