//! Limited block buffer.

/// Upper bound of records preallocated up-front. Larger blocks grow on the first fill and
/// keep their capacity afterwards.
const MAX_PREALLOCATED: usize = 1 << 20;

/// Buffer limited by elements count.
///
/// A single buffer is filled, sorted and drained once per block and then cleared,
/// so its allocation is reused across all blocks of a sorting pass.
pub struct LimitedBuffer<T> {
    limit: usize,
    inner: Vec<T>,
}

impl<T> LimitedBuffer<T> {
    /// Creates an empty buffer with memory preallocated for `limit` elements
    /// (capped at an internal maximum).
    pub fn with_capacity(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::with_capacity(limit.min(MAX_PREALLOCATED)),
        }
    }

    /// Adds a new element to the buffer.
    pub fn push(&mut self, item: T) {
        debug_assert!(!self.is_full(), "push to a full buffer");
        self.inner.push(item);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Removes all elements keeping the allocated memory.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        self.inner.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.inner.as_mut_slice()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.inner.iter()
    }
}
