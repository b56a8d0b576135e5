//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of chunks (inputs). Only one item per input is buffered at a time.
///
/// Equal items coming from different inputs are emitted in the order they were buffered,
/// so the output is deterministic for the given inputs.
pub struct BinaryHeapMerger<T, E, C>
where
    T: Ord,
    C: IntoIterator<Item = Result<T, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap,
    // the second field is the buffering sequence number used as a tie-breaker
    items: BinaryHeap<(Reverse<T>, Reverse<u64>, usize)>,
    chunks: Vec<C::IntoIter>,
    // number of chunks whose first item is already buffered
    initiated: usize,
    seq: u64,
}

impl<T, E, C> BinaryHeapMerger<T, E, C>
where
    T: Ord,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Chunk items should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            initiated: 0,
            seq: 0,
        };
    }

    /// Returns the number of currently buffered items.
    pub fn buffered(&self) -> usize {
        self.items.len()
    }

    /// Drops all the inputs and buffered items. The merger yields nothing after that.
    pub fn close(&mut self) {
        self.items.clear();
        self.chunks.clear();
        self.initiated = 0;
    }

    fn pull(&mut self, idx: usize) -> Result<(), E> {
        if let Some(item) = self.chunks[idx].next() {
            self.items.push((Reverse(item?), Reverse(self.seq), idx));
            self.seq += 1;
        }

        return Ok(());
    }
}

impl<T, E, C> Iterator for BinaryHeapMerger<T, E, C>
where
    T: Ord,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        while self.initiated < self.chunks.len() {
            let idx = self.initiated;
            self.initiated += 1;
            if let Err(err) = self.pull(idx) {
                return Some(Err(err));
            }
        }

        let (result, _, idx) = self.items.pop()?;
        if let Err(err) = self.pull(idx) {
            // the popped item is lost otherwise
            self.items.push((result, Reverse(self.seq), idx));
            self.seq += 1;
            return Some(Err(err));
        }

        return Some(Ok(result.0));
    }
}
