//! In-memory block sorter.

/// Ranges shorter than this are sorted on the calling thread.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

/// Top-down merge sorter.
///
/// Sorts blocks in place using an auxiliary buffer that is allocated once and reused
/// across all the blocks passed to [`MergeSorter::sort`]. The sort is stable: equal
/// items keep their relative order. Halves of large ranges are sorted in parallel using
/// the current rayon thread pool, which does not change the result.
pub struct MergeSorter<T> {
    aux: Vec<T>,
    parallel_threshold: usize,
}

impl<T> MergeSorter<T>
where
    T: Ord + Copy + Send,
{
    /// Creates a sorter able to sort blocks of up to `capacity` items without reallocation.
    pub fn with_capacity(capacity: usize) -> Self {
        MergeSorter {
            aux: Vec::with_capacity(capacity),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }

    /// Sets the minimum range length whose halves are sorted in parallel.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(2);
        return self;
    }

    /// Returns the auxiliary buffer capacity.
    pub fn capacity(&self) -> usize {
        self.aux.capacity()
    }

    /// Sorts `data` in ascending order.
    pub fn sort(&mut self, data: &mut [T]) {
        if data.len() < 2 {
            return;
        }
        if self.aux.len() < data.len() {
            self.aux.resize(data.len(), data[0]);
        }

        sort_range(data, &mut self.aux[..data.len()], self.parallel_threshold);
    }
}

fn sort_range<T>(data: &mut [T], aux: &mut [T], parallel_threshold: usize)
where
    T: Ord + Copy + Send,
{
    let len = data.len();
    if len < 2 {
        return;
    }

    // left half is one element longer for odd lengths
    let middle = (len - 1) / 2 + 1;
    {
        let (data_left, data_right) = data.split_at_mut(middle);
        let (aux_left, aux_right) = aux.split_at_mut(middle);

        if len >= parallel_threshold {
            rayon::join(
                || sort_range(data_left, aux_left, parallel_threshold),
                || sort_range(data_right, aux_right, parallel_threshold),
            );
        } else {
            sort_range(data_left, aux_left, parallel_threshold);
            sort_range(data_right, aux_right, parallel_threshold);
        }
    }

    merge(data, aux, middle);
}

/// Merges sorted `data[..middle]` and `data[middle..]` through `aux`.
fn merge<T>(data: &mut [T], aux: &mut [T], middle: usize)
where
    T: Ord + Copy,
{
    aux.copy_from_slice(data);
    let (left, right) = aux.split_at(middle);

    let (mut i, mut j, mut k) = (0, 0, 0);
    while i < left.len() && j < right.len() {
        if left[i] <= right[j] {
            data[k] = left[i];
            i += 1;
        } else {
            data[k] = right[j];
            j += 1;
        }
        k += 1;
    }

    // the right tail (if any) is already in place
    let rest = &left[i..];
    data[k..k + rest.len()].copy_from_slice(rest);
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use rand::seq::SliceRandom;
    use rand::Rng;
    use rstest::*;

    use super::MergeSorter;

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![42], vec![42])]
    #[case(vec![2, 1], vec![1, 2])]
    #[case(vec![5, 3, 8], vec![3, 5, 8])]
    #[case(vec![1, 9, 2], vec![1, 2, 9])]
    #[case(vec![7, 4, 6], vec![4, 6, 7])]
    #[case(vec![3, 3, 1, 3, 1], vec![1, 1, 3, 3, 3])]
    #[case(vec![i32::MAX, 0, i32::MIN, -1], vec![i32::MIN, -1, 0, i32::MAX])]
    fn test_sort(#[case] mut data: Vec<i32>, #[case] expected: Vec<i32>) {
        let mut sorter = MergeSorter::with_capacity(data.len());
        sorter.sort(&mut data);
        assert_eq!(data, expected);
    }

    #[rstest]
    #[case(2)]
    #[case(64)]
    #[case(usize::MAX)]
    fn test_sort_shuffled(#[case] parallel_threshold: usize) {
        let mut rng = rand::thread_rng();
        let mut data: Vec<i32> = (0..5000).map(|_| rng.gen_range(-1000..1000)).collect();
        let mut expected = data.clone();
        expected.sort();

        let mut sorter = MergeSorter::with_capacity(data.len()).with_parallel_threshold(parallel_threshold);
        sorter.sort(&mut data);

        assert_eq!(data, expected);
    }

    #[test]
    fn test_aux_buffer_reused() {
        let mut sorter = MergeSorter::with_capacity(100);
        let capacity = sorter.capacity();

        for len in [100, 37, 100, 1, 64] {
            let mut data = Vec::from_iter((0..len).rev());
            sorter.sort(&mut data);
            assert_eq!(data, Vec::from_iter(0..len));
            assert_eq!(sorter.capacity(), capacity);
        }
    }

    /// Ordered by `key` only, `tag` tracks the original position.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Keyed {
        key: i32,
        tag: usize,
    }

    impl PartialOrd for Keyed {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for Keyed {
        fn cmp(&self, other: &Self) -> Ordering {
            self.key.cmp(&other.key)
        }
    }

    #[rstest]
    #[case(2)]
    #[case(usize::MAX)]
    fn test_sort_stability(#[case] parallel_threshold: usize) {
        let mut keys = Vec::from_iter((0..20).flat_map(|key| std::iter::repeat(key).take(5)));
        keys.shuffle(&mut rand::thread_rng());

        let mut data = Vec::from_iter(keys.into_iter().enumerate().map(|(tag, key)| Keyed { key, tag }));
        let mut expected = data.clone();
        // std stable sort as a reference
        expected.sort();

        let mut sorter = MergeSorter::with_capacity(data.len()).with_parallel_threshold(parallel_threshold);
        sorter.sort(&mut data);

        let actual_tags = Vec::from_iter(data.iter().map(|item| (item.key, item.tag)));
        let expected_tags = Vec::from_iter(expected.iter().map(|item| (item.key, item.tag)));
        assert_eq!(actual_tags, expected_tags);
    }
}
