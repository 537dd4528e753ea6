//! Fixed-Capacity History Ring

use serde::ser::{Serialize, SerializeSeq, Serializer};

/// Default history length (2.5 s of samples at 20 Hz)
pub const DEFAULT_CAPACITY: usize = 50;

/// Bounded history that overwrites its oldest sample when full.
///
/// Cloning copies the samples, so a snapshot can carry its own history while
/// the poller keeps pushing into the original.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRing<T> {
    /// Samples, at most `capacity` of them
    storage: Vec<T>,
    capacity: usize,
    /// Next slot to overwrite once `storage` is full
    head: usize,
    total_written: u64,
}

impl<T> HistoryRing<T> {
    /// Create an empty ring. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            total_written: 0,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Append a sample, dropping the oldest if the ring is full
    pub fn push(&mut self, value: T) {
        if self.storage.len() < self.capacity {
            self.storage.push(value);
        } else {
            self.storage[self.head] = value;
            self.head = (self.head + 1) % self.capacity;
        }
        self.total_written += 1;
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.storage.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Samples pushed over the ring's lifetime
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let (newer, older) = self.storage.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&T> {
        self.iter().next_back()
    }

    pub fn clear(&mut self) {
        self.storage.clear();
        self.head = 0;
    }
}

impl<T: Clone> HistoryRing<T> {
    /// Read the last N samples (most recent first)
    pub fn read_last(&self, count: usize) -> Vec<T> {
        self.iter().rev().take(count).cloned().collect()
    }

    /// Oldest to newest, as an owned vector
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T> Default for HistoryRing<T> {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl<T> Extend<T> for HistoryRing<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

/// Serialized as a plain sequence, oldest first
impl<T: Serialize> Serialize for HistoryRing<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for value in self.iter() {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_and_read() {
        let mut ring = HistoryRing::new(10);
        for i in 0..5 {
            ring.push(i * 100);
        }

        assert_eq!(ring.len(), 5);
        assert!(!ring.is_full());

        let recent = ring.read_last(3);
        assert_eq!(recent, vec![400, 300, 200]);
        assert_eq!(ring.latest(), Some(&400));
    }

    #[test]
    fn test_overwrite_oldest() {
        let mut ring = HistoryRing::new(5);
        ring.extend(0..10);

        assert_eq!(ring.len(), 5);
        assert!(ring.is_full());
        assert_eq!(ring.to_vec(), vec![5, 6, 7, 8, 9]);
        assert_eq!(ring.read_last(2), vec![9, 8]);
        assert_eq!(ring.total_written(), 10);
    }

    #[test]
    fn test_fill_ratio() {
        let mut ring = HistoryRing::new(100);
        assert_eq!(ring.fill_ratio(), 0.0);

        ring.extend(std::iter::repeat(1.0f32).take(50));

        assert!((ring.fill_ratio() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut ring = HistoryRing::new(3);
        ring.extend([1, 2]);
        let snapshot = ring.clone();
        ring.push(3);

        assert_eq!(snapshot.to_vec(), vec![1, 2]);
        assert_eq!(ring.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_capacity_raised() {
        let mut ring = HistoryRing::new(0);
        ring.push('a');
        ring.push('b');
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.to_vec(), vec!['b']);
    }

    #[test]
    fn test_serialize_oldest_first() {
        let mut ring = HistoryRing::new(3);
        ring.extend([1, 2, 3, 4]);
        assert_eq!(serde_json::to_string(&ring).unwrap(), "[2,3,4]");
    }

    #[test]
    fn test_clear() {
        let mut ring = HistoryRing::new(3);
        ring.extend([1, 2, 3, 4]);
        ring.clear();
        assert!(ring.is_empty());
        ring.push(5);
        assert_eq!(ring.to_vec(), vec![5]);
    }

    proptest! {
        #[test]
        fn prop_keeps_most_recent(values in proptest::collection::vec(any::<i32>(), 0..200), capacity in 1usize..64) {
            let mut ring = HistoryRing::new(capacity);
            ring.extend(values.iter().copied());

            let expected: Vec<i32> = values.iter().rev().take(capacity).rev().copied().collect();
            prop_assert_eq!(ring.to_vec(), expected);
            prop_assert!(ring.len() <= capacity);
        }
    }
}
