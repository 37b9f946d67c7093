//! Fixed-capacity ring buffer
//!
//! Backs the telemetry series, the deployment record series, the activity log
//! and the incident history. Appending beyond capacity evicts exactly the
//! oldest entry.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer; a zero capacity is bumped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an entry, returning the evicted oldest entry if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.items.front()
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    /// Newest to oldest
    pub fn iter_recent(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn recent(&self, limit: usize) -> Vec<T> {
        self.items.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut ring = RingBuffer::new(3);
        assert!(ring.push(1).is_none());
        assert!(ring.push(2).is_none());
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.latest(), Some(&2));
        assert_eq!(ring.oldest(), Some(&1));
    }

    #[test]
    fn test_push_beyond_capacity_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        for i in 0..3 {
            ring.push(i);
        }

        assert_eq!(ring.push(3), Some(0));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.to_vec(), vec![1, 2, 3]);

        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.to_vec(), vec![2, 3, 4]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut ring = RingBuffer::new(20);
        for i in 0..1000 {
            ring.push(i);
            assert!(ring.len() <= 20);
        }
        assert_eq!(ring.oldest(), Some(&980));
    }

    #[test]
    fn test_recent_is_newest_first() {
        let mut ring = RingBuffer::new(5);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.recent(2), vec![4, 3]);
        assert_eq!(ring.iter_recent().count(), 5);
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let mut ring = RingBuffer::new(0);
        ring.push("a");
        assert_eq!(ring.push("b"), Some("a"));
        assert_eq!(ring.capacity(), 1);
    }
}
