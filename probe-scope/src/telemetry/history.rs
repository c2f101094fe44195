//! Per-variable reading history

use serde::Serialize;
use std::collections::VecDeque;

use crate::domain::{Timestamp, Value};

/// Default number of readings kept per variable
pub const DEFAULT_CAPACITY: usize = 1000;

/// A single observed value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp: Timestamp,
    pub value: Value,
    /// Whether the value differs significantly from the previous reading
    pub changed: bool,
}

/// Fixed-capacity FIFO of readings; the oldest reading is evicted first
#[derive(Debug, Clone)]
pub struct History {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl History {
    /// Create an empty history holding at most `capacity` readings
    /// (a capacity of zero is treated as one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { readings: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)), capacity }
    }

    pub fn push(&mut self, reading: Reading) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    #[must_use]
    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// Readings at or after `cutoff`, oldest first
    pub fn since(&self, cutoff: Timestamp) -> impl Iterator<Item = &Reading> {
        // Timestamps are appended in order, so skip the prefix
        let start = self.readings.partition_point(|r| r.timestamp < cutoff);
        self.readings.range(start..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(ts: u64, v: f64) -> Reading {
        Reading { timestamp: Timestamp(ts), value: Value::Float(v), changed: false }
    }

    #[test]
    fn test_evicts_oldest() {
        let mut h = History::new(3);
        for i in 0..5 {
            h.push(reading(i, i as f64));
        }
        let ts: Vec<u64> = h.iter().map(|r| r.timestamp.0).collect();
        assert_eq!(ts, vec![2, 3, 4]);
        assert_eq!(h.latest().unwrap().timestamp, Timestamp(4));
    }

    #[test]
    fn test_since_cutoff() {
        let mut h = History::default();
        for i in 0..10 {
            h.push(reading(i * 100, 0.0));
        }
        assert_eq!(h.since(Timestamp(750)).count(), 2);
        assert_eq!(h.since(Timestamp(0)).count(), 10);
        assert_eq!(h.since(Timestamp(10_000)).count(), 0);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut h = History::new(0);
        h.push(reading(1, 1.0));
        h.push(reading(2, 2.0));
        assert_eq!(h.len(), 1);
        assert_eq!(h.capacity(), 1);
    }
}
