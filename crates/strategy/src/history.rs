use std::collections::VecDeque;

use crate::{Reading, Readings};

/// Bounded window of readings from prior bars, newest last.
#[derive(Debug, Clone, Default)]
pub struct History {
    capacity: usize,
    items: VecDeque<Readings>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append the readings of a finished bar, dropping the oldest entry
    /// once the window is full.
    pub fn push(&mut self, readings: Readings) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(readings);
    }

    /// Readings from `bars_ago` bars before the current one (1 = previous).
    pub fn back(&self, bars_ago: usize) -> Option<&Readings> {
        if bars_ago == 0 || bars_ago > self.items.len() {
            return None;
        }
        self.items.get(self.items.len() - bars_ago)
    }

    /// Formed reading of indicator `index`, `bars_ago` bars back.
    pub fn formed(&self, bars_ago: usize, index: usize) -> Option<Reading> {
        self.back(bars_ago)?
            .get(index)
            .copied()
            .filter(|r| r.is_formed && r.value.is_finite())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(v: f64) -> Readings {
        Readings(vec![Reading::formed(v)])
    }

    #[test]
    fn keeps_only_capacity_entries() {
        let mut h = History::new(2);
        h.push(readings(1.0));
        h.push(readings(2.0));
        h.push(readings(3.0));
        assert_eq!(h.len(), 2);
        assert_eq!(h.formed(1, 0).unwrap().value, 3.0);
        assert_eq!(h.formed(2, 0).unwrap().value, 2.0);
        assert!(h.back(3).is_none());
    }

    #[test]
    fn zero_bars_ago_is_not_history() {
        let mut h = History::new(1);
        h.push(readings(1.0));
        assert!(h.back(0).is_none());
    }

    #[test]
    fn unformed_entries_are_filtered() {
        let mut h = History::new(1);
        h.push(Readings(vec![Reading::pending()]));
        assert!(h.formed(1, 0).is_none());
    }
}
