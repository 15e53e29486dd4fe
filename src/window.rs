//! Bounded rolling window over past values.
//!
//! The replayer pushes each event's cart value *after* evaluating that event, so
//! the window only ever holds strictly earlier values.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self { values: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        self.values.push_back(value);
        if self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut w = RollingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            w.push(v);
        }
        assert_eq!(w.to_vec(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zero_capacity_stays_empty() {
        let mut w = RollingWindow::new(0);
        w.push(1.0);
        assert!(w.to_vec().is_empty());
    }
}
