//! Rotating history of device state vectors.

use crate::integration::MAX_ORDER;

/// Number of state vectors kept: the current timepoint plus enough history
/// for the highest integration order and its error estimate.
pub const NUM_STATE_VECTORS: usize = MAX_ORDER + 2;

/// `slots[0]` is the timepoint being solved, `slots[1]` the last accepted
/// one, and so on.
#[derive(Debug, Clone, Default)]
pub struct StateHistory {
    slots: Vec<Vec<f64>>,
}

impl StateHistory {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![vec![0.0; len]; NUM_STATE_VECTORS],
        }
    }

    /// Number of entries in each state vector.
    pub fn len(&self) -> usize {
        self.slots.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value `age` timepoints back (0 = current).
    #[inline]
    pub fn get(&self, age: usize, index: usize) -> f64 {
        self.slots[age][index]
    }

    #[inline]
    pub fn set(&mut self, age: usize, index: usize, value: f64) {
        self.slots[age][index] = value;
    }

    pub fn current(&self) -> &[f64] {
        &self.slots[0]
    }

    pub fn current_mut(&mut self) -> &mut [f64] {
        &mut self.slots[0]
    }

    /// Copy a whole vector, e.g. the operating point into the history.
    pub fn copy(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let src = self.slots[from].clone();
        self.slots[to].copy_from_slice(&src);
    }

    /// Shift history back by one timepoint after a step is accepted.
    ///
    /// The oldest vector is recycled as the new current one.
    pub fn rotate(&mut self) {
        self.slots.rotate_right(1);
    }

    pub fn zero(&mut self) {
        for slot in &mut self.slots {
            slot.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_moves_history_back() {
        let mut s = StateHistory::new(2);
        s.set(0, 0, 1.0);
        s.rotate();
        assert_eq!(s.get(1, 0), 1.0);
        s.set(0, 0, 2.0);
        s.rotate();
        assert_eq!(s.get(1, 0), 2.0);
        assert_eq!(s.get(2, 0), 1.0);
    }

    #[test]
    fn test_copy() {
        let mut s = StateHistory::new(3);
        s.current_mut().copy_from_slice(&[1.0, 2.0, 3.0]);
        s.copy(0, 1);
        assert_eq!(s.get(1, 2), 3.0);
    }
}
