//! Transient breakpoint table.

/// Sorted list of future times the integrator must land on exactly.
///
/// Breakpoints closer than `min_spacing` to an existing one are merged into
/// it.
#[derive(Debug, Clone, Default)]
pub struct Breakpoints {
    times: Vec<f64>,
    min_spacing: f64,
}

impl Breakpoints {
    pub fn new(min_spacing: f64) -> Self {
        Self {
            times: Vec::new(),
            min_spacing,
        }
    }

    pub fn set_min_spacing(&mut self, min_spacing: f64) {
        self.min_spacing = min_spacing;
    }

    pub fn min_spacing(&self) -> f64 {
        self.min_spacing
    }

    /// Insert a breakpoint. Returns false if it merged with an existing one.
    pub fn set(&mut self, time: f64) -> bool {
        if !time.is_finite() {
            return false;
        }
        let pos = self.times.partition_point(|&t| t < time);
        let near = |i: usize| {
            self.times
                .get(i)
                .is_some_and(|&t| (t - time).abs() <= self.min_spacing)
        };
        if near(pos) || (pos > 0 && near(pos - 1)) {
            return false;
        }
        self.times.insert(pos, time);
        true
    }

    /// Drop every breakpoint at or before `time` (within the spacing).
    pub fn clear_through(&mut self, time: f64) {
        let cut = self
            .times
            .partition_point(|&t| t <= time + self.min_spacing);
        self.times.drain(..cut);
    }

    /// Earliest pending breakpoint.
    pub fn first(&self) -> Option<f64> {
        self.times.first().copied()
    }

    /// Pending breakpoint after the earliest one.
    pub fn second(&self) -> Option<f64> {
        self.times.get(1).copied()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn clear(&mut self) {
        self.times.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.times.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_insert() {
        let mut b = Breakpoints::new(1e-12);
        b.set(3.0);
        b.set(1.0);
        b.set(2.0);
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_close_points_merge() {
        let mut b = Breakpoints::new(1e-9);
        assert!(b.set(1e-3));
        assert!(!b.set(1e-3 + 1e-12));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_clear_through() {
        let mut b = Breakpoints::new(1e-12);
        for t in [0.0, 1.0, 2.0] {
            b.set(t);
        }
        b.clear_through(1.0);
        assert_eq!(b.first(), Some(2.0));
        assert_eq!(b.second(), None);
    }
}
