//! Result types for transient analysis.

use crate::output::Plot;

/// Statistics of a transient run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransientSummary {
    /// Accepted time points, the initial one included.
    pub accepted_steps: usize,
    /// Attempts discarded for any reason.
    pub rejected_steps: usize,
    /// Attempts discarded because Newton did not converge.
    pub nr_failures: usize,
    /// Newton iterations over the whole run, operating point included.
    pub iterations: usize,
    /// Smallest step committed (s).
    pub min_step_used: f64,
    /// Largest step committed (s).
    pub max_step_used: f64,
    /// Last committed time (s).
    pub final_time: f64,
}

impl Default for TransientSummary {
    fn default() -> Self {
        Self {
            accepted_steps: 0,
            rejected_steps: 0,
            nr_failures: 0,
            iterations: 0,
            min_step_used: f64::INFINITY,
            max_step_used: 0.0,
            final_time: 0.0,
        }
    }
}

impl TransientSummary {
    pub(crate) fn record_step(&mut self, delta: f64, time: f64) {
        self.accepted_steps += 1;
        self.min_step_used = self.min_step_used.min(delta);
        self.max_step_used = self.max_step_used.max(delta);
        self.final_time = time;
    }
}

/// Real value of `vector` at `time`, linearly interpolated between the two
/// nearest records of a time-domain plot.
///
/// Returns `None` for an unknown vector or a time outside the plot.
pub fn sample(plot: &Plot, vector: &str, time: f64) -> Option<f64> {
    let points = plot.vector(vector)?;
    let first = points.first()?;
    let last = points.last()?;
    if time < first.0 || time > last.0 {
        return None;
    }
    let i = points.partition_point(|(t, _)| *t < time);
    let (t1, v1) = points[i];
    if i == 0 || t1 == time {
        return Some(v1.re);
    }
    let (t0, v0) = points[i - 1];
    let alpha = (time - t0) / (t1 - t0);
    Some(v0.re * (1.0 - alpha) + v1.re * alpha)
}
