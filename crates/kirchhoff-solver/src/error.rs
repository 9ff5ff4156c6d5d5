//! Error types for kirchhoff-solver.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] kirchhoff_core::Error),

    #[error("convergence failed after {iterations} iterations")]
    ConvergenceFailed { iterations: usize },

    #[error("timestep too small at t = {time:e} (delta = {delta:e})")]
    TimestepTooSmall { time: f64, delta: f64 },

    #[error("no convergence at t = {time:e} after {retries} step reductions")]
    RetriesExhausted { time: f64, retries: usize },

    #[error("analysis paused")]
    Paused,

    #[error("invalid analysis: {0}")]
    InvalidJob(String),

    #[error("{device}: created nodes outside of setup")]
    InternalNodeAllocation { device: String },

    #[error("no operating point available")]
    NoOperatingPoint,
}

impl Error {
    /// True when the analysis stopped on request rather than on failure.
    pub fn is_pause(&self) -> bool {
        matches!(self, Error::Paused)
    }

    /// True when a factorization failed (singular or ill-conditioned).
    pub fn is_matrix_failure(&self) -> bool {
        matches!(self, Error::Core(e) if e.is_matrix_failure())
    }

    /// True for failures that a stepping or retry policy may recover from.
    pub fn is_convergence_failure(&self) -> bool {
        matches!(self, Error::ConvergenceFailed { .. }) || self.is_matrix_failure()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_convert() {
        let e: Error = kirchhoff_core::Error::SingularMatrix { row: 3 }.into();
        assert!(e.is_matrix_failure());
        assert!(e.is_convergence_failure());
        assert!(!e.is_pause());
        assert_eq!(e.to_string(), "singular matrix (row 3)");
    }

    #[test]
    fn test_pause_is_distinct() {
        assert!(Error::Paused.is_pause());
        assert!(!Error::Paused.is_convergence_failure());
    }
}
