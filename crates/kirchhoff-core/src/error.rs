//! Error types for kirchhoff-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("allocation failed while growing to {requested} entries")]
    OutOfMemory { requested: usize },

    #[error("singular matrix (row {row})")]
    SingularMatrix { row: usize },

    #[error("ill-conditioned matrix (condition estimate {estimate:e})")]
    IllConditioned { estimate: f64 },

    #[error("matrix reordering failed: {0}")]
    ReorderFailure(String),

    #[error("matrix has not been factored")]
    NotFactored,

    #[error("invalid dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    #[error("{device}: load failed: {reason}")]
    DeviceLoad { device: String, reason: String },

    #[error("{device}: unknown parameter {param}")]
    UnknownParameter { device: String, param: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid circuit: {0}")]
    InvalidCircuit(String),
}

impl Error {
    /// True for the two factorization failures that Newton iteration treats
    /// as a failed iteration rather than a fatal error.
    pub fn is_matrix_failure(&self) -> bool {
        matches!(
            self,
            Error::SingularMatrix { .. } | Error::IllConditioned { .. }
        )
    }

    /// Convenience constructor used by device models.
    pub fn device_load(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DeviceLoad {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
