//! Error types for solver operations.

use pf_components::ComponentError;
use pf_core::{CoreError, VariantId};
use thiserror::Error;

/// Errors that can occur while building or solving the network equations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// Factorization of a variant failed or produced a negligible pivot.
    #[error("System matrix of variant '{variant}' is singular (pivot {pivot:e} at row {row})")]
    SingularSystem {
        variant: String,
        row: usize,
        pivot: f64,
    },

    #[error("Unknown topology variant {id}")]
    InvalidVariant { id: VariantId },

    #[error("System has no unknowns")]
    EmptySystem,

    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The solve produced NaN or infinity.
    #[error("Non-finite {what} at index {index}")]
    NonFinite { what: &'static str, index: usize },

    #[error("Solver resources already released")]
    Released,

    #[error("Component error: {0}")]
    Component(#[from] ComponentError),

    #[error("Attribute error: {0}")]
    Core(#[from] CoreError),
}

pub type SolverResult<T> = Result<T, SolverError>;

impl SolverError {
    /// Errors raised while building variants, before any step runs.
    pub fn is_configuration(&self) -> bool {
        match self {
            SolverError::SingularSystem { .. }
            | SolverError::InvalidVariant { .. }
            | SolverError::EmptySystem
            | SolverError::DimensionMismatch { .. } => true,
            SolverError::Component(e) => e.is_configuration(),
            _ => false,
        }
    }
}
