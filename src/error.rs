//! Error types.
//!
//! - `CsdError` / `SolverError`: library errors returned by scheme construction,
//!   parameter handling, problem assembly and the QP solver.
//! - `AppError`: what the `csd` binary reports. It carries a process exit code
//!   so `main` can stay tiny.

use thiserror::Error;

/// Errors raised by the convex QP solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("QP dimensions are inconsistent: {0}")]
    Dimensions(String),

    #[error("QP solver failed: {0}")]
    Backend(String),

    #[error("Non-finite solution after {iteration} iterations.")]
    NonFinite { iteration: usize },
}

/// Errors raised while building or fitting a CSD problem.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CsdError {
    #[error(
        "Cannot optimize the volume fractions of multiple models with an orientation at the same time ({count} given)."
    )]
    MultipleOrientedModels { count: usize },

    #[error("Spherical harmonics order must be even, got {0}.")]
    InvalidShOrder(usize),

    #[error("Model uses spherical harmonics order {model} but the optimizer was built for order {optimizer}.")]
    ShOrderMismatch { model: usize, optimizer: usize },

    #[error("At least one compartment model is required.")]
    NoModels,

    #[error("Expected {expected} {what}, got {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("No value available for parameter '{0}'.")]
    MissingParameter(String),

    #[error("Unknown parameter '{0}'.")]
    UnknownParameter(String),

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Invalid acquisition scheme: {0}")]
    InvalidScheme(String),

    #[error("Failed to build the quadrature rule: {0}")]
    Quadrature(String),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<CsdError> for AppError {
    fn from(err: CsdError) -> Self {
        // Numerical failures get their own exit code; everything else is bad input.
        let code = match err {
            CsdError::Solver(_) => 4,
            _ => 2,
        };
        AppError::new(code, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
