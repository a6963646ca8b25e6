use ndarray::Array1;
use thiserror::Error;

use crate::matrix::MatrixError;

/// Failures surfaced by the solve entry points.
///
/// Budget exhaustion, stagnation, cancellation, and timeouts are not errors:
/// they come back as a [`crate::SolveReport`] with `converged = false` and the
/// best iterate populated.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("matrix is not diagonally dominant (strength {strength:e}), required by {method}")]
    NotDominant { method: &'static str, strength: f64 },

    #[error("numerical breakdown in {kernel}: {detail}")]
    Breakdown { kernel: &'static str, detail: String },

    #[error("residual diverged at iteration {iteration}")]
    Diverged {
        iteration: usize,
        /// Last iterate with a finite residual, when one exists.
        last_finite: Option<Array1<f64>>,
    },

    #[error("no applicable method for this system: {reason}")]
    Unsupported { reason: String },
}
