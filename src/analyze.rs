//! Structural analysis of a sparse matrix: diagonal dominance, symmetry,
//! sparsity, and optional spectral estimates. The method oracle routes on
//! this report, and the dominance strength gates the Neumann and push
//! kernels.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::matrix::{MatrixError, SparseMatrix};
use crate::ops;

pub const DEFAULT_SYMMETRY_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dominance {
    Row,
    Column,
    Both,
    None,
}

impl Dominance {
    pub fn is_dominant(self) -> bool {
        !matches!(self, Dominance::None)
    }
}

/// How to estimate the spectral radius, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpectralEstimate {
    Off,
    /// max_i sum_j |a_ij|, one O(nnz) pass.
    Gershgorin,
    /// Power iteration on |A| with the given iteration cap.
    PowerIteration { max_iterations: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeOptions {
    pub spectral: SpectralEstimate,
    /// Condition estimate is attempted only for symmetric matrices.
    pub estimate_condition: bool,
    pub symmetry_tolerance: f64,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            spectral: SpectralEstimate::Gershgorin,
            estimate_condition: false,
            symmetry_tolerance: DEFAULT_SYMMETRY_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub dominance: Dominance,
    /// min_i (|a_ii| - sum_{j != i} |a_ij|) / |a_ii|; negative infinity when a
    /// diagonal entry is missing. Positive iff strictly row dominant.
    pub dominance_strength: f64,
    pub symmetric: bool,
    /// 1 - nnz / (rows * cols)
    pub sparsity: f64,
    pub spectral_radius: Option<f64>,
    pub condition_estimate: Option<f64>,
}

impl AnalysisReport {
    pub fn is_dominant(&self) -> bool {
        self.dominance.is_dominant()
    }
}

pub fn analyze(a: &SparseMatrix, opts: &AnalyzeOptions) -> Result<AnalysisReport, MatrixError> {
    let n = a.require_square("analyze")?;
    let csr = a.csr();

    // Row and column scans in one O(nnz) pass over the row view; the column
    // view is never forced here.
    let mut col_abs = vec![0.0f64; n];
    let mut row_dominant = true;
    let mut col_dominant = true;
    let mut strength = f64::INFINITY;

    for i in 0..n {
        let (cols, vals) = csr.row(i);
        let mut off = 0.0;
        let mut diag = 0.0;
        for (&j, &v) in cols.iter().zip(vals) {
            col_abs[j] += v.abs();
            if j == i {
                diag = v.abs();
            } else {
                off += v.abs();
            }
        }
        if diag < off {
            row_dominant = false;
        }
        let s = if diag > 0.0 {
            (diag - off) / diag
        } else {
            f64::NEG_INFINITY
        };
        strength = strength.min(s);
    }
    for j in 0..n {
        let diag = a.diagonal(j)?.abs();
        if diag < col_abs[j] - diag {
            col_dominant = false;
        }
    }

    let dominance = match (row_dominant, col_dominant) {
        (true, true) => Dominance::Both,
        (true, false) => Dominance::Row,
        (false, true) => Dominance::Column,
        (false, false) => Dominance::None,
    };

    let cells = (n * n).max(1);
    let sparsity = 1.0 - a.nnz() as f64 / cells as f64;
    let symmetric = is_symmetric(a, opts.symmetry_tolerance);

    let spectral_radius = match opts.spectral {
        SpectralEstimate::Off => None,
        SpectralEstimate::Gershgorin => a.abs_row_sums().into_iter().reduce(f64::max),
        SpectralEstimate::PowerIteration { max_iterations } => {
            power_iteration(n, max_iterations, |x, y| abs_mat_vec(a, x, y))
        }
    };

    let condition_estimate = if opts.estimate_condition && symmetric {
        condition_symmetric(a, n)
    } else {
        None
    };

    Ok(AnalysisReport {
        dominance,
        dominance_strength: strength,
        symmetric,
        sparsity,
        spectral_radius,
        condition_estimate,
    })
}

/// A is symmetric iff every stored (i, j, v) has a partner (j, i, v') with
/// |v - v'| within the relative tolerance.
fn is_symmetric(a: &SparseMatrix, tol: f64) -> bool {
    if !a.is_square() {
        return false;
    }
    let csr = a.csr();
    for i in 0..a.rows() {
        let (cols, vals) = csr.row(i);
        for (&j, &v) in cols.iter().zip(vals) {
            let (tcols, tvals) = csr.row(j);
            let Ok(p) = tcols.binary_search(&i) else {
                return false;
            };
            let w = tvals[p];
            if (v - w).abs() > tol * v.abs().max(w.abs()) {
                return false;
            }
        }
    }
    true
}

fn abs_mat_vec(a: &SparseMatrix, x: &Array1<f64>, y: &mut Array1<f64>) {
    let csr = a.csr();
    for i in 0..a.rows() {
        let (cols, vals) = csr.row(i);
        let mut acc = 0.0;
        for (&j, &v) in cols.iter().zip(vals) {
            acc += v.abs() * x[j];
        }
        y[i] = acc;
    }
}

/// Dominant-eigenvalue magnitude via power iteration with a deterministic
/// uniform start vector. Returns None when the iterate collapses.
fn power_iteration(
    n: usize,
    max_iterations: usize,
    mut apply: impl FnMut(&Array1<f64>, &mut Array1<f64>),
) -> Option<f64> {
    if n == 0 {
        return None;
    }
    let mut v = Array1::from_elem(n, 1.0 / (n as f64).sqrt());
    let mut w = Array1::zeros(n);
    let mut lambda = 0.0f64;
    for _ in 0..max_iterations.max(1) {
        apply(&v, &mut w);
        let norm = ops::norm2(&w);
        if !norm.is_finite() || norm == 0.0 {
            return None;
        }
        let next = norm;
        ops::copy(&w, &mut v);
        ops::scale(1.0 / norm, &mut v);
        if (next - lambda).abs() <= 1e-6 * next.abs() {
            return Some(next);
        }
        lambda = next;
    }
    Some(lambda)
}

/// Best-effort condition estimate for symmetric A: lambda_max by power
/// iteration on A, lambda_min via the shifted operator lambda_max * I - A.
fn condition_symmetric(a: &SparseMatrix, n: usize) -> Option<f64> {
    let iters = 100;
    let lambda_max = power_iteration(n, iters, |x, y| {
        let _ = a.mat_vec(x, y);
    })?;
    let shifted = power_iteration(n, iters, |x, y| {
        let _ = a.mat_vec(x, y);
        for i in 0..n {
            y[i] = lambda_max * x[i] - y[i];
        }
    })?;
    let lambda_min = (lambda_max - shifted).abs();
    if lambda_min <= f64::EPSILON * lambda_max.abs() {
        None
    } else {
        Some(lambda_max.abs() / lambda_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tridiag() -> SparseMatrix {
        SparseMatrix::from_triples(
            3,
            3,
            &[
                (0, 0, 4.0),
                (0, 1, -1.0),
                (1, 0, -1.0),
                (1, 1, 4.0),
                (1, 2, -1.0),
                (2, 1, -1.0),
                (2, 2, 3.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn symmetric_by_construction_is_symmetric() {
        let report = analyze(&tridiag(), &AnalyzeOptions::default()).unwrap();
        assert!(report.symmetric);
        assert_eq!(report.dominance, Dominance::Both);
        assert!(report.dominance_strength > 0.0);
    }

    #[test]
    fn violated_row_breaks_dominance() {
        // Row 1 has |diag| = 1 < 3 = off-diagonal mass.
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0), (1, 1, 1.0)])
            .unwrap();
        let report = analyze(&a, &AnalyzeOptions::default()).unwrap();
        assert!(!report.is_dominant());
        assert!(report.dominance_strength < 0.0);
        assert!(!report.symmetric);
    }

    #[test]
    fn sparsity_ratio() {
        let report = analyze(&tridiag(), &AnalyzeOptions::default()).unwrap();
        assert!((report.sparsity - (1.0 - 7.0 / 9.0)).abs() < 1e-15);
    }

    #[test]
    fn gershgorin_bound_is_max_abs_row_sum() {
        let report = analyze(&tridiag(), &AnalyzeOptions::default()).unwrap();
        assert_eq!(report.spectral_radius, Some(6.0));
    }

    #[test]
    fn power_iteration_close_to_gershgorin_for_diagonal() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 2.0), (1, 1, 5.0)]).unwrap();
        let opts = AnalyzeOptions {
            spectral: SpectralEstimate::PowerIteration { max_iterations: 200 },
            ..AnalyzeOptions::default()
        };
        let report = analyze(&a, &opts).unwrap();
        let rho = report.spectral_radius.unwrap();
        assert!((rho - 5.0).abs() < 1e-3, "rho = {rho}");
    }

    #[test]
    fn condition_estimate_for_spd() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 2.0), (1, 1, 8.0)]).unwrap();
        let opts = AnalyzeOptions {
            estimate_condition: true,
            ..AnalyzeOptions::default()
        };
        let report = analyze(&a, &opts).unwrap();
        let cond = report.condition_estimate.unwrap();
        assert!((cond - 4.0).abs() < 0.1, "cond = {cond}");
    }

    #[test]
    fn missing_diagonal_gives_negative_infinity_strength() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 1, 1.0), (1, 0, 1.0)]).unwrap();
        let report = analyze(&a, &AnalyzeOptions::default()).unwrap();
        assert_eq!(report.dominance_strength, f64::NEG_INFINITY);
        assert!(!report.is_dominant());
    }
}
