//! Truncated Neumann series for diagonally dominant systems.
//!
//! Solves Ax = b through the scaled splitting M = I - sA with
//! s = 1 / max_i sum_j |a_ij|: x = s * sum_k M^k b. The series converges when
//! ||M||_inf < 1, which the constructor verifies exactly before iterating.

use ndarray::{Array1, Zip};

use crate::error::SolveError;
use crate::matrix::SparseMatrix;
use crate::ops;
use crate::solver::{Kernel, Method, ResidualSample, StepOutcome};

#[derive(Debug)]
pub(crate) struct NeumannKernel<'a> {
    a: &'a SparseMatrix,
    b: Array1<f64>,
    b_norm: f64,
    x: Array1<f64>,
    term: Array1<f64>,
    scratch: Array1<f64>,
    s: f64,
    /// Series tail cutoff: tol * 1e-3.
    tail_bound: f64,
    iterations: usize,
}

impl<'a> NeumannKernel<'a> {
    pub(crate) fn new(
        a: &'a SparseMatrix,
        b: &Array1<f64>,
        warm_start: Option<&Array1<f64>>,
        tolerance: f64,
    ) -> Result<Self, SolveError> {
        let n = a.require_square("neumann solve")?;

        let row_sums = a.abs_row_sums();
        let max_row = row_sums.iter().copied().fold(0.0f64, f64::max);
        if max_row == 0.0 {
            return Err(SolveError::Breakdown {
                kernel: "neumann",
                detail: "divide-by-zero in scaling: matrix has no nonzeros".to_string(),
            });
        }
        let s = 1.0 / max_row;

        // ||I - sA||_inf, exact in one O(nnz) pass. A margin <= 0 means no
        // scaled contraction is provable and the series may not converge.
        let mut m_norm = 0.0f64;
        for i in 0..n {
            let diag = a.diagonal(i)?;
            let off = row_sums[i] - diag.abs();
            m_norm = m_norm.max((1.0 - s * diag).abs() + s * off);
        }
        if m_norm >= 1.0 {
            return Err(SolveError::NotDominant {
                method: "neumann",
                strength: 1.0 - m_norm,
            });
        }

        // A warm start x0 shifts the series onto the residual system
        // A(x - x0) = b - A x0.
        let mut x = Array1::zeros(n);
        let mut term = b.clone();
        if let Some(x0) = warm_start {
            let mut ax0 = Array1::zeros(n);
            a.mat_vec(x0, &mut ax0)?;
            Zip::from(&mut term).and(&ax0).for_each(|t, av| *t -= av);
            x.assign(x0);
        }
        ops::scale(s, &mut term);
        Zip::from(&mut x).and(&term).for_each(|xv, tv| *xv += tv);

        Ok(Self {
            a,
            b: b.clone(),
            b_norm: ops::norm2(b),
            x,
            term,
            scratch: Array1::zeros(n),
            s,
            tail_bound: tolerance * 1e-3,
            iterations: 0,
        })
    }

    pub(crate) fn contraction_bound(a: &SparseMatrix) -> Option<f64> {
        let n = a.require_square("neumann bound").ok()?;
        let row_sums = a.abs_row_sums();
        let max_row = row_sums.iter().copied().fold(0.0f64, f64::max);
        if max_row == 0.0 {
            return None;
        }
        let s = 1.0 / max_row;
        let mut m_norm = 0.0f64;
        for i in 0..n {
            let diag = a.diagonal(i).ok()?;
            let off = row_sums[i] - diag.abs();
            m_norm = m_norm.max((1.0 - s * diag).abs() + s * off);
        }
        Some(m_norm)
    }
}

impl Kernel for NeumannKernel<'_> {
    fn step(&mut self) -> Result<StepOutcome, SolveError> {
        // term <- M term = term - s * (A term); x <- x + term
        self.a.mat_vec(&self.term, &mut self.scratch)?;
        ops::axpy(-self.s, &self.scratch, &mut self.term);
        Zip::from(&mut self.x)
            .and(&self.term)
            .for_each(|xv, tv| *xv += tv);
        self.iterations += 1;

        let term_norm = ops::norm2(&self.term);
        if !term_norm.is_finite() {
            return Ok(StepOutcome::Continue(Some(ResidualSample {
                norm: f64::INFINITY,
                relative: f64::INFINITY,
            })));
        }
        if term_norm < self.tail_bound {
            return Ok(StepOutcome::Finished);
        }
        // The term norm bounds the remaining correction and serves as the
        // cheap residual estimate between exact checks.
        let relative = if self.b_norm > 0.0 {
            term_norm / self.b_norm
        } else {
            term_norm
        };
        Ok(StepOutcome::Continue(Some(ResidualSample {
            norm: term_norm,
            relative,
        })))
    }

    fn iterations(&self) -> usize {
        self.iterations
    }

    fn solution(&self) -> &Array1<f64> {
        &self.x
    }

    fn exact_residual(&mut self) -> ResidualSample {
        self.a
            .mat_vec(&self.x, &mut self.scratch)
            .expect("dimensions checked at construction");
        let mut acc = 0.0;
        Zip::from(&self.b).and(&self.scratch).for_each(|bv, av| {
            let d = bv - av;
            acc += d * d;
        });
        let norm = acc.sqrt();
        ResidualSample {
            norm,
            relative: if self.b_norm > 0.0 {
                norm / self.b_norm
            } else {
                norm
            },
        }
    }

    fn memory_bytes(&self) -> usize {
        4 * self.x.len() * size_of::<f64>()
    }

    fn method(&self) -> Method {
        Method::Neumann
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn dominant() -> SparseMatrix {
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
    fn series_converges_on_dominant_system() {
        let a = dominant();
        let b = array![15.0, 10.0, 10.0];
        let mut kernel = NeumannKernel::new(&a, &b, None, 1e-10).unwrap();
        for _ in 0..500 {
            if matches!(kernel.step().unwrap(), StepOutcome::Finished) {
                break;
            }
        }
        let sample = kernel.exact_residual();
        assert!(sample.relative <= 1e-10, "rel = {:e}", sample.relative);
    }

    #[test]
    fn refuses_non_dominant_matrix() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0), (1, 1, 1.0)])
            .unwrap();
        let b = array![1.0, 1.0];
        let err = NeumannKernel::new(&a, &b, None, 1e-8).unwrap_err();
        assert!(matches!(err, SolveError::NotDominant { .. }));
    }

    #[test]
    fn refuses_negative_diagonal() {
        // Dominant in magnitude, but I - sA is no contraction.
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, -4.0), (1, 1, 4.0)]).unwrap();
        let b = array![1.0, 1.0];
        let err = NeumannKernel::new(&a, &b, None, 1e-8).unwrap_err();
        assert!(matches!(err, SolveError::NotDominant { .. }));
    }

    #[test]
    fn warm_start_at_solution_finishes_immediately() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 2.0), (1, 1, 4.0)]).unwrap();
        let b = array![2.0, 8.0];
        let exact = array![1.0, 2.0];
        let mut kernel = NeumannKernel::new(&a, &b, Some(&exact), 1e-8).unwrap();
        assert!(matches!(kernel.step().unwrap(), StepOutcome::Finished));
        let sample = kernel.exact_residual();
        assert!(sample.relative <= 1e-12);
    }
}
