//! Conjugate-gradient fallback for symmetric, well-conditioned systems the
//! local kernels do not cover.

use ndarray::{Array1, Zip};

use crate::error::SolveError;
use crate::matrix::SparseMatrix;
use crate::ops;
use crate::solver::{Kernel, Method, ResidualSample, StepOutcome};

const BREAKDOWN_EPS: f64 = 1e-16;

pub(crate) struct CgKernel<'a> {
    a: &'a SparseMatrix,
    b: Array1<f64>,
    b_norm: f64,
    x: Array1<f64>,
    r: Array1<f64>,
    p: Array1<f64>,
    ap: Array1<f64>,
    rr: f64,
    iterations: usize,
}

impl<'a> CgKernel<'a> {
    pub(crate) fn new(
        a: &'a SparseMatrix,
        b: &Array1<f64>,
        warm_start: Option<&Array1<f64>>,
    ) -> Result<Self, SolveError> {
        let n = a.require_square("conjugate-gradient solve")?;

        let mut x = Array1::zeros(n);
        let mut r = b.clone();
        if let Some(x0) = warm_start {
            let mut ax0 = Array1::zeros(n);
            a.mat_vec(x0, &mut ax0)?;
            Zip::from(&mut r).and(&ax0).for_each(|rv, av| *rv -= av);
            x.assign(x0);
        }
        let p = r.clone();
        let rr = ops::dot(&r, &r);

        Ok(Self {
            a,
            b: b.clone(),
            b_norm: ops::norm2(b),
            x,
            r,
            p,
            ap: Array1::zeros(n),
            rr,
            iterations: 0,
        })
    }
}

impl Kernel for CgKernel<'_> {
    fn step(&mut self) -> Result<StepOutcome, SolveError> {
        if self.rr == 0.0 {
            return Ok(StepOutcome::Finished);
        }

        self.a.mat_vec(&self.p, &mut self.ap)?;
        let pap = ops::dot(&self.p, &self.ap);
        if pap.abs() < BREAKDOWN_EPS {
            return Err(SolveError::Breakdown {
                kernel: "conjugate-gradient",
                detail: format!("p'Ap = {pap:e} below breakdown threshold"),
            });
        }

        let alpha = self.rr / pap;
        ops::axpy(alpha, &self.p, &mut self.x);
        ops::axpy(-alpha, &self.ap, &mut self.r);

        let rr_next = ops::dot(&self.r, &self.r);
        let beta = rr_next / self.rr;
        // p <- r + beta * p
        ops::scale(beta, &mut self.p);
        ops::axpy(1.0, &self.r, &mut self.p);
        self.rr = rr_next;
        self.iterations += 1;

        let norm = rr_next.sqrt();
        let relative = if self.b_norm > 0.0 {
            norm / self.b_norm
        } else {
            norm
        };
        // The recurrence residual is a faithful estimator; exact recomputation
        // happens on the monitor's check cadence.
        Ok(StepOutcome::Continue(Some(ResidualSample {
            norm,
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
            .mat_vec(&self.x, &mut self.ap)
            .expect("dimensions checked at construction");
        let mut acc = 0.0;
        Zip::from(&self.b).and(&self.ap).for_each(|bv, av| {
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
        5 * self.x.len() * size_of::<f64>()
    }

    fn method(&self) -> Method {
        Method::ConjugateGradient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn spd_two_by_two_in_two_steps() {
        // A = [4 1; 1 3], b = [1, 2] -> x = [1/11, 7/11]
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)])
            .unwrap();
        let b = array![1.0, 2.0];
        let mut kernel = CgKernel::new(&a, &b, None).unwrap();
        for _ in 0..2 {
            let _ = kernel.step().unwrap();
        }
        let x = kernel.solution();
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-12);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-12);
        assert!(kernel.exact_residual().relative < 1e-12);
    }

    #[test]
    fn breakdown_on_zero_curvature() {
        // A = [0 1; 1 0] with b = [1, 0]: p = b, Ap = [0, 1], p'Ap = 0.
        let a = SparseMatrix::from_triples(2, 2, &[(0, 1, 1.0), (1, 0, 1.0)]).unwrap();
        let b = array![1.0, 0.0];
        let mut kernel = CgKernel::new(&a, &b, None).unwrap();
        let err = kernel.step().unwrap_err();
        assert!(matches!(err, SolveError::Breakdown { .. }));
    }

    #[test]
    fn warm_start_at_solution_is_already_done() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 2.0), (1, 1, 4.0)]).unwrap();
        let b = array![2.0, 8.0];
        let exact = array![1.0, 2.0];
        let mut kernel = CgKernel::new(&a, &b, Some(&exact)).unwrap();
        assert!(matches!(kernel.step().unwrap(), StepOutcome::Finished));
    }
}
