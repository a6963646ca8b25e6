//! Monte-Carlo single-entry estimation.
//!
//! The Jacobi reduction x = Mx + D^{-1}b with M = I - D^{-1}A turns x_t into
//! a sum over walks from t: a walk survives at node i with probability
//! sum_j |M_ij| (< 1 under strict row dominance, so termination is the
//! restart event), steps to j with probability proportional to |M_ij|, and
//! carries the product of the traversed signs. Accumulating the signed
//! right-hand side along the walk gives an unbiased estimate of x_t.
//!
//! Sampling stops adaptively once the running confidence interval is tighter
//! than the requested accuracy, or at the sample cap.

use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::cancel::CancelToken;
use crate::error::SolveError;
use crate::matrix::{MatrixError, SparseMatrix};
use crate::solver::{EntryEstimate, Method};

/// Cancellation poll cadence, in walks.
const CANCEL_CHECK_WALKS: usize = 256;

/// Minimum samples before the interval test may stop the run.
const MIN_SAMPLES: usize = 32;

/// z-score for a two-sided interval at the given confidence. Exact for the
/// common levels; the subgaussian bound sqrt(2 ln(2/(1-c))) otherwise.
pub(crate) fn z_for_confidence(confidence: f64) -> f64 {
    if (confidence - 0.90).abs() < 1e-12 {
        1.6448536269514722
    } else if (confidence - 0.95).abs() < 1e-12 {
        1.959963984540054
    } else if (confidence - 0.99).abs() < 1e-12 {
        2.5758293035489004
    } else {
        let delta = (1.0 - confidence).clamp(1e-12, 1.0);
        (2.0 * (2.0 / delta).ln()).sqrt()
    }
}

/// Row-transition structure of M = I - D^{-1}A.
#[derive(Debug)]
pub(crate) struct WalkPlan<'a> {
    store: &'a SparseMatrix,
    diag: Vec<f64>,
    /// sum_{j != i} |a_ij|
    off_abs: Vec<f64>,
    /// Survival probability sum_j |M_ij| = off_abs / |diag|.
    survival: Vec<f64>,
    /// max_i survival, the walk decay factor.
    pub decay: f64,
}

impl<'a> WalkPlan<'a> {
    pub(crate) fn new(a: &'a SparseMatrix) -> Result<Self, SolveError> {
        let n = a.require_square("random-walk estimate")?;
        let row_sums = a.abs_row_sums();
        let mut diag = Vec::with_capacity(n);
        let mut off_abs = Vec::with_capacity(n);
        let mut survival = Vec::with_capacity(n);
        let mut decay = 0.0f64;
        for i in 0..n {
            let d = a.diagonal(i)?;
            if d == 0.0 {
                return Err(MatrixError::ZeroDiagonal {
                    row: i,
                    operation: "random-walk estimate",
                }
                .into());
            }
            let off = row_sums[i] - d.abs();
            let s = off / d.abs();
            decay = decay.max(s);
            diag.push(d);
            off_abs.push(off);
            survival.push(s);
        }
        if decay >= 1.0 {
            return Err(SolveError::NotDominant {
                method: "random-walk",
                strength: 1.0 - decay,
            });
        }
        Ok(Self {
            store: a,
            diag,
            off_abs,
            survival,
            decay,
        })
    }

    pub(crate) fn n(&self) -> usize {
        self.diag.len()
    }

    pub(crate) fn diag_inv(&self, i: usize) -> f64 {
        1.0 / self.diag[i]
    }

    /// Walk length after which the truncated geometric tail is below `frac`
    /// of its head.
    pub(crate) fn length_for_tail(&self, frac: f64) -> usize {
        if self.decay == 0.0 {
            return 1;
        }
        let len = (frac.max(1e-300).ln() / self.decay.ln()).ceil();
        (len as usize).clamp(1, 100_000)
    }

    /// One transition from `node`: survival draw, then a scan of the row's
    /// off-diagonal mass. Returns the next node and the sign of the traversed
    /// M entry, or None when the walk restarts.
    pub(crate) fn transition(&self, node: usize, rng: &mut SmallRng) -> Option<(usize, f64)> {
        let s = self.survival[node];
        if s == 0.0 {
            return None;
        }
        let u: f64 = rng.gen_range(0.0..1.0);
        if u >= s {
            return None;
        }
        // Conditioned on survival, u/s is uniform; reuse it for the target.
        let target = (u / s) * self.off_abs[node];
        let (cols, vals) = self.store.csr().row(node);
        let mut acc = 0.0;
        let mut chosen = None;
        for (&j, &v) in cols.iter().zip(vals) {
            if j == node {
                continue;
            }
            acc += v.abs();
            chosen = Some((j, v));
            if acc > target {
                break;
            }
        }
        // sign(M_ij) = sign(-a_ij / a_ii)
        chosen.map(|(j, v)| (j, -(v.signum()) * self.diag[node].signum()))
    }
}

#[derive(Debug)]
pub(crate) struct RandomWalkEstimator<'a> {
    plan: WalkPlan<'a>,
    btilde: Array1<f64>,
    target: usize,
    max_len: usize,
    epsilon: f64,
    z: f64,
    sample_cap: usize,
    rng: SmallRng,
}

impl<'a> RandomWalkEstimator<'a> {
    pub(crate) fn new(
        a: &'a SparseMatrix,
        b: &Array1<f64>,
        target: usize,
        epsilon: f64,
        confidence: f64,
        sample_cap: usize,
        seed: Option<u64>,
    ) -> Result<Self, SolveError> {
        let plan = WalkPlan::new(a)?;
        let n = plan.n();
        if target >= n {
            return Err(MatrixError::IndexOutOfRange {
                index: target,
                dim: n,
            }
            .into());
        }
        if b.len() != n {
            return Err(MatrixError::DimensionMismatch {
                expected: n,
                actual: b.len(),
                operation: "random-walk estimate",
            }
            .into());
        }
        let btilde = Array1::from_iter((0..n).map(|i| b[i] * plan.diag_inv(i)));
        // Truncation keeps the deterministic bias well under the target
        // accuracy.
        let b_inf = btilde.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
        let tail = if b_inf > 0.0 {
            0.1 * epsilon * (1.0 - plan.decay) / b_inf
        } else {
            1.0
        };
        let max_len = plan.length_for_tail(tail);
        Ok(Self {
            plan,
            btilde,
            target,
            max_len,
            epsilon,
            z: z_for_confidence(confidence),
            sample_cap: sample_cap.max(MIN_SAMPLES),
            rng: SmallRng::seed_from_u64(seed.unwrap_or(0x5eed_cafe)),
        })
    }

    fn walk(&mut self) -> f64 {
        let mut node = self.target;
        let mut sign = 1.0;
        let mut x = 0.0;
        for _ in 0..self.max_len {
            x += sign * self.btilde[node];
            match self.plan.transition(node, &mut self.rng) {
                Some((next, step_sign)) => {
                    node = next;
                    sign *= step_sign;
                }
                None => break,
            }
        }
        x
    }

    pub(crate) fn run(mut self, cancel: &CancelToken) -> EntryEstimate {
        // Welford running mean/variance.
        let mut count = 0usize;
        let mut mean = 0.0f64;
        let mut m2 = 0.0f64;
        let mut half_width = f64::INFINITY;

        while count < self.sample_cap {
            if count.is_multiple_of(CANCEL_CHECK_WALKS) && count > 0 && cancel.is_cancelled() {
                break;
            }
            let x = self.walk();
            count += 1;
            let d = x - mean;
            mean += d / count as f64;
            m2 += d * (x - mean);

            if count >= MIN_SAMPLES {
                let var = m2 / (count - 1) as f64;
                half_width = self.z * (var / count as f64).sqrt();
                if half_width <= self.epsilon {
                    break;
                }
            }
        }

        let variance = if count > 1 {
            m2 / (count - 1) as f64
        } else {
            0.0
        };
        if !half_width.is_finite() {
            half_width = self.z * (variance / count.max(1) as f64).sqrt();
        }
        EntryEstimate {
            value: mean,
            half_width,
            variance,
            samples: count,
            method: Method::RandomWalk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn diagonal_system_is_exact_with_zero_variance() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 2.0), (1, 1, 4.0)]).unwrap();
        let b = array![2.0, 8.0];
        let est = RandomWalkEstimator::new(&a, &b, 1, 0.01, 0.95, 10_000, Some(7))
            .unwrap()
            .run(&CancelToken::new());
        assert_eq!(est.value, 2.0);
        assert_eq!(est.variance, 0.0);
        assert_eq!(est.method, Method::RandomWalk);
    }

    #[test]
    fn dominant_system_estimate_is_close() {
        // x = [5, 5, 5] for this system.
        let a = SparseMatrix::from_triples(
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
        .unwrap();
        let b = array![15.0, 10.0, 10.0];
        let est = RandomWalkEstimator::new(&a, &b, 0, 0.05, 0.95, 200_000, Some(42))
            .unwrap()
            .run(&CancelToken::new());
        assert!(
            (est.value - 5.0).abs() <= 3.0 * est.half_width.max(0.05),
            "estimate {} +/- {}",
            est.value,
            est.half_width
        );
        assert!(est.samples >= MIN_SAMPLES);
    }

    #[test]
    fn identical_seeds_reproduce() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 2.0), (0, 1, -0.5), (1, 1, 2.0)]).unwrap();
        let b = array![1.0, 1.0];
        let run = |seed| {
            RandomWalkEstimator::new(&a, &b, 0, 1e-4, 0.95, 5_000, Some(seed))
                .unwrap()
                .run(&CancelToken::new())
        };
        let (x, y) = (run(99), run(99));
        assert_eq!(x.value.to_bits(), y.value.to_bits());
        assert_eq!(x.samples, y.samples);
    }

    #[test]
    fn refuses_non_dominant() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 1, 1.0)]).unwrap();
        let b = array![1.0, 1.0];
        let err = RandomWalkEstimator::new(&a, &b, 0, 0.01, 0.95, 100, None).unwrap_err();
        assert!(matches!(err, SolveError::NotDominant { .. }));
    }
}
