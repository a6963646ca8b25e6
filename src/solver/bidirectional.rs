//! Bidirectional single-entry estimation.
//!
//! Forward push from the right-hand side and backward push from the target
//! leave the exact identity
//!
//!   x_t = <e_t, D^{-1}b> + <r_t, e_s> + <r_t, (I - M)^{-1} r_s>
//!
//! with M = I - D^{-1}A. The first two terms are deterministic; the cross
//! term is estimated by Monte-Carlo walks started from indices sampled
//! proportionally to the backward residual, accumulating the forward
//! residual along each walk. The walk is run on the row-transition structure
//! (the one strict row dominance makes substochastic), so the Hoeffding
//! range is ||r_t||_1 * ||r_s||_inf scaled by the geometric walk depth.

use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::cancel::CancelToken;
use crate::error::SolveError;
use crate::matrix::{MatrixError, SparseMatrix};
use crate::solver::push::{PushDirection, PushOperator, run_to_budget};
use crate::solver::random_walk::WalkPlan;
use crate::solver::{EntryEstimate, Method};

/// Cancellation poll cadence, in walks.
const CANCEL_CHECK_WALKS: usize = 256;

/// Walk-count cap; past this the reported half-width simply stays honest.
const MAX_WALKS: usize = 2_000_000;

#[allow(clippy::too_many_arguments)]
pub(crate) fn estimate(
    a: &SparseMatrix,
    b: &Array1<f64>,
    target: usize,
    epsilon: f64,
    confidence: f64,
    push_budget: usize,
    seed: Option<u64>,
    cancel: &CancelToken,
) -> Result<EntryEstimate, SolveError> {
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
            operation: "bidirectional estimate",
        }
        .into());
    }

    let btilde = Array1::from_iter((0..n).map(|i| b[i] * plan.diag_inv(i)));

    // Forward push on D^{-1}b, backward push on the target indicator, each
    // with half the push budget.
    let half_budget = (push_budget / 2).max(1);
    let forward_op = PushOperator::jacobi(a, PushDirection::Forward)?;
    let forward_seeds: Vec<(usize, f64)> = btilde
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v != 0.0)
        .map(|(i, &v)| (i, v))
        .collect();
    let forward = run_to_budget(&forward_op, &forward_seeds, epsilon, half_budget, cancel);

    let backward_op = PushOperator::jacobi(a, PushDirection::Backward)?;
    let backward = run_to_budget(&backward_op, &[(target, 1.0)], epsilon, half_budget, cancel);
    log::debug!(
        "bidirectional: forward pushes={} drained={}; backward pushes={} drained={}",
        forward.pushes,
        forward.drained,
        backward.pushes,
        backward.drained
    );

    // Deterministic part: <e_t, btilde> + <r_t, e_s>.
    let mut det = 0.0;
    for i in 0..n {
        det += backward.estimate[i] * btilde[i] + backward.residual[i] * forward.estimate[i];
    }

    let r_t_l1: f64 = backward.residual.iter().map(|v| v.abs()).sum();
    let r_s_inf = forward.residual.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
    let depth = 1.0 / (1.0 - plan.decay);
    let bound = r_t_l1 * r_s_inf * depth;

    if bound == 0.0 {
        // Both pushes settled; the identity is exact.
        return Ok(EntryEstimate {
            value: det,
            half_width: 0.0,
            variance: 0.0,
            samples: 0,
            method: Method::Bidirectional,
        });
    }

    // Hoeffding sample count for half-width epsilon at the asked confidence.
    let delta = (1.0 - confidence).clamp(1e-12, 0.5);
    let ln_term = (2.0 / delta).ln();
    let wanted = (2.0 * bound * bound * ln_term / (epsilon * epsilon)).ceil() as usize;
    let walks_wanted = wanted.clamp(1, MAX_WALKS);

    // Start-index distribution proportional to |r_t|.
    let starts: Vec<(usize, f64)> = backward
        .residual
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v != 0.0)
        .map(|(i, &v)| (i, v))
        .collect();
    let mut cumulative = Vec::with_capacity(starts.len());
    let mut acc = 0.0;
    for &(_, v) in &starts {
        acc += v.abs();
        cumulative.push(acc);
    }

    let r_s_tail = if r_s_inf > 0.0 {
        0.1 * epsilon * (1.0 - plan.decay) / (r_t_l1.max(f64::MIN_POSITIVE) * r_s_inf)
    } else {
        1.0
    };
    let max_len = plan.length_for_tail(r_s_tail.min(1.0));

    let mut rng = SmallRng::seed_from_u64(seed.unwrap_or(0x5eed_cafe));
    let mut count = 0usize;
    let mut mean = 0.0f64;
    let mut m2 = 0.0f64;
    while count < walks_wanted {
        if count.is_multiple_of(CANCEL_CHECK_WALKS) && count > 0 && cancel.is_cancelled() {
            break;
        }
        let pick: f64 = rng.gen_range(0.0..r_t_l1);
        let slot = cumulative.partition_point(|&c| c <= pick);
        let (start, r_start) = starts[slot.min(starts.len() - 1)];

        // Accumulate the forward residual along one signed walk.
        let mut node = start;
        let mut sign = 1.0;
        let mut along = 0.0;
        for _ in 0..max_len {
            along += sign * forward.residual[node];
            match plan.transition(node, &mut rng) {
                Some((next, step_sign)) => {
                    node = next;
                    sign *= step_sign;
                }
                None => break,
            }
        }
        let x = r_t_l1 * r_start.signum() * along;

        count += 1;
        let d = x - mean;
        mean += d / count as f64;
        m2 += d * (x - mean);
    }

    let samples = count.max(1);
    let half_width = bound * (2.0 * ln_term / samples as f64).sqrt();
    let variance = if count > 1 {
        m2 / (count - 1) as f64
    } else {
        0.0
    };
    Ok(EntryEstimate {
        value: det + mean,
        half_width,
        variance,
        samples: count,
        method: Method::Bidirectional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn exact_when_pushes_drain() {
        // Diagonal system: both pushes settle immediately.
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 2.0), (1, 1, 4.0)]).unwrap();
        let b = array![2.0, 8.0];
        let est = estimate(&a, &b, 1, 0.01, 0.95, 1000, Some(3), &CancelToken::new()).unwrap();
        assert_eq!(est.value, 2.0);
        assert_eq!(est.half_width, 0.0);
        assert_eq!(est.samples, 0);
    }

    #[test]
    fn chain_entry_matches_closed_form() {
        // A = I - 0.5 P over a 10-cycle; x_t for b = e_0 has a closed form.
        let mut triples = Vec::new();
        for i in 0..10 {
            triples.push((i, i, 1.0));
            triples.push((i, (i + 1) % 10, -0.5));
        }
        let a = SparseMatrix::from_triples(10, 10, &triples).unwrap();
        let mut b = Array1::zeros(10);
        b[0] = 1.0;

        let target = 3;
        let exact = 0.5f64.powi((10 - target) as i32) / (1.0 - 0.5f64.powi(10));

        let est = estimate(&a, &b, target, 0.01, 0.95, 10_000, Some(11), &CancelToken::new())
            .unwrap();
        assert!(est.half_width <= 0.01, "half width {}", est.half_width);
        assert!(
            (est.value - exact).abs() <= 3.0 * est.half_width.max(1e-6),
            "estimate {} vs exact {exact}",
            est.value
        );
    }

    #[test]
    fn tiny_budget_still_produces_a_bounded_estimate() {
        let mut triples = Vec::new();
        for i in 0..50 {
            triples.push((i, i, 2.0));
            triples.push((i, (i + 1) % 50, -0.9));
        }
        let a = SparseMatrix::from_triples(50, 50, &triples).unwrap();
        let b = Array1::from_elem(50, 1.0);
        let est = estimate(&a, &b, 7, 0.05, 0.95, 64, Some(5), &CancelToken::new()).unwrap();
        assert!(est.value.is_finite());
        assert!(est.half_width.is_finite());
    }

    #[test]
    fn seeded_runs_are_identical() {
        let mut triples = Vec::new();
        for i in 0..20 {
            triples.push((i, i, 3.0));
            triples.push((i, (i + 1) % 20, -1.0));
            triples.push(((i + 1) % 20, i, -0.5));
        }
        let a = SparseMatrix::from_triples(20, 20, &triples).unwrap();
        let b = Array1::from_elem(20, 1.0);
        let run = || estimate(&a, &b, 4, 0.02, 0.95, 200, Some(21), &CancelToken::new()).unwrap();
        let (x, y) = (run(), run());
        assert_eq!(x.value.to_bits(), y.value.to_bits());
        assert_eq!(x.samples, y.samples);
    }
}
