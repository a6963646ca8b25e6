//! PageRank over a nonnegative adjacency matrix.
//!
//! The scores solve (I - d P^T) x = (1 - d) p, where P is the row-normalized
//! adjacency with dangling rows replaced by the personalization row. Full
//! vectors run the damped power series with the dangling mass folded in
//! analytically; top-k queries run forward push with restart 1 - d and
//! recycle leaked dangling mass through p, so dangling rows are never
//! materialized. Either way the result is post-normalized to sum to one,
//! absorbing rounding drift.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::SolveError;
use crate::matrix::{MatrixError, SparseMatrix};
use crate::solver::push::{
    CANCEL_CHECK_PUSHES, PushDirection, PushOperator, PushState, PushStep,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRankOptions {
    /// Damping factor d in (0, 1).
    pub damping: f64,
    /// Restart distribution; uniform when absent. Must be nonnegative with
    /// positive mass; it is normalized to sum to one at ingest.
    pub personalization: Option<Array1<f64>>,
    /// Score accuracy target.
    pub epsilon: f64,
    /// Iteration cap; the push route interprets it as a push budget.
    pub max_iterations: usize,
    /// When set, also return the k highest-scoring nodes.
    pub top_k: Option<usize>,
    #[serde(skip, default)]
    pub cancel: CancelToken,
}

impl Default for PageRankOptions {
    fn default() -> Self {
        Self {
            damping: 0.85,
            personalization: None,
            epsilon: 1e-8,
            max_iterations: 1000,
            top_k: None,
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRankScores {
    /// Score vector, nonnegative, summing to one.
    pub scores: Array1<f64>,
    /// Series iterations or pushes spent.
    pub iterations: usize,
    pub converged: bool,
    /// The k best (index, score) pairs, highest first, when requested.
    pub top: Option<Vec<(usize, f64)>>,
}

pub fn pagerank(w: &SparseMatrix, opts: &PageRankOptions) -> Result<PageRankScores, SolveError> {
    let n = w.require_square("pagerank")?;
    if !(0.0..1.0).contains(&opts.damping) || opts.damping == 0.0 {
        return Err(SolveError::Unsupported {
            reason: format!("damping {} outside (0, 1)", opts.damping),
        });
    }
    for i in 0..n {
        let (_, vals) = w.csr().row(i);
        if let Some(&v) = vals.iter().find(|v| **v < 0.0) {
            return Err(MatrixError::InvalidStochastic {
                detail: format!("negative adjacency weight {v} in row {i}"),
            }
            .into());
        }
    }
    let p = normalized_personalization(n, opts.personalization.as_ref())?;

    let mut result = if opts.top_k.is_some() {
        push_scores(w, &p, opts)?
    } else {
        series_scores(w, &p, opts)
    };

    // Post-normalize; this absorbs truncation and rounding drift.
    let total = result.scores.sum();
    if total > 0.0 {
        result.scores.mapv_inplace(|v| v / total);
    }
    if let Some(k) = opts.top_k {
        result.top = Some(top_k(&result.scores, k));
    }
    Ok(result)
}

fn normalized_personalization(
    n: usize,
    p: Option<&Array1<f64>>,
) -> Result<Array1<f64>, SolveError> {
    match p {
        None => Ok(Array1::from_elem(n, 1.0 / n as f64)),
        Some(p) => {
            if p.len() != n {
                return Err(MatrixError::DimensionMismatch {
                    expected: n,
                    actual: p.len(),
                    operation: "pagerank personalization",
                }
                .into());
            }
            let mut total = 0.0;
            for &v in p {
                if !v.is_finite() || v < 0.0 {
                    return Err(MatrixError::InvalidStochastic {
                        detail: format!("personalization entry {v} is not a probability mass"),
                    }
                    .into());
                }
                total += v;
            }
            if total <= 0.0 {
                return Err(MatrixError::InvalidStochastic {
                    detail: "personalization has no mass".to_string(),
                }
                .into());
            }
            Ok(p.mapv(|v| v / total))
        }
    }
}

/// Damped power series x = sum_k (d P^T)^k (1-d) p, dangling mass folded in
/// per term. The l1 norm of the running term decays by exactly d per
/// iteration on a stochastic operator, which gives a sharp tail bound.
fn series_scores(
    w: &SparseMatrix,
    p: &Array1<f64>,
    opts: &PageRankOptions,
) -> PageRankScores {
    let n = w.rows();
    let d = opts.damping;
    let row_sums = w.abs_row_sums();

    let mut term: Array1<f64> = p.mapv(|v| (1.0 - d) * v);
    let mut x = term.clone();
    let mut next: Array1<f64> = Array1::zeros(n);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < opts.max_iterations {
        if opts.cancel.is_cancelled() {
            break;
        }
        // next <- d * (P0^T term + p * dangling_mass)
        next.fill(0.0);
        let mut dangling = 0.0;
        for i in 0..n {
            let t = term[i];
            if t == 0.0 {
                continue;
            }
            if row_sums[i] == 0.0 {
                dangling += t;
                continue;
            }
            let coef = d * t / row_sums[i];
            let (cols, vals) = w.csr().row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                next[j] += coef * v;
            }
        }
        if dangling != 0.0 {
            let coef = d * dangling;
            for j in 0..n {
                next[j] += coef * p[j];
            }
        }
        std::mem::swap(&mut term, &mut next);
        for (xv, tv) in x.iter_mut().zip(&term) {
            *xv += tv;
        }
        iterations += 1;

        let tail = term.iter().map(|v| v.abs()).sum::<f64>() * d / (1.0 - d);
        if tail <= opts.epsilon {
            converged = true;
            break;
        }
    }

    PageRankScores {
        scores: x,
        iterations,
        converged,
        top: None,
    }
}

/// Forward push with restart 1 - d; leaked dangling mass re-enters through
/// the personalization until it is negligible.
fn push_scores(
    w: &SparseMatrix,
    p: &Array1<f64>,
    opts: &PageRankOptions,
) -> Result<PageRankScores, SolveError> {
    let n = w.rows();
    let alpha = 1.0 - opts.damping;
    let op = PushOperator::restart(w, alpha, PushDirection::Forward)?;
    let mut state = PushState::new(n, opts.epsilon);
    for (j, &v) in p.iter().enumerate() {
        if v != 0.0 {
            state.seed(&op, j, v);
        }
    }

    let mut converged = false;
    while state.pushes < opts.max_iterations {
        if state.pushes.is_multiple_of(CANCEL_CHECK_PUSHES) && opts.cancel.is_cancelled() {
            break;
        }
        match state.push_once(&op) {
            PushStep::Pushed => {}
            PushStep::Stalled => break,
            PushStep::Drained => {
                // Re-inject mass lost at dangling rows through p.
                let leaked = state.leaked;
                if leaked.abs() <= opts.epsilon {
                    converged = true;
                    break;
                }
                state.leaked = 0.0;
                for (j, &v) in p.iter().enumerate() {
                    if v != 0.0 {
                        state.seed(&op, j, leaked * v);
                    }
                }
                if state.is_drained() {
                    // The reseeded mass fell below every threshold.
                    converged = true;
                    break;
                }
            }
        }
    }

    Ok(PageRankScores {
        scores: state.estimate,
        iterations: state.pushes,
        converged,
        top: None,
    })
}

/// k best (index, score) pairs; score descending, index ascending on ties.
fn top_k(scores: &Array1<f64>, k: usize) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn cycle4() -> SparseMatrix {
        SparseMatrix::from_triples(
            4,
            4,
            &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (3, 0, 1.0)],
        )
        .unwrap()
    }

    fn star() -> SparseMatrix {
        SparseMatrix::from_triples(4, 4, &[(0, 1, 1.0), (0, 2, 1.0), (0, 3, 1.0)]).unwrap()
    }

    #[test]
    fn cycle_scores_are_uniform() {
        let opts = PageRankOptions {
            epsilon: 1e-6,
            ..PageRankOptions::default()
        };
        let r = pagerank(&cycle4(), &opts).unwrap();
        assert!(r.converged);
        for &s in &r.scores {
            assert!((s - 0.25).abs() <= 1e-6, "score {s}");
        }
        assert!((r.scores.sum() - 1.0).abs() <= 1e-10);
    }

    #[test]
    fn cycle_push_route_matches_series() {
        let series = pagerank(&cycle4(), &PageRankOptions::default()).unwrap();
        let push = pagerank(
            &cycle4(),
            &PageRankOptions {
                top_k: Some(4),
                epsilon: 1e-7,
                max_iterations: 1_000_000,
                ..PageRankOptions::default()
            },
        )
        .unwrap();
        for i in 0..4 {
            assert!(
                (series.scores[i] - push.scores[i]).abs() < 1e-4,
                "node {i}: {} vs {}",
                series.scores[i],
                push.scores[i]
            );
        }
    }

    #[test]
    fn star_spokes_share_mass_and_hub_trails() {
        let r = pagerank(&star(), &PageRankOptions::default()).unwrap();
        assert!((r.scores[1] - r.scores[2]).abs() < 1e-9);
        assert!((r.scores[2] - r.scores[3]).abs() < 1e-9);
        assert!(r.scores[0] < r.scores[1]);
        assert!((r.scores.sum() - 1.0).abs() <= 1e-10);

        let top = pagerank(
            &star(),
            &PageRankOptions {
                top_k: Some(1),
                max_iterations: 100_000,
                ..PageRankOptions::default()
            },
        )
        .unwrap();
        let (best, _) = top.top.unwrap()[0];
        assert!([1, 2, 3].contains(&best), "top node {best}");
    }

    #[test]
    fn personalization_shifts_mass() {
        let opts = PageRankOptions {
            personalization: Some(array![1.0, 0.0, 0.0, 0.0]),
            ..PageRankOptions::default()
        };
        let r = pagerank(&cycle4(), &opts).unwrap();
        // Restart always lands on node 0, so it holds the most mass.
        assert!(r.scores[0] > r.scores[1]);
        assert!((r.scores.sum() - 1.0).abs() <= 1e-10);
    }

    #[test]
    fn rejects_bad_inputs() {
        let err = pagerank(
            &cycle4(),
            &PageRankOptions {
                damping: 1.5,
                ..PageRankOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, SolveError::Unsupported { .. }));

        let neg = SparseMatrix::from_triples(2, 2, &[(0, 1, -1.0), (1, 0, 1.0)]).unwrap();
        let err = pagerank(&neg, &PageRankOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            SolveError::Matrix(MatrixError::InvalidStochastic { .. })
        ));

        let err = pagerank(
            &cycle4(),
            &PageRankOptions {
                personalization: Some(array![0.0, 0.0, 0.0, 0.0]),
                ..PageRankOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SolveError::Matrix(MatrixError::InvalidStochastic { .. })
        ));
    }
}
