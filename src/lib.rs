//! Sublinear-style iterative solvers for sparse, diagonally dominant linear
//! systems: truncated Neumann series, forward/backward local push, a
//! bidirectional single-entry estimator, Monte-Carlo random walks, and a
//! conjugate-gradient fallback, with PageRank built on top. A method oracle
//! inspects the matrix and routes each query to the fastest safe kernel;
//! every solve can be consumed as a lazy stream of progress records and
//! cancelled cooperatively.

use std::time::Duration;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

pub mod analyze;
pub mod cancel;
mod error;
pub mod matrix;
pub mod monitor;
pub mod ops;
pub mod pagerank;
pub mod solver;

pub use analyze::{AnalysisReport, AnalyzeOptions, Dominance, SpectralEstimate, analyze};
pub use cancel::CancelToken;
pub use error::SolveError;
pub use matrix::{MatrixBuilder, MatrixError, SparseMatrix};
pub use monitor::{Grade, ProgressRecord};
pub use pagerank::{PageRankOptions, PageRankScores, pagerank};
pub use solver::{EntryEstimate, Method, SolveDriver, SolveReport, SolveStatus};

use solver::bidirectional;
use solver::cg::CgKernel;
use solver::neumann::NeumannKernel;
use solver::oracle::{self, QueryShape};
use solver::push::{ForwardPushKernel, PushDirection, PushOperator, run_to_budget};
use solver::random_walk::{RandomWalkEstimator, WalkPlan};
use solver::{Kernel, ResidualSample, StepOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Kernel selection; `Auto` routes through the method oracle.
    pub method: Method,
    /// Relative-residual convergence threshold.
    pub tolerance: f64,
    /// Iteration cap; the push kernels interpret it as a push budget.
    pub max_iterations: usize,
    /// Confidence level for the Monte-Carlo estimators.
    pub confidence: f64,
    /// Iterations between exact residual recomputations.
    pub check_period: usize,
    /// Convergence-rate window.
    pub window_rate: usize,
    /// Stagnation-detection window.
    pub window_stagnation: usize,
    /// RNG seed; identical seed and inputs reproduce the run.
    pub seed: Option<u64>,
    /// Initial iterate; zero when absent.
    pub warm_start: Option<Array1<f64>>,
    /// Attach an interim solution snapshot to every k-th progress record.
    pub snapshot_every: Option<usize>,
    pub time_limit: Option<Duration>,
    #[serde(skip, default)]
    pub cancel: CancelToken,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            method: Method::Auto,
            tolerance: 1e-8,
            max_iterations: 1000,
            confidence: 0.95,
            check_period: 10,
            window_rate: 5,
            window_stagnation: 20,
            seed: None,
            warm_start: None,
            snapshot_every: None,
            time_limit: None,
            cancel: CancelToken::new(),
        }
    }
}

impl SolveOptions {
    /// Copy with nonsensical fields clamped into their working ranges.
    fn validated(&self) -> Self {
        let mut opts = self.clone();
        opts.tolerance = opts.tolerance.max(f64::EPSILON);
        opts.max_iterations = opts.max_iterations.max(1);
        opts.confidence = opts.confidence.clamp(0.5, 1.0 - 1e-9);
        opts.check_period = opts.check_period.max(1);
        opts
    }
}

/// Solve Ax = b and return the final report.
///
/// `Auto` consults the analyzer and walks the oracle's ranked kernels,
/// recovering from `NotDominant` refusals and CG breakdowns while an
/// alternative remains.
pub fn solve(
    a: &SparseMatrix,
    b: &Array1<f64>,
    opts: &SolveOptions,
) -> Result<SolveReport, SolveError> {
    let opts = opts.validated();
    let ranked = plan_full_solve(a, b, &opts)?;

    let auto = matches!(opts.method, Method::Auto);
    let mut last_err = None;
    for method in ranked {
        let outcome = build_kernel(a, b, method, &opts)
            .and_then(|kernel| SolveDriver::new(kernel, a.rows(), &opts).finish());
        match outcome {
            Ok(report) => return Ok(report),
            Err(e) if recoverable(&e) => {
                log::debug!("oracle: {} refused ({e})", method.name());
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(exhausted(auto, last_err))
}

/// Like [`solve`], but returns the progress stream for the selected kernel.
/// Call [`SolveDriver::finish`] after (or instead of) consuming it.
///
/// Streaming drives a single kernel; the oracle's construction-time recovery
/// still applies, but a mid-run breakdown is surfaced rather than retried.
pub fn solve_stream<'a>(
    a: &'a SparseMatrix,
    b: &Array1<f64>,
    opts: &SolveOptions,
) -> Result<SolveDriver<'a>, SolveError> {
    let opts = opts.validated();
    let ranked = plan_full_solve(a, b, &opts)?;

    let auto = matches!(opts.method, Method::Auto);
    let mut last_err = None;
    for method in ranked {
        match build_kernel(a, b, method, &opts) {
            Ok(kernel) => return Ok(SolveDriver::new(kernel, a.rows(), &opts)),
            Err(e) if recoverable(&e) => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(exhausted(auto, last_err))
}

/// Estimate the single entry x_target of the solution of Ax = b, with a
/// confidence interval. For an entry of A^{-1} itself, pass the matching
/// unit vector as `b`.
pub fn estimate_entry(
    a: &SparseMatrix,
    b: &Array1<f64>,
    target: usize,
    opts: &SolveOptions,
) -> Result<EntryEstimate, SolveError> {
    let opts = opts.validated();
    let n = a.require_square("estimate_entry")?;
    check_rhs(n, b)?;
    if target >= n {
        return Err(MatrixError::IndexOutOfRange {
            index: target,
            dim: n,
        }
        .into());
    }

    let ranked = match opts.method {
        Method::Auto => {
            let report = analyze(a, &AnalyzeOptions::default())?;
            oracle::route(&report, QueryShape::SingleEntry, None)
        }
        m => vec![m],
    };

    let auto = matches!(opts.method, Method::Auto);
    let mut last_err = None;
    for method in ranked {
        match estimate_with(a, b, target, method, &opts) {
            Ok(est) => return Ok(est),
            Err(e) if recoverable(&e) => {
                log::debug!("oracle: {} refused ({e})", method.name());
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(exhausted(auto, last_err))
}

/// Error for an oracle that walked its whole candidate list. A forced method
/// surfaces its own refusal; auto mode reports the exhausted dispatch.
fn exhausted(auto: bool, last: Option<SolveError>) -> SolveError {
    match last {
        Some(e) if auto => SolveError::Unsupported {
            reason: format!("method oracle ran out of fallbacks; last failure: {e}"),
        },
        Some(e) => e,
        None => SolveError::Unsupported {
            reason: "method oracle produced no candidates".to_string(),
        },
    }
}

fn estimate_with(
    a: &SparseMatrix,
    b: &Array1<f64>,
    target: usize,
    method: Method,
    opts: &SolveOptions,
) -> Result<EntryEstimate, SolveError> {
    match method {
        Method::Bidirectional => bidirectional::estimate(
            a,
            b,
            target,
            opts.tolerance.max(1e-12),
            opts.confidence,
            opts.max_iterations,
            opts.seed,
            &opts.cancel,
        ),
        Method::RandomWalk => Ok(RandomWalkEstimator::new(
            a,
            b,
            target,
            opts.tolerance.max(1e-12),
            opts.confidence,
            opts.max_iterations,
            opts.seed,
        )?
        .run(&opts.cancel)),
        Method::BackwardPush => backward_only_estimate(a, b, target, opts),
        Method::Neumann | Method::ForwardPush | Method::ConjugateGradient => {
            let mut solve_opts = opts.clone();
            solve_opts.method = method;
            let report = solve(a, b, &solve_opts)?;
            Ok(EntryEstimate {
                value: report.solution[target],
                half_width: inverse_norm_bound(a).map_or(f64::INFINITY, |inv| {
                    report.residual_norm * inv
                }),
                variance: 0.0,
                samples: 0,
                method,
            })
        }
        Method::Auto => unreachable!("auto resolves before dispatch"),
    }
}

/// Backward push alone: the deterministic part of the bidirectional identity,
/// with the unresolved residual bounded through the solution magnitude.
fn backward_only_estimate(
    a: &SparseMatrix,
    b: &Array1<f64>,
    target: usize,
    opts: &SolveOptions,
) -> Result<EntryEstimate, SolveError> {
    let plan = WalkPlan::new(a)?;
    let n = plan.n();
    let btilde = Array1::from_iter((0..n).map(|i| b[i] * plan.diag_inv(i)));
    let op = PushOperator::jacobi(a, PushDirection::Backward)?;
    let run = run_to_budget(
        &op,
        &[(target, 1.0)],
        opts.tolerance.max(1e-12),
        opts.max_iterations,
        &opts.cancel,
    );

    let mut value = 0.0;
    for i in 0..n {
        value += run.estimate[i] * btilde[i];
    }
    let r_l1: f64 = run.residual.iter().map(|v| v.abs()).sum();
    let x_inf_bound =
        btilde.iter().fold(0.0f64, |m, &v| m.max(v.abs())) / (1.0 - plan.decay);
    Ok(EntryEstimate {
        value,
        half_width: r_l1 * x_inf_bound,
        variance: 0.0,
        samples: 0,
        method: Method::BackwardPush,
    })
}

/// ||A^{-1}||_inf bound for strictly row dominant A (Ahlberg-Nilson-Varah):
/// 1 / min_i (|a_ii| - sum_{j != i} |a_ij|).
fn inverse_norm_bound(a: &SparseMatrix) -> Option<f64> {
    let n = a.require_square("inverse bound").ok()?;
    let row_sums = a.abs_row_sums();
    let mut gap = f64::INFINITY;
    for i in 0..n {
        let d = a.diagonal(i).ok()?.abs();
        gap = gap.min(d - (row_sums[i] - d));
    }
    (gap > 0.0).then(|| 1.0 / gap)
}

fn check_rhs(n: usize, b: &Array1<f64>) -> Result<(), SolveError> {
    if b.len() != n {
        return Err(MatrixError::DimensionMismatch {
            expected: n,
            actual: b.len(),
            operation: "solve rhs",
        }
        .into());
    }
    for (i, &v) in b.iter().enumerate() {
        if !v.is_finite() {
            return Err(MatrixError::NonFiniteVector { index: i, value: v }.into());
        }
    }
    Ok(())
}

/// Ranked kernel candidates for a full solve, after input validation.
fn plan_full_solve(
    a: &SparseMatrix,
    b: &Array1<f64>,
    opts: &SolveOptions,
) -> Result<Vec<Method>, SolveError> {
    let n = a.require_square("solve")?;
    check_rhs(n, b)?;
    if let Some(x0) = &opts.warm_start {
        if x0.len() != n {
            return Err(MatrixError::DimensionMismatch {
                expected: n,
                actual: x0.len(),
                operation: "warm start",
            }
            .into());
        }
    }

    match opts.method {
        Method::Auto => {
            let report = analyze(a, &AnalyzeOptions::default())?;
            let contraction = NeumannKernel::contraction_bound(a);
            Ok(oracle::route(&report, QueryShape::FullSolve, contraction))
        }
        Method::Neumann | Method::ForwardPush | Method::ConjugateGradient => Ok(vec![opts.method]),
        m @ (Method::BackwardPush | Method::Bidirectional | Method::RandomWalk) => {
            Err(SolveError::Unsupported {
                reason: format!(
                    "{} answers single-entry queries; use estimate_entry",
                    m.name()
                ),
            })
        }
    }
}

fn recoverable(e: &SolveError) -> bool {
    matches!(
        e,
        SolveError::NotDominant { .. }
            | SolveError::Breakdown { .. }
            | SolveError::Matrix(MatrixError::ZeroDiagonal { .. })
    )
}

fn build_kernel<'a>(
    a: &'a SparseMatrix,
    b: &Array1<f64>,
    method: Method,
    opts: &SolveOptions,
) -> Result<Box<dyn Kernel + 'a>, SolveError> {
    // An all-zero right-hand side solves to zero immediately, regardless of
    // the kernel the oracle picked.
    if ops::norm2(b) == 0.0 {
        return Ok(Box::new(ZeroKernel {
            x: Array1::zeros(a.rows()),
            method,
        }));
    }
    let warm = opts.warm_start.as_ref();
    match method {
        Method::Neumann => Ok(Box::new(NeumannKernel::new(a, b, warm, opts.tolerance)?)),
        Method::ForwardPush => Ok(Box::new(ForwardPushKernel::new(
            a,
            b,
            warm,
            opts.tolerance,
        )?)),
        Method::ConjugateGradient => Ok(Box::new(CgKernel::new(a, b, warm)?)),
        _ => Err(SolveError::Unsupported {
            reason: format!("{} is not a full-solve kernel", method.name()),
        }),
    }
}

/// Degenerate kernel for b = 0.
struct ZeroKernel {
    x: Array1<f64>,
    method: Method,
}

impl Kernel for ZeroKernel {
    fn step(&mut self) -> Result<StepOutcome, SolveError> {
        Ok(StepOutcome::Finished)
    }

    fn iterations(&self) -> usize {
        0
    }

    fn solution(&self) -> &Array1<f64> {
        &self.x
    }

    fn exact_residual(&mut self) -> ResidualSample {
        ResidualSample {
            norm: 0.0,
            relative: 0.0,
        }
    }

    fn memory_bytes(&self) -> usize {
        self.x.len() * size_of::<f64>()
    }

    fn method(&self) -> Method {
        self.method
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

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
    fn auto_solve_converges() {
        let b = array![15.0, 10.0, 10.0];
        let report = solve(&tridiag(), &b, &SolveOptions::default()).unwrap();
        assert!(report.converged);
        assert_eq!(report.status, SolveStatus::Converged);
        for i in 0..3 {
            assert!((report.solution[i] - 5.0).abs() < 1e-6);
        }
    }

    #[test]
    fn zero_rhs_returns_zero_immediately() {
        let b = array![0.0, 0.0, 0.0];
        let report = solve(&tridiag(), &b, &SolveOptions::default()).unwrap();
        assert!(report.converged);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.solution, Array1::zeros(3));
        assert_eq!(report.grade, Grade::APlus);
    }

    #[test]
    fn forced_neumann_on_non_dominant_is_not_recovered() {
        let a = SparseMatrix::from_triples(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 3.0), (1, 1, 1.0)])
            .unwrap();
        let b = array![1.0, 1.0];
        let opts = SolveOptions {
            method: Method::Neumann,
            ..SolveOptions::default()
        };
        let err = solve(&a, &b, &opts).unwrap_err();
        assert!(matches!(err, SolveError::NotDominant { .. }));
    }

    #[test]
    fn single_entry_methods_are_rejected_for_full_solves() {
        let b = array![1.0, 1.0, 1.0];
        let opts = SolveOptions {
            method: Method::Bidirectional,
            ..SolveOptions::default()
        };
        assert!(matches!(
            solve(&tridiag(), &b, &opts),
            Err(SolveError::Unsupported { .. })
        ));
    }

    #[test]
    fn stream_yields_records_then_report() {
        let a = tridiag();
        let b = array![15.0, 10.0, 10.0];
        let mut driver = solve_stream(&a, &b, &SolveOptions::default()).unwrap();
        let first = driver.next().unwrap();
        assert_eq!(first.iteration, 1);
        let mut terminal_seen = 0;
        for record in driver.by_ref() {
            if record.converged {
                terminal_seen += 1;
            }
        }
        assert_eq!(terminal_seen, 1);
        let report = driver.finish().unwrap();
        assert!(report.converged);
    }

    #[test]
    fn estimate_entry_auto_routes_and_answers() {
        let b = array![15.0, 10.0, 10.0];
        let est = estimate_entry(&tridiag(), &b, 1, &SolveOptions::default()).unwrap();
        assert!(
            (est.value - 5.0).abs() <= 3.0 * est.half_width.max(0.05),
            "estimate {} +/- {}",
            est.value,
            est.half_width
        );
    }

    #[test]
    fn rejects_non_finite_rhs() {
        let b = array![1.0, f64::NAN, 1.0];
        assert!(matches!(
            solve(&tridiag(), &b, &SolveOptions::default()),
            Err(SolveError::Matrix(MatrixError::NonFiniteVector { index: 1, .. }))
        ));
    }

    #[test]
    fn determinism_for_identical_inputs() {
        let b = array![15.0, 10.0, 10.0];
        let opts = SolveOptions {
            seed: Some(17),
            ..SolveOptions::default()
        };
        let r1 = solve(&tridiag(), &b, &opts).unwrap();
        let r2 = solve(&tridiag(), &b, &opts).unwrap();
        assert_eq!(r1.iterations, r2.iterations);
        for i in 0..3 {
            assert_eq!(r1.solution[i].to_bits(), r2.solution[i].to_bits());
        }
    }
}
