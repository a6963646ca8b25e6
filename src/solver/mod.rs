//! Iteration driver shared by every kernel.
//!
//! A kernel advances one iteration (one push, for the push kernels) per
//! [`Kernel::step`] call. The [`SolveDriver`] wraps a kernel together with
//! the convergence monitor, cancellation token, and deadline, and exposes the
//! whole run as a pull-based stream of [`ProgressRecord`]s. Iteration
//! correctness never depends on the records being consumed.

pub mod bidirectional;
pub mod cg;
pub mod neumann;
pub mod oracle;
pub mod push;
pub mod random_walk;

use std::time::{Duration, Instant};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::SolveOptions;
use crate::error::SolveError;
use crate::monitor::{ConvergenceMonitor, Grade, ProgressRecord, Verdict};

/// Solver selection. `Auto` routes through the method oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Method {
    #[default]
    Auto,
    Neumann,
    ForwardPush,
    BackwardPush,
    Bidirectional,
    RandomWalk,
    ConjugateGradient,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::Auto => "auto",
            Method::Neumann => "neumann",
            Method::ForwardPush => "forward-push",
            Method::BackwardPush => "backward-push",
            Method::Bidirectional => "bidirectional",
            Method::RandomWalk => "random-walk",
            Method::ConjugateGradient => "conjugate-gradient",
        }
    }
}

/// How a finished run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    IterationLimit,
    Stagnated,
    Cancelled,
    TimeLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveReport {
    pub solution: Array1<f64>,
    pub iterations: usize,
    pub residual_norm: f64,
    pub relative_residual: f64,
    pub converged: bool,
    pub status: SolveStatus,
    /// The kernel that actually ran (never `Auto`).
    pub method: Method,
    pub grade: Grade,
    pub wall_time: Duration,
}

/// Result of a single-entry estimation query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryEstimate {
    pub value: f64,
    /// Confidence-interval half-width around `value`.
    pub half_width: f64,
    /// Sample variance of the Monte-Carlo contribution (0 for deterministic
    /// paths).
    pub variance: f64,
    /// Monte-Carlo samples drawn (0 for deterministic paths).
    pub samples: usize,
    pub method: Method,
}

/// Absolute and relative residual measured at the same iterate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResidualSample {
    pub norm: f64,
    pub relative: f64,
}

#[derive(Debug)]
pub(crate) enum StepOutcome {
    /// Iteration done; optionally a cheap residual estimate for the monitor.
    Continue(Option<ResidualSample>),
    /// Kernel-internal termination (series tail below bound, queue drained).
    Finished,
    /// The kernel detected that it is no longer making progress.
    Stalled,
}

pub(crate) trait Kernel {
    fn step(&mut self) -> Result<StepOutcome, SolveError>;
    fn iterations(&self) -> usize;
    fn solution(&self) -> &Array1<f64>;
    /// Recompute the residual exactly through the matrix store.
    fn exact_residual(&mut self) -> ResidualSample;
    fn memory_bytes(&self) -> usize;
    fn method(&self) -> Method;

    /// Stagnation-window multiplier. One push moves a 1/n share of the work
    /// a matrix-vector iteration moves, so the push kernels stretch the
    /// monitor's flat-residual window accordingly and rely on their own
    /// stall rule for the fine-grained verdict.
    fn stagnation_scale(&self) -> usize {
        1
    }
}

enum DriverState {
    Running,
    Done(Result<SolveReport, SolveError>),
    Drained,
}

/// Pull-based progress stream over a running kernel.
///
/// Yields one record per iteration; the terminal record (its `converged`
/// flag reflecting the outcome) is emitted exactly once, after which the
/// stream is exhausted. On a hard failure the stream ends and
/// [`SolveDriver::finish`] surfaces the error.
pub struct SolveDriver<'a> {
    kernel: Box<dyn Kernel + 'a>,
    monitor: ConvergenceMonitor,
    n: usize,
    tolerance: f64,
    max_iterations: usize,
    check_period: usize,
    snapshot_every: Option<usize>,
    cancel: crate::cancel::CancelToken,
    time_limit: Option<Duration>,
    started: Instant,
    state: DriverState,
}

impl<'a> SolveDriver<'a> {
    pub(crate) fn new(kernel: Box<dyn Kernel + 'a>, n: usize, opts: &SolveOptions) -> Self {
        let window_stagnation = opts
            .window_stagnation
            .saturating_mul(kernel.stagnation_scale());
        Self {
            monitor: ConvergenceMonitor::new(opts.tolerance, opts.window_rate, window_stagnation),
            kernel,
            n,
            tolerance: opts.tolerance,
            max_iterations: opts.max_iterations,
            check_period: opts.check_period.max(1),
            snapshot_every: opts.snapshot_every,
            cancel: opts.cancel.clone(),
            time_limit: opts.time_limit,
            started: Instant::now(),
            state: DriverState::Running,
        }
    }

    /// The kernel that is being driven.
    pub fn method(&self) -> Method {
        self.kernel.method()
    }

    /// Drain the stream and return the final report (or the failure).
    pub fn finish(mut self) -> Result<SolveReport, SolveError> {
        while self.next().is_some() {}
        match std::mem::replace(&mut self.state, DriverState::Drained) {
            DriverState::Done(outcome) => outcome,
            // The loop above always reaches a terminal state.
            DriverState::Running | DriverState::Drained => Err(SolveError::Unsupported {
                reason: "driver drained without a terminal state".to_string(),
            }),
        }
    }

    fn terminal(&mut self, status: SolveStatus) -> ProgressRecord {
        let sample = self.kernel.exact_residual();
        // Budget and drain exits still count as converged when the exact
        // residual already clears the tolerance.
        let status = match status {
            SolveStatus::IterationLimit if sample.relative <= self.tolerance => {
                SolveStatus::Converged
            }
            other => other,
        };
        let converged = matches!(status, SolveStatus::Converged);
        let iterations = self.kernel.iterations();
        let grade = Grade::assess(
            converged,
            false,
            iterations,
            self.n,
            self.max_iterations,
            sample.relative,
            self.tolerance,
        );
        log::debug!(
            "solve finished: method={} status={:?} iterations={} rel={:e} grade={}",
            self.kernel.method().name(),
            status,
            iterations,
            sample.relative,
            grade
        );
        let report = SolveReport {
            solution: self.kernel.solution().clone(),
            iterations,
            residual_norm: sample.norm,
            relative_residual: sample.relative,
            converged,
            status,
            method: self.kernel.method(),
            grade,
            wall_time: self.started.elapsed(),
        };
        let record = ProgressRecord {
            iteration: iterations,
            residual_norm: sample.norm,
            relative_residual: sample.relative,
            convergence_rate: self.monitor.rate(),
            memory_bytes: self.kernel.memory_bytes(),
            converged,
            solution: self
                .snapshot_every
                .is_some()
                .then(|| report.solution.clone()),
        };
        self.state = DriverState::Done(Ok(report));
        record
    }

    fn fail(&mut self, error: SolveError) {
        self.state = DriverState::Done(Err(error));
    }
}

impl Iterator for SolveDriver<'_> {
    type Item = ProgressRecord;

    fn next(&mut self) -> Option<ProgressRecord> {
        if !matches!(self.state, DriverState::Running) {
            return None;
        }

        // Cancellation and deadline are polled before every kernel step.
        if self.cancel.is_cancelled() {
            return Some(self.terminal(SolveStatus::Cancelled));
        }
        if let Some(limit) = self.time_limit {
            if self.started.elapsed() >= limit {
                return Some(self.terminal(SolveStatus::TimeLimit));
            }
        }
        if self.kernel.iterations() >= self.max_iterations {
            return Some(self.terminal(SolveStatus::IterationLimit));
        }

        let outcome = match self.kernel.step() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(e);
                return None;
            }
        };

        match outcome {
            StepOutcome::Finished => Some(self.terminal(SolveStatus::IterationLimit)),
            StepOutcome::Stalled => Some(self.terminal(SolveStatus::Stagnated)),
            StepOutcome::Continue(estimate) => {
                let iteration = self.kernel.iterations();
                let sample = match estimate {
                    Some(s) if !iteration.is_multiple_of(self.check_period) => s,
                    _ => self.kernel.exact_residual(),
                };
                log::trace!(
                    "iteration {iteration}: rel={:e}",
                    sample.relative
                );
                match self.monitor.observe(sample.relative) {
                    Verdict::Converged => {
                        // A cheap estimate may undershoot; confirm against the
                        // exact residual before declaring convergence.
                        let exact = self.kernel.exact_residual();
                        if exact.relative <= self.tolerance {
                            Some(self.terminal(SolveStatus::Converged))
                        } else {
                            Some(ProgressRecord {
                                iteration,
                                residual_norm: exact.norm,
                                relative_residual: exact.relative,
                                convergence_rate: self.monitor.rate(),
                                memory_bytes: self.kernel.memory_bytes(),
                                converged: false,
                                solution: None,
                            })
                        }
                    }
                    Verdict::Stagnated => Some(self.terminal(SolveStatus::Stagnated)),
                    Verdict::Diverged => {
                        let last_finite = sample
                            .relative
                            .is_finite()
                            .then(|| self.kernel.solution().clone());
                        self.fail(SolveError::Diverged {
                            iteration,
                            last_finite,
                        });
                        None
                    }
                    Verdict::Proceed => Some(ProgressRecord {
                        iteration,
                        residual_norm: sample.norm,
                        relative_residual: sample.relative,
                        convergence_rate: self.monitor.rate(),
                        memory_bytes: self.kernel.memory_bytes(),
                        converged: false,
                        solution: self
                            .snapshot_every
                            .filter(|&every| iteration.is_multiple_of(every.max(1)))
                            .map(|_| self.kernel.solution().clone()),
                    }),
                }
            }
        }
    }
}
