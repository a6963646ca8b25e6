//! Forward and backward local push.
//!
//! Both kernels run the same step (pop the highest-priority active index,
//! credit its residual to the estimate, redistribute the damped remainder to
//! its neighbors) against a [`PushOperator`] that fixes the propagation
//! weights. Two instantiations exist:
//!
//! - *restart*: retention alpha, edges (1-alpha) * v / rowsum over the
//!   row-sum-normalized store. Exact mass conservation on stochastic stores;
//!   this is the PageRank operator.
//! - *jacobi*: the splitting M = I - D^{-1}A of Ax = b. Retention 1, edge
//!   weights -v / diag. Forward push propagates along operator columns and
//!   backward push along operator rows, so the two directions read opposite
//!   views of the store.
//!
//! Residual entries below `eps * max(1, degree)` stay in the residual vector
//! as the admitted approximation error; they are never pushed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ndarray::{Array1, Zip};

use crate::cancel::CancelToken;
use crate::error::SolveError;
use crate::matrix::{MatrixError, SparseMatrix};
use crate::ops;
use crate::solver::{Kernel, Method, ResidualSample, StepOutcome};

/// Cancellation poll cadence for budgeted runs, in pushes.
pub(crate) const CANCEL_CHECK_PUSHES: usize = 1024;

/// Cadence of the O(n) global infinity-norm termination check.
const INF_CHECK_PUSHES: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub(crate) enum PushSystem {
    /// x = alpha * (I - (1-alpha) P^T)^{-1} b with P the row-normalized store.
    Restart { alpha: f64 },
    /// x = M x + D^{-1} b with M = I - D^{-1} A.
    Jacobi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushDirection {
    Forward,
    Backward,
}

#[derive(Debug)]
pub(crate) struct PushOperator<'a> {
    store: &'a SparseMatrix,
    system: PushSystem,
    direction: PushDirection,
    /// Restart: per-row sums of |v|. Jacobi: signed diagonal.
    scale: Vec<f64>,
}

impl<'a> PushOperator<'a> {
    pub(crate) fn restart(
        store: &'a SparseMatrix,
        alpha: f64,
        direction: PushDirection,
    ) -> Result<Self, SolveError> {
        store.require_square("push solve")?;
        if !(0.0..=1.0).contains(&alpha) || alpha == 0.0 {
            return Err(SolveError::Unsupported {
                reason: format!("restart fraction {alpha} outside (0, 1]"),
            });
        }
        Ok(Self {
            store,
            system: PushSystem::Restart { alpha },
            direction,
            scale: store.abs_row_sums(),
        })
    }

    pub(crate) fn jacobi(
        store: &'a SparseMatrix,
        direction: PushDirection,
    ) -> Result<Self, SolveError> {
        let n = store.require_square("push solve")?;
        let row_sums = store.abs_row_sums();
        let mut diag = Vec::with_capacity(n);
        let mut margin = f64::INFINITY;
        for i in 0..n {
            let d = store.diagonal(i)?;
            if d == 0.0 {
                return Err(MatrixError::ZeroDiagonal {
                    row: i,
                    operation: "push solve",
                }
                .into());
            }
            // Row sum of |M| must stay below 1 for the push series to settle.
            let off = row_sums[i] - d.abs();
            margin = margin.min(1.0 - off / d.abs());
            diag.push(d);
        }
        if margin <= 0.0 {
            return Err(SolveError::NotDominant {
                method: "push",
                strength: margin,
            });
        }
        Ok(Self {
            store,
            system: PushSystem::Jacobi,
            direction,
            scale: diag,
        })
    }

    pub(crate) fn n(&self) -> usize {
        self.store.rows()
    }

    pub(crate) fn retention(&self) -> f64 {
        match self.system {
            PushSystem::Restart { alpha } => alpha,
            PushSystem::Jacobi => 1.0,
        }
    }

    fn uses_row_view(&self) -> bool {
        matches!(
            (self.system, self.direction),
            (PushSystem::Restart { .. }, PushDirection::Forward)
                | (PushSystem::Jacobi, PushDirection::Backward)
        )
    }

    /// Out-degree of `i` in the propagation view.
    pub(crate) fn degree(&self, i: usize) -> usize {
        if self.uses_row_view() {
            self.store.csr().row_nnz(i)
        } else {
            self.store.csc().col_nnz(i)
        }
    }

    /// True when a restart-forward node has nothing to propagate to; the
    /// damped share of its residual becomes leaked mass.
    pub(crate) fn dangling(&self, i: usize) -> bool {
        matches!(
            (self.system, self.direction),
            (PushSystem::Restart { .. }, PushDirection::Forward)
        ) && self.scale[i] == 0.0
    }

    /// Visit the damped propagation edges out of `i`.
    pub(crate) fn for_edges(&self, i: usize, mut f: impl FnMut(usize, f64)) {
        match (self.system, self.direction) {
            (PushSystem::Restart { alpha }, PushDirection::Forward) => {
                let norm = self.scale[i];
                if norm == 0.0 {
                    return;
                }
                let damp = (1.0 - alpha) / norm;
                let (cols, vals) = self.store.csr().row(i);
                for (&j, &v) in cols.iter().zip(vals) {
                    f(j, damp * v);
                }
            }
            (PushSystem::Restart { alpha }, PushDirection::Backward) => {
                let (rows, vals) = self.store.csc().col(i);
                for (&j, &v) in rows.iter().zip(vals) {
                    if self.scale[j] > 0.0 {
                        f(j, (1.0 - alpha) * v / self.scale[j]);
                    }
                }
            }
            (PushSystem::Jacobi, PushDirection::Forward) => {
                let (rows, vals) = self.store.csc().col(i);
                for (&j, &v) in rows.iter().zip(vals) {
                    if j != i {
                        f(j, -v / self.scale[j]);
                    }
                }
            }
            (PushSystem::Jacobi, PushDirection::Backward) => {
                let (cols, vals) = self.store.csr().row(i);
                for (&j, &v) in cols.iter().zip(vals) {
                    if j != i {
                        f(j, -v / self.scale[i]);
                    }
                }
            }
        }
    }

    /// D^{-1} entry for the Jacobi right-hand side.
    pub(crate) fn diag_inv(&self, i: usize) -> f64 {
        debug_assert!(matches!(self.system, PushSystem::Jacobi));
        1.0 / self.scale[i]
    }
}

/// Max-heap entry: higher |residual| / degree first, smaller index on ties.
#[derive(Debug, Clone, Copy)]
struct Entry {
    priority: f64,
    index: usize,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.index.cmp(&self.index))
    }
}

pub(crate) enum PushStep {
    Pushed,
    Drained,
    Stalled,
}

/// Shared estimate/residual/active-set state for one push run.
pub(crate) struct PushState {
    pub estimate: Array1<f64>,
    pub residual: Vec<f64>,
    epsilon: f64,
    queue: BinaryHeap<Entry>,
    queued: Vec<bool>,
    pub pushes: usize,
    /// Running sum of |residual|, maintained incrementally.
    abs_residual: f64,
    /// Damped mass lost at dangling nodes (restart-forward only).
    pub leaked: f64,
    stall_window: usize,
    best_queue_len: usize,
    best_abs_residual: f64,
    pushes_since_progress: usize,
}

impl PushState {
    pub(crate) fn new(n: usize, epsilon: f64) -> Self {
        // Stall window: n * ln(1/eps) pushes without queue shrink or residual
        // halving means the run is not converging.
        let window = if epsilon < 1.0 {
            (n as f64 * (1.0 / epsilon).ln()).ceil() as usize
        } else {
            n
        };
        Self {
            estimate: Array1::zeros(n),
            residual: vec![0.0; n],
            epsilon,
            queue: BinaryHeap::new(),
            queued: vec![false; n],
            pushes: 0,
            abs_residual: 0.0,
            leaked: 0.0,
            stall_window: window.max(32),
            best_queue_len: usize::MAX,
            best_abs_residual: f64::INFINITY,
            pushes_since_progress: 0,
        }
    }

    fn threshold(&self, op: &PushOperator, i: usize) -> f64 {
        self.epsilon * op.degree(i).max(1) as f64
    }

    fn activate(&mut self, op: &PushOperator, i: usize) {
        if self.queued[i] || self.residual[i].abs() < self.threshold(op, i) {
            return;
        }
        self.queue.push(Entry {
            priority: self.residual[i].abs() / op.degree(i).max(1) as f64,
            index: i,
        });
        self.queued[i] = true;
    }

    /// Add residual mass at `i`, activating it when it crosses the threshold.
    pub(crate) fn seed(&mut self, op: &PushOperator, i: usize, amount: f64) {
        let old = self.residual[i];
        self.residual[i] = old + amount;
        self.abs_residual += self.residual[i].abs() - old.abs();
        self.activate(op, i);
    }

    pub(crate) fn abs_residual(&self) -> f64 {
        self.abs_residual
    }

    pub(crate) fn residual_norm_inf(&self) -> f64 {
        self.residual
            .iter()
            .fold(0.0f64, |m, &v| m.max(v.abs()))
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    /// One push. Stale queue entries (below threshold by the time they pop)
    /// are discarded without counting as work.
    pub(crate) fn push_once(&mut self, op: &PushOperator) -> PushStep {
        let (i, pi) = loop {
            let Some(entry) = self.queue.pop() else {
                return PushStep::Drained;
            };
            let i = entry.index;
            self.queued[i] = false;
            let pi = self.residual[i];
            if pi.abs() >= self.threshold(op, i) {
                break (i, pi);
            }
        };

        self.estimate[i] += op.retention() * pi;
        self.residual[i] = 0.0;
        self.abs_residual -= pi.abs();
        if op.dangling(i) {
            self.leaked += (1.0 - op.retention()) * pi;
        } else {
            op.for_edges(i, |j, w| {
                let old = self.residual[j];
                self.residual[j] = old + pi * w;
                self.abs_residual += self.residual[j].abs() - old.abs();
                self.activate(op, j);
            });
        }
        self.pushes += 1;

        let mut progressed = false;
        if self.queue.len() < self.best_queue_len {
            self.best_queue_len = self.queue.len();
            progressed = true;
        }
        if self.abs_residual <= self.best_abs_residual * 0.5 {
            self.best_abs_residual = self.abs_residual;
            progressed = true;
        }
        if progressed {
            self.pushes_since_progress = 0;
        } else {
            self.pushes_since_progress += 1;
            if self.pushes_since_progress > self.stall_window {
                return PushStep::Stalled;
            }
        }
        PushStep::Pushed
    }
}

/// Outcome of a budgeted push run.
pub(crate) struct PushRun {
    pub estimate: Array1<f64>,
    pub residual: Vec<f64>,
    pub pushes: usize,
    pub drained: bool,
}

/// Run push to drain, budget exhaustion, or cancellation. Used by the
/// bidirectional estimator, which owns its own error budget split.
pub(crate) fn run_to_budget(
    op: &PushOperator,
    seeds: &[(usize, f64)],
    epsilon: f64,
    budget: usize,
    cancel: &CancelToken,
) -> PushRun {
    let mut state = PushState::new(op.n(), epsilon);
    for &(i, v) in seeds {
        state.seed(op, i, v);
    }
    while state.pushes < budget {
        if state.pushes.is_multiple_of(CANCEL_CHECK_PUSHES) && cancel.is_cancelled() {
            break;
        }
        match state.push_once(op) {
            PushStep::Pushed => {}
            PushStep::Drained | PushStep::Stalled => break,
        }
    }
    let drained = state.is_drained();
    PushRun {
        estimate: state.estimate,
        residual: state.residual,
        pushes: state.pushes,
        drained,
    }
}

/// Forward push as a full-solve kernel over the Jacobi reduction of Ax = b.
pub(crate) struct ForwardPushKernel<'a> {
    op: PushOperator<'a>,
    state: PushState,
    a: &'a SparseMatrix,
    b: Array1<f64>,
    b_norm: f64,
    seed_mass: f64,
    scratch: Array1<f64>,
}

impl<'a> ForwardPushKernel<'a> {
    pub(crate) fn new(
        a: &'a SparseMatrix,
        b: &Array1<f64>,
        warm_start: Option<&Array1<f64>>,
        tolerance: f64,
    ) -> Result<Self, SolveError> {
        let n = a.require_square("forward-push solve")?;
        let op = PushOperator::jacobi(a, PushDirection::Forward)?;

        // Threshold scale chosen so a drained queue implies the relative
        // 2-norm residual target: |b - Ae| = |D r| at drain is bounded by
        // d_max * sqrt(n) * eps * deg_max.
        let deg_max = (0..n).map(|i| op.degree(i)).max().unwrap_or(1).max(1);
        let d_max = a
            .diag_slice()
            .iter()
            .fold(0.0f64, |m, &d| m.max(d.abs()))
            .max(f64::MIN_POSITIVE);
        let b_norm = ops::norm2(b);
        let epsilon = (tolerance * b_norm.max(f64::MIN_POSITIVE)
            / (d_max * (n.max(1) as f64).sqrt() * deg_max as f64))
            .max(f64::MIN_POSITIVE);
        let mut state = PushState::new(n, epsilon);

        // Seed with D^{-1}(b - A x0); the estimate starts at the warm start.
        let mut rhs = b.clone();
        if let Some(x0) = warm_start {
            let mut ax0 = Array1::zeros(n);
            a.mat_vec(x0, &mut ax0)?;
            Zip::from(&mut rhs).and(&ax0).for_each(|rv, av| *rv -= av);
            state.estimate.assign(x0);
        }
        let mut seed_mass = 0.0;
        for i in 0..n {
            let v = rhs[i] * op.diag_inv(i);
            if v != 0.0 {
                state.seed(&op, i, v);
                seed_mass += v.abs();
            }
        }

        Ok(Self {
            op,
            state,
            a,
            b: b.clone(),
            b_norm,
            seed_mass: seed_mass.max(f64::MIN_POSITIVE),
            scratch: Array1::zeros(n),
        })
    }
}

impl Kernel for ForwardPushKernel<'_> {
    fn step(&mut self) -> Result<StepOutcome, SolveError> {
        match self.state.push_once(&self.op) {
            PushStep::Drained => Ok(StepOutcome::Finished),
            PushStep::Stalled => Ok(StepOutcome::Stalled),
            PushStep::Pushed => {
                // Periodic global check: every residual entry below the base
                // threshold ends the run even while the queue holds stale
                // high-degree entries.
                if self.state.pushes.is_multiple_of(INF_CHECK_PUSHES)
                    && self.state.residual_norm_inf() <= self.state.epsilon
                {
                    return Ok(StepOutcome::Finished);
                }
                // Remaining residual mass, relative to the seeded mass, is the
                // cheap convergence estimate between exact checks.
                let remaining = self.state.abs_residual();
                Ok(StepOutcome::Continue(Some(ResidualSample {
                    norm: remaining,
                    relative: remaining / self.seed_mass,
                })))
            }
        }
    }

    fn iterations(&self) -> usize {
        self.state.pushes
    }

    fn solution(&self) -> &Array1<f64> {
        &self.state.estimate
    }

    fn exact_residual(&mut self) -> ResidualSample {
        self.a
            .mat_vec(&self.state.estimate, &mut self.scratch)
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
        let n = self.b.len();
        // estimate + residual + rhs + scratch, plus the queue and markers.
        4 * n * size_of::<f64>()
            + self.state.queue.len() * size_of::<Entry>()
            + n * size_of::<bool>()
    }

    fn method(&self) -> Method {
        Method::ForwardPush
    }

    fn stagnation_scale(&self) -> usize {
        self.b.len().max(1)
    }
}
