//! Convergence tracking: residual history, verdicts, progress records, and
//! the report grade. The monitor never silently succeeds; stagnation and
//! divergence are always classified and surfaced by the driver.

use std::collections::VecDeque;
use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// One entry of the progress stream, emitted per iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub iteration: usize,
    pub residual_norm: f64,
    pub relative_residual: f64,
    /// Geometric-mean convergence rate over the recent window, when enough
    /// history exists. Below 1.0 means the residual is shrinking.
    pub convergence_rate: Option<f64>,
    /// Rough workspace footprint of the running kernel, in bytes.
    pub memory_bytes: usize,
    pub converged: bool,
    /// Interim solution snapshot, when the caller asked for one.
    pub solution: Option<Array1<f64>>,
}

/// Classification of the residual trajectory after one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Converged,
    Stagnated,
    Diverged,
}

/// Report grade, for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    APlus,
    A,
    B,
    C,
    D,
    F,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        f.write_str(s)
    }
}

impl Grade {
    /// Grade mapping: A+ for fast, tight convergence; A/B for ordinary
    /// convergence (B when > 90% of the budget was spent); C/D for runs that
    /// stopped short, split at 10x tolerance; F for divergence.
    pub(crate) fn assess(
        converged: bool,
        diverged: bool,
        iterations: usize,
        n: usize,
        max_iterations: usize,
        relative_residual: f64,
        tolerance: f64,
    ) -> Grade {
        if diverged {
            return Grade::F;
        }
        if converged {
            let fast = iterations as f64 <= (n as f64).cbrt().ceil();
            if fast && relative_residual <= tolerance / 10.0 {
                return Grade::APlus;
            }
            if iterations * 10 > max_iterations * 9 {
                return Grade::B;
            }
            return Grade::A;
        }
        if relative_residual <= 10.0 * tolerance {
            Grade::C
        } else {
            Grade::D
        }
    }
}

#[derive(Debug)]
pub struct ConvergenceMonitor {
    tolerance: f64,
    window_rate: usize,
    window_stagnation: usize,
    initial: Option<f64>,
    /// Last `window_rate + 1` residuals, for the rate estimate.
    recent: VecDeque<f64>,
    /// Residual level the current flat stretch is anchored at.
    stagnation_anchor: f64,
    stagnant_run: usize,
}

impl ConvergenceMonitor {
    pub fn new(tolerance: f64, window_rate: usize, window_stagnation: usize) -> Self {
        let window_rate = window_rate.max(1);
        Self {
            tolerance,
            window_rate,
            window_stagnation: window_stagnation.max(2),
            initial: None,
            recent: VecDeque::with_capacity(window_rate + 1),
            stagnation_anchor: f64::NAN,
            stagnant_run: 0,
        }
    }

    /// Feed the relative residual of the latest iteration.
    pub fn observe(&mut self, relative_residual: f64) -> Verdict {
        if !relative_residual.is_finite() {
            return Verdict::Diverged;
        }
        let initial = *self.initial.get_or_insert(relative_residual);

        if self.recent.len() == self.window_rate + 1 {
            self.recent.pop_front();
        }
        self.recent.push_back(relative_residual);

        if relative_residual <= self.tolerance {
            return Verdict::Converged;
        }
        if relative_residual > initial * 10.0 {
            return Verdict::Diverged;
        }

        // Stagnation: the residual hugs one level (+/- 5%) for a full window.
        if self.stagnation_anchor.is_finite()
            && (relative_residual - self.stagnation_anchor).abs()
                <= 0.05 * self.stagnation_anchor
        {
            self.stagnant_run += 1;
            if self.stagnant_run >= self.window_stagnation {
                return Verdict::Stagnated;
            }
        } else {
            self.stagnation_anchor = relative_residual;
            self.stagnant_run = 1;
        }

        Verdict::Proceed
    }

    /// Geometric mean of successive residual ratios over the rate window.
    pub fn rate(&self) -> Option<f64> {
        let w = self.window_rate;
        if self.recent.len() < w + 1 {
            return None;
        }
        let newest = *self.recent.back()?;
        let oldest = *self.recent.front()?;
        if oldest <= 0.0 || newest < 0.0 {
            return None;
        }
        Some((newest / oldest).powf(1.0 / w as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_at_tolerance() {
        let mut m = ConvergenceMonitor::new(1e-8, 5, 20);
        assert_eq!(m.observe(1.0), Verdict::Proceed);
        assert_eq!(m.observe(1e-9), Verdict::Converged);
    }

    #[test]
    fn divergence_on_blowup_and_nan() {
        let mut m = ConvergenceMonitor::new(1e-8, 5, 20);
        assert_eq!(m.observe(1.0), Verdict::Proceed);
        assert_eq!(m.observe(11.0), Verdict::Diverged);

        let mut m = ConvergenceMonitor::new(1e-8, 5, 20);
        assert_eq!(m.observe(f64::NAN), Verdict::Diverged);
    }

    #[test]
    fn stagnation_after_flat_window() {
        let mut m = ConvergenceMonitor::new(1e-8, 5, 4);
        let mut verdict = Verdict::Proceed;
        for _ in 0..10 {
            verdict = m.observe(0.5);
            if verdict != Verdict::Proceed {
                break;
            }
        }
        assert_eq!(verdict, Verdict::Stagnated);
    }

    #[test]
    fn steady_decay_is_not_stagnation() {
        let mut m = ConvergenceMonitor::new(1e-30, 5, 4);
        let mut rho = 1.0;
        for _ in 0..50 {
            assert_eq!(m.observe(rho), Verdict::Proceed);
            rho *= 0.8;
        }
    }

    #[test]
    fn rate_tracks_geometric_decay() {
        let mut m = ConvergenceMonitor::new(1e-30, 3, 20);
        for k in 0..6 {
            let _ = m.observe(0.5f64.powi(k));
        }
        let rate = m.rate().unwrap();
        assert!((rate - 0.5).abs() < 1e-12, "rate = {rate}");
    }

    #[test]
    fn grades() {
        // 1000-dim, converged in 5 iterations with a tight residual.
        assert_eq!(Grade::assess(true, false, 5, 1000, 1000, 1e-12, 1e-8), Grade::APlus);
        assert_eq!(Grade::assess(true, false, 500, 1000, 1000, 1e-9, 1e-8), Grade::A);
        assert_eq!(Grade::assess(true, false, 950, 1000, 1000, 1e-9, 1e-8), Grade::B);
        assert_eq!(Grade::assess(false, false, 1000, 1000, 1000, 5e-8, 1e-8), Grade::C);
        assert_eq!(Grade::assess(false, false, 1000, 1000, 1000, 1e-3, 1e-8), Grade::D);
        assert_eq!(Grade::assess(false, true, 3, 1000, 1000, 1e3, 1e-8), Grade::F);
        assert_eq!(format!("{}", Grade::APlus), "A+");
    }
}
