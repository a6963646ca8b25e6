//! Method selection.
//!
//! Routes a query to a ranked list of kernels from the analysis report and
//! the query shape. The head of the list is the rule-table pick; the tail is
//! the recovery order the solve entry walks when a kernel refuses with
//! `NotDominant` or breaks down and an alternative remains.

use crate::analyze::{AnalysisReport, Dominance};
use crate::solver::Method;

/// Sparsity ratio above which the local kernels are worth their overhead.
const SPARSE_CUTOFF: f64 = 0.9;

/// Contraction bound under which the Neumann series converges fast enough to
/// beat the alternatives.
const FAST_SERIES_CUTOFF: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryShape {
    FullSolve,
    SingleEntry,
    PageRankFull,
    PageRankTopK,
}

fn strictly_dominant(report: &AnalysisReport) -> bool {
    report.dominance_strength > 0.0
}

fn row_dominant(report: &AnalysisReport) -> bool {
    matches!(report.dominance, Dominance::Row | Dominance::Both)
}

/// Ranked kernel choice; first entry wins, the rest are recovery fallbacks.
///
/// `contraction` is ||I - sA||_inf for the Neumann scaling, when computable.
pub(crate) fn route(
    report: &AnalysisReport,
    shape: QueryShape,
    contraction: Option<f64>,
) -> Vec<Method> {
    let mut ranked = Vec::new();
    let mut add = |m: Method, ranked: &mut Vec<Method>| {
        if !ranked.contains(&m) {
            ranked.push(m);
        }
    };

    match shape {
        QueryShape::SingleEntry => {
            if report.sparsity >= SPARSE_CUTOFF && report.is_dominant() && strictly_dominant(report)
            {
                add(Method::Bidirectional, &mut ranked);
            }
            if strictly_dominant(report) {
                add(Method::RandomWalk, &mut ranked);
            }
            // No provable dominance: solve the full system and read the entry.
            add(Method::ConjugateGradient, &mut ranked);
        }
        QueryShape::PageRankTopK => {
            add(Method::ForwardPush, &mut ranked);
        }
        QueryShape::PageRankFull => {
            add(Method::Neumann, &mut ranked);
            add(Method::ForwardPush, &mut ranked);
        }
        QueryShape::FullSolve => {
            if contraction.is_some_and(|m| m < FAST_SERIES_CUTOFF) {
                add(Method::Neumann, &mut ranked);
            }
            if report.symmetric && report.is_dominant() {
                add(Method::ConjugateGradient, &mut ranked);
            }
            if report.sparsity >= SPARSE_CUTOFF && row_dominant(report) && strictly_dominant(report)
            {
                add(Method::ForwardPush, &mut ranked);
            }
            add(Method::ConjugateGradient, &mut ranked);
            // CG breakdown can still be recovered when the series converges.
            if contraction.is_some_and(|m| m < 1.0) {
                add(Method::Neumann, &mut ranked);
            }
        }
    }

    log::debug!(
        "oracle: shape={shape:?} dominance={:?} strength={:e} sparsity={:.3} symmetric={} -> {:?}",
        report.dominance,
        report.dominance_strength,
        report.sparsity,
        report.symmetric,
        ranked
    );
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(
        dominance: Dominance,
        strength: f64,
        symmetric: bool,
        sparsity: f64,
    ) -> AnalysisReport {
        AnalysisReport {
            dominance,
            dominance_strength: strength,
            symmetric,
            sparsity,
            spectral_radius: None,
            condition_estimate: None,
        }
    }

    #[test]
    fn sparse_dominant_single_entry_goes_bidirectional() {
        let r = report(Dominance::Row, 0.3, false, 0.95);
        let ranked = route(&r, QueryShape::SingleEntry, None);
        assert_eq!(ranked[0], Method::Bidirectional);
    }

    #[test]
    fn weakly_dominant_single_entry_goes_random_walk() {
        let r = report(Dominance::Row, 0.05, false, 0.4);
        let ranked = route(&r, QueryShape::SingleEntry, None);
        assert_eq!(ranked[0], Method::RandomWalk);
    }

    #[test]
    fn non_dominant_single_entry_falls_back_to_cg() {
        let r = report(Dominance::None, -1.0, true, 0.5);
        let ranked = route(&r, QueryShape::SingleEntry, None);
        assert_eq!(ranked, vec![Method::ConjugateGradient]);
    }

    #[test]
    fn fast_contraction_prefers_neumann() {
        let r = report(Dominance::Both, 0.6, true, 0.5);
        let ranked = route(&r, QueryShape::FullSolve, Some(0.4));
        assert_eq!(ranked[0], Method::Neumann);
    }

    #[test]
    fn symmetric_dominant_prefers_cg() {
        let r = report(Dominance::Both, 0.2, true, 0.5);
        let ranked = route(&r, QueryShape::FullSolve, Some(0.8));
        assert_eq!(ranked[0], Method::ConjugateGradient);
    }

    #[test]
    fn sparse_row_dominant_uses_forward_push() {
        let r = report(Dominance::Row, 0.2, false, 0.95);
        let ranked = route(&r, QueryShape::FullSolve, Some(0.8));
        assert_eq!(ranked[0], Method::ForwardPush);
        assert!(ranked.contains(&Method::ConjugateGradient));
    }

    #[test]
    fn default_is_cg() {
        let r = report(Dominance::None, -0.5, false, 0.2);
        let ranked = route(&r, QueryShape::FullSolve, None);
        assert_eq!(ranked[0], Method::ConjugateGradient);
    }

    #[test]
    fn pagerank_routes() {
        let r = report(Dominance::None, -1.0, false, 0.99);
        assert_eq!(
            route(&r, QueryShape::PageRankTopK, None)[0],
            Method::ForwardPush
        );
        assert_eq!(
            route(&r, QueryShape::PageRankFull, None)[0],
            Method::Neumann
        );
    }
}
