//! Solvers for the 2D linkage sketch core.
//!
//! Two backends over the same entity graph:
//! - [`ProjectionSolver`]: bounded-latency positional projection for
//!   interactive dragging; always returns a best estimate.
//! - [`LeastSquaresSolver`]: damped least-squares convergence for
//!   precise stationary solutions; all-or-nothing.
//!
//! [`SweepRunner`] steps a driver through an interval with the precise
//! backend and stops at the first infeasible configuration.

pub mod least_squares;
pub mod projection;
pub mod sweep;

pub use least_squares::{LeastSquaresSolver, SolveError, SolveOutcome};
pub use projection::{ConstraintPass, DragInput, ProjectionSolver, PASS_ORDER};
pub use sweep::{
    RejectReason, SolveBackend, StepStatus, SweepConfig, SweepOutcome, SweepReport,
    SweepRunner, SweepState, SweepStep,
};

use sketch_core::Sketch;

/// Which backend a one-shot [`solve`] call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveMode {
    /// Projection passes; bounded latency, approximate.
    Fast,
    /// Damped least-squares; precise or an error.
    Precise,
}

/// Solve the sketch with default solver settings.
///
/// `Fast` never fails and reports the residual norm it leaves behind;
/// `Precise` fails without touching the sketch when it cannot converge.
pub fn solve(sketch: &mut Sketch, mode: SolveMode) -> Result<SolveOutcome, SolveError> {
    match mode {
        SolveMode::Fast => {
            ProjectionSolver::new().solve(sketch, None);
            let max_residual = sketch.max_constraint_error().max();
            Ok(SolveOutcome {
                converged: max_residual <= sketch_core::Tolerances::default().length,
                max_residual,
                iterations: ProjectionSolver::new().iterations(),
            })
        }
        SolveMode::Precise => LeastSquaresSolver::new().solve(sketch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use glam::DVec2;

    #[test]
    fn fast_mode_always_returns() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::new(1.0, 0.0));
        sk.set_fixed(a, true).unwrap();
        sk.set_fixed(b, true).unwrap();
        sk.add_length(a, b, 9.0).unwrap();

        let outcome = solve(&mut sk, SolveMode::Fast).unwrap();
        assert!(!outcome.converged);
        assert_abs_diff_eq!(outcome.max_residual, 8.0, epsilon = 1e-9);
    }

    #[test]
    fn precise_mode_converges_where_fast_approximates() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::new(0.7, 0.7));
        sk.set_fixed(a, true).unwrap();
        sk.add_length(a, b, 1.0).unwrap();

        let outcome = solve(&mut sk, SolveMode::Precise).unwrap();
        assert!(outcome.converged);
        assert!(outcome.max_residual < 1e-6);
        assert_abs_diff_eq!(sk.point(b).unwrap().pos.length(), 1.0, epsilon = 1e-6);
    }
}
