//! Feasibility-guarded driver sweeps.
//!
//! A sweep walks one driver through an interval in uniform steps. Each
//! step sets the driver value, solves precisely from the previous
//! accepted configuration (continuation), then checks the residual
//! report against the feasibility threshold. An infeasible step is
//! rolled back to the last accepted configuration and stops the sweep;
//! links are never left stretched past a dead point.

use std::collections::BTreeMap;

use glam::DVec2;

use sketch_core::{DriverId, PointId, Sketch, SketchError, Tolerances};

use crate::least_squares::{LeastSquaresSolver, SolveError};
use crate::projection::ProjectionSolver;

/// Sweep parameters.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub driver: DriverId,
    /// Start value (radians for angle drivers, length units for offset
    /// drivers).
    pub start: f64,
    pub end: f64,
    /// Number of steps; step `i` (1-based) targets
    /// `start + (end - start) * i / steps`.
    pub steps: usize,
    /// Maximum constraint error an accepted step may leave behind.
    pub feasibility_tol: f64,
    /// Retry a failed precise solve with the projection backend before
    /// judging feasibility.
    pub fallback_to_projection: bool,
}

impl SweepConfig {
    pub fn new(driver: DriverId, start: f64, end: f64, steps: usize) -> Self {
        Self {
            driver,
            start,
            end,
            steps,
            feasibility_tol: 1e-3,
            fallback_to_projection: false,
        }
    }
}

/// Which backend produced a step's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveBackend {
    LeastSquares,
    Projection,
}

/// Why a step was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The precise solver reported failure (and no fallback applied).
    SolverFailure(SolveError),
    /// A solution was produced but left residuals past the threshold.
    FeasibilityExceeded { max_error: f64 },
    /// The driver disappeared mid-sweep.
    Sketch(SketchError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Accepted,
    Rejected(RejectReason),
}

/// Record of one sweep step.
#[derive(Debug, Clone)]
pub struct SweepStep {
    /// 0-based step index.
    pub index: usize,
    /// Driver value targeted by this step.
    pub value: f64,
    pub backend: SolveBackend,
    pub status: StepStatus,
    /// Point positions after the step was accepted.
    pub positions: Option<BTreeMap<PointId, DVec2>>,
}

impl SweepStep {
    pub fn accepted(&self) -> bool {
        matches!(self.status, StepStatus::Accepted)
    }
}

/// Sweep lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Running,
    Finished,
    /// Stopped at a dead point; the sketch holds the last accepted
    /// configuration.
    Rejected,
    Canceled,
}

/// How a completed sweep ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    Completed,
    /// The mechanism cannot follow the driver past this step.
    DeadPoint { index: usize, value: f64 },
    Canceled,
}

/// Full sweep record.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub steps: Vec<SweepStep>,
    pub outcome: SweepOutcome,
}

impl SweepReport {
    pub fn accepted_count(&self) -> usize {
        self.steps.iter().filter(|s| s.accepted()).count()
    }
}

/// Incremental sweep executor.
///
/// `step` advances one driver increment at a time so a caller can
/// interleave rendering or cancellation checks; `run` drives the whole
/// interval.
pub struct SweepRunner {
    config: SweepConfig,
    state: SweepState,
    next_index: usize,
    precise: LeastSquaresSolver,
    projection: ProjectionSolver,
}

impl SweepRunner {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config,
            state: SweepState::Idle,
            next_index: 0,
            precise: LeastSquaresSolver::new(),
            projection: ProjectionSolver::new(),
        }
    }

    pub fn with_precise_solver(mut self, solver: LeastSquaresSolver) -> Self {
        self.precise = solver;
        self
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// The feasibility threshold applied to every residual category.
    fn feasibility_tolerances(&self) -> Tolerances {
        Tolerances {
            length: self.config.feasibility_tol,
            angle_rad: self.config.feasibility_tol,
        }
    }

    /// Mark the sweep canceled. Takes effect at the next step boundary;
    /// the sketch keeps the last accepted configuration.
    pub fn cancel(&mut self) {
        if matches!(self.state, SweepState::Idle | SweepState::Running) {
            self.state = SweepState::Canceled;
        }
    }

    /// Advance one step. Returns `None` once the sweep is over.
    pub fn step(&mut self, sketch: &mut Sketch) -> Option<SweepStep> {
        match self.state {
            SweepState::Idle => self.state = SweepState::Running,
            SweepState::Running => {}
            _ => return None,
        }
        if self.next_index >= self.config.steps {
            self.state = SweepState::Finished;
            return None;
        }

        let index = self.next_index;
        self.next_index += 1;
        let t = (index + 1) as f64 / self.config.steps as f64;
        let value = self.config.start + (self.config.end - self.config.start) * t;

        let snapshot = sketch.snapshot_positions();
        let prev_value = sketch.driver(self.config.driver).map(|d| d.value);
        if let Err(e) = sketch.set_driver_value(self.config.driver, value) {
            self.state = SweepState::Rejected;
            return Some(SweepStep {
                index,
                value,
                backend: SolveBackend::LeastSquares,
                status: StepStatus::Rejected(RejectReason::Sketch(e)),
                positions: None,
            });
        }

        let (backend, solve_failure) = match self.precise.solve(sketch) {
            Ok(_) => (SolveBackend::LeastSquares, None),
            Err(e) if self.config.fallback_to_projection => {
                tracing::debug!(index, value, error = %e, "falling back to projection");
                self.projection.solve(sketch, None);
                (SolveBackend::Projection, None)
            }
            Err(e) => (SolveBackend::LeastSquares, Some(e)),
        };

        let status = match solve_failure {
            Some(e) => StepStatus::Rejected(RejectReason::SolverFailure(e)),
            None => {
                let report = sketch.max_constraint_error();
                if report.within(&self.feasibility_tolerances()) {
                    StepStatus::Accepted
                } else {
                    StepStatus::Rejected(RejectReason::FeasibilityExceeded {
                        max_error: report.max(),
                    })
                }
            }
        };

        match &status {
            StepStatus::Accepted => Some(SweepStep {
                index,
                value,
                backend,
                status,
                positions: Some(sketch.snapshot_positions()),
            }),
            StepStatus::Rejected(reason) => {
                tracing::info!(index, value, ?reason, "sweep step rejected");
                sketch.restore_positions(&snapshot);
                if let Some(v) = prev_value {
                    let _ = sketch.set_driver_value(self.config.driver, v);
                }
                // Flags written while solving the rejected step must
                // describe the restored configuration instead.
                sketch.update_over_flags(&Tolerances::default());
                self.state = SweepState::Rejected;
                Some(SweepStep {
                    index,
                    value,
                    backend,
                    status,
                    positions: None,
                })
            }
        }
    }

    /// Run the sweep to completion, checking `cancel` at each step
    /// boundary.
    pub fn run(
        &mut self,
        sketch: &mut Sketch,
        mut cancel: impl FnMut() -> bool,
    ) -> SweepReport {
        let mut steps = Vec::new();
        loop {
            if cancel() {
                self.cancel();
            }
            let Some(step) = self.step(sketch) else {
                break;
            };
            let rejected = !step.accepted();
            let (index, value) = (step.index, step.value);
            steps.push(step);
            if rejected {
                return SweepReport {
                    steps,
                    outcome: SweepOutcome::DeadPoint { index, value },
                };
            }
        }
        let outcome = match self.state {
            SweepState::Canceled => SweepOutcome::Canceled,
            _ => SweepOutcome::Completed,
        };
        SweepReport { steps, outcome }
    }
}
