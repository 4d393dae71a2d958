//! Real-time projection solver.
//!
//! Position-based projection: a fixed number of passes, each applying
//! every active constraint as a direct positional correction. Latency
//! is bounded by the iteration budget, so the solver never reports
//! failure; it returns its best estimate and leaves residual
//! diagnostics in the `over` flags.
//!
//! The category order within a pass is a correctness invariant, kept as
//! the explicit [`PASS_ORDER`] list: rigid geometry (coincidence,
//! point-on-line, rigid edges) must project before length and angle so
//! downstream corrections observe consistent bodies and do not
//! oscillate.

use std::collections::{BTreeMap, BTreeSet};

use glam::DVec2;

use sketch_core::geometry::{angle_between, project_onto_line, rotate, wrap_angle};
use sketch_core::{AngleKind, DriverKind, PointId, Sketch, Tolerances};

/// Constraint categories in projection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintPass {
    Drivers,
    Coincidence,
    PointOnLine,
    RigidEdges,
    Length,
    Angle,
}

/// The per-pass category order. Drivers are hard inputs and go first;
/// length and angle corrections come last.
pub const PASS_ORDER: [ConstraintPass; 6] = [
    ConstraintPass::Drivers,
    ConstraintPass::Coincidence,
    ConstraintPass::PointOnLine,
    ConstraintPass::RigidEdges,
    ConstraintPass::Length,
    ConstraintPass::Angle,
];

/// A candidate position for a point being dragged.
///
/// The point is attracted toward the target each pass and locked
/// against every other correction, so the rest of the mechanism adapts
/// around the cursor instead of fighting it.
#[derive(Debug, Clone, Copy)]
pub struct DragInput {
    pub point: PointId,
    pub target: DVec2,
}

/// Fixed-iteration projection solver.
#[derive(Debug, Clone)]
pub struct ProjectionSolver {
    iterations: usize,
    drag_alpha: f64,
    tolerances: Tolerances,
}

impl Default for ProjectionSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionSolver {
    pub fn new() -> Self {
        Self {
            iterations: 60,
            drag_alpha: 0.45,
            tolerances: Tolerances::default(),
        }
    }

    /// Set the pass count, clamped to the supported 20..=80 range.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.clamp(20, 80);
        self
    }

    /// Set the drag attraction factor (0..=1).
    pub fn with_drag_alpha(mut self, alpha: f64) -> Self {
        self.drag_alpha = alpha.clamp(0.0, 1.0);
        self
    }

    pub fn with_tolerances(mut self, tolerances: Tolerances) -> Self {
        self.tolerances = tolerances;
        self
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Run the fixed pass budget over the sketch.
    ///
    /// Expressions are refreshed once up front; `over` flags are
    /// recomputed from residuals afterwards. Never fails.
    pub fn solve(&self, sketch: &mut Sketch, drag: Option<DragInput>) {
        sketch.refresh_expressions();
        sketch.clear_over_flags();

        let mut state = PassState::capture(sketch, drag.as_ref());
        for _ in 0..self.iterations {
            if let Some(drag) = &drag {
                state.attract(drag, self.drag_alpha);
            }
            for pass in PASS_ORDER {
                state.apply(pass, sketch);
            }
        }
        state.write_back(sketch);

        sketch.update_over_flags(&self.tolerances);
    }
}

/// Working copy of positions plus lock bookkeeping for one solve call.
struct PassState {
    pos: BTreeMap<PointId, DVec2>,
    fixed: BTreeSet<PointId>,
    /// The point held by the user, if any. Attracted toward the drag
    /// target and locked against every other correction.
    held: Option<PointId>,
    /// Points whose position is dictated by a driver this cycle.
    driven: BTreeSet<PointId>,
    /// Pivot-tip pairs owned by angle drivers; length-type corrections
    /// on these pairs may still move the driven tip radially.
    driver_pairs: BTreeSet<(PointId, PointId)>,
}

impl PassState {
    fn capture(sketch: &Sketch, drag: Option<&DragInput>) -> Self {
        let pos = sketch.snapshot_positions();
        let fixed: BTreeSet<PointId> = sketch
            .points()
            .filter(|p| p.fixed)
            .map(|p| p.id)
            .collect();
        let held = drag
            .map(|d| d.point)
            .filter(|p| pos.contains_key(p) && !fixed.contains(p));

        let mut driven = BTreeSet::new();
        let mut driver_pairs = BTreeSet::new();
        for d in sketch.drivers().filter(|d| d.enabled) {
            match d.kind {
                DriverKind::Angle { pivot, tip } => {
                    driven.insert(tip);
                    driver_pairs.insert(ordered(pivot, tip));
                }
                DriverKind::Offset { constraint } => {
                    if let Some(pl) = sketch.point_on_line(constraint) {
                        driven.insert(pl.p);
                    }
                }
            }
        }
        Self {
            pos,
            fixed,
            held,
            driven,
            driver_pairs,
        }
    }

    fn write_back(&self, sketch: &mut Sketch) {
        sketch.restore_positions(&self.pos);
    }

    fn locked(&self, pid: PointId) -> bool {
        self.fixed.contains(&pid) || self.held == Some(pid) || self.driven.contains(&pid)
    }

    /// Locked for length-type corrections; the driven tip of an angle
    /// driver stays movable along its own crank.
    fn locked_for_pair(&self, pid: PointId, other: PointId) -> bool {
        if self.fixed.contains(&pid) || self.held == Some(pid) {
            return true;
        }
        self.driven.contains(&pid) && !self.driver_pairs.contains(&ordered(pid, other))
    }

    fn attract(&mut self, drag: &DragInput, alpha: f64) {
        if self.held != Some(drag.point) {
            return;
        }
        if let Some(p) = self.pos.get_mut(&drag.point) {
            *p += (drag.target - *p) * alpha;
        }
    }

    fn apply(&mut self, pass: ConstraintPass, sketch: &Sketch) {
        match pass {
            ConstraintPass::Drivers => self.project_drivers(sketch),
            ConstraintPass::Coincidence => self.project_coincidences(sketch),
            ConstraintPass::PointOnLine => self.project_point_lines(sketch),
            ConstraintPass::RigidEdges => self.project_rigid_edges(sketch),
            ConstraintPass::Length => self.project_lengths(sketch),
            ConstraintPass::Angle => self.project_angles(sketch),
        }
    }

    fn project_drivers(&mut self, sketch: &Sketch) {
        for d in sketch.drivers().filter(|d| d.enabled) {
            match d.kind {
                DriverKind::Angle { pivot, tip } => {
                    if self.fixed.contains(&tip)
                        || self.held == Some(tip)
                        || self.held == Some(pivot)
                    {
                        continue;
                    }
                    let pp = self.pos[&pivot];
                    let tp = self.pos[&tip];
                    let r = pp.distance(tp);
                    if r < 1e-9 {
                        continue;
                    }
                    let (s, c) = d.value.sin_cos();
                    self.pos.insert(tip, pp + DVec2::new(c, s) * r);
                }
                DriverKind::Offset { constraint } => {
                    let Some(pl) = sketch.point_on_line(constraint) else {
                        continue;
                    };
                    self.project_station(pl.p, pl.i, pl.j, d.value);
                }
            }
        }
    }

    fn project_coincidences(&mut self, sketch: &Sketch) {
        for c in sketch.coincidences().filter(|c| c.enabled) {
            let pa = self.pos[&c.a];
            let pb = self.pos[&c.b];
            let lock_a = self.locked(c.a);
            let lock_b = self.locked(c.b);
            if lock_a && lock_b {
                continue;
            }
            if lock_a {
                self.pos.insert(c.b, pa);
            } else if lock_b {
                self.pos.insert(c.a, pb);
            } else {
                let mid = (pa + pb) * 0.5;
                self.pos.insert(c.a, mid);
                self.pos.insert(c.b, mid);
            }
        }
    }

    fn project_point_lines(&mut self, sketch: &Sketch) {
        for pl in sketch.point_lines().filter(|pl| pl.enabled) {
            match pl.offset {
                Some(s) => self.project_station(pl.p, pl.i, pl.j, s),
                None => self.project_onto_infinite_line(pl.p, pl.i, pl.j),
            }
        }
    }

    fn project_onto_infinite_line(&mut self, p: PointId, i: PointId, j: PointId) {
        let pp = self.pos[&p];
        let a = self.pos[&i];
        let b = self.pos[&j];
        let Some(proj) = project_onto_line(pp, a, b) else {
            return;
        };
        let delta = proj - pp;
        if delta.length_squared() <= 1e-16 {
            return;
        }
        let w_p = if self.locked(p) { 0.0 } else { 1.0 };
        let w_a = if self.locked(i) { 0.0 } else { 1.0 };
        let w_b = if self.locked(j) { 0.0 } else { 1.0 };
        let w = w_p + w_a + w_b;
        if w <= 0.0 {
            return;
        }
        // Move P toward its projection while translating the line
        // oppositely; converges over the pass budget even when only one
        // participant is free.
        if w_p > 0.0 {
            self.pos.insert(p, pp + delta * (w_p / w));
        }
        if w_a > 0.0 {
            self.pos.insert(i, a - delta * (w_a / w));
        }
        if w_b > 0.0 {
            self.pos.insert(j, b - delta * (w_b / w));
        }
    }

    /// Pin `p` to the station `offset` length units from `i` along the
    /// i-j line.
    fn project_station(&mut self, p: PointId, i: PointId, j: PointId, offset: f64) {
        let pp = self.pos[&p];
        let a = self.pos[&i];
        let b = self.pos[&j];
        let dir = b - a;
        let len = dir.length();
        if len < 1e-9 {
            return;
        }
        let station = a + dir / len * offset;
        let delta = station - pp;
        if delta.length_squared() <= 1e-16 {
            return;
        }
        let w_p = if self.fixed.contains(&p) || self.held == Some(p) {
            0.0
        } else {
            1.0
        };
        let w_a = if self.locked(i) { 0.0 } else { 1.0 };
        let w_b = if self.locked(j) { 0.0 } else { 1.0 };
        let w = w_p + w_a + w_b;
        if w <= 0.0 {
            return;
        }
        if w_p > 0.0 {
            self.pos.insert(p, pp + delta * (w_p / w));
        }
        if w_a > 0.0 {
            self.pos.insert(i, a - delta * (w_a / w));
        }
        if w_b > 0.0 {
            self.pos.insert(j, b - delta * (w_b / w));
        }
    }

    fn project_rigid_edges(&mut self, sketch: &Sketch) {
        for edge in sketch.rigid_edges() {
            self.project_length_pair(edge.i, edge.j, edge.rest_length);
        }
    }

    fn project_lengths(&mut self, sketch: &Sketch) {
        for l in sketch.lengths().filter(|l| l.is_active()) {
            self.project_length_pair(l.i, l.j, l.target);
        }
    }

    fn project_length_pair(&mut self, i: PointId, j: PointId, target: f64) {
        let p1 = self.pos[&i];
        let p2 = self.pos[&j];
        let delta = p2 - p1;
        let d = delta.length();
        if d < 1e-12 {
            return;
        }
        let w1 = if self.locked_for_pair(i, j) { 0.0 } else { 1.0 };
        let w2 = if self.locked_for_pair(j, i) { 0.0 } else { 1.0 };
        let w = w1 + w2;
        if w <= 0.0 {
            return;
        }
        let err = d - target;
        let n = delta / d;
        self.pos.insert(i, p1 + n * (w1 / w * err));
        self.pos.insert(j, p2 - n * (w2 / w * err));
    }

    fn project_angles(&mut self, sketch: &Sketch) {
        for a in sketch.angles().filter(|a| a.enabled) {
            let pj = self.pos[&a.j];
            let v1 = self.pos[&a.i] - pj;
            let v2 = self.pos[&a.k] - pj;
            if v1.length() < 1e-12 || v2.length() < 1e-12 {
                continue;
            }
            let signed = angle_between(v1, v2);
            // Joint angles are unsigned; correct along the current
            // winding direction.
            let err = match a.kind {
                AngleKind::Vector => wrap_angle(signed - a.target_rad()),
                AngleKind::Joint => {
                    let dir = if signed < 0.0 { -1.0 } else { 1.0 };
                    (signed.abs() - a.target_rad()) * dir
                }
            };
            if err.abs() <= 1e-12 {
                continue;
            }
            let lock_i = self.locked(a.i);
            let lock_k = self.locked(a.k);
            if lock_i && lock_k {
                continue;
            }
            if lock_i {
                self.pos.insert(a.k, pj + rotate(v2, -err));
            } else if lock_k {
                self.pos.insert(a.i, pj + rotate(v1, err));
            } else {
                let half = err * 0.5;
                self.pos.insert(a.i, pj + rotate(v1, half));
                self.pos.insert(a.k, pj + rotate(v2, -half));
            }
        }
    }
}

fn ordered(a: PointId, b: PointId) -> (PointId, PointId) {
    if a <= b { (a, b) } else { (b, a) }
}
