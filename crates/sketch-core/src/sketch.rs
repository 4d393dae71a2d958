//! The in-memory entity graph.
//!
//! `Sketch` exclusively owns all entities. Constraints reference points
//! by id; deleting a point cascades so the solvers can never
//! dereference a dangling id. All entity maps are `BTreeMap`s, giving
//! the deterministic id-order iteration the solvers rely on.

use std::collections::BTreeMap;

use glam::DVec2;
use thiserror::Error;

use crate::body::{RigidBody, RigidEdge};
use crate::constraint::{
    AngleConstraint, AngleKind, Coincidence, LengthConstraint, PointOnLine,
};
use crate::driver::{Driver, DriverKind};
use crate::expr::ExpressionError;
use crate::geometry::{angle_between, joint_angle, polar_angle, signed_line_distance, wrap_angle};
use crate::id::{AngleId, BodyId, CoincidenceId, DriverId, LengthId, PointId, PointOnLineId};
use crate::param::ParameterRegistry;
use crate::point::Point;

/// Failure of a store mutation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SketchError {
    #[error("unknown point: {0}")]
    UnknownPoint(PointId),
    #[error("unknown length constraint: {0}")]
    UnknownLength(LengthId),
    #[error("unknown angle constraint: {0}")]
    UnknownAngle(AngleId),
    #[error("unknown coincidence: {0}")]
    UnknownCoincidence(CoincidenceId),
    #[error("unknown point-on-line constraint: {0}")]
    UnknownPointOnLine(PointOnLineId),
    #[error("unknown rigid body: {0}")]
    UnknownBody(BodyId),
    #[error("unknown driver: {0}")]
    UnknownDriver(DriverId),
    #[error("point {0} is fixed")]
    FixedPoint(PointId),
    #[error("a rigid body needs at least two points")]
    TooFewBodyPoints,
}

/// A numeric field that may be driven by an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldRef {
    PointX(PointId),
    PointY(PointId),
    LengthTarget(LengthId),
    AngleTarget(AngleId),
}

/// Residual tolerances used for `over` flagging.
///
/// Shared by both solver backends: 1e-3 length units and 1e-3 radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub length: f64,
    pub angle_rad: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            length: 1e-3,
            angle_rad: 1e-3,
        }
    }
}

/// Per-category maxima of constraint residuals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConstraintErrorReport {
    /// Length constraints and rigid-body edges, in length units.
    pub length: f64,
    /// Angle constraints, in radians.
    pub angle: f64,
    /// Coincidence separation, in length units.
    pub coincidence: f64,
    /// Point-on-line distance, in length units.
    pub point_on_line: f64,
}

impl ConstraintErrorReport {
    /// Overall maximum across all categories.
    pub fn max(&self) -> f64 {
        self.length
            .max(self.angle)
            .max(self.coincidence)
            .max(self.point_on_line)
    }

    /// True when every category is within its tolerance.
    pub fn within(&self, tol: &Tolerances) -> bool {
        self.length <= tol.length
            && self.angle <= tol.angle_rad
            && self.coincidence <= tol.length
            && self.point_on_line <= tol.length
    }
}

/// The sketch entity graph.
#[derive(Debug, Clone, Default)]
pub struct Sketch {
    pub(crate) points: BTreeMap<PointId, Point>,
    pub(crate) lengths: BTreeMap<LengthId, LengthConstraint>,
    pub(crate) angles: BTreeMap<AngleId, AngleConstraint>,
    pub(crate) coincidences: BTreeMap<CoincidenceId, Coincidence>,
    pub(crate) point_lines: BTreeMap<PointOnLineId, PointOnLine>,
    pub(crate) bodies: BTreeMap<BodyId, RigidBody>,
    pub(crate) drivers: BTreeMap<DriverId, Driver>,
    pub params: ParameterRegistry,
    pub(crate) next_point: u64,
    pub(crate) next_length: u64,
    pub(crate) next_angle: u64,
    pub(crate) next_coincidence: u64,
    pub(crate) next_point_line: u64,
    pub(crate) next_body: u64,
    pub(crate) next_driver: u64,
}

impl Sketch {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------- points ----------

    pub fn add_point(&mut self, pos: DVec2) -> PointId {
        let id = PointId(self.next_point);
        self.next_point += 1;
        self.points.insert(id, Point::new(id, pos));
        id
    }

    pub fn point(&self, id: PointId) -> Option<&Point> {
        self.points.get(&id)
    }

    pub fn point_mut(&mut self, id: PointId) -> Option<&mut Point> {
        self.points.get_mut(&id)
    }

    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.points.values()
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Move a point. Fixed points reject the write.
    pub fn set_position(&mut self, id: PointId, pos: DVec2) -> Result<(), SketchError> {
        let p = self
            .points
            .get_mut(&id)
            .ok_or(SketchError::UnknownPoint(id))?;
        if p.fixed {
            return Err(SketchError::FixedPoint(id));
        }
        p.pos = pos;
        Ok(())
    }

    pub fn set_fixed(&mut self, id: PointId, fixed: bool) -> Result<(), SketchError> {
        self.points
            .get_mut(&id)
            .ok_or(SketchError::UnknownPoint(id))?
            .fixed = fixed;
        Ok(())
    }

    pub fn set_point_hidden(&mut self, id: PointId, hidden: bool) -> Result<(), SketchError> {
        self.points
            .get_mut(&id)
            .ok_or(SketchError::UnknownPoint(id))?
            .hidden = hidden;
        Ok(())
    }

    /// Delete a point and everything that references it.
    pub fn remove_point(&mut self, id: PointId) -> Result<(), SketchError> {
        if self.points.remove(&id).is_none() {
            return Err(SketchError::UnknownPoint(id));
        }
        self.lengths.retain(|_, l| !l.references(id));
        self.angles.retain(|_, a| !a.references(id));
        self.coincidences.retain(|_, c| !c.references(id));

        let removed_lines: Vec<PointOnLineId> = self
            .point_lines
            .iter()
            .filter(|(_, pl)| pl.references(id))
            .map(|(plid, _)| *plid)
            .collect();
        self.point_lines.retain(|_, pl| !pl.references(id));

        for body in self.bodies.values_mut() {
            body.remove_point(id);
        }
        self.bodies.retain(|_, b| b.points.len() >= 2);

        self.drivers.retain(|_, d| {
            if d.references(id) {
                return false;
            }
            match d.kind {
                DriverKind::Offset { constraint } => !removed_lines.contains(&constraint),
                DriverKind::Angle { .. } => true,
            }
        });
        Ok(())
    }

    /// Ids of non-fixed points, in ascending id order.
    pub fn free_points(&self) -> Vec<PointId> {
        self.points
            .values()
            .filter(|p| !p.fixed)
            .map(|p| p.id)
            .collect()
    }

    // ---------- length constraints ----------

    pub fn add_length(
        &mut self,
        i: PointId,
        j: PointId,
        target: f64,
    ) -> Result<LengthId, SketchError> {
        self.require_point(i)?;
        self.require_point(j)?;
        let id = LengthId(self.next_length);
        self.next_length += 1;
        self.lengths.insert(id, LengthConstraint::new(id, i, j, target));
        Ok(id)
    }

    pub fn length(&self, id: LengthId) -> Option<&LengthConstraint> {
        self.lengths.get(&id)
    }

    pub fn length_mut(&mut self, id: LengthId) -> Option<&mut LengthConstraint> {
        self.lengths.get_mut(&id)
    }

    pub fn lengths(&self) -> impl Iterator<Item = &LengthConstraint> {
        self.lengths.values()
    }

    pub fn remove_length(&mut self, id: LengthId) -> Result<(), SketchError> {
        self.lengths
            .remove(&id)
            .map(|_| ())
            .ok_or(SketchError::UnknownLength(id))
    }

    /// Current distance between the endpoints, regardless of mode.
    pub fn measured_length(&self, id: LengthId) -> Option<f64> {
        let l = self.lengths.get(&id)?;
        let pi = self.points.get(&l.i)?;
        let pj = self.points.get(&l.j)?;
        Some(pi.pos.distance(pj.pos))
    }

    // ---------- angle constraints ----------

    pub fn add_angle(
        &mut self,
        i: PointId,
        j: PointId,
        k: PointId,
        target_deg: f64,
    ) -> Result<AngleId, SketchError> {
        self.require_point(i)?;
        self.require_point(j)?;
        self.require_point(k)?;
        let id = AngleId(self.next_angle);
        self.next_angle += 1;
        self.angles
            .insert(id, AngleConstraint::new(id, i, j, k, target_deg));
        Ok(id)
    }

    pub fn angle(&self, id: AngleId) -> Option<&AngleConstraint> {
        self.angles.get(&id)
    }

    pub fn angle_mut(&mut self, id: AngleId) -> Option<&mut AngleConstraint> {
        self.angles.get_mut(&id)
    }

    pub fn angles(&self) -> impl Iterator<Item = &AngleConstraint> {
        self.angles.values()
    }

    pub fn remove_angle(&mut self, id: AngleId) -> Result<(), SketchError> {
        self.angles
            .remove(&id)
            .map(|_| ())
            .ok_or(SketchError::UnknownAngle(id))
    }

    /// Current measured angle in degrees, per the constraint's kind.
    pub fn measured_angle_deg(&self, id: AngleId) -> Option<f64> {
        let a = self.angles.get(&id)?;
        self.current_angle_rad(a).map(f64::to_degrees)
    }

    // ---------- coincidences ----------

    pub fn add_coincidence(
        &mut self,
        a: PointId,
        b: PointId,
    ) -> Result<CoincidenceId, SketchError> {
        self.require_point(a)?;
        self.require_point(b)?;
        let id = CoincidenceId(self.next_coincidence);
        self.next_coincidence += 1;
        self.coincidences.insert(id, Coincidence::new(id, a, b));
        Ok(id)
    }

    pub fn coincidence(&self, id: CoincidenceId) -> Option<&Coincidence> {
        self.coincidences.get(&id)
    }

    pub fn coincidences(&self) -> impl Iterator<Item = &Coincidence> {
        self.coincidences.values()
    }

    pub fn remove_coincidence(&mut self, id: CoincidenceId) -> Result<(), SketchError> {
        self.coincidences
            .remove(&id)
            .map(|_| ())
            .ok_or(SketchError::UnknownCoincidence(id))
    }

    // ---------- point-on-line ----------

    pub fn add_point_on_line(
        &mut self,
        p: PointId,
        i: PointId,
        j: PointId,
    ) -> Result<PointOnLineId, SketchError> {
        self.require_point(p)?;
        self.require_point(i)?;
        self.require_point(j)?;
        let id = PointOnLineId(self.next_point_line);
        self.next_point_line += 1;
        self.point_lines.insert(id, PointOnLine::new(id, p, i, j));
        Ok(id)
    }

    pub fn point_on_line(&self, id: PointOnLineId) -> Option<&PointOnLine> {
        self.point_lines.get(&id)
    }

    pub fn point_on_line_mut(&mut self, id: PointOnLineId) -> Option<&mut PointOnLine> {
        self.point_lines.get_mut(&id)
    }

    pub fn point_lines(&self) -> impl Iterator<Item = &PointOnLine> {
        self.point_lines.values()
    }

    pub fn remove_point_on_line(&mut self, id: PointOnLineId) -> Result<(), SketchError> {
        if self.point_lines.remove(&id).is_none() {
            return Err(SketchError::UnknownPointOnLine(id));
        }
        self.drivers.retain(|_, d| match d.kind {
            DriverKind::Offset { constraint } => constraint != id,
            DriverKind::Angle { .. } => true,
        });
        Ok(())
    }

    // ---------- rigid bodies ----------

    /// Create a rigid body over `points`, capturing the current
    /// distance of every point pair as its rest length.
    pub fn add_rigid_body(
        &mut self,
        name: impl Into<String>,
        points: Vec<PointId>,
    ) -> Result<BodyId, SketchError> {
        if points.len() < 2 {
            return Err(SketchError::TooFewBodyPoints);
        }
        for pid in &points {
            self.require_point(*pid)?;
        }
        let mut edges = Vec::new();
        for (n, &i) in points.iter().enumerate() {
            for &j in points.iter().skip(n + 1) {
                let rest_length = self.points[&i].pos.distance(self.points[&j].pos);
                edges.push(RigidEdge { i, j, rest_length });
            }
        }
        let id = BodyId(self.next_body);
        self.next_body += 1;
        self.bodies.insert(
            id,
            RigidBody {
                id,
                name: name.into(),
                points,
                edges,
            },
        );
        Ok(id)
    }

    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.bodies.get(&id)
    }

    pub fn bodies(&self) -> impl Iterator<Item = &RigidBody> {
        self.bodies.values()
    }

    pub fn remove_body(&mut self, id: BodyId) -> Result<(), SketchError> {
        self.bodies
            .remove(&id)
            .map(|_| ())
            .ok_or(SketchError::UnknownBody(id))
    }

    /// All rigid edges across all bodies, in body/edge order.
    pub fn rigid_edges(&self) -> impl Iterator<Item = RigidEdge> + '_ {
        self.bodies.values().flat_map(|b| b.edges.iter().copied())
    }

    // ---------- drivers ----------

    pub fn add_driver(&mut self, kind: DriverKind) -> Result<DriverId, SketchError> {
        match kind {
            DriverKind::Angle { pivot, tip } => {
                self.require_point(pivot)?;
                self.require_point(tip)?;
            }
            DriverKind::Offset { constraint } => {
                if !self.point_lines.contains_key(&constraint) {
                    return Err(SketchError::UnknownPointOnLine(constraint));
                }
            }
        }
        let id = DriverId(self.next_driver);
        self.next_driver += 1;
        self.drivers.insert(
            id,
            Driver {
                id,
                kind,
                value: 0.0,
                enabled: true,
            },
        );
        Ok(id)
    }

    pub fn driver(&self, id: DriverId) -> Option<&Driver> {
        self.drivers.get(&id)
    }

    pub fn drivers(&self) -> impl Iterator<Item = &Driver> {
        self.drivers.values()
    }

    pub fn remove_driver(&mut self, id: DriverId) -> Result<(), SketchError> {
        self.drivers
            .remove(&id)
            .map(|_| ())
            .ok_or(SketchError::UnknownDriver(id))
    }

    /// Set a driver's target value (radians for angle drivers, length
    /// units for offset drivers). Offset drivers mirror the value into
    /// their constraint's station so residuals stay consistent.
    pub fn set_driver_value(&mut self, id: DriverId, value: f64) -> Result<(), SketchError> {
        let d = self
            .drivers
            .get_mut(&id)
            .ok_or(SketchError::UnknownDriver(id))?;
        d.value = value;
        if let DriverKind::Offset { constraint } = d.kind {
            if let Some(pl) = self.point_lines.get_mut(&constraint) {
                pl.offset = Some(value);
            }
        }
        Ok(())
    }

    pub fn set_driver_enabled(&mut self, id: DriverId, enabled: bool) -> Result<(), SketchError> {
        self.drivers
            .get_mut(&id)
            .ok_or(SketchError::UnknownDriver(id))?
            .enabled = enabled;
        Ok(())
    }

    // ---------- expressions ----------

    /// Re-evaluate every expression-bound field against the parameter
    /// table.
    ///
    /// Failures are isolated per field: a failing expression leaves the
    /// previously computed numeric value untouched and is reported in
    /// the returned map alongside the successes.
    pub fn refresh_expressions(&mut self) -> BTreeMap<FieldRef, Result<f64, ExpressionError>> {
        let mut results = BTreeMap::new();
        let params = self.params.clone();

        for p in self.points.values_mut() {
            if let Some(expr) = &p.x_expr {
                let r = params.eval(expr);
                match &r {
                    Ok(v) => p.pos.x = *v,
                    Err(e) => tracing::warn!("point {} x expression failed: {}", p.id, e),
                }
                results.insert(FieldRef::PointX(p.id), r);
            }
            if let Some(expr) = &p.y_expr {
                let r = params.eval(expr);
                match &r {
                    Ok(v) => p.pos.y = *v,
                    Err(e) => tracing::warn!("point {} y expression failed: {}", p.id, e),
                }
                results.insert(FieldRef::PointY(p.id), r);
            }
        }

        for l in self.lengths.values_mut() {
            if let Some(expr) = &l.target_expr {
                let r = params.eval(expr);
                match &r {
                    Ok(v) => l.target = *v,
                    Err(e) => tracing::warn!("length {} expression failed: {}", l.id, e),
                }
                results.insert(FieldRef::LengthTarget(l.id), r);
            }
        }

        for a in self.angles.values_mut() {
            if let Some(expr) = &a.target_expr {
                let r = params.eval(expr);
                match &r {
                    Ok(v) => a.target_deg = *v,
                    Err(e) => tracing::warn!("angle {} expression failed: {}", a.id, e),
                }
                results.insert(FieldRef::AngleTarget(a.id), r);
            }
        }

        results
    }

    // ---------- residuals ----------

    /// Current angle of an angle constraint in radians, per its kind.
    /// `None` when an arm is degenerate.
    pub fn current_angle_rad(&self, a: &AngleConstraint) -> Option<f64> {
        let pi = self.points.get(&a.i)?.pos;
        let pj = self.points.get(&a.j)?.pos;
        let pk = self.points.get(&a.k)?.pos;
        let v1 = pi - pj;
        let v2 = pk - pj;
        if v1.length() < 1e-12 || v2.length() < 1e-12 {
            return None;
        }
        Some(match a.kind {
            AngleKind::Vector => angle_between(v1, v2),
            AngleKind::Joint => joint_angle(v1, v2),
        })
    }

    /// Signed length residual: `current - target`.
    pub fn length_residual(&self, l: &LengthConstraint) -> Option<f64> {
        let pi = self.points.get(&l.i)?;
        let pj = self.points.get(&l.j)?;
        Some(pi.pos.distance(pj.pos) - l.target)
    }

    /// Wrapped angle residual in radians: shortest signed difference.
    pub fn angle_residual(&self, a: &AngleConstraint) -> Option<f64> {
        let cur = self.current_angle_rad(a)?;
        Some(wrap_angle(cur - a.target_rad()))
    }

    /// Separation of a coincidence pair.
    pub fn coincidence_residual(&self, c: &Coincidence) -> Option<f64> {
        let pa = self.points.get(&c.a)?;
        let pb = self.points.get(&c.b)?;
        Some(pa.pos.distance(pb.pos))
    }

    /// Distance from the point to the line (or to the offset station).
    pub fn point_line_residual(&self, pl: &PointOnLine) -> Option<f64> {
        let p = self.points.get(&pl.p)?.pos;
        let a = self.points.get(&pl.i)?.pos;
        let b = self.points.get(&pl.j)?.pos;
        match pl.offset {
            Some(s) => {
                let dir = b - a;
                let len = dir.length();
                if len < 1e-12 {
                    return None;
                }
                let station = a + dir / len * s;
                Some(p.distance(station))
            }
            None => signed_line_distance(p, a, b),
        }
    }

    /// Driver error: wrapped polar-angle difference for angle drivers,
    /// station distance for offset drivers.
    pub fn driver_residual(&self, d: &Driver) -> Option<f64> {
        match d.kind {
            DriverKind::Angle { pivot, tip } => {
                let pp = self.points.get(&pivot)?.pos;
                let tp = self.points.get(&tip)?.pos;
                if pp.distance(tp) < 1e-12 {
                    return None;
                }
                Some(wrap_angle(polar_angle(pp, tp) - d.value))
            }
            DriverKind::Offset { constraint } => {
                let pl = self.point_lines.get(&constraint)?;
                let p = self.points.get(&pl.p)?.pos;
                let a = self.points.get(&pl.i)?.pos;
                let b = self.points.get(&pl.j)?.pos;
                let dir = b - a;
                let len = dir.length();
                if len < 1e-12 {
                    return None;
                }
                let station = a + dir / len * d.value;
                Some(p.distance(station))
            }
        }
    }

    /// Per-category residual maxima over all active constraints and
    /// enabled drivers.
    ///
    /// The sweep driver uses this to detect infeasible steps.
    pub fn max_constraint_error(&self) -> ConstraintErrorReport {
        let mut report = ConstraintErrorReport::default();

        for edge in self.rigid_edges() {
            if let (Some(pi), Some(pj)) = (self.points.get(&edge.i), self.points.get(&edge.j)) {
                let err = (pi.pos.distance(pj.pos) - edge.rest_length).abs();
                report.length = report.length.max(err);
            }
        }
        for l in self.lengths.values().filter(|l| l.is_active()) {
            if let Some(r) = self.length_residual(l) {
                report.length = report.length.max(r.abs());
            }
        }
        for a in self.angles.values().filter(|a| a.enabled) {
            if let Some(r) = self.angle_residual(a) {
                report.angle = report.angle.max(r.abs());
            }
        }
        for c in self.coincidences.values().filter(|c| c.enabled) {
            if let Some(r) = self.coincidence_residual(c) {
                report.coincidence = report.coincidence.max(r);
            }
        }
        for pl in self.point_lines.values().filter(|pl| pl.enabled) {
            if let Some(r) = self.point_line_residual(pl) {
                report.point_on_line = report.point_on_line.max(r.abs());
            }
        }
        for d in self.drivers.values().filter(|d| d.enabled) {
            if let Some(r) = self.driver_residual(d) {
                match d.kind {
                    DriverKind::Angle { .. } => report.angle = report.angle.max(r.abs()),
                    DriverKind::Offset { .. } => {
                        report.point_on_line = report.point_on_line.max(r.abs())
                    }
                }
            }
        }
        report
    }

    // ---------- over flags ----------

    pub fn clear_over_flags(&mut self) {
        for l in self.lengths.values_mut() {
            l.over = false;
        }
        for a in self.angles.values_mut() {
            a.over = false;
        }
        for c in self.coincidences.values_mut() {
            c.over = false;
        }
        for pl in self.point_lines.values_mut() {
            pl.over = false;
        }
    }

    /// Recompute `over` flags from current residuals. Diagnostic only.
    pub fn update_over_flags(&mut self, tol: &Tolerances) {
        let length_over: Vec<LengthId> = self
            .lengths
            .values()
            .filter(|l| l.is_active())
            .filter(|l| {
                self.length_residual(l)
                    .map(|r| r.abs() > tol.length)
                    .unwrap_or(false)
            })
            .map(|l| l.id)
            .collect();
        let angle_over: Vec<AngleId> = self
            .angles
            .values()
            .filter(|a| a.enabled)
            .filter(|a| {
                self.angle_residual(a)
                    .map(|r| r.abs() > tol.angle_rad)
                    .unwrap_or(false)
            })
            .map(|a| a.id)
            .collect();
        let coincidence_over: Vec<CoincidenceId> = self
            .coincidences
            .values()
            .filter(|c| c.enabled)
            .filter(|c| {
                self.coincidence_residual(c)
                    .map(|r| r > tol.length)
                    .unwrap_or(false)
            })
            .map(|c| c.id)
            .collect();
        let line_over: Vec<PointOnLineId> = self
            .point_lines
            .values()
            .filter(|pl| pl.enabled)
            .filter(|pl| {
                self.point_line_residual(pl)
                    .map(|r| r.abs() > tol.length)
                    .unwrap_or(false)
            })
            .map(|pl| pl.id)
            .collect();

        self.clear_over_flags();
        for id in length_over {
            if let Some(l) = self.lengths.get_mut(&id) {
                l.over = true;
            }
        }
        for id in angle_over {
            if let Some(a) = self.angles.get_mut(&id) {
                a.over = true;
            }
        }
        for id in coincidence_over {
            if let Some(c) = self.coincidences.get_mut(&id) {
                c.over = true;
            }
        }
        for id in line_over {
            if let Some(pl) = self.point_lines.get_mut(&id) {
                pl.over = true;
            }
        }
    }

    // ---------- snapshots ----------

    /// Capture all point positions for cheap rollback.
    pub fn snapshot_positions(&self) -> BTreeMap<PointId, DVec2> {
        self.points.iter().map(|(id, p)| (*id, p.pos)).collect()
    }

    /// Restore positions captured by [`snapshot_positions`].
    ///
    /// [`snapshot_positions`]: Sketch::snapshot_positions
    pub fn restore_positions(&mut self, snapshot: &BTreeMap<PointId, DVec2>) {
        for (id, pos) in snapshot {
            if let Some(p) = self.points.get_mut(id) {
                p.pos = *pos;
            }
        }
    }

    fn require_point(&self, id: PointId) -> Result<(), SketchError> {
        if self.points.contains_key(&id) {
            Ok(())
        } else {
            Err(SketchError::UnknownPoint(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::LengthMode;
    use approx::assert_relative_eq;

    #[test]
    fn cascade_delete_removes_dependents() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::X);
        let c = sk.add_point(DVec2::Y);
        sk.add_length(a, b, 1.0).unwrap();
        sk.add_angle(a, b, c, 90.0).unwrap();
        sk.add_coincidence(a, c).unwrap();
        let pl = sk.add_point_on_line(c, a, b).unwrap();
        sk.add_rigid_body("frame", vec![a, b, c]).unwrap();
        sk.add_driver(DriverKind::Angle { pivot: a, tip: b }).unwrap();
        sk.add_driver(DriverKind::Offset { constraint: pl }).unwrap();

        sk.remove_point(b).unwrap();

        assert_eq!(sk.lengths().count(), 0);
        assert_eq!(sk.angles().count(), 0);
        assert_eq!(sk.point_lines().count(), 0);
        assert_eq!(sk.drivers().count(), 0);
        // Body shrank to two points (a, c) and stays alive.
        let body = sk.bodies().next().unwrap();
        assert_eq!(body.points, vec![a, c]);
        assert!(body.edges.iter().all(|e| e.i != b && e.j != b));
        // Untouched constraint survives.
        assert_eq!(sk.coincidences().count(), 1);
    }

    #[test]
    fn body_dissolves_below_two_points() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::X);
        sk.add_rigid_body("bar", vec![a, b]).unwrap();
        sk.remove_point(a).unwrap();
        assert_eq!(sk.bodies().count(), 0);
    }

    #[test]
    fn rigid_body_captures_pairwise_edges() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::new(3.0, 0.0));
        let c = sk.add_point(DVec2::new(0.0, 4.0));
        let id = sk.add_rigid_body("tri", vec![a, b, c]).unwrap();
        let body = sk.body(id).unwrap();
        assert_eq!(body.edges.len(), 3);
        let bc = body
            .edges
            .iter()
            .find(|e| (e.i, e.j) == (b, c))
            .unwrap();
        assert_relative_eq!(bc.rest_length, 5.0);
    }

    #[test]
    fn fixed_point_rejects_write() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        sk.set_fixed(a, true).unwrap();
        assert_eq!(
            sk.set_position(a, DVec2::X),
            Err(SketchError::FixedPoint(a))
        );
    }

    #[test]
    fn expression_failure_is_isolated() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::new(7.0, 0.0));
        let b = sk.add_point(DVec2::ZERO);
        sk.params.set("h", 3.0).unwrap();
        sk.point_mut(a).unwrap().x_expr = Some("1/0".into());
        sk.point_mut(b).unwrap().y_expr = Some("h * 2".into());

        let results = sk.refresh_expressions();

        // Bad expression: prior value retained, error reported.
        assert!(results[&FieldRef::PointX(a)].is_err());
        assert_relative_eq!(sk.point(a).unwrap().pos.x, 7.0);
        // Good expression still applied.
        assert_relative_eq!(results[&FieldRef::PointY(b)].as_ref().copied().unwrap(), 6.0);
        assert_relative_eq!(sk.point(b).unwrap().pos.y, 6.0);
    }

    #[test]
    fn length_expression_updates_target() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::X);
        let lid = sk.add_length(a, b, 1.0).unwrap();
        sk.params.set("reach", 4.0).unwrap();
        sk.length_mut(lid).unwrap().target_expr = Some("reach / 2".into());
        sk.refresh_expressions();
        assert_relative_eq!(sk.length(lid).unwrap().target, 2.0);
    }

    #[test]
    fn angle_residual_wraps() {
        let mut sk = Sketch::new();
        let i = sk.add_point(DVec2::new(1.0, 0.0));
        let j = sk.add_point(DVec2::ZERO);
        // Current vector angle: -170 degrees.
        let k = sk.add_point(crate::geometry::rotate(DVec2::X, (-170.0_f64).to_radians()));
        let aid = sk.add_angle(i, j, k, 170.0).unwrap();
        let a = sk.angle(aid).unwrap().clone();
        let r = sk.angle_residual(&a).unwrap();
        assert_relative_eq!(r.abs(), 20.0_f64.to_radians(), epsilon = 1e-9);
    }

    #[test]
    fn reference_lengths_excluded_from_error_report() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::X);
        let lid = sk.add_length(a, b, 5.0).unwrap();
        sk.length_mut(lid).unwrap().mode = LengthMode::Reference;
        let report = sk.max_constraint_error();
        assert_relative_eq!(report.max(), 0.0);
        // Measurement still available.
        assert_relative_eq!(sk.measured_length(lid).unwrap(), 1.0);
    }

    #[test]
    fn driver_errors_included_in_report() {
        let mut sk = Sketch::new();
        let pivot = sk.add_point(DVec2::ZERO);
        let tip = sk.add_point(DVec2::X);
        let d = sk.add_driver(DriverKind::Angle { pivot, tip }).unwrap();
        sk.set_driver_value(d, std::f64::consts::FRAC_PI_2).unwrap();

        let report = sk.max_constraint_error();
        assert_relative_eq!(report.angle, std::f64::consts::FRAC_PI_2);

        sk.set_driver_enabled(d, false).unwrap();
        assert_relative_eq!(sk.max_constraint_error().max(), 0.0);
    }

    #[test]
    fn measured_angle_follows_kind() {
        let mut sk = Sketch::new();
        let i = sk.add_point(DVec2::X);
        let j = sk.add_point(DVec2::ZERO);
        let k = sk.add_point(DVec2::new(0.0, -1.0));
        let aid = sk.add_angle(i, j, k, 0.0).unwrap();
        // Vector kind is signed, joint kind is the unsigned opening.
        assert_relative_eq!(sk.measured_angle_deg(aid).unwrap(), -90.0);
        sk.angle_mut(aid).unwrap().kind = AngleKind::Joint;
        assert_relative_eq!(sk.measured_angle_deg(aid).unwrap(), 90.0);
    }

    #[test]
    fn report_within_checks_each_category() {
        let report = ConstraintErrorReport {
            length: 5e-4,
            angle: 2e-3,
            coincidence: 0.0,
            point_on_line: 0.0,
        };
        assert!(!report.within(&Tolerances::default()));
        assert!(report.within(&Tolerances {
            length: 1e-3,
            angle_rad: 5e-3,
        }));
    }

    #[test]
    fn over_flags_follow_residuals() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::X);
        let lid = sk.add_length(a, b, 5.0).unwrap();
        sk.update_over_flags(&Tolerances::default());
        assert!(sk.length(lid).unwrap().over);
        sk.length_mut(lid).unwrap().target = 1.0;
        sk.update_over_flags(&Tolerances::default());
        assert!(!sk.length(lid).unwrap().over);
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let snap = sk.snapshot_positions();
        sk.set_position(a, DVec2::new(9.0, 9.0)).unwrap();
        sk.restore_positions(&snap);
        assert_relative_eq!(sk.point(a).unwrap().pos.x, 0.0);
    }
}
