//! Precise solver: damped Gauss-Newton on the full residual vector.
//!
//! Unknowns are the coordinates of non-fixed points, in ascending point
//! id order. The residual vector stacks every active constraint
//! (lengths, wrapped angles, coincidences, point-on-line, rigid edges)
//! plus driver errors. Iteration is Levenberg-Marquardt: normal
//! equations with an adaptive damping term, Jacobian by forward
//! differences.
//!
//! All-or-nothing: positions are written back only when the residual
//! norm drops under tolerance. On failure the sketch is untouched.

use std::collections::BTreeMap;

use glam::DVec2;
use thiserror::Error;

use sketch_core::geometry::{angle_between, polar_angle, signed_line_distance, wrap_angle};
use sketch_core::{AngleKind, DriverKind, PointId, Sketch, Tolerances};

/// Failure of a precise solve. The sketch is left unmodified.
///
/// Budget exhaustion and damping-exhausted stalls (the latter is where
/// a singular system ends up) both carry the residual reached.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("no convergence after {iterations} iterations (max residual {max_residual:.3e})")]
    NonConvergence { iterations: usize, max_residual: f64 },
}

/// Result of a successful solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveOutcome {
    /// True when the residual norm is within tolerance.
    pub converged: bool,
    /// Infinity norm of the final residual vector.
    pub max_residual: f64,
    /// Iterations spent.
    pub iterations: usize,
}

/// Levenberg-Marquardt solver over the sketch residuals.
#[derive(Debug, Clone)]
pub struct LeastSquaresSolver {
    tolerance: f64,
    max_iterations: usize,
    over_tolerances: Tolerances,
}

impl Default for LeastSquaresSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LeastSquaresSolver {
    pub fn new() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 100,
            over_tolerances: Tolerances::default(),
        }
    }

    /// Convergence tolerance on the residual infinity norm.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Solve and write positions back on success.
    ///
    /// Warm-started from the sketch's current positions; the caller is
    /// expected to keep steps small (continuation) so the solver tracks
    /// the intended branch of the mechanism.
    pub fn solve(&self, sketch: &mut Sketch) -> Result<SolveOutcome, SolveError> {
        sketch.refresh_expressions();

        let system = System::build(sketch);
        let mut x = system.initial_guess();

        if system.residual_len == 0 || x.is_empty() {
            // Nothing to optimize; report the current residuals as-is.
            let r = system.residuals(&x);
            let max_residual = inf_norm(&r);
            if max_residual < self.tolerance {
                sketch.update_over_flags(&self.over_tolerances);
                return Ok(SolveOutcome {
                    converged: true,
                    max_residual,
                    iterations: 0,
                });
            }
            return Err(SolveError::NonConvergence {
                iterations: 0,
                max_residual,
            });
        }

        let mut lambda = 1e-3;
        let mut r = system.residuals(&x);
        let mut cost = sum_sq(&r);

        for iteration in 0..self.max_iterations {
            let max_residual = inf_norm(&r);
            if max_residual < self.tolerance {
                system.write_back(sketch, &x);
                sketch.update_over_flags(&self.over_tolerances);
                tracing::debug!(iteration, max_residual, "least-squares converged");
                return Ok(SolveOutcome {
                    converged: true,
                    max_residual,
                    iterations: iteration,
                });
            }

            let jac = system.jacobian(&x, &r);
            let n = x.len();
            let m = r.len();

            // J^T J and J^T r.
            let mut jtj = vec![vec![0.0; n]; n];
            let mut jtr = vec![0.0; n];
            for row in 0..m {
                for a in 0..n {
                    let ja = jac[row][a];
                    if ja == 0.0 {
                        continue;
                    }
                    jtr[a] += ja * r[row];
                    for b in a..n {
                        jtj[a][b] += ja * jac[row][b];
                    }
                }
            }
            for a in 0..n {
                for b in 0..a {
                    jtj[a][b] = jtj[b][a];
                }
            }

            // Retry with increased damping until a step reduces cost.
            let mut stepped = false;
            while lambda < 1e10 {
                let mut lhs = jtj.clone();
                for a in 0..n {
                    lhs[a][a] += lambda * jtj[a][a].max(1e-12);
                }
                let rhs: Vec<f64> = jtr.iter().map(|v| -v).collect();
                let Some(dx) = solve_linear_system(lhs, rhs) else {
                    lambda *= 10.0;
                    continue;
                };

                let x_new: Vec<f64> = x.iter().zip(&dx).map(|(a, b)| a + b).collect();
                let r_new = system.residuals(&x_new);
                let cost_new = sum_sq(&r_new);
                if cost_new < cost {
                    x = x_new;
                    r = r_new;
                    cost = cost_new;
                    lambda = (lambda * 0.5).max(1e-12);
                    stepped = true;
                    break;
                }
                lambda *= 10.0;
            }
            if !stepped {
                // Damping exhausted without progress.
                let max_residual = inf_norm(&r);
                tracing::debug!(iteration, max_residual, "least-squares stalled");
                return Err(SolveError::NonConvergence {
                    iterations: iteration,
                    max_residual,
                });
            }
        }

        let max_residual = inf_norm(&r);
        if max_residual < self.tolerance {
            system.write_back(sketch, &x);
            sketch.update_over_flags(&self.over_tolerances);
            return Ok(SolveOutcome {
                converged: true,
                max_residual,
                iterations: self.max_iterations,
            });
        }
        Err(SolveError::NonConvergence {
            iterations: self.max_iterations,
            max_residual,
        })
    }
}

/// Snapshot of the sketch as a residual system over free coordinates.
///
/// Everything is copied out so residual evaluation is a pure function
/// of the unknown vector.
struct System {
    free: Vec<PointId>,
    index: BTreeMap<PointId, usize>,
    positions: BTreeMap<PointId, DVec2>,
    lengths: Vec<(PointId, PointId, f64)>,
    angles: Vec<(PointId, PointId, PointId, f64, AngleKind)>,
    coincidences: Vec<(PointId, PointId)>,
    /// Point-on-line with optional station offset. Enabled offset
    /// drivers override the stored offset.
    point_lines: Vec<(PointId, PointId, PointId, Option<f64>)>,
    angle_drivers: Vec<(PointId, PointId, f64)>,
    residual_len: usize,
}

impl System {
    fn build(sketch: &Sketch) -> Self {
        let free = sketch.free_points();
        let index = free.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let positions = sketch.snapshot_positions();

        let mut lengths: Vec<(PointId, PointId, f64)> = sketch
            .lengths()
            .filter(|l| l.is_active())
            .map(|l| (l.i, l.j, l.target))
            .collect();
        for edge in sketch.rigid_edges() {
            lengths.push((edge.i, edge.j, edge.rest_length));
        }

        let angles: Vec<(PointId, PointId, PointId, f64, AngleKind)> = sketch
            .angles()
            .filter(|a| a.enabled)
            .map(|a| (a.i, a.j, a.k, a.target_rad(), a.kind))
            .collect();
        let coincidences: Vec<(PointId, PointId)> = sketch
            .coincidences()
            .filter(|c| c.enabled)
            .map(|c| (c.a, c.b))
            .collect();

        let mut point_lines: BTreeMap<_, (PointId, PointId, PointId, Option<f64>)> = sketch
            .point_lines()
            .filter(|pl| pl.enabled)
            .map(|pl| (pl.id, (pl.p, pl.i, pl.j, pl.offset)))
            .collect();

        let mut angle_drivers = Vec::new();
        for d in sketch.drivers().filter(|d| d.enabled) {
            match d.kind {
                DriverKind::Angle { pivot, tip } => {
                    angle_drivers.push((pivot, tip, d.value));
                }
                DriverKind::Offset { constraint } => {
                    if let Some(entry) = point_lines.get_mut(&constraint) {
                        entry.3 = Some(d.value);
                    }
                }
            }
        }
        let point_lines: Vec<_> = point_lines.into_values().collect();

        let residual_len = lengths.len()
            + angles.len()
            + coincidences.len() * 2
            + point_lines
                .iter()
                .map(|pl| if pl.3.is_some() { 2 } else { 1 })
                .sum::<usize>()
            + angle_drivers.len();

        Self {
            free,
            index,
            positions,
            lengths,
            angles,
            coincidences,
            point_lines,
            angle_drivers,
            residual_len,
        }
    }

    fn initial_guess(&self) -> Vec<f64> {
        let mut x = Vec::with_capacity(self.free.len() * 2);
        for id in &self.free {
            let p = self.positions[id];
            x.push(p.x);
            x.push(p.y);
        }
        x
    }

    fn pos(&self, x: &[f64], id: PointId) -> DVec2 {
        match self.index.get(&id) {
            Some(&i) => DVec2::new(x[2 * i], x[2 * i + 1]),
            None => self.positions[&id],
        }
    }

    fn residuals(&self, x: &[f64]) -> Vec<f64> {
        let mut r = Vec::with_capacity(self.residual_len);

        for &(i, j, target) in &self.lengths {
            r.push(self.pos(x, i).distance(self.pos(x, j)) - target);
        }
        for &(i, j, k, target, kind) in &self.angles {
            let pj = self.pos(x, j);
            let v1 = self.pos(x, i) - pj;
            let v2 = self.pos(x, k) - pj;
            if v1.length() < 1e-12 || v2.length() < 1e-12 {
                r.push(0.0);
                continue;
            }
            let signed = angle_between(v1, v2);
            let cur = match kind {
                AngleKind::Vector => signed,
                AngleKind::Joint => signed.abs(),
            };
            r.push(wrap_angle(cur - target));
        }
        for &(a, b) in &self.coincidences {
            let d = self.pos(x, a) - self.pos(x, b);
            r.push(d.x);
            r.push(d.y);
        }
        for &(p, i, j, offset) in &self.point_lines {
            let pp = self.pos(x, p);
            let a = self.pos(x, i);
            let b = self.pos(x, j);
            match offset {
                Some(s) => {
                    let dir = b - a;
                    let len = dir.length();
                    if len < 1e-12 {
                        r.push(0.0);
                        r.push(0.0);
                        continue;
                    }
                    let station = a + dir / len * s;
                    r.push(pp.x - station.x);
                    r.push(pp.y - station.y);
                }
                None => {
                    r.push(signed_line_distance(pp, a, b).unwrap_or(0.0));
                }
            }
        }
        for &(pivot, tip, target) in &self.angle_drivers {
            let pp = self.pos(x, pivot);
            let tp = self.pos(x, tip);
            if pp.distance(tp) < 1e-12 {
                r.push(0.0);
                continue;
            }
            r.push(wrap_angle(polar_angle(pp, tp) - target));
        }
        r
    }

    /// Forward-difference Jacobian, reusing the base residual vector.
    fn jacobian(&self, x: &[f64], r0: &[f64]) -> Vec<Vec<f64>> {
        const H: f64 = 1e-7;
        let m = r0.len();
        let n = x.len();
        let mut jac = vec![vec![0.0; n]; m];
        let mut xp = x.to_vec();
        for col in 0..n {
            let saved = xp[col];
            xp[col] = saved + H;
            let rp = self.residuals(&xp);
            xp[col] = saved;
            for row in 0..m {
                jac[row][col] = (rp[row] - r0[row]) / H;
            }
        }
        jac
    }

    fn write_back(&self, sketch: &mut Sketch, x: &[f64]) {
        let positions: BTreeMap<PointId, DVec2> = self
            .free
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, DVec2::new(x[2 * i], x[2 * i + 1])))
            .collect();
        sketch.restore_positions(&positions);
    }
}

fn inf_norm(r: &[f64]) -> f64 {
    r.iter().fold(0.0, |acc, v| acc.max(v.abs()))
}

fn sum_sq(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Gaussian elimination with partial pivoting. `None` when singular.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let mut pivot = col;
        let mut best = a[col][col].abs();
        for row in col + 1..n {
            let v = a[row][col].abs();
            if v > best {
                best = v;
                pivot = row;
            }
        }
        if best < 1e-14 {
            return None;
        }
        if pivot != col {
            a.swap(col, pivot);
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in row + 1..n {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use glam::DVec2;
    use sketch_core::DriverKind;

    #[test]
    fn converges_simple_length() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::new(1.5, 0.3));
        sk.set_fixed(a, true).unwrap();
        sk.add_length(a, b, 2.0).unwrap();

        let outcome = LeastSquaresSolver::new().solve(&mut sk).unwrap();
        assert!(outcome.converged);
        assert!(outcome.max_residual < 1e-6);
        let pb = sk.point(b).unwrap().pos;
        assert_abs_diff_eq!(pb.length(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn failed_solve_leaves_positions_untouched() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::new(3.0, 0.0));
        sk.set_fixed(a, true).unwrap();
        // Contradictory targets: best compromise sits at distance 3,
        // residual 2 on each.
        sk.add_length(a, b, 1.0).unwrap();
        sk.add_length(a, b, 5.0).unwrap();

        let before = sk.snapshot_positions();
        let err = LeastSquaresSolver::new().solve(&mut sk).unwrap_err();
        let SolveError::NonConvergence { max_residual, .. } = err;
        assert_abs_diff_eq!(max_residual, 2.0, epsilon = 1e-3);
        assert_eq!(sk.snapshot_positions(), before);
    }

    #[test]
    fn underdetermined_point_on_line() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::X);
        let p = sk.add_point(DVec2::new(2.0, 5.0));
        sk.set_fixed(a, true).unwrap();
        sk.set_fixed(b, true).unwrap();
        sk.add_point_on_line(p, a, b).unwrap();

        LeastSquaresSolver::new().solve(&mut sk).unwrap();
        let pp = sk.point(p).unwrap().pos;
        assert_abs_diff_eq!(pp.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn solve_is_idempotent() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::new(1.1, 0.9));
        let c = sk.add_point(DVec2::new(2.2, -0.1));
        sk.set_fixed(a, true).unwrap();
        sk.add_length(a, b, 1.0).unwrap();
        sk.add_length(b, c, 1.0).unwrap();
        sk.add_angle(a, b, c, 120.0).unwrap();

        let solver = LeastSquaresSolver::new();
        solver.solve(&mut sk).unwrap();
        let first = sk.snapshot_positions();
        let outcome = solver.solve(&mut sk).unwrap();
        let second = sk.snapshot_positions();

        assert!(outcome.converged);
        for (id, p1) in &first {
            let p2 = second[id];
            assert_abs_diff_eq!(p1.x, p2.x, epsilon = 1e-9);
            assert_abs_diff_eq!(p1.y, p2.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn angle_driver_positions_crank() {
        let mut sk = Sketch::new();
        let pivot = sk.add_point(DVec2::ZERO);
        let tip = sk.add_point(DVec2::new(2.0, 0.1));
        sk.set_fixed(pivot, true).unwrap();
        sk.add_length(pivot, tip, 2.0).unwrap();
        let d = sk
            .add_driver(DriverKind::Angle { pivot, tip })
            .unwrap();
        sk.set_driver_value(d, 60.0_f64.to_radians()).unwrap();

        LeastSquaresSolver::new().solve(&mut sk).unwrap();
        let tp = sk.point(tip).unwrap().pos;
        assert_abs_diff_eq!(tp.x, 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(tp.y, 3.0_f64.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn offset_driver_overrides_station() {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::new(10.0, 0.0));
        let p = sk.add_point(DVec2::new(1.0, 1.0));
        sk.set_fixed(a, true).unwrap();
        sk.set_fixed(b, true).unwrap();
        let pl = sk.add_point_on_line(p, a, b).unwrap();
        let d = sk
            .add_driver(DriverKind::Offset { constraint: pl })
            .unwrap();
        sk.set_driver_value(d, 4.0).unwrap();

        LeastSquaresSolver::new().solve(&mut sk).unwrap();
        let pp = sk.point(p).unwrap().pos;
        assert_abs_diff_eq!(pp.x, 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(pp.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn empty_sketch_trivially_converges() {
        let mut sk = Sketch::new();
        let outcome = LeastSquaresSolver::new().solve(&mut sk).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.max_residual, 0.0);
    }
}
