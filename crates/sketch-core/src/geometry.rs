//! Planar geometry helpers shared by the store and the solvers.

use glam::DVec2;

/// Wrap an angle in radians into `(-pi, pi]`.
pub fn wrap_angle(mut a: f64) -> f64 {
    use std::f64::consts::PI;
    while a <= -PI {
        a += 2.0 * PI;
    }
    while a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// Signed angle from `v1` to `v2` in `(-pi, pi]`.
pub fn angle_between(v1: DVec2, v2: DVec2) -> f64 {
    let cross = v1.x * v2.y - v1.y * v2.x;
    let dot = v1.dot(v2);
    cross.atan2(dot)
}

/// Unsigned angle between `v1` and `v2` in `[0, pi]`.
///
/// Returns 0 when either vector is degenerate.
pub fn joint_angle(v1: DVec2, v2: DVec2) -> f64 {
    let n1 = v1.length();
    let n2 = v2.length();
    if n1 < 1e-12 || n2 < 1e-12 {
        return 0.0;
    }
    (v1.dot(v2) / (n1 * n2)).clamp(-1.0, 1.0).acos()
}

/// Rotate `v` by `a` radians counter-clockwise.
pub fn rotate(v: DVec2, a: f64) -> DVec2 {
    let (sa, ca) = a.sin_cos();
    DVec2::new(ca * v.x - sa * v.y, sa * v.x + ca * v.y)
}

/// Polar angle of `to` as seen from `from`, in `(-pi, pi]`.
pub fn polar_angle(from: DVec2, to: DVec2) -> f64 {
    let d = to - from;
    d.y.atan2(d.x)
}

/// Signed perpendicular distance from `p` to the infinite line through `a` and `b`.
///
/// Returns `None` when the line is degenerate (`a` and `b` coincide).
pub fn signed_line_distance(p: DVec2, a: DVec2, b: DVec2) -> Option<f64> {
    let ab = b - a;
    let len = ab.length();
    if len < 1e-12 {
        return None;
    }
    let ap = p - a;
    Some((ap.x * ab.y - ap.y * ab.x) / len)
}

/// Project `p` onto the infinite line through `a` and `b`.
pub fn project_onto_line(p: DVec2, a: DVec2, b: DVec2) -> Option<DVec2> {
    let ab = b - a;
    let ab2 = ab.length_squared();
    if ab2 < 1e-18 {
        return None;
    }
    let t = (p - a).dot(ab) / ab2;
    Some(a + ab * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn wrap_angle_range() {
        assert_relative_eq!(wrap_angle(3.0 * PI), PI);
        assert_relative_eq!(wrap_angle(-3.0 * PI), PI);
        assert_relative_eq!(wrap_angle(0.5), 0.5);
        assert_relative_eq!(wrap_angle(2.0 * PI), 0.0);
    }

    #[test]
    fn wrap_angle_shortest_difference() {
        // 170 deg target vs -170 deg current is 20 deg apart, not 340.
        let target = 170.0_f64.to_radians();
        let current = -170.0_f64.to_radians();
        let err = wrap_angle(current - target);
        assert_relative_eq!(err.abs(), 20.0_f64.to_radians(), epsilon = 1e-12);
    }

    #[test]
    fn signed_angle() {
        let v1 = DVec2::X;
        let v2 = DVec2::Y;
        assert_relative_eq!(angle_between(v1, v2), PI / 2.0);
        assert_relative_eq!(angle_between(v2, v1), -PI / 2.0);
    }

    #[test]
    fn unsigned_joint_angle() {
        assert_relative_eq!(joint_angle(DVec2::X, -DVec2::X), PI);
        assert_relative_eq!(joint_angle(DVec2::X, DVec2::Y), PI / 2.0);
        assert_relative_eq!(joint_angle(DVec2::ZERO, DVec2::Y), 0.0);
    }

    #[test]
    fn rotate_quarter_turn() {
        let r = rotate(DVec2::X, PI / 2.0);
        assert_relative_eq!(r.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(r.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn line_distance_is_signed() {
        let a = DVec2::ZERO;
        let b = DVec2::X;
        assert_relative_eq!(signed_line_distance(DVec2::new(2.0, 5.0), a, b).unwrap(), -5.0);
        assert_relative_eq!(signed_line_distance(DVec2::new(2.0, -5.0), a, b).unwrap(), 5.0);
        assert!(signed_line_distance(DVec2::X, a, a).is_none());
    }

    #[test]
    fn projection_onto_line() {
        let proj = project_onto_line(DVec2::new(2.0, 5.0), DVec2::ZERO, DVec2::X).unwrap();
        assert_relative_eq!(proj.x, 2.0);
        assert_relative_eq!(proj.y, 0.0);
    }
}
