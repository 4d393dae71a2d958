//! Constraint entities.
//!
//! Constraints reference points by id; the store guarantees the ids
//! stay valid by cascading deletes. The `over` flags are diagnostic
//! only: they mark residuals above tolerance for display and never
//! steer solver control flow.

use serde::{Deserialize, Serialize};

use crate::id::{AngleId, CoincidenceId, LengthId, PointId, PointOnLineId};

fn default_true() -> bool {
    true
}

/// Whether a length entry participates in solving or is only measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthMode {
    /// Solved to the target length.
    #[default]
    Constraint,
    /// Measured for display, excluded from the solved system.
    Reference,
}

/// Target distance between two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthConstraint {
    pub id: LengthId,
    pub i: PointId,
    pub j: PointId,
    pub target: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_expr: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub mode: LengthMode,
    #[serde(default)]
    pub over: bool,
}

impl LengthConstraint {
    pub fn new(id: LengthId, i: PointId, j: PointId, target: f64) -> Self {
        Self {
            id,
            i,
            j,
            target,
            target_expr: None,
            enabled: true,
            hidden: false,
            mode: LengthMode::Constraint,
            over: false,
        }
    }

    /// Solved by the backends: enabled and not reference-only.
    pub fn is_active(&self) -> bool {
        self.enabled && self.mode == LengthMode::Constraint
    }

    pub fn references(&self, pid: PointId) -> bool {
        self.i == pid || self.j == pid
    }
}

/// How an angle constraint measures the angle at its vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleKind {
    /// Signed angle from `j->i` to `j->k`, in `(-180, 180]` degrees.
    #[default]
    Vector,
    /// Unsigned opening angle at `j`, in `[0, 180]` degrees.
    Joint,
}

/// Target angle formed by three points, with vertex at `j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleConstraint {
    pub id: AngleId,
    pub i: PointId,
    pub j: PointId,
    pub k: PointId,
    /// Target angle in degrees.
    pub target_deg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_expr: Option<String>,
    #[serde(default)]
    pub kind: AngleKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub over: bool,
}

impl AngleConstraint {
    pub fn new(id: AngleId, i: PointId, j: PointId, k: PointId, target_deg: f64) -> Self {
        Self {
            id,
            i,
            j,
            k,
            target_deg,
            target_expr: None,
            kind: AngleKind::Vector,
            enabled: true,
            hidden: false,
            over: false,
        }
    }

    pub fn target_rad(&self) -> f64 {
        self.target_deg.to_radians()
    }

    pub fn references(&self, pid: PointId) -> bool {
        self.i == pid || self.j == pid || self.k == pid
    }
}

/// Two points constrained to an identical position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coincidence {
    pub id: CoincidenceId,
    pub a: PointId,
    pub b: PointId,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub over: bool,
}

impl Coincidence {
    pub fn new(id: CoincidenceId, a: PointId, b: PointId) -> Self {
        Self {
            id,
            a,
            b,
            enabled: true,
            over: false,
        }
    }

    pub fn references(&self, pid: PointId) -> bool {
        self.a == pid || self.b == pid
    }
}

/// Point `p` constrained to the infinite line through `i` and `j`.
///
/// With `offset` set, the point is additionally pinned to a station at
/// that distance from `i` along the line; translation drivers move the
/// station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOnLine {
    pub id: PointOnLineId,
    pub p: PointId,
    pub i: PointId,
    pub j: PointId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub over: bool,
}

impl PointOnLine {
    pub fn new(id: PointOnLineId, p: PointId, i: PointId, j: PointId) -> Self {
        Self {
            id,
            p,
            i,
            j,
            offset: None,
            enabled: true,
            over: false,
        }
    }

    pub fn references(&self, pid: PointId) -> bool {
        self.p == pid || self.i == pid || self.j == pid
    }
}
