//! Driver definitions for motion sweeps.

use serde::{Deserialize, Serialize};

use crate::id::{DriverId, PointId, PointOnLineId};

/// What quantity a driver controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverKind {
    /// Polar angle of `tip` about `pivot`, in radians.
    Angle { pivot: PointId, tip: PointId },
    /// Station offset of a point-on-line constraint, in length units.
    Offset { constraint: PointOnLineId },
}

/// A driven quantity. The sweep driver writes `value` before each
/// solve; the solvers treat the driver as a hard constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub kind: DriverKind,
    pub value: f64,
    pub enabled: bool,
}

impl Driver {
    pub fn references(&self, pid: PointId) -> bool {
        match self.kind {
            DriverKind::Angle { pivot, tip } => pivot == pid || tip == pid,
            DriverKind::Offset { .. } => false,
        }
    }
}
