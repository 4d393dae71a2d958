//! Rigid bodies: point sets held together by captured edge lengths.

use serde::{Deserialize, Serialize};

use crate::id::{BodyId, PointId};

/// An edge of a rigid body with its rest length captured at creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidEdge {
    pub i: PointId,
    pub j: PointId,
    pub rest_length: f64,
}

/// A named set of points solved as a rigid unit.
///
/// The edge set is a spanning structure over the member points;
/// enforcing every edge simultaneously keeps the body shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBody {
    pub id: BodyId,
    pub name: String,
    pub points: Vec<PointId>,
    pub edges: Vec<RigidEdge>,
}

impl RigidBody {
    pub fn references(&self, pid: PointId) -> bool {
        self.points.contains(&pid)
    }

    /// Drop a member point and every edge touching it.
    pub fn remove_point(&mut self, pid: PointId) {
        self.points.retain(|p| *p != pid);
        self.edges.retain(|e| e.i != pid && e.j != pid);
    }
}
