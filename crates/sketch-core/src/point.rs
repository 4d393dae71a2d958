//! Sketch points.

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::id::PointId;

/// A 2D sketch point.
///
/// `fixed` points are excluded from solving; `hidden` only affects
/// display. The optional expressions drive the coordinates from the
/// parameter table on every solve cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: PointId,
    pub pos: DVec2,
    #[serde(default)]
    pub fixed: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_expr: Option<String>,
}

impl Point {
    pub fn new(id: PointId, pos: DVec2) -> Self {
        Self {
            id,
            pos,
            fixed: false,
            hidden: false,
            x_expr: None,
            y_expr: None,
        }
    }
}
