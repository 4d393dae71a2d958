//! Sketch document serialization.
//!
//! The document is a flat, versioned mirror of the store. Every
//! optional field carries a serde default so documents written by older
//! versions load cleanly (absent `hidden` → false, absent expressions →
//! unused). Entities referencing points that are missing from the
//! document are dropped on load with a warning, never kept dangling.

use serde::{Deserialize, Serialize};

use crate::body::RigidBody;
use crate::constraint::{AngleConstraint, Coincidence, LengthConstraint, PointOnLine};
use crate::driver::{Driver, DriverKind};
use crate::param::ParameterRegistry;
use crate::point::Point;
use crate::sketch::Sketch;

/// Serialization errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DocumentError {
    #[error("Serialization error: {0}")]
    Serialize(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

/// Flat document mirror of a [`Sketch`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SketchDocument {
    /// File format version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default)]
    pub lengths: Vec<LengthConstraint>,
    #[serde(default)]
    pub angles: Vec<AngleConstraint>,
    #[serde(default)]
    pub coincidences: Vec<Coincidence>,
    #[serde(default)]
    pub point_lines: Vec<PointOnLine>,
    #[serde(default)]
    pub bodies: Vec<RigidBody>,
    #[serde(default)]
    pub drivers: Vec<Driver>,
    #[serde(default)]
    pub parameters: ParameterRegistry,
}

fn default_version() -> u32 {
    1
}

impl SketchDocument {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, DocumentError> {
        serde_json::to_string_pretty(self).map_err(|e| DocumentError::Serialize(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(data: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(data).map_err(|e| DocumentError::Deserialize(e.to_string()))
    }
}

impl From<&Sketch> for SketchDocument {
    fn from(sk: &Sketch) -> Self {
        Self {
            version: 1,
            points: sk.points().cloned().collect(),
            lengths: sk.lengths().cloned().collect(),
            angles: sk.angles().cloned().collect(),
            coincidences: sk.coincidences().cloned().collect(),
            point_lines: sk.point_lines().cloned().collect(),
            bodies: sk.bodies().cloned().collect(),
            drivers: sk.drivers().cloned().collect(),
            parameters: sk.params.clone(),
        }
    }
}

impl From<SketchDocument> for Sketch {
    fn from(doc: SketchDocument) -> Self {
        let mut sk = Sketch::new();
        sk.params = doc.parameters;

        for p in doc.points {
            sk.next_point = sk.next_point.max(p.id.0 + 1);
            sk.points.insert(p.id, p);
        }
        let point_ids: std::collections::BTreeSet<_> = sk.points.keys().copied().collect();
        let has_point = |id| point_ids.contains(&id);

        for l in doc.lengths {
            if !has_point(l.i) || !has_point(l.j) {
                tracing::warn!("dropping length {} with missing endpoint", l.id);
                continue;
            }
            sk.next_length = sk.next_length.max(l.id.0 + 1);
            sk.lengths.insert(l.id, l);
        }
        for a in doc.angles {
            if !has_point(a.i) || !has_point(a.j) || !has_point(a.k) {
                tracing::warn!("dropping angle {} with missing point", a.id);
                continue;
            }
            sk.next_angle = sk.next_angle.max(a.id.0 + 1);
            sk.angles.insert(a.id, a);
        }
        for c in doc.coincidences {
            if !has_point(c.a) || !has_point(c.b) {
                tracing::warn!("dropping coincidence {} with missing point", c.id);
                continue;
            }
            sk.next_coincidence = sk.next_coincidence.max(c.id.0 + 1);
            sk.coincidences.insert(c.id, c);
        }
        for pl in doc.point_lines {
            if !has_point(pl.p) || !has_point(pl.i) || !has_point(pl.j) {
                tracing::warn!("dropping point-on-line {} with missing point", pl.id);
                continue;
            }
            sk.next_point_line = sk.next_point_line.max(pl.id.0 + 1);
            sk.point_lines.insert(pl.id, pl);
        }
        for mut b in doc.bodies {
            b.points.retain(|pid| sk.points.contains_key(pid));
            b.edges
                .retain(|e| sk.points.contains_key(&e.i) && sk.points.contains_key(&e.j));
            if b.points.len() < 2 {
                tracing::warn!("dropping degenerate rigid body {}", b.id);
                continue;
            }
            sk.next_body = sk.next_body.max(b.id.0 + 1);
            sk.bodies.insert(b.id, b);
        }
        for d in doc.drivers {
            let valid = match d.kind {
                DriverKind::Angle { pivot, tip } => has_point(pivot) && has_point(tip),
                DriverKind::Offset { constraint } => sk.point_lines.contains_key(&constraint),
            };
            if !valid {
                tracing::warn!("dropping driver {} with missing reference", d.id);
                continue;
            }
            sk.next_driver = sk.next_driver.max(d.id.0 + 1);
            sk.drivers.insert(d.id, d);
        }
        sk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DVec2;

    fn sample_sketch() -> Sketch {
        let mut sk = Sketch::new();
        let a = sk.add_point(DVec2::ZERO);
        let b = sk.add_point(DVec2::new(2.0, 0.0));
        let c = sk.add_point(DVec2::new(2.0, 2.0));
        sk.set_fixed(a, true).unwrap();
        sk.params.set("L", 2.0).unwrap();
        let lid = sk.add_length(a, b, 2.0).unwrap();
        sk.length_mut(lid).unwrap().target_expr = Some("L".into());
        sk.add_angle(a, b, c, 90.0).unwrap();
        sk.add_coincidence(b, c).unwrap();
        sk.add_point_on_line(c, a, b).unwrap();
        sk.add_rigid_body("frame", vec![a, b, c]).unwrap();
        sk.add_driver(DriverKind::Angle { pivot: a, tip: b }).unwrap();
        sk
    }

    #[test]
    fn json_roundtrip_preserves_entities() {
        let sk = sample_sketch();
        let json = SketchDocument::from(&sk).to_json().unwrap();
        let restored: Sketch = SketchDocument::from_json(&json).unwrap().into();

        assert_eq!(restored.point_count(), 3);
        assert_eq!(restored.lengths().count(), 1);
        assert_eq!(restored.angles().count(), 1);
        assert_eq!(restored.coincidences().count(), 1);
        assert_eq!(restored.point_lines().count(), 1);
        assert_eq!(restored.bodies().count(), 1);
        assert_eq!(restored.drivers().count(), 1);
        assert_relative_eq!(restored.params.get("L").unwrap(), 2.0);
        let l = restored.lengths().next().unwrap();
        assert_eq!(l.target_expr.as_deref(), Some("L"));
    }

    #[test]
    fn restored_sketch_allocates_fresh_ids() {
        let sk = sample_sketch();
        let json = SketchDocument::from(&sk).to_json().unwrap();
        let mut restored: Sketch = SketchDocument::from_json(&json).unwrap().into();
        let existing: Vec<_> = restored.points().map(|p| p.id).collect();
        let fresh = restored.add_point(DVec2::ZERO);
        assert!(!existing.contains(&fresh));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let json = r#"{
            "points": [
                {"id": 0, "pos": [1.0, 2.0]},
                {"id": 1, "pos": [3.0, 4.0]}
            ],
            "lengths": [
                {"id": 0, "i": 0, "j": 1, "target": 5.0}
            ]
        }"#;
        let sk: Sketch = SketchDocument::from_json(json).unwrap().into();
        let p = sk.points().next().unwrap();
        assert!(!p.fixed);
        assert!(!p.hidden);
        assert!(p.x_expr.is_none());
        let l = sk.lengths().next().unwrap();
        assert!(l.enabled);
        assert!(!l.over);
        assert_eq!(l.mode, crate::constraint::LengthMode::Constraint);
    }

    #[test]
    fn dangling_references_dropped_on_load() {
        let json = r#"{
            "points": [{"id": 0, "pos": [0.0, 0.0]}],
            "lengths": [{"id": 0, "i": 0, "j": 99, "target": 1.0}],
            "coincidences": [{"id": 0, "a": 0, "b": 42}]
        }"#;
        let sk: Sketch = SketchDocument::from_json(json).unwrap().into();
        assert_eq!(sk.point_count(), 1);
        assert_eq!(sk.lengths().count(), 0);
        assert_eq!(sk.coincidences().count(), 0);
    }
}
