//! 2D Linkage Sketch Core
//!
//! This crate contains the entity graph and supporting services for the
//! planar linkage sketch system:
//! - Point: 2D point with fixed/hidden flags and coordinate expressions
//! - Constraints: length, angle, coincidence, point-on-line
//! - RigidBody: point sets held together by captured edge lengths
//! - Driver: swept angle/offset inputs
//! - ParameterRegistry + expression evaluator for parametric fields
//! - SketchDocument: serializable document model

pub mod body;
pub mod constraint;
pub mod document;
pub mod driver;
pub mod expr;
pub mod geometry;
pub mod id;
pub mod param;
pub mod point;
pub mod sketch;

// Re-exports for convenience
pub use body::{RigidBody, RigidEdge};
pub use constraint::{
    AngleConstraint, AngleKind, Coincidence, LengthConstraint, LengthMode, PointOnLine,
};
pub use document::{DocumentError, SketchDocument};
pub use driver::{Driver, DriverKind};
pub use expr::ExpressionError;
pub use id::{AngleId, BodyId, CoincidenceId, DriverId, LengthId, PointId, PointOnLineId};
pub use param::{ParameterError, ParameterRegistry};
pub use point::Point;
pub use sketch::{ConstraintErrorReport, FieldRef, Sketch, SketchError, Tolerances};
