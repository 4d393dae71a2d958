//! Stable integer ids for sketch entities.
//!
//! Each entity kind has its own id space, allocated from counters owned
//! by the [`Sketch`](crate::Sketch). Ids are never reused within a
//! sketch, so a deleted entity's id stays dangling-proof.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Id of a sketch point.
    PointId
);
entity_id!(
    /// Id of a length/distance constraint.
    LengthId
);
entity_id!(
    /// Id of an angle constraint.
    AngleId
);
entity_id!(
    /// Id of a coincidence constraint.
    CoincidenceId
);
entity_id!(
    /// Id of a point-on-line constraint.
    PointOnLineId
);
entity_id!(
    /// Id of a rigid body.
    BodyId
);
entity_id!(
    /// Id of a driver definition.
    DriverId
);
