//! The optimization hyper-graph: pose and time-difference vertices plus
//! transient soft-constraint edges.
//!
//! Vertices are index-based handles into the [`TimedElasticBand`]; they
//! carry no owned state, so tearing the graph down between outer
//! iterations can never free trajectory data. Edges own an ordered vertex
//! list (the Jacobian column order), an information matrix and their
//! error function.
//!
//! [`TimedElasticBand`]: crate::teb::TimedElasticBand

pub mod edges;

use once_cell::sync::Lazy;
use tracing::debug;

pub const POSE_DIMENSION: usize = 3;
pub const TIMEDIFF_DIMENSION: usize = 1;

/// Handle of an optimization variable, pointing into the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexKey {
    /// `poses[i]` of the band; three degrees of freedom (x, y, θ).
    Pose(usize),
    /// `timediffs[i]` of the band; one degree of freedom.
    TimeDiff(usize),
}

impl VertexKey {
    #[inline]
    #[must_use]
    pub fn dimension(self) -> usize {
        match self {
            Self::Pose(_) => POSE_DIMENSION,
            Self::TimeDiff(_) => TIMEDIFF_DIMENSION,
        }
    }
}

/// Discriminant of every edge type in the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeType {
    TimeOptimal,
    ShortestPath,
    Velocity,
    VelocityHolonomic,
    Acceleration,
    AccelerationStart,
    AccelerationGoal,
    KinematicsDiffDrive,
    KinematicsCarlike,
    Obstacle,
    InflatedObstacle,
    DynamicObstacle,
    ViaPoint,
    PreferRotDir,
    VelocityObstacleRatio,
}

/// Static description of an edge type, looked up by the cost accounting.
#[derive(Debug, Clone, Copy)]
pub struct EdgeTypeInfo {
    pub edge_type: EdgeType,
    pub name: &'static str,
    /// Whether the type's cost is scaled by the obstacle cost scale.
    pub obstacle_cost: bool,
    /// Whether the type's cost is scaled by the via-point cost scale.
    pub viapoint_cost: bool,
}

static EDGE_TYPE_REGISTRY: Lazy<Vec<EdgeTypeInfo>> = Lazy::new(|| {
    let entry = |edge_type, name, obstacle_cost, viapoint_cost| EdgeTypeInfo {
        edge_type,
        name,
        obstacle_cost,
        viapoint_cost,
    };
    let registry = vec![
        entry(EdgeType::TimeOptimal, "EdgeTimeOptimal", false, false),
        entry(EdgeType::ShortestPath, "EdgeShortestPath", false, false),
        entry(EdgeType::Velocity, "EdgeVelocity", false, false),
        entry(
            EdgeType::VelocityHolonomic,
            "EdgeVelocityHolonomic",
            false,
            false,
        ),
        entry(EdgeType::Acceleration, "EdgeAcceleration", false, false),
        entry(
            EdgeType::AccelerationStart,
            "EdgeAccelerationStart",
            false,
            false,
        ),
        entry(
            EdgeType::AccelerationGoal,
            "EdgeAccelerationGoal",
            false,
            false,
        ),
        entry(
            EdgeType::KinematicsDiffDrive,
            "EdgeKinematicsDiffDrive",
            false,
            false,
        ),
        entry(
            EdgeType::KinematicsCarlike,
            "EdgeKinematicsCarlike",
            false,
            false,
        ),
        entry(EdgeType::Obstacle, "EdgeObstacle", true, false),
        entry(
            EdgeType::InflatedObstacle,
            "EdgeInflatedObstacle",
            true,
            false,
        ),
        entry(
            EdgeType::DynamicObstacle,
            "EdgeDynamicObstacle",
            true,
            false,
        ),
        entry(EdgeType::ViaPoint, "EdgeViaPoint", false, true),
        entry(EdgeType::PreferRotDir, "EdgePreferRotDir", false, false),
        entry(
            EdgeType::VelocityObstacleRatio,
            "EdgeVelocityObstacleRatio",
            false,
            false,
        ),
    ];
    debug!("registered {} edge types", registry.len());
    registry
});

/// The process-wide edge-type registry. Initialized exactly once, no
/// matter how many planner instances exist.
#[must_use]
pub fn edge_type_registry() -> &'static [EdgeTypeInfo] {
    &EDGE_TYPE_REGISTRY
}

/// Registry entry for one edge type.
///
/// # Panics
///
/// Never panics; every [`EdgeType`] has a registry entry.
#[must_use]
pub fn edge_type_info(edge_type: EdgeType) -> &'static EdgeTypeInfo {
    edge_type_registry()
        .iter()
        .find(|info| info.edge_type == edge_type)
        .expect("every edge type is registered")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn vertex_dimensions() {
        assert_eq!(VertexKey::Pose(0).dimension(), 3);
        assert_eq!(VertexKey::TimeDiff(7).dimension(), 1);
    }

    #[test]
    fn registry_covers_the_whole_catalogue() {
        assert_eq!(edge_type_registry().len(), 15);
        assert!(edge_type_info(EdgeType::Obstacle).obstacle_cost);
        assert!(edge_type_info(EdgeType::DynamicObstacle).obstacle_cost);
        assert!(edge_type_info(EdgeType::ViaPoint).viapoint_cost);
        assert!(!edge_type_info(EdgeType::Velocity).obstacle_cost);
    }
}
