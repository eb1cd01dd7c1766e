//! The soft-constraint edge catalogue.
//!
//! Every edge type is a struct holding the parameters its error function
//! needs, collected into [`EdgeKind`] for dispatch. An error of norm zero
//! means the constraint is satisfied; the optimizer minimizes the sum of
//! squared, information-weighted errors.

use nalgebra::{DMatrix, DVector};

use super::{EdgeType, VertexKey};
use crate::{pose::PoseSE2, Float};

pub(in crate::graph) mod acceleration;
pub(in crate::graph) mod kinematics;
pub(in crate::graph) mod obstacle;
pub(in crate::graph) mod prefer_rotdir;
pub(in crate::graph) mod shortest_path;
pub(in crate::graph) mod time_optimal;
pub(in crate::graph) mod velocity;
pub(in crate::graph) mod via_point;

pub use self::{
    acceleration::{
        AccelerationEdge, AccelerationGoalEdge, AccelerationLimits, AccelerationStartEdge,
    },
    kinematics::{KinematicsCarlikeEdge, KinematicsDiffDriveEdge},
    obstacle::{DynamicObstacleEdge, InflatedObstacleEdge, ObstacleEdge},
    prefer_rotdir::PreferRotDirEdge,
    shortest_path::ShortestPathEdge,
    time_optimal::TimeOptimalEdge,
    velocity::{VelocityEdge, VelocityHolonomicEdge, VelocityObstacleRatioEdge},
    via_point::ViaPointEdge,
};

/// Shared behavior of every edge kind.
pub trait ConstraintEdge {
    /// The name of the edge type. Used for debugging and cost reporting.
    fn name(&self) -> &'static str;

    /// Error vector at the stacked vertex values `x`. The layout of `x`
    /// follows the edge's vertex order: three entries (x, y, θ) per pose,
    /// one entry per time difference.
    fn error(&self, x: &DVector<Float>) -> DVector<Float>;

    /// Step used by the forward-difference Jacobian.
    fn jacobian_delta(&self) -> Float {
        1e-6
    }
}

/// Variant storing the specialized behavior of each edge kind.
#[derive(Debug, derive_more::IsVariant)]
pub enum EdgeKind {
    TimeOptimal(TimeOptimalEdge),
    ShortestPath(ShortestPathEdge),
    Velocity(VelocityEdge),
    VelocityHolonomic(VelocityHolonomicEdge),
    Acceleration(AccelerationEdge),
    AccelerationStart(AccelerationStartEdge),
    AccelerationGoal(AccelerationGoalEdge),
    KinematicsDiffDrive(KinematicsDiffDriveEdge),
    KinematicsCarlike(KinematicsCarlikeEdge),
    Obstacle(ObstacleEdge),
    InflatedObstacle(InflatedObstacleEdge),
    DynamicObstacle(DynamicObstacleEdge),
    ViaPoint(ViaPointEdge),
    PreferRotDir(PreferRotDirEdge),
    VelocityObstacleRatio(VelocityObstacleRatioEdge),
}

impl EdgeKind {
    #[must_use]
    pub fn edge_type(&self) -> EdgeType {
        match self {
            Self::TimeOptimal(_) => EdgeType::TimeOptimal,
            Self::ShortestPath(_) => EdgeType::ShortestPath,
            Self::Velocity(_) => EdgeType::Velocity,
            Self::VelocityHolonomic(_) => EdgeType::VelocityHolonomic,
            Self::Acceleration(_) => EdgeType::Acceleration,
            Self::AccelerationStart(_) => EdgeType::AccelerationStart,
            Self::AccelerationGoal(_) => EdgeType::AccelerationGoal,
            Self::KinematicsDiffDrive(_) => EdgeType::KinematicsDiffDrive,
            Self::KinematicsCarlike(_) => EdgeType::KinematicsCarlike,
            Self::Obstacle(_) => EdgeType::Obstacle,
            Self::InflatedObstacle(_) => EdgeType::InflatedObstacle,
            Self::DynamicObstacle(_) => EdgeType::DynamicObstacle,
            Self::ViaPoint(_) => EdgeType::ViaPoint,
            Self::PreferRotDir(_) => EdgeType::PreferRotDir,
            Self::VelocityObstacleRatio(_) => EdgeType::VelocityObstacleRatio,
        }
    }
}

impl ConstraintEdge for EdgeKind {
    fn name(&self) -> &'static str {
        match self {
            Self::TimeOptimal(e) => e.name(),
            Self::ShortestPath(e) => e.name(),
            Self::Velocity(e) => e.name(),
            Self::VelocityHolonomic(e) => e.name(),
            Self::Acceleration(e) => e.name(),
            Self::AccelerationStart(e) => e.name(),
            Self::AccelerationGoal(e) => e.name(),
            Self::KinematicsDiffDrive(e) => e.name(),
            Self::KinematicsCarlike(e) => e.name(),
            Self::Obstacle(e) => e.name(),
            Self::InflatedObstacle(e) => e.name(),
            Self::DynamicObstacle(e) => e.name(),
            Self::ViaPoint(e) => e.name(),
            Self::PreferRotDir(e) => e.name(),
            Self::VelocityObstacleRatio(e) => e.name(),
        }
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        match self {
            Self::TimeOptimal(e) => e.error(x),
            Self::ShortestPath(e) => e.error(x),
            Self::Velocity(e) => e.error(x),
            Self::VelocityHolonomic(e) => e.error(x),
            Self::Acceleration(e) => e.error(x),
            Self::AccelerationStart(e) => e.error(x),
            Self::AccelerationGoal(e) => e.error(x),
            Self::KinematicsDiffDrive(e) => e.error(x),
            Self::KinematicsCarlike(e) => e.error(x),
            Self::Obstacle(e) => e.error(x),
            Self::InflatedObstacle(e) => e.error(x),
            Self::DynamicObstacle(e) => e.error(x),
            Self::ViaPoint(e) => e.error(x),
            Self::PreferRotDir(e) => e.error(x),
            Self::VelocityObstacleRatio(e) => e.error(x),
        }
    }

    fn jacobian_delta(&self) -> Float {
        match self {
            Self::TimeOptimal(e) => e.jacobian_delta(),
            Self::ShortestPath(e) => e.jacobian_delta(),
            Self::Velocity(e) => e.jacobian_delta(),
            Self::VelocityHolonomic(e) => e.jacobian_delta(),
            Self::Acceleration(e) => e.jacobian_delta(),
            Self::AccelerationStart(e) => e.jacobian_delta(),
            Self::AccelerationGoal(e) => e.jacobian_delta(),
            Self::KinematicsDiffDrive(e) => e.jacobian_delta(),
            Self::KinematicsCarlike(e) => e.jacobian_delta(),
            Self::Obstacle(e) => e.jacobian_delta(),
            Self::InflatedObstacle(e) => e.jacobian_delta(),
            Self::DynamicObstacle(e) => e.jacobian_delta(),
            Self::ViaPoint(e) => e.jacobian_delta(),
            Self::PreferRotDir(e) => e.jacobian_delta(),
            Self::VelocityObstacleRatio(e) => e.jacobian_delta(),
        }
    }
}

/// One soft constraint: vertex handles in Jacobian column order, the
/// information matrix, and the error function.
#[derive(Debug)]
pub struct Edge {
    vertices: Vec<VertexKey>,
    information: DMatrix<Float>,
    kind: EdgeKind,
}

impl Edge {
    #[must_use]
    pub fn new(vertices: Vec<VertexKey>, information: DMatrix<Float>, kind: EdgeKind) -> Self {
        Self {
            vertices,
            information,
            kind,
        }
    }

    #[inline]
    #[must_use]
    pub fn vertices(&self) -> &[VertexKey] {
        &self.vertices
    }

    #[inline]
    #[must_use]
    pub fn information(&self) -> &DMatrix<Float> {
        &self.information
    }

    #[inline]
    #[must_use]
    pub fn edge_type(&self) -> EdgeType {
        self.kind.edge_type()
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Total dimension of the stacked vertex values.
    #[must_use]
    pub fn stacked_dimension(&self) -> usize {
        self.vertices.iter().map(|v| v.dimension()).sum()
    }

    #[must_use]
    pub fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        self.kind.error(x)
    }

    /// Forward-difference Jacobian of the error at the linearization
    /// point `x`.
    #[must_use]
    pub fn numeric_jacobian(&self, x: &DVector<Float>) -> DMatrix<Float> {
        let h0 = self.kind.error(x);
        let mut jacobian = DMatrix::zeros(h0.len(), x.len());
        let delta = self.kind.jacobian_delta();

        let mut x = x.clone();
        for i in 0..x.len() {
            x[i] += delta;
            let derivative = (self.kind.error(&x) - &h0) / delta;
            jacobian.set_column(i, &derivative);
            x[i] -= delta;
        }
        jacobian
    }

    /// Squared, information-weighted error.
    #[must_use]
    pub fn chi2(&self, x: &DVector<Float>) -> Float {
        let e = self.kind.error(x);
        (e.transpose() * &self.information * e)[(0, 0)]
    }
}

/// Penalty of `var` against the symmetric interval `[-bound, bound]`,
/// softened by `epsilon`.
#[must_use]
pub fn penalty_bound_to_interval(var: Float, bound: Float, epsilon: Float) -> Float {
    if var < -bound + epsilon {
        -var + (-bound + epsilon)
    } else if var <= bound - epsilon {
        0.0
    } else {
        var - (bound - epsilon)
    }
}

/// Penalty of `var` against the lower bound `a`, softened by `epsilon`.
#[must_use]
pub fn penalty_bound_from_below(var: Float, a: Float, epsilon: Float) -> Float {
    if var >= a + epsilon {
        0.0
    } else {
        -var + (a + epsilon)
    }
}

/// Smooth sign surrogate; keeps the velocity direction differentiable.
#[must_use]
pub fn fast_sigmoid(x: Float) -> Float {
    x / (1.0 + x.abs())
}

/// Read the pose stored at `offset` of a stacked value vector.
#[must_use]
pub(crate) fn pose_at(x: &DVector<Float>, offset: usize) -> PoseSE2 {
    PoseSE2::new(x[offset], x[offset + 1], x[offset + 2])
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn interval_penalty_is_zero_inside() {
        assert_abs_diff_eq!(penalty_bound_to_interval(0.0, 1.0, 0.1), 0.0);
        assert_abs_diff_eq!(penalty_bound_to_interval(0.85, 1.0, 0.1), 0.0);
        assert_abs_diff_eq!(penalty_bound_to_interval(-0.85, 1.0, 0.1), 0.0);
    }

    #[test]
    fn interval_penalty_grows_linearly_outside() {
        assert_abs_diff_eq!(penalty_bound_to_interval(1.2, 1.0, 0.1), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(
            penalty_bound_to_interval(-1.2, 1.0, 0.1),
            0.3,
            epsilon = 1e-12
        );
    }

    #[test]
    fn lower_bound_penalty() {
        assert_abs_diff_eq!(penalty_bound_from_below(2.0, 1.0, 0.1), 0.0);
        assert_abs_diff_eq!(penalty_bound_from_below(0.5, 1.0, 0.1), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn fast_sigmoid_saturates() {
        assert_abs_diff_eq!(fast_sigmoid(0.0), 0.0);
        assert!(fast_sigmoid(100.0) > 0.99);
        assert!(fast_sigmoid(-100.0) < -0.99);
    }

    #[test]
    fn numeric_jacobian_of_time_optimal_edge() {
        let edge = Edge::new(
            vec![VertexKey::TimeDiff(0)],
            DMatrix::identity(1, 1),
            EdgeKind::TimeOptimal(TimeOptimalEdge),
        );
        let x = DVector::from_vec(vec![0.4]);
        let jacobian = edge.numeric_jacobian(&x);
        assert_abs_diff_eq!(jacobian[(0, 0)], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(edge.chi2(&x), 0.16, epsilon = 1e-12);
    }
}
