//! Obstacle clearance edges.

use std::sync::Arc;

use nalgebra::DVector;

use super::{penalty_bound_from_below, pose_at, ConstraintEdge};
use crate::{
    footprint::FootprintModel,
    obstacle::{ObstaclePtr, PredictionModel},
    Float,
};

/// Unary pose edge keeping the footprint at least `min_obstacle_dist`
/// away from one obstacle.
#[derive(Debug)]
pub struct ObstacleEdge {
    pub obstacle: ObstaclePtr,
    pub footprint: Arc<dyn FootprintModel>,
    pub min_obstacle_dist: Float,
    pub penalty_epsilon: Float,
}

impl ConstraintEdge for ObstacleEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeObstacle"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose = pose_at(x, 0);
        let dist = self.footprint.calculate_distance(&pose, &self.obstacle);
        DVector::from_vec(vec![penalty_bound_from_below(
            dist,
            self.min_obstacle_dist,
            self.penalty_epsilon,
        )])
    }

    #[inline]
    fn jacobian_delta(&self) -> Float {
        1e-4
    }
}

/// Two-component obstacle edge: the hard clearance residual plus a soft
/// cushion between `min_obstacle_dist` and `inflation_dist`.
#[derive(Debug)]
pub struct InflatedObstacleEdge {
    pub obstacle: ObstaclePtr,
    pub footprint: Arc<dyn FootprintModel>,
    pub min_obstacle_dist: Float,
    pub inflation_dist: Float,
    pub penalty_epsilon: Float,
}

impl ConstraintEdge for InflatedObstacleEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeInflatedObstacle"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose = pose_at(x, 0);
        let dist = self.footprint.calculate_distance(&pose, &self.obstacle);
        DVector::from_vec(vec![
            penalty_bound_from_below(dist, self.min_obstacle_dist, self.penalty_epsilon),
            penalty_bound_from_below(dist, self.inflation_dist, 0.0),
        ])
    }

    #[inline]
    fn jacobian_delta(&self) -> Float {
        1e-4
    }
}

/// Clearance from a moving obstacle's position predicted `time` seconds
/// along the trajectory (constant-velocity extrapolation).
#[derive(Debug)]
pub struct DynamicObstacleEdge {
    pub obstacle: ObstaclePtr,
    pub footprint: Arc<dyn FootprintModel>,
    /// Accumulated trajectory time of the constrained pose.
    pub time: Float,
    pub min_obstacle_dist: Float,
    pub inflation_dist: Float,
    pub penalty_epsilon: Float,
}

impl ConstraintEdge for DynamicObstacleEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeDynamicObstacle"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose = pose_at(x, 0);
        let predicted = self
            .obstacle
            .predict_at(self.time, PredictionModel::ConstantVelocity);
        let dist = self.footprint.distance_to_point(&pose, &predicted) - self.obstacle.radius();
        DVector::from_vec(vec![
            penalty_bound_from_below(dist, self.min_obstacle_dist, self.penalty_epsilon),
            penalty_bound_from_below(dist, self.inflation_dist, 0.0),
        ])
    }

    #[inline]
    fn jacobian_delta(&self) -> Float {
        1e-4
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector2;

    use super::*;
    use crate::{footprint::PointFootprint, obstacle::Obstacle};

    fn footprint() -> Arc<dyn FootprintModel> {
        Arc::new(PointFootprint)
    }

    #[test]
    fn obstacle_edge_is_satisfied_with_clearance() {
        let edge = ObstacleEdge {
            obstacle: ObstaclePtr::new(Obstacle::point(5.0, 0.0)),
            footprint: footprint(),
            min_obstacle_dist: 0.5,
            penalty_epsilon: 0.0,
        };
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        assert_abs_diff_eq!(edge.error(&x)[0], 0.0);
    }

    #[test]
    fn obstacle_edge_penalizes_proximity() {
        let edge = ObstacleEdge {
            obstacle: ObstaclePtr::new(Obstacle::point(0.3, 0.0)),
            footprint: footprint(),
            min_obstacle_dist: 0.5,
            penalty_epsilon: 0.0,
        };
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        assert_abs_diff_eq!(edge.error(&x)[0], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn inflated_edge_has_a_soft_cushion() {
        let edge = InflatedObstacleEdge {
            obstacle: ObstaclePtr::new(Obstacle::point(0.55, 0.0)),
            footprint: footprint(),
            min_obstacle_dist: 0.5,
            inflation_dist: 0.8,
            penalty_epsilon: 0.0,
        };
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        let error = edge.error(&x);
        // Outside the hard bound but inside the cushion.
        assert_abs_diff_eq!(error[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(error[1], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn dynamic_edge_uses_the_predicted_position() {
        let edge = DynamicObstacleEdge {
            obstacle: ObstaclePtr::new(Obstacle::Dynamic {
                position: Vector2::new(0.0, -2.0),
                velocity: Vector2::new(0.0, 1.0),
                acceleration: Vector2::zeros(),
                radius: 0.0,
            }),
            footprint: footprint(),
            time: 2.0,
            min_obstacle_dist: 0.5,
            inflation_dist: 0.6,
            penalty_epsilon: 0.0,
        };
        // At t = 2 s the obstacle reaches the origin, right on the pose.
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0]);
        let error = edge.error(&x);
        assert_abs_diff_eq!(error[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(error[1], 0.6, epsilon = 1e-12);
    }
}
