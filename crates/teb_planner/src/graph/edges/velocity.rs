//! Velocity limit edges.

use std::sync::Arc;

use angle::shortest_angular_distance;
use nalgebra::DVector;

use super::{fast_sigmoid, penalty_bound_to_interval, pose_at, ConstraintEdge};
use crate::{footprint::FootprintModel, obstacle::ObstaclePtr, Float};

/// Ternary edge (pose, pose, Δt) bounding translational and rotational
/// velocity of a non-holonomic robot.
#[derive(Debug, Clone)]
pub struct VelocityEdge {
    pub max_vel_x: Float,
    pub max_vel_theta: Float,
    pub penalty_epsilon: Float,
}

impl ConstraintEdge for VelocityEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeVelocity"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        let dt = x[6];

        let delta_s = pose2.position() - pose1.position();
        let dist = delta_s.norm();
        let angle_diff = shortest_angular_distance(pose1.theta(), pose2.theta());

        // Sign the speed by the driving direction so backward motion counts
        // against the same bound.
        let mut vel = dist / dt;
        vel *= fast_sigmoid(100.0 * delta_s.dot(&pose1.orientation_unit_vec()));
        let omega = angle_diff / dt;

        DVector::from_vec(vec![
            penalty_bound_to_interval(vel, self.max_vel_x, self.penalty_epsilon),
            penalty_bound_to_interval(omega, self.max_vel_theta, self.penalty_epsilon),
        ])
    }
}

/// Ternary edge with an independent lateral velocity bound for holonomic
/// robots.
#[derive(Debug, Clone)]
pub struct VelocityHolonomicEdge {
    pub max_vel_x: Float,
    pub max_vel_y: Float,
    pub max_vel_theta: Float,
    pub penalty_epsilon: Float,
}

impl ConstraintEdge for VelocityHolonomicEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeVelocityHolonomic"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        let dt = x[6];

        let delta_s = pose2.position() - pose1.position();
        let angle_diff = shortest_angular_distance(pose1.theta(), pose2.theta());

        // Rotate the displacement into the frame of the first pose.
        let cos_theta1 = pose1.theta().cos();
        let sin_theta1 = pose1.theta().sin();
        let vx = (cos_theta1 * delta_s.x + sin_theta1 * delta_s.y) / dt;
        let vy = (-sin_theta1 * delta_s.x + cos_theta1 * delta_s.y) / dt;
        let omega = angle_diff / dt;

        DVector::from_vec(vec![
            penalty_bound_to_interval(vx, self.max_vel_x, self.penalty_epsilon),
            penalty_bound_to_interval(vy, self.max_vel_y, self.penalty_epsilon),
            penalty_bound_to_interval(omega, self.max_vel_theta, self.penalty_epsilon),
        ])
    }
}

/// Ternary edge coupling the admissible velocity to the clearance from one
/// associated obstacle: close to an obstacle only a fraction of the
/// configured limits is admitted.
#[derive(Debug)]
pub struct VelocityObstacleRatioEdge {
    pub obstacle: ObstaclePtr,
    pub footprint: Arc<dyn FootprintModel>,
    pub max_vel_x: Float,
    pub max_vel_theta: Float,
    pub ratio_max_vel: Float,
    pub proximity_lower_bound: Float,
    pub proximity_upper_bound: Float,
}

impl ConstraintEdge for VelocityObstacleRatioEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeVelocityObstacleRatio"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        let dt = x[6];

        let delta_s = pose2.position() - pose1.position();
        let dist = delta_s.norm();
        let angle_diff = shortest_angular_distance(pose1.theta(), pose2.theta());

        let mut vel = dist / dt;
        vel *= fast_sigmoid(100.0 * delta_s.dot(&pose1.orientation_unit_vec()));
        let omega = angle_diff / dt;

        let clearance = self.footprint.calculate_distance(&pose1, &self.obstacle);
        let ratio = if clearance < self.proximity_lower_bound {
            0.0
        } else if clearance > self.proximity_upper_bound {
            1.0
        } else {
            (clearance - self.proximity_lower_bound)
                / (self.proximity_upper_bound - self.proximity_lower_bound)
        } * self.ratio_max_vel;

        DVector::from_vec(vec![
            penalty_bound_to_interval(vel, ratio * self.max_vel_x, 0.0),
            penalty_bound_to_interval(omega, ratio * self.max_vel_theta, 0.0),
        ])
    }

    #[inline]
    fn jacobian_delta(&self) -> Float {
        1e-4
    }
}
