//! Kinematic feasibility edges between consecutive poses.

use angle::shortest_angular_distance;
use nalgebra::DVector;

use super::{penalty_bound_from_below, pose_at, ConstraintEdge};
use crate::Float;

/// Differential drive: the displacement must lie on the arc implied by
/// the two headings (non-holonomic residual), and driving backwards is
/// penalized.
#[derive(Debug, Clone, Copy, Default)]
pub struct KinematicsDiffDriveEdge;

impl ConstraintEdge for KinematicsDiffDriveEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeKinematicsDiffDrive"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        let delta_s = pose2.position() - pose1.position();

        // Cross product of the displacement with the heading bisector.
        let nonholonomic = ((pose1.theta().cos() + pose2.theta().cos()) * delta_s.y
            - (pose1.theta().sin() + pose2.theta().sin()) * delta_s.x)
            .abs();
        let forward_drive =
            penalty_bound_from_below(delta_s.dot(&pose1.orientation_unit_vec()), 0.0, 0.0);

        DVector::from_vec(vec![nonholonomic, forward_drive])
    }
}

/// Car-like robot: non-holonomic residual plus a lower bound on the
/// turning radius.
#[derive(Debug, Clone)]
pub struct KinematicsCarlikeEdge {
    pub min_turning_radius: Float,
}

impl ConstraintEdge for KinematicsCarlikeEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeKinematicsCarlike"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        let delta_s = pose2.position() - pose1.position();

        let nonholonomic = ((pose1.theta().cos() + pose2.theta().cos()) * delta_s.y
            - (pose1.theta().sin() + pose2.theta().sin()) * delta_s.x)
            .abs();

        let angle_diff = shortest_angular_distance(pose1.theta(), pose2.theta());
        let turning_radius = if angle_diff == 0.0 {
            // Straight segments satisfy any radius bound.
            0.0
        } else {
            penalty_bound_from_below(
                delta_s.norm() / angle_diff.abs(),
                self.min_turning_radius,
                0.0,
            )
        };

        DVector::from_vec(vec![nonholonomic, turning_radius])
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn straight_forward_motion_is_feasible() {
        let edge = KinematicsDiffDriveEdge;
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.5, 0.0, 0.0]);
        let error = edge.error(&x);
        assert_abs_diff_eq!(error[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(error[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn sideways_displacement_violates_the_rolling_constraint() {
        let edge = KinematicsDiffDriveEdge;
        // Displacement straight up while both headings point along x.
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.0]);
        let error = edge.error(&x);
        assert_abs_diff_eq!(error[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn backward_motion_is_penalized() {
        let edge = KinematicsDiffDriveEdge;
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, -0.5, 0.0, 0.0]);
        let error = edge.error(&x);
        assert_abs_diff_eq!(error[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn carlike_edge_penalizes_tight_turns() {
        let edge = KinematicsCarlikeEdge {
            min_turning_radius: 1.0,
        };
        // 0.4 m displacement while turning 0.8 rad: radius 0.5 m.
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.4, 0.0, 0.8]);
        let error = edge.error(&x);
        assert_abs_diff_eq!(error[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn carlike_edge_accepts_straight_segments() {
        let edge = KinematicsCarlikeEdge {
            min_turning_radius: 1.0,
        };
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.4, 0.0, 0.0]);
        let error = edge.error(&x);
        assert_abs_diff_eq!(error[1], 0.0, epsilon = 1e-12);
    }
}
