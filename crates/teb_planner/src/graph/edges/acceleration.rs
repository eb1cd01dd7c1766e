//! Acceleration limit edges.
//!
//! The mid edge spans three poses and both adjoining time differences;
//! the start and goal edges replace one of the finite-difference
//! velocities with the fixed boundary velocity.

use angle::shortest_angular_distance;
use nalgebra::DVector;

use super::{fast_sigmoid, penalty_bound_to_interval, pose_at, ConstraintEdge};
use crate::{pose::PoseSE2, pose::Twist, Float};

/// Shared acceleration limits. With `holonomic` set the error gains an
/// independent lateral component, and velocities are taken in the frame
/// of the interval's first pose.
#[derive(Debug, Clone)]
pub struct AccelerationLimits {
    pub acc_lim_x: Float,
    pub acc_lim_y: Float,
    pub acc_lim_theta: Float,
    pub penalty_epsilon: Float,
    pub holonomic: bool,
}

/// Finite-difference velocity over one interval: longitudinal (signed),
/// lateral (zero unless holonomic), rotational.
fn interval_velocity(
    pose1: &PoseSE2,
    pose2: &PoseSE2,
    dt: Float,
    holonomic: bool,
) -> (Float, Float, Float) {
    let delta_s = pose2.position() - pose1.position();
    let omega = shortest_angular_distance(pose1.theta(), pose2.theta()) / dt;
    if holonomic {
        let cos_theta1 = pose1.theta().cos();
        let sin_theta1 = pose1.theta().sin();
        let vx = (cos_theta1 * delta_s.x + sin_theta1 * delta_s.y) / dt;
        let vy = (-sin_theta1 * delta_s.x + cos_theta1 * delta_s.y) / dt;
        (vx, vy, omega)
    } else {
        let mut vel = delta_s.norm() / dt;
        vel *= fast_sigmoid(100.0 * delta_s.dot(&pose1.orientation_unit_vec()));
        (vel, 0.0, omega)
    }
}

fn acceleration_error(
    limits: &AccelerationLimits,
    vel1: (Float, Float, Float),
    vel2: (Float, Float, Float),
    dt: Float,
) -> DVector<Float> {
    let acc_x = (vel2.0 - vel1.0) / dt;
    let acc_theta = (vel2.2 - vel1.2) / dt;
    if limits.holonomic {
        let acc_y = (vel2.1 - vel1.1) / dt;
        DVector::from_vec(vec![
            penalty_bound_to_interval(acc_x, limits.acc_lim_x, limits.penalty_epsilon),
            penalty_bound_to_interval(acc_y, limits.acc_lim_y, limits.penalty_epsilon),
            penalty_bound_to_interval(acc_theta, limits.acc_lim_theta, limits.penalty_epsilon),
        ])
    } else {
        DVector::from_vec(vec![
            penalty_bound_to_interval(acc_x, limits.acc_lim_x, limits.penalty_epsilon),
            penalty_bound_to_interval(acc_theta, limits.acc_lim_theta, limits.penalty_epsilon),
        ])
    }
}

/// Five-vertex edge (three poses, two time differences).
#[derive(Debug, Clone)]
pub struct AccelerationEdge {
    pub limits: AccelerationLimits,
}

impl ConstraintEdge for AccelerationEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeAcceleration"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        let pose3 = pose_at(x, 6);
        let dt1 = x[9];
        let dt2 = x[10];

        let vel1 = interval_velocity(&pose1, &pose2, dt1, self.limits.holonomic);
        let vel2 = interval_velocity(&pose2, &pose3, dt2, self.limits.holonomic);
        acceleration_error(&self.limits, vel1, vel2, 0.5 * (dt1 + dt2))
    }
}

/// Ternary edge using the fixed initial velocity as the first sample.
#[derive(Debug, Clone)]
pub struct AccelerationStartEdge {
    pub limits: AccelerationLimits,
    pub start_velocity: Twist,
}

impl ConstraintEdge for AccelerationStartEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeAccelerationStart"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        let dt = x[6];

        let vel1 = (
            self.start_velocity.linear.x,
            self.start_velocity.linear.y,
            self.start_velocity.angular,
        );
        let vel2 = interval_velocity(&pose1, &pose2, dt, self.limits.holonomic);
        acceleration_error(&self.limits, vel1, vel2, dt)
    }
}

/// Ternary edge using the fixed goal velocity as the second sample.
#[derive(Debug, Clone)]
pub struct AccelerationGoalEdge {
    pub limits: AccelerationLimits,
    pub goal_velocity: Twist,
}

impl ConstraintEdge for AccelerationGoalEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeAccelerationGoal"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        let dt = x[6];

        let vel1 = interval_velocity(&pose1, &pose2, dt, self.limits.holonomic);
        let vel2 = (
            self.goal_velocity.linear.x,
            self.goal_velocity.linear.y,
            self.goal_velocity.angular,
        );
        acceleration_error(&self.limits, vel1, vel2, dt)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn limits() -> AccelerationLimits {
        AccelerationLimits {
            acc_lim_x: 0.5,
            acc_lim_y: 0.5,
            acc_lim_theta: 0.5,
            penalty_epsilon: 0.0,
            holonomic: false,
        }
    }

    #[test]
    fn constant_velocity_has_no_acceleration_error() {
        let edge = AccelerationEdge { limits: limits() };
        // Two equal intervals: 0.3 m in 0.3 s each.
        let x = DVector::from_vec(vec![
            0.0, 0.0, 0.0, //
            0.3, 0.0, 0.0, //
            0.6, 0.0, 0.0, //
            0.3, 0.3,
        ]);
        let error = edge.error(&x);
        assert_abs_diff_eq!(error[0], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(error[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn speedup_beyond_the_limit_is_penalized() {
        let edge = AccelerationEdge { limits: limits() };
        // 1 m/s to 2 m/s within 1 s: 1 m/s² against a 0.5 m/s² limit.
        let x = DVector::from_vec(vec![
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            3.0, 0.0, 0.0, //
            1.0, 1.0,
        ]);
        let error = edge.error(&x);
        assert!(error[0] > 0.3, "expected a penalty, got {}", error[0]);
    }

    #[test]
    fn start_edge_penalizes_launching_from_standstill() {
        let edge = AccelerationStartEdge {
            limits: limits(),
            start_velocity: Twist::zero(),
        };
        // From rest to 2 m/s within 0.5 s.
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.5]);
        let error = edge.error(&x);
        assert!(error[0] > 1.0);
    }

    #[test]
    fn goal_edge_accepts_a_gentle_stop() {
        let edge = AccelerationGoalEdge {
            limits: limits(),
            goal_velocity: Twist::zero(),
        };
        // 0.2 m/s down to rest within 0.5 s: 0.4 m/s², within the limit.
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.1, 0.0, 0.0, 0.5]);
        let error = edge.error(&x);
        assert_abs_diff_eq!(error[0], 0.0, epsilon = 5e-2);
    }

    #[test]
    fn holonomic_limits_cover_the_lateral_axis() {
        let mut holonomic_limits = limits();
        holonomic_limits.holonomic = true;
        let edge = AccelerationStartEdge {
            limits: holonomic_limits,
            start_velocity: Twist::zero(),
        };
        // Pure lateral launch: 1 m/s lateral velocity reached in 0.5 s.
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.5]);
        let error = edge.error(&x);
        assert_eq!(error.len(), 3);
        assert_abs_diff_eq!(error[0], 0.0, epsilon = 1e-9);
        assert!(error[1] > 1.0);
    }
}
