//! Planar rigid-body pose and twist primitives.

use angle::{average_angles, normalize_theta, shortest_angular_distance};
use nalgebra::Vector2;

use crate::Float;

/// A pose in SE(2): position plus a heading normalized to (−π, π].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSE2 {
    position: Vector2<Float>,
    theta: Float,
}

impl PoseSE2 {
    #[must_use]
    pub fn new(x: Float, y: Float, theta: Float) -> Self {
        Self {
            position: Vector2::new(x, y),
            theta: normalize_theta(theta),
        }
    }

    #[must_use]
    pub fn from_position(position: Vector2<Float>, theta: Float) -> Self {
        Self {
            position,
            theta: normalize_theta(theta),
        }
    }

    #[inline]
    #[must_use]
    pub fn x(&self) -> Float {
        self.position.x
    }

    #[inline]
    #[must_use]
    pub fn y(&self) -> Float {
        self.position.y
    }

    #[inline]
    #[must_use]
    pub fn theta(&self) -> Float {
        self.theta
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vector2<Float> {
        self.position
    }

    pub fn set_position(&mut self, position: Vector2<Float>) {
        self.position = position;
    }

    pub fn set_theta(&mut self, theta: Float) {
        self.theta = normalize_theta(theta);
    }

    /// Unit vector pointing along the heading.
    #[must_use]
    pub fn orientation_unit_vec(&self) -> Vector2<Float> {
        Vector2::new(self.theta.cos(), self.theta.sin())
    }

    /// Euclidean distance between the two positions.
    #[must_use]
    pub fn distance_to(&self, other: &PoseSE2) -> Float {
        (other.position - self.position).norm()
    }

    /// Pose halfway between `self` and `other`: linear midpoint position,
    /// heading on the bisector of the shorter angular arc.
    #[must_use]
    pub fn midpoint(&self, other: &PoseSE2) -> Self {
        Self {
            position: 0.5 * (self.position + other.position),
            theta: average_angles(self.theta, other.theta),
        }
    }

    /// Apply an increment from the optimizer. The heading stays normalized.
    pub fn apply_increment(&mut self, dx: Float, dy: Float, dtheta: Float) {
        self.position.x += dx;
        self.position.y += dy;
        self.theta = normalize_theta(self.theta + dtheta);
    }
}

/// A commanded velocity: linear (x forward, y lateral) plus angular.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist {
    pub linear: Vector2<Float>,
    pub angular: Float,
}

impl Twist {
    #[must_use]
    pub fn new(vx: Float, vy: Float, omega: Float) -> Self {
        Self {
            linear: Vector2::new(vx, vy),
            angular: omega,
        }
    }

    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Signed heading change from `from` to `to` along the shorter arc.
#[must_use]
pub fn heading_change(from: &PoseSE2, to: &PoseSE2) -> Float {
    shortest_angular_distance(from.theta(), to.theta())
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn new_normalizes_theta() {
        let pose = PoseSE2::new(1.0, 2.0, 3.0 * PI);
        assert_abs_diff_eq!(pose.theta(), PI, epsilon = 1e-12);
    }

    #[test]
    fn orientation_unit_vec_matches_heading() {
        let pose = PoseSE2::new(0.0, 0.0, PI / 2.0);
        let dir = pose.orientation_unit_vec();
        assert_abs_diff_eq!(dir.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dir.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn midpoint_takes_shorter_angular_arc() {
        let a = PoseSE2::new(0.0, 0.0, PI - 0.2);
        let b = PoseSE2::new(2.0, 0.0, -PI + 0.2);
        let mid = a.midpoint(&b);
        assert_abs_diff_eq!(mid.x(), 1.0, epsilon = 1e-12);
        // The bisector of the short arc across the seam is ±π, not 0.
        assert_abs_diff_eq!(mid.theta().abs(), PI, epsilon = 1e-12);
    }

    #[test]
    fn apply_increment_wraps_heading() {
        let mut pose = PoseSE2::new(0.0, 0.0, PI - 0.1);
        pose.apply_increment(0.5, -0.5, 0.3);
        assert_abs_diff_eq!(pose.x(), 0.5);
        assert_abs_diff_eq!(pose.y(), -0.5);
        assert_abs_diff_eq!(pose.theta(), -PI + 0.2, epsilon = 1e-12);
    }
}
