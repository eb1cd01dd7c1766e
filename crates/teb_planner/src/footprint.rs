//! Pluggable robot footprint distance models.
//!
//! The obstacle edges and the feasibility check never compute footprint
//! geometry themselves; they go through this trait, so exchanging the
//! robot shape never touches the graph construction.

use crate::{obstacle::Obstacle, pose::PoseSE2, Float};

pub trait FootprintModel: std::fmt::Debug + Send + Sync {
    /// Distance from the robot footprint at `pose` to the obstacle
    /// boundary. Zero or negative means contact.
    fn calculate_distance(&self, pose: &PoseSE2, obstacle: &Obstacle) -> Float;

    /// Distance from `point` to the footprint at `pose`; used against
    /// predicted obstacle positions.
    fn distance_to_point(&self, pose: &PoseSE2, point: &nalgebra::Vector2<Float>) -> Float;

    /// Radius of the largest circle centered on the pose that stays inside
    /// the footprint.
    fn inscribed_radius(&self) -> Float;
}

/// Collision oracle for the a-posteriori feasibility check. Usually
/// backed by a costmap; closures work for tests.
pub trait CollisionModel {
    fn in_collision(&self, pose: &PoseSE2) -> bool;
}

impl<F> CollisionModel for F
where
    F: Fn(&PoseSE2) -> bool,
{
    fn in_collision(&self, pose: &PoseSE2) -> bool {
        self(pose)
    }
}

/// The robot is a point; the obstacle distance is used unmodified.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointFootprint;

impl FootprintModel for PointFootprint {
    fn calculate_distance(&self, pose: &PoseSE2, obstacle: &Obstacle) -> Float {
        obstacle.distance_to(&pose.position())
    }

    fn distance_to_point(&self, pose: &PoseSE2, point: &nalgebra::Vector2<Float>) -> Float {
        (point - pose.position()).norm()
    }

    fn inscribed_radius(&self) -> Float {
        0.0
    }
}

/// A disc of fixed radius around the pose.
#[derive(Debug, Clone, Copy)]
pub struct CircularFootprint {
    radius: Float,
}

impl CircularFootprint {
    #[must_use]
    pub fn new(radius: Float) -> Self {
        Self { radius }
    }
}

impl FootprintModel for CircularFootprint {
    fn calculate_distance(&self, pose: &PoseSE2, obstacle: &Obstacle) -> Float {
        obstacle.distance_to(&pose.position()) - self.radius
    }

    fn distance_to_point(&self, pose: &PoseSE2, point: &nalgebra::Vector2<Float>) -> Float {
        (point - pose.position()).norm() - self.radius
    }

    fn inscribed_radius(&self) -> Float {
        self.radius
    }
}
