//! Obstacle representations shared by the associator and the edge
//! catalogue.
//!
//! A tagged sum replaces the usual class hierarchy: every variant answers
//! the same small capability set (centroid, boundary distance, dynamic
//! flag, velocity), and the obstacle edges take a shared handle instead of
//! a base pointer.

use std::sync::Arc;

use nalgebra::Vector2;

use crate::Float;

/// Shared obstacle handle. The container is read-only during `plan()`;
/// the associator derives additional point obstacles into its own
/// per-vertex lists without touching the source container.
pub type ObstaclePtr = Arc<Obstacle>;
pub type ObstacleContainer = Vec<ObstaclePtr>;

/// Which motion model `predict_at` extrapolates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionModel {
    ConstantVelocity,
    ConstantAcceleration,
}

#[derive(Debug, Clone, derive_more::IsVariant)]
pub enum Obstacle {
    Point {
        position: Vector2<Float>,
    },
    Circular {
        position: Vector2<Float>,
        radius: Float,
    },
    Line {
        start: Vector2<Float>,
        end: Vector2<Float>,
    },
    Polygon {
        /// Closed boundary; the last vertex connects back to the first.
        vertices: Vec<Vector2<Float>>,
    },
    Dynamic {
        position: Vector2<Float>,
        velocity: Vector2<Float>,
        acceleration: Vector2<Float>,
        radius: Float,
    },
}

impl Obstacle {
    #[must_use]
    pub fn point(x: Float, y: Float) -> Self {
        Self::Point {
            position: Vector2::new(x, y),
        }
    }

    #[must_use]
    pub fn centroid(&self) -> Vector2<Float> {
        match self {
            Self::Point { position }
            | Self::Circular { position, .. }
            | Self::Dynamic { position, .. } => *position,
            Self::Line { start, end } => 0.5 * (start + end),
            Self::Polygon { vertices } => {
                let n = vertices.len().max(1) as Float;
                vertices.iter().fold(Vector2::zeros(), |acc, v| acc + v) / n
            }
        }
    }

    /// Euclidean distance from `point` to the obstacle boundary; zero
    /// inside a circle or polygon.
    #[must_use]
    pub fn distance_to(&self, point: &Vector2<Float>) -> Float {
        match self {
            Self::Point { position } => (point - position).norm(),
            Self::Circular { position, radius }
            | Self::Dynamic {
                position, radius, ..
            } => ((point - position).norm() - radius).max(0.0),
            Self::Line { start, end } => point_to_segment_distance(point, start, end),
            Self::Polygon { vertices } => point_to_polygon_distance(point, vertices),
        }
    }

    /// Radius of the obstacle body; zero for shapes without one.
    #[must_use]
    pub fn radius(&self) -> Float {
        match self {
            Self::Circular { radius, .. } | Self::Dynamic { radius, .. } => *radius,
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn velocity(&self) -> Option<Vector2<Float>> {
        match self {
            Self::Dynamic { velocity, .. } => Some(*velocity),
            _ => None,
        }
    }

    /// Centroid predicted `t` seconds into the future. Static obstacles
    /// stay put.
    #[must_use]
    pub fn predict_at(&self, t: Float, model: PredictionModel) -> Vector2<Float> {
        match self {
            Self::Dynamic {
                position,
                velocity,
                acceleration,
                ..
            } => match model {
                PredictionModel::ConstantVelocity => position + t * velocity,
                PredictionModel::ConstantAcceleration => {
                    position + t * velocity + 0.5 * t * t * acceleration
                }
            },
            _ => self.centroid(),
        }
    }
}

fn point_to_segment_distance(
    point: &Vector2<Float>,
    start: &Vector2<Float>,
    end: &Vector2<Float>,
) -> Float {
    let segment = end - start;
    let length_sq = segment.norm_squared();
    if length_sq < Float::EPSILON {
        return (point - start).norm();
    }
    let t = ((point - start).dot(&segment) / length_sq).clamp(0.0, 1.0);
    (point - (start + t * segment)).norm()
}

fn point_to_polygon_distance(point: &Vector2<Float>, vertices: &[Vector2<Float>]) -> Float {
    match vertices {
        [] => Float::INFINITY,
        [single] => (point - single).norm(),
        _ => {
            if point_in_polygon(point, vertices) {
                return 0.0;
            }
            let mut min_dist = Float::INFINITY;
            for i in 0..vertices.len() {
                let j = (i + 1) % vertices.len();
                min_dist =
                    min_dist.min(point_to_segment_distance(point, &vertices[i], &vertices[j]));
            }
            min_dist
        }
    }
}

/// Even-odd ray casting against the closed boundary.
fn point_in_polygon(point: &Vector2<Float>, vertices: &[Vector2<Float>]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (vi, vj) = (&vertices[i], &vertices[j]);
        if (vi.y > point.y) != (vj.y > point.y)
            && point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}
