//! Via-point attraction edge.

use nalgebra::{DVector, Vector2};

use super::{pose_at, ConstraintEdge};
use crate::Float;

/// Unary pose edge pulling the band towards a user-supplied point.
#[derive(Debug, Clone)]
pub struct ViaPointEdge {
    pub via_point: Vector2<Float>,
}

impl ConstraintEdge for ViaPointEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeViaPoint"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose = pose_at(x, 0);
        DVector::from_vec(vec![(pose.position() - self.via_point).norm()])
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn error_is_the_distance_to_the_via_point() {
        let edge = ViaPointEdge {
            via_point: Vector2::new(1.0, 1.0),
        };
        let x = DVector::from_vec(vec![1.0, 0.0, 0.3]);
        assert_abs_diff_eq!(edge.error(&x)[0], 1.0, epsilon = 1e-12);
    }
}
