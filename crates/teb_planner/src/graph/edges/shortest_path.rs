//! Shortest-path edge: minimizes the distance between consecutive poses.

use nalgebra::DVector;

use super::{pose_at, ConstraintEdge};
use crate::Float;

/// Binary edge on two consecutive pose vertices.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestPathEdge;

impl ConstraintEdge for ShortestPathEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeShortestPath"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        DVector::from_vec(vec![(pose2.position() - pose1.position()).norm()])
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn error_is_the_segment_length() {
        let edge = ShortestPathEdge;
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 3.0, 4.0, 0.5]);
        assert_abs_diff_eq!(edge.error(&x)[0], 5.0, epsilon = 1e-12);
    }
}
