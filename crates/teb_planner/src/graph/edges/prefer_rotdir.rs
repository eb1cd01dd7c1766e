//! Preferred rotation direction edge, used for oscillation recovery.

use angle::shortest_angular_distance;
use nalgebra::DVector;

use super::{penalty_bound_from_below, pose_at, ConstraintEdge};
use crate::Float;

/// Binary pose edge penalizing heading changes against the preferred
/// turning direction. `direction` is +1 for left, −1 for right.
#[derive(Debug, Clone, Copy)]
pub struct PreferRotDirEdge {
    pub direction: Float,
}

impl PreferRotDirEdge {
    #[must_use]
    pub fn left() -> Self {
        Self { direction: 1.0 }
    }

    #[must_use]
    pub fn right() -> Self {
        Self { direction: -1.0 }
    }
}

impl ConstraintEdge for PreferRotDirEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgePreferRotDir"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        let pose1 = pose_at(x, 0);
        let pose2 = pose_at(x, 3);
        let angle_diff = shortest_angular_distance(pose1.theta(), pose2.theta());
        DVector::from_vec(vec![penalty_bound_from_below(
            self.direction * angle_diff,
            0.0,
            0.0,
        )])
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn left_preference_accepts_left_turns() {
        let edge = PreferRotDirEdge::left();
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.4]);
        assert_abs_diff_eq!(edge.error(&x)[0], 0.0);
    }

    #[test]
    fn left_preference_penalizes_right_turns() {
        let edge = PreferRotDirEdge::left();
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, -0.4]);
        assert_abs_diff_eq!(edge.error(&x)[0], 0.4, epsilon = 1e-12);
    }
}
