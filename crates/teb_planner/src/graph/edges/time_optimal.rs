//! Time-optimality edge: minimizes a single time difference.

use nalgebra::DVector;

use super::ConstraintEdge;
use crate::Float;

/// Unary edge on one time-difference vertex. Its error is the interval
/// itself, so the optimizer trades trajectory duration against every
/// other constraint.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeOptimalEdge;

impl ConstraintEdge for TimeOptimalEdge {
    #[inline]
    fn name(&self) -> &'static str {
        "EdgeTimeOptimal"
    }

    fn error(&self, x: &DVector<Float>) -> DVector<Float> {
        DVector::from_vec(vec![x[0]])
    }
}
