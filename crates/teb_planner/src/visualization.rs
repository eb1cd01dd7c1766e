//! Outbound debug and visualization streams.
//!
//! The planner publishes through this trait and treats the sink as
//! optional; every method has a no-op default so sinks implement only
//! what they display. [`RecordingVisualization`] captures everything for
//! assertions in tests.

use std::sync::Mutex;

use crate::{obstacle::ObstaclePtr, pose::PoseSE2, pose::Twist, Float};

/// One point of the extracted full trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub pose: PoseSE2,
    pub velocity: Twist,
    pub time_from_start: Float,
}

/// The per-cycle feedback message.
#[derive(Debug, Clone, Default)]
pub struct FeedbackMessage {
    pub trajectory: Vec<TrajectoryPoint>,
    /// Final cost of the cycle, if it was computed.
    pub cost: Option<Float>,
    pub obstacle_count: usize,
}

pub trait TebVisualization: Send + Sync {
    /// The optimized local plan of this cycle.
    fn publish_local_plan(&self, _poses: &[PoseSE2]) {}

    /// The obstacles associated with each band pose.
    fn publish_obstacle_markers(&self, _obstacles_per_vertex: &[Vec<ObstaclePtr>]) {}

    /// The time differences of this outer iteration.
    fn publish_time_diffs(&self, _timediffs: &[Float]) {}

    /// A pose that failed the a-posteriori feasibility check.
    fn publish_infeasible_pose(&self, _pose: &PoseSE2) {}

    fn publish_feedback(&self, _feedback: &FeedbackMessage) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVisualization;

impl TebVisualization for NullVisualization {}

/// Sink that stores everything it receives; used by tests to observe the
/// planner's outbound streams.
#[derive(Debug, Default)]
pub struct RecordingVisualization {
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub local_plans: Vec<Vec<PoseSE2>>,
    pub obstacle_markers: Vec<Vec<usize>>,
    pub time_diffs: Vec<Vec<Float>>,
    pub infeasible_poses: Vec<PoseSE2>,
    pub feedback: Vec<FeedbackMessage>,
}

impl RecordingVisualization {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    #[must_use]
    pub fn recorded(&self) -> Recorded {
        self.inner.lock().expect("recording lock").clone()
    }
}

impl TebVisualization for RecordingVisualization {
    fn publish_local_plan(&self, poses: &[PoseSE2]) {
        self.inner
            .lock()
            .expect("recording lock")
            .local_plans
            .push(poses.to_vec());
    }

    fn publish_obstacle_markers(&self, obstacles_per_vertex: &[Vec<ObstaclePtr>]) {
        self.inner
            .lock()
            .expect("recording lock")
            .obstacle_markers
            .push(obstacles_per_vertex.iter().map(Vec::len).collect());
    }

    fn publish_time_diffs(&self, timediffs: &[Float]) {
        self.inner
            .lock()
            .expect("recording lock")
            .time_diffs
            .push(timediffs.to_vec());
    }

    fn publish_infeasible_pose(&self, pose: &PoseSE2) {
        self.inner
            .lock()
            .expect("recording lock")
            .infeasible_poses
            .push(*pose);
    }

    fn publish_feedback(&self, feedback: &FeedbackMessage) {
        self.inner
            .lock()
            .expect("recording lock")
            .feedback
            .push(feedback.clone());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn recording_sink_captures_streams() {
        let sink = RecordingVisualization::new();
        sink.publish_local_plan(&[PoseSE2::new(0.0, 0.0, 0.0)]);
        sink.publish_time_diffs(&[0.3, 0.3]);
        sink.publish_infeasible_pose(&PoseSE2::new(1.0, 0.0, 0.0));

        let recorded = sink.recorded();
        assert_eq!(recorded.local_plans.len(), 1);
        assert_eq!(recorded.time_diffs, vec![vec![0.3, 0.3]]);
        assert_eq!(recorded.infeasible_poses.len(), 1);
    }
}
