//! The timed elastic band container: an ordered, interleaved sequence of
//! poses and strictly positive time differences.
//!
//! The band always satisfies `len(poses) == len(timediffs) + 1` once
//! initialized, where `timediffs[i]` is the interval from `poses[i]` to
//! `poses[i + 1]`. Pose 0 and the last pose are held fixed by the
//! optimizer; everything in between is free.

use angle::normalize_theta;
use nalgebra::Vector2;

use crate::{obstacle::Obstacle, pose::PoseSE2, Float};

/// Smallest admissible time difference. Keeps velocity extraction away
/// from a division by zero no matter what the optimizer writes back.
pub const MIN_TIME_DIFF: Float = 1e-3;

/// A strictly positive time interval between two consecutive poses.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct TimeDiff(Float);

impl TimeDiff {
    /// Create a time difference, flooring the value at [`MIN_TIME_DIFF`].
    #[must_use]
    pub fn new(dt: Float) -> Self {
        Self(dt.max(MIN_TIME_DIFF))
    }

    #[inline]
    #[must_use]
    pub fn get(self) -> Float {
        self.0
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TebError {
    #[error("the band is already initialized; clear it before re-initializing")]
    AlreadyInitialized,
    #[error("the initial plan needs at least a start and a goal pose")]
    PlanTooShort,
}

/// The timed elastic band.
#[derive(Debug, Clone, Default)]
pub struct TimedElasticBand {
    poses: Vec<PoseSE2>,
    timediffs: Vec<TimeDiff>,
}

impl TimedElasticBand {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_init(&self) -> bool {
        !self.poses.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn size_poses(&self) -> usize {
        self.poses.len()
    }

    #[inline]
    #[must_use]
    pub fn size_timediffs(&self) -> usize {
        self.timediffs.len()
    }

    #[inline]
    #[must_use]
    pub fn pose(&self, index: usize) -> &PoseSE2 {
        &self.poses[index]
    }

    #[inline]
    pub fn pose_mut(&mut self, index: usize) -> &mut PoseSE2 {
        &mut self.poses[index]
    }

    /// The goal pose (last in the band).
    ///
    /// # Panics
    ///
    /// Panics if the band is uninitialized.
    #[inline]
    #[must_use]
    pub fn back_pose(&self) -> &PoseSE2 {
        self.poses.last().expect("band is initialized")
    }

    #[inline]
    pub fn back_pose_mut(&mut self) -> &mut PoseSE2 {
        self.poses.last_mut().expect("band is initialized")
    }

    #[inline]
    #[must_use]
    pub fn time_diff(&self, index: usize) -> Float {
        self.timediffs[index].get()
    }

    pub fn set_time_diff(&mut self, index: usize, dt: Float) {
        self.timediffs[index] = TimeDiff::new(dt);
    }

    #[inline]
    #[must_use]
    pub fn poses(&self) -> &[PoseSE2] {
        &self.poses
    }

    /// All time differences as plain seconds, in band order.
    #[must_use]
    pub fn timediffs(&self) -> Vec<Float> {
        self.timediffs.iter().map(|dt| dt.get()).collect()
    }

    /// Total duration of the band.
    #[must_use]
    pub fn sum_all_time_diffs(&self) -> Float {
        self.timediffs.iter().map(|dt| dt.get()).sum()
    }

    /// Accumulated time from the start up to pose `index`.
    #[must_use]
    pub fn accumulated_time_until(&self, index: usize) -> Float {
        self.timediffs[..index.min(self.timediffs.len())]
            .iter()
            .map(|dt| dt.get())
            .sum()
    }

    pub fn add_pose(&mut self, pose: PoseSE2) {
        self.poses.push(pose);
    }

    pub fn add_pose_and_time_diff(&mut self, pose: PoseSE2, dt: Float) {
        self.poses.push(pose);
        self.timediffs.push(TimeDiff::new(dt));
    }

    pub fn insert_pose(&mut self, index: usize, pose: PoseSE2) {
        self.poses.insert(index, pose);
    }

    pub fn insert_time_diff(&mut self, index: usize, dt: Float) {
        self.timediffs.insert(index, TimeDiff::new(dt));
    }

    pub fn delete_pose(&mut self, index: usize) {
        self.poses.remove(index);
    }

    pub fn delete_time_diff(&mut self, index: usize) {
        self.timediffs.remove(index);
    }

    /// Remove `count` poses starting at `index`, with the matching time
    /// differences.
    pub fn delete_poses_and_time_diffs(&mut self, index: usize, count: usize) {
        self.poses.drain(index..index + count);
        self.timediffs.drain(index..index + count);
    }

    pub fn clear(&mut self) {
        self.poses.clear();
        self.timediffs.clear();
    }

    /// Time a constant-velocity robot needs between two poses, honoring
    /// both the translational and the rotational limit.
    #[must_use]
    pub fn estimate_delta_t(
        start: &PoseSE2,
        end: &PoseSE2,
        max_vel_x: Float,
        max_vel_theta: Float,
    ) -> Float {
        let mut dt = 0.1;
        if max_vel_x > 0.0 {
            dt = start.distance_to(end) / max_vel_x;
        }
        if max_vel_theta > 0.0 {
            let rot_dist = crate::pose::heading_change(start, end).abs();
            dt = dt.max(rot_dist / max_vel_theta);
        }
        dt
    }

    /// Initialize the band by sampling a coarse plan.
    ///
    /// Every consecutive pair is spaced by the constant-velocity travel
    /// time. With `overwrite_orientation`, interior headings become the
    /// bearing to the next sample (flipped when the plan starts behind the
    /// robot and backwards motion is allowed). Midpoint samples are
    /// inserted towards the goal until `min_samples` is reached.
    ///
    /// # Errors
    ///
    /// Fails if the band is already initialized or the plan has fewer than
    /// two poses.
    pub fn init_from_plan(
        &mut self,
        plan: &[PoseSE2],
        max_vel_x: Float,
        max_vel_theta: Float,
        overwrite_orientation: bool,
        min_samples: usize,
        allow_backwards: bool,
    ) -> Result<(), TebError> {
        if self.is_init() {
            return Err(TebError::AlreadyInitialized);
        }
        let (&start, rest) = plan.split_first().ok_or(TebError::PlanTooShort)?;
        let &goal = rest.last().ok_or(TebError::PlanTooShort)?;

        self.add_pose(start);

        let backwards = allow_backwards
            && (goal.position() - start.position()).dot(&start.orientation_unit_vec()) < 0.0;

        for i in 1..plan.len() - 1 {
            let theta = if overwrite_orientation {
                let delta = plan[i + 1].position() - plan[i].position();
                let bearing = delta.y.atan2(delta.x);
                if backwards {
                    normalize_theta(bearing + std::f64::consts::PI)
                } else {
                    bearing
                }
            } else {
                plan[i].theta()
            };
            let sample = PoseSE2::from_position(plan[i].position(), theta);
            let dt = Self::estimate_delta_t(self.back_pose(), &sample, max_vel_x, max_vel_theta);
            self.add_pose_and_time_diff(sample, dt);
        }

        // The goal is appended afterwards, so stop one short of min_samples.
        while self.size_poses() < min_samples.saturating_sub(1) {
            let mid = self.back_pose().midpoint(&goal);
            let dt = Self::estimate_delta_t(self.back_pose(), &mid, max_vel_x, max_vel_theta);
            self.add_pose_and_time_diff(mid, dt);
        }

        let dt = Self::estimate_delta_t(self.back_pose(), &goal, max_vel_x, max_vel_theta);
        self.add_pose_and_time_diff(goal, dt);
        Ok(())
    }

    /// Initialize the band on the straight line from `start` to `goal`
    /// with `intermediate_samples` evenly spaced interior poses.
    ///
    /// # Errors
    ///
    /// Fails if the band is already initialized.
    pub fn init_from_start_goal(
        &mut self,
        start: PoseSE2,
        goal: PoseSE2,
        intermediate_samples: usize,
        max_vel_x: Float,
        min_samples: usize,
        allow_backwards: bool,
    ) -> Result<(), TebError> {
        if self.is_init() {
            return Err(TebError::AlreadyInitialized);
        }

        self.add_pose(start);

        let to_goal = goal.position() - start.position();
        let mut orientation = to_goal.y.atan2(to_goal.x);
        if allow_backwards && to_goal.dot(&start.orientation_unit_vec()) < 0.0 {
            orientation = normalize_theta(orientation + std::f64::consts::PI);
        }

        let steps = intermediate_samples + 1;
        let step_time = if max_vel_x > 0.0 {
            to_goal.norm() / (max_vel_x * steps as Float)
        } else {
            1.0
        };
        for i in 1..=intermediate_samples {
            let position = start.position() + (i as Float / steps as Float) * to_goal;
            self.add_pose_and_time_diff(PoseSE2::from_position(position, orientation), step_time);
        }

        while self.size_poses() < min_samples.saturating_sub(1) {
            let mid = self.back_pose().midpoint(&goal);
            let dt = Self::estimate_delta_t(self.back_pose(), &mid, max_vel_x, 0.0);
            self.add_pose_and_time_diff(mid, dt);
        }

        let dt = Self::estimate_delta_t(self.back_pose(), &goal, max_vel_x, 0.0);
        self.add_pose_and_time_diff(goal, dt);
        Ok(())
    }

    /// Warm-start update: re-anchor the band on a new start and goal and
    /// prune the poses the robot has already passed.
    ///
    /// The nearest pose to `new_start` among the first few band poses
    /// becomes the new head; everything before it is removed, always
    /// keeping at least `min_samples` poses. The first and last pose
    /// values are overwritten in place; the interior ordering is untouched.
    pub fn update_and_prune(
        &mut self,
        new_start: Option<&PoseSE2>,
        new_goal: Option<&PoseSE2>,
        min_samples: usize,
    ) {
        if let Some(new_start) = new_start {
            if self.is_init() {
                let mut dist_cache = (new_start.position() - self.pose(0).position()).norm();
                let lookahead = self.size_poses().saturating_sub(min_samples).min(10);

                let mut nearest_idx = 0;
                for i in 1..=lookahead {
                    let dist = (new_start.position() - self.pose(i).position()).norm();
                    if dist < dist_cache {
                        dist_cache = dist;
                        nearest_idx = i;
                    } else {
                        break;
                    }
                }

                if nearest_idx > 0 {
                    // Delete from pose 1 onwards and overwrite pose 0 below:
                    // the head stays fixed during optimization.
                    self.delete_poses_and_time_diffs(1, nearest_idx);
                }
                *self.pose_mut(0) = *new_start;
            }
        }

        if let Some(new_goal) = new_goal {
            if self.is_init() {
                *self.back_pose_mut() = *new_goal;
            }
        }
    }

    /// Resize the band so every time difference lies near `dt_ref` within
    /// `dt_hysteresis`: long intervals are split at the pose midpoint,
    /// short intervals are merged into their neighbor.
    ///
    /// `fast_mode` performs a single bottom-up pass; otherwise the rules
    /// are applied until a fixed point (bounded, to rule out oscillation),
    /// which gives the stable temporal spacing that planning against
    /// moving obstacles needs.
    pub fn auto_resize(
        &mut self,
        dt_ref: Float,
        dt_hysteresis: Float,
        min_samples: usize,
        max_samples: usize,
        fast_mode: bool,
    ) {
        let mut modified = true;

        let mut repetitions = 0;
        while modified && repetitions < 100 {
            repetitions += 1;
            modified = false;

            let mut i = 0;
            while i < self.size_timediffs() {
                if self.time_diff(i) > dt_ref + dt_hysteresis && self.size_timediffs() < max_samples
                {
                    let half = 0.5 * self.time_diff(i);
                    self.set_time_diff(i, half);
                    let mid = self.pose(i).midpoint(self.pose(i + 1));
                    self.insert_pose(i + 1, mid);
                    self.insert_time_diff(i + 1, half);
                    modified = true;
                } else if self.time_diff(i) < dt_ref - dt_hysteresis
                    && self.size_timediffs() > min_samples.max(1)
                {
                    modified = true;
                    if i < self.size_timediffs() - 1 {
                        let merged = self.time_diff(i + 1) + self.time_diff(i);
                        self.set_time_diff(i + 1, merged);
                        self.delete_time_diff(i);
                        self.delete_pose(i + 1);
                        // The merged interval shifted into slot i; look at it
                        // again before moving on.
                        continue;
                    }
                    let merged = self.time_diff(i - 1) + self.time_diff(i);
                    self.set_time_diff(i - 1, merged);
                    self.delete_time_diff(i);
                    self.delete_pose(i);
                }
                i += 1;
            }

            if fast_mode {
                break;
            }
        }
    }

    /// Index of the band pose closest to `point`, searching from
    /// `begin_idx`.
    #[must_use]
    pub fn find_closest_trajectory_pose(
        &self,
        point: &Vector2<Float>,
        begin_idx: usize,
    ) -> usize {
        let mut best_idx = begin_idx;
        let mut best_dist = Float::INFINITY;
        for (i, pose) in self.poses.iter().enumerate().skip(begin_idx) {
            let dist = (point - pose.position()).norm();
            if dist < best_dist {
                best_dist = dist;
                best_idx = i;
            }
        }
        best_idx
    }

    /// Index of the band pose closest to `obstacle` (boundary distance).
    #[must_use]
    pub fn find_closest_pose_to_obstacle(&self, obstacle: &Obstacle) -> usize {
        let mut best_idx = 0;
        let mut best_dist = Float::INFINITY;
        for (i, pose) in self.poses.iter().enumerate() {
            let dist = obstacle.distance_to(&pose.position());
            if dist < best_dist {
                best_dist = dist;
                best_idx = i;
            }
        }
        best_idx
    }
}
