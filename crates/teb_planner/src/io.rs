//! Inbound event normalization.
//!
//! Obstacle-position events and occupancy-grid snapshots arrive on an
//! input thread; `plan()` runs on the caller thread. The two meet in
//! [`InputSlots`]: the input thread only writes, the planner snapshots
//! both slots under one lock at entry, so a single planning cycle always
//! sees a consistent pair.

use std::sync::Mutex;

use nalgebra::Vector2;
use tracing::{info, warn};

use crate::{associator::DynamicObstacleReport, grid::OccupancyGrid, Float};

/// Number of floats per dynamic obstacle record.
const REPORT_STRIDE: usize = 8;

/// Decode a flat float array into obstacle reports. Each record is
/// `(cx, cy, vx, vy, ax, ay, w, h)`; a trailing partial record is
/// dropped with a warning.
#[must_use]
pub fn decode_obstacle_reports(data: &[f32]) -> Vec<DynamicObstacleReport> {
    if data.len() % REPORT_STRIDE != 0 {
        warn!(
            len = data.len(),
            "obstacle position array is not a multiple of {REPORT_STRIDE}; \
             ignoring the trailing partial record"
        );
    }
    data.chunks_exact(REPORT_STRIDE)
        .map(|record| DynamicObstacleReport {
            center: Vector2::new(Float::from(record[0]), Float::from(record[1])),
            velocity: Vector2::new(Float::from(record[2]), Float::from(record[3])),
            acceleration: Vector2::new(Float::from(record[4]), Float::from(record[5])),
            width: Float::from(record[6]),
            height: Float::from(record[7]),
        })
        .collect()
}

#[derive(Debug, Default)]
struct Slots {
    grid: Option<OccupancyGrid>,
    reports: Vec<DynamicObstacleReport>,
}

/// A consistent copy of both input slots, taken at `plan()` entry.
#[derive(Debug, Default)]
pub struct InputSnapshot {
    pub grid: Option<OccupancyGrid>,
    pub reports: Vec<DynamicObstacleReport>,
}

/// The two mutex-protected slots shared between the input thread and the
/// planner.
#[derive(Debug, Default)]
pub struct InputSlots {
    slots: Mutex<Slots>,
}

impl InputSlots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the occupancy-grid snapshot. Dimension changes are logged,
    /// matching a map update in the wild.
    pub fn publish_occupancy_grid(&self, grid: OccupancyGrid) {
        let mut slots = self.slots.lock().expect("input slots lock");
        let changed = slots.grid.as_ref().map_or(true, |old| {
            old.width() != grid.width() || old.height() != grid.height()
        });
        if changed {
            info!(
                width = grid.width(),
                height = grid.height(),
                resolution = grid.resolution(),
                origin_x = grid.origin().x,
                origin_y = grid.origin().y,
                "occupancy grid updated"
            );
        }
        slots.grid = Some(grid);
    }

    /// Replace the dynamic-obstacle reports from a raw position event.
    pub fn publish_obstacle_positions(&self, data: &[f32]) {
        let reports = decode_obstacle_reports(data);
        self.slots.lock().expect("input slots lock").reports = reports;
    }

    /// Copy both slots under the lock.
    #[must_use]
    pub fn snapshot(&self) -> InputSnapshot {
        let slots = self.slots.lock().expect("input slots lock");
        InputSnapshot {
            grid: slots.grid.clone(),
            reports: slots.reports.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decode_reads_eight_float_records() {
        let data = [
            1.0_f32, 2.0, 0.5, -0.5, 0.1, 0.2, 0.4, 0.6, //
            -1.0, -2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0,
        ];
        let reports = decode_obstacle_reports(&data);
        assert_eq!(reports.len(), 2);
        assert_abs_diff_eq!(reports[0].center.x, 1.0);
        assert_abs_diff_eq!(reports[0].velocity.y, -0.5);
        assert_abs_diff_eq!(reports[0].width, 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(reports[1].center.y, -2.0);
    }

    #[test]
    fn decode_drops_trailing_partial_records() {
        let data = [1.0_f32, 2.0, 0.0, 0.0, 0.0, 0.0, 0.4, 0.6, 9.0, 9.0];
        let reports = decode_obstacle_reports(&data);
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn snapshot_copies_both_slots() {
        let slots = InputSlots::new();
        slots.publish_obstacle_positions(&[1.0, 2.0, 0.5, 0.0, 0.0, 0.0, 0.2, 0.2]);
        slots.publish_occupancy_grid(OccupancyGrid::new(
            2,
            2,
            0.05,
            Vector2::new(0.0, 0.0),
            vec![0, 0, 100, 0],
        ));

        let snapshot = slots.snapshot();
        assert_eq!(snapshot.reports.len(), 1);
        assert!(snapshot.grid.is_some());

        // The snapshot is a copy: later writes do not affect it.
        slots.publish_obstacle_positions(&[]);
        assert_eq!(snapshot.reports.len(), 1);
        assert_eq!(slots.snapshot().reports.len(), 0);
    }
}
