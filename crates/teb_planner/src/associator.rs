//! Per-vertex obstacle association.
//!
//! Rebuilt from scratch on every outer iteration: for each band pose the
//! associator decides which obstacles become active constraints. Static
//! obstacles are filtered through the occupancy-grid probe; tracked
//! moving obstacles are advanced along the trajectory timeline with a
//! Kalman predictor and their predicted bounding boxes are tiled into
//! point obstacles.

use nalgebra::{SMatrix, SVector, Vector2};
use teb_config::TebConfig;

use crate::{
    grid::OccupancyGrid,
    obstacle::{Obstacle, ObstacleContainer, ObstaclePtr},
    teb::TimedElasticBand,
    Float,
};

/// Process noise of the constant-acceleration tracker (σ_P).
pub const KALMAN_PROCESS_NOISE: Float = 0.01;
/// Measurement noise of the tracker (σ_Q); seeds the posterior
/// covariance, since reports arrive fresh every cycle and no correction
/// step runs.
pub const KALMAN_MEASUREMENT_NOISE: Float = 0.1;
/// Edge length of the bounding-box tiling. SI unit: m
pub const BOUNDING_BOX_TILE_STEP: Float = 0.1;
/// Reported speeds above this on either axis mark the scene as dynamic.
pub const DYNAMIC_VELOCITY_THRESHOLD: Float = 0.1;

/// One tracked moving obstacle as delivered by the input stream:
/// `(cx, cy, vx, vy, ax, ay, w, h)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicObstacleReport {
    pub center: Vector2<Float>,
    pub velocity: Vector2<Float>,
    pub acceleration: Vector2<Float>,
    pub width: Float,
    pub height: Float,
}

/// Six-state (x, y, vx, vy, ax, ay) constant-acceleration Kalman
/// predictor. Stateless across planning cycles: a fresh filter is seeded
/// from each report because obstacle ids are not guaranteed stable.
#[derive(Debug, Clone)]
pub struct ConstantAccelerationKalman {
    state: SVector<Float, 6>,
    covariance: SMatrix<Float, 6, 6>,
    process_noise: SMatrix<Float, 6, 6>,
}

impl ConstantAccelerationKalman {
    #[must_use]
    pub fn from_report(report: &DynamicObstacleReport) -> Self {
        Self {
            state: SVector::<Float, 6>::from_column_slice(&[
                report.center.x,
                report.center.y,
                report.velocity.x,
                report.velocity.y,
                report.acceleration.x,
                report.acceleration.y,
            ]),
            covariance: SMatrix::identity() * KALMAN_MEASUREMENT_NOISE,
            process_noise: SMatrix::identity() * KALMAN_PROCESS_NOISE,
        }
    }

    /// Advance the state by `dt` seconds.
    pub fn predict(&mut self, dt: Float) {
        let transition = Self::transition(dt);
        self.state = transition * self.state;
        self.covariance = transition * self.covariance * transition.transpose()
            + self.process_noise;
    }

    #[rustfmt::skip]
    fn transition(dt: Float) -> SMatrix<Float, 6, 6> {
        let half_dt2 = 0.5 * dt * dt;
        SMatrix::<Float, 6, 6>::from_row_slice(&[
            1.0, 0.0,  dt, 0.0, half_dt2, 0.0,
            0.0, 1.0, 0.0,  dt, 0.0,      half_dt2,
            0.0, 0.0, 1.0, 0.0,  dt,      0.0,
            0.0, 0.0, 0.0, 1.0, 0.0,       dt,
            0.0, 0.0, 0.0, 0.0, 1.0,      0.0,
            0.0, 0.0, 0.0, 0.0, 0.0,      1.0,
        ])
    }

    #[must_use]
    pub fn position(&self) -> Vector2<Float> {
        Vector2::new(self.state[0], self.state[1])
    }
}

/// Result of one association pass.
#[derive(Debug, Default)]
pub struct AssociationOutcome {
    /// `obstacles_per_vertex[i]` holds the obstacles constraining pose
    /// `i`. The last pose never carries constraints.
    pub obstacles_per_vertex: Vec<Vec<ObstaclePtr>>,
    /// Set when any report moves faster than the dynamic threshold; the
    /// warm-start logic consumes this on the next cycle.
    pub dynamic_obstacle_in_scene: bool,
}

/// Builds the per-vertex obstacle lists for one outer iteration.
#[derive(Debug)]
pub struct ObstacleAssociator<'a> {
    config: &'a TebConfig,
    grid: Option<&'a OccupancyGrid>,
    reports: &'a [DynamicObstacleReport],
}

impl<'a> ObstacleAssociator<'a> {
    #[must_use]
    pub fn new(
        config: &'a TebConfig,
        grid: Option<&'a OccupancyGrid>,
        reports: &'a [DynamicObstacleReport],
    ) -> Self {
        Self {
            config,
            grid,
            reports,
        }
    }

    /// Per-vertex association (the non-legacy mode).
    #[must_use]
    pub fn associate(
        &self,
        teb: &TimedElasticBand,
        obstacles: &ObstacleContainer,
    ) -> AssociationOutcome {
        let mut outcome = AssociationOutcome {
            obstacles_per_vertex: vec![Vec::new(); teb.size_poses()],
            dynamic_obstacle_in_scene: false,
        };

        let force_inclusion_radius = self.config.obstacles.min_obstacle_dist.get()
            * self
                .config
                .obstacles
                .obstacle_association_force_inclusion_factor;

        for i in 0..teb.size_poses().saturating_sub(1) {
            let pose_position = teb.pose(i).position();

            for obstacle in obstacles {
                if obstacle.is_dynamic() {
                    // Moving container obstacles are constrained by the
                    // dynamic-obstacle edges instead.
                    continue;
                }
                let centroid = obstacle.centroid();
                if !self.centroid_is_static(&centroid) {
                    continue;
                }
                if (pose_position - centroid).norm() < force_inclusion_radius {
                    outcome.obstacles_per_vertex[i].push(ObstaclePtr::new(Obstacle::Point {
                        position: centroid,
                    }));
                }
            }

            for report in self.reports {
                // Advance the tracker along the trajectory timeline: the
                // predicted position matches the accumulated time at pose i.
                let mut filter = ConstantAccelerationKalman::from_report(report);
                for j in 0..i.min(teb.size_timediffs()) {
                    filter.predict(teb.time_diff(j));
                }

                let predicted = filter.position();
                let tiles_added = self.tile_bounding_box(
                    &predicted,
                    report,
                    &pose_position,
                    force_inclusion_radius,
                    &mut outcome.obstacles_per_vertex[i],
                );
                if tiles_added
                    && (report.velocity.x.abs() > DYNAMIC_VELOCITY_THRESHOLD
                        || report.velocity.y.abs() > DYNAMIC_VELOCITY_THRESHOLD)
                {
                    outcome.dynamic_obstacle_in_scene = true;
                }
            }
        }

        outcome
    }

    /// Legacy association: each obstacle attaches at its closest band
    /// pose and up to `⌊obstacle_poses_affected / 2⌋` neighbors on each
    /// side. Obstacles projecting onto the fixed endpoints are skipped.
    #[must_use]
    pub fn associate_legacy(
        &self,
        teb: &TimedElasticBand,
        obstacles: &ObstacleContainer,
    ) -> AssociationOutcome {
        let mut outcome = AssociationOutcome {
            obstacles_per_vertex: vec![Vec::new(); teb.size_poses()],
            dynamic_obstacle_in_scene: false,
        };

        let n = teb.size_poses();
        for obstacle in obstacles {
            if self.config.obstacles.include_dynamic_obstacles && obstacle.is_dynamic() {
                continue;
            }

            let index = if self.config.obstacles.obstacle_poses_affected >= n {
                n / 2
            } else {
                teb.find_closest_pose_to_obstacle(obstacle)
            };

            // The fixed endpoints absorb every out-of-range projection.
            if index <= 1 || index > n.saturating_sub(2) {
                continue;
            }

            outcome.obstacles_per_vertex[index].push(ObstaclePtr::clone(obstacle));
            for neighbour in 1..self.config.obstacles.obstacle_poses_affected / 2 {
                if index + neighbour < n {
                    outcome.obstacles_per_vertex[index + neighbour]
                        .push(ObstaclePtr::clone(obstacle));
                }
                if index >= neighbour {
                    outcome.obstacles_per_vertex[index - neighbour]
                        .push(ObstaclePtr::clone(obstacle));
                }
            }
        }

        outcome
    }

    /// Without a grid snapshot every centroid counts as static; with one,
    /// only centroids near occupied cells do.
    fn centroid_is_static(&self, centroid: &Vector2<Float>) -> bool {
        match self.grid {
            None => true,
            Some(grid) => grid
                .index_of(centroid)
                .is_some_and(|index| grid.is_static(index)),
        }
    }

    /// Tile the predicted bounding box on the fixed grid and keep every
    /// tile within the force-inclusion radius of the pose.
    fn tile_bounding_box(
        &self,
        predicted: &Vector2<Float>,
        report: &DynamicObstacleReport,
        pose_position: &Vector2<Float>,
        force_inclusion_radius: Float,
        into: &mut Vec<ObstaclePtr>,
    ) -> bool {
        let mut added = false;
        let mut x = predicted.x - 0.5 * report.width;
        while (x - predicted.x).abs() <= 0.5 * report.width {
            let mut y = predicted.y - 0.5 * report.height;
            while (y - predicted.y).abs() <= 0.5 * report.height {
                let tile = Vector2::new(x, y);
                if (pose_position - tile).norm() < force_inclusion_radius {
                    into.push(ObstaclePtr::new(Obstacle::Point { position: tile }));
                    added = true;
                }
                y += BOUNDING_BOX_TILE_STEP;
            }
            x += BOUNDING_BOX_TILE_STEP;
        }
        added
    }
}
