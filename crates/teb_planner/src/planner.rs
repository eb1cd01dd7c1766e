//! The planner orchestrator: warm-start decision, the outer
//! resize / build / optimize / teardown loop, and trajectory extraction.

use std::sync::Arc;

use angle::{normalize_theta, shortest_angular_distance};
use itertools::Itertools;
use nalgebra::{DMatrix, Vector2};
use teb_config::{TebConfig, UpdateMode};
use tracing::{debug, error, warn};

use crate::{
    associator::ObstacleAssociator,
    footprint::{CollisionModel, FootprintModel},
    graph::{
        edges::{
            AccelerationEdge, AccelerationGoalEdge, AccelerationLimits, AccelerationStartEdge,
            DynamicObstacleEdge, Edge, EdgeKind, InflatedObstacleEdge, KinematicsCarlikeEdge,
            KinematicsDiffDriveEdge, ObstacleEdge, PreferRotDirEdge, ShortestPathEdge,
            TimeOptimalEdge, VelocityEdge, VelocityHolonomicEdge, VelocityObstacleRatioEdge,
            ViaPointEdge,
        },
        edge_type_info, EdgeType, VertexKey,
    },
    io::{InputSlots, InputSnapshot},
    obstacle::{ObstacleContainer, ObstaclePtr},
    optimizer::TebOptimizer,
    pose::{PoseSE2, Twist},
    teb::{TebError, TimedElasticBand},
    visualization::{FeedbackMessage, TebVisualization, TrajectoryPoint},
    Float,
};

/// Span below which the dynamic-aware update mode keeps warm-starting
/// even with a moving obstacle in the scene. SI unit: m
const DYNAMIC_REINIT_MIN_SPAN: Float = 1.0;
/// The preferred-rotation edges are applied to the first rotations only.
const PREFER_ROTDIR_POSES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("optimization is deactivated in the configuration")]
    OptimizationDeactivated,
    #[error("robot max_vel_x {0} is too small to optimize")]
    DegenerateConfiguration(Float),
    #[error("trajectory has {size} poses, fewer than the required {min_samples}")]
    TrajectoryTooSmall { size: usize, min_samples: usize },
    #[error("optimization graph is not empty; missing clear_graph before rebuild")]
    GraphNotEmpty,
    #[error("the optimizer performed no iterations")]
    NoIterations,
    #[error("accumulated time difference is not positive")]
    NonpositiveTimeDiff,
    #[error(transparent)]
    Band(#[from] TebError),
}

/// Preferred turning direction for oscillation recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotType {
    #[default]
    None,
    Left,
    Right,
}

/// Scaling applied when the final cost of a cycle is computed.
#[derive(Debug, Clone, Copy)]
pub struct CostScales {
    pub obstacle: Float,
    pub viapoint: Float,
    /// Replace the time-optimal edge costs by the plain sum of time
    /// differences, which is invariant to the sample count.
    pub alternative_time: bool,
}

impl Default for CostScales {
    fn default() -> Self {
        Self {
            obstacle: 1.0,
            viapoint: 1.0,
            alternative_time: false,
        }
    }
}

/// The TEB local trajectory optimizer.
pub struct TebOptimalPlanner {
    config: TebConfig,
    teb: TimedElasticBand,
    optimizer: TebOptimizer,
    footprint: Arc<dyn FootprintModel>,
    obstacles: ObstacleContainer,
    via_points: Vec<Vector2<Float>>,
    /// (active, value); the start velocity feeds the start acceleration
    /// edge when active.
    vel_start: (bool, Twist),
    vel_goal: (bool, Twist),
    prefer_rotdir: RotType,
    obstacles_per_vertex: Vec<Vec<ObstaclePtr>>,
    dynamic_obstacle_in_scene: bool,
    cost: Float,
    inputs: Arc<InputSlots>,
    snapshot: InputSnapshot,
    visualization: Option<Arc<dyn TebVisualization>>,
}

impl std::fmt::Debug for TebOptimalPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TebOptimalPlanner")
            .field("poses", &self.teb.size_poses())
            .field("obstacles", &self.obstacles.len())
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

impl TebOptimalPlanner {
    #[must_use]
    pub fn new(config: TebConfig, footprint: Arc<dyn FootprintModel>) -> Self {
        Self {
            config,
            teb: TimedElasticBand::new(),
            optimizer: TebOptimizer::new(),
            footprint,
            obstacles: ObstacleContainer::new(),
            via_points: Vec::new(),
            vel_start: (true, Twist::zero()),
            vel_goal: (true, Twist::zero()),
            prefer_rotdir: RotType::None,
            obstacles_per_vertex: Vec::new(),
            dynamic_obstacle_in_scene: false,
            cost: Float::INFINITY,
            inputs: Arc::new(InputSlots::new()),
            snapshot: InputSnapshot::default(),
            visualization: None,
        }
    }

    #[must_use]
    pub fn with_visualization(mut self, visualization: Arc<dyn TebVisualization>) -> Self {
        self.visualization = Some(visualization);
        self
    }

    #[must_use]
    pub fn teb(&self) -> &TimedElasticBand {
        &self.teb
    }

    pub fn teb_mut(&mut self) -> &mut TimedElasticBand {
        &mut self.teb
    }

    #[must_use]
    pub fn optimizer(&self) -> &TebOptimizer {
        &self.optimizer
    }

    #[must_use]
    pub fn config(&self) -> &TebConfig {
        &self.config
    }

    /// The warm-start policy is runtime tunable.
    pub fn set_update_mode(&mut self, mode: UpdateMode) {
        self.config.update_mode = mode;
    }

    /// Shared handle for the input thread.
    #[must_use]
    pub fn input_slots(&self) -> Arc<InputSlots> {
        Arc::clone(&self.inputs)
    }

    pub fn set_obstacles(&mut self, obstacles: ObstacleContainer) {
        self.obstacles = obstacles;
    }

    #[must_use]
    pub fn obstacles(&self) -> &ObstacleContainer {
        &self.obstacles
    }

    pub fn set_via_points(&mut self, via_points: Vec<Vector2<Float>>) {
        self.via_points = via_points;
    }

    pub fn set_velocity_start(&mut self, velocity: Twist) {
        self.vel_start = (true, velocity);
    }

    pub fn set_velocity_goal(&mut self, velocity: Twist) {
        self.vel_goal = (true, velocity);
    }

    /// Let the optimizer choose the velocity at the goal.
    pub fn set_velocity_goal_free(&mut self) {
        self.vel_goal.0 = false;
    }

    pub fn set_preferred_rotation_direction(&mut self, direction: RotType) {
        self.prefer_rotdir = direction;
    }

    /// Final cost of the last cycle that computed one.
    #[must_use]
    pub fn cost(&self) -> Float {
        self.cost
    }

    /// Whether the previous cycle saw a moving obstacle near the band.
    #[must_use]
    pub fn dynamic_obstacle_in_scene(&self) -> bool {
        self.dynamic_obstacle_in_scene
    }

    /// Plan along a coarse global plan.
    ///
    /// # Errors
    ///
    /// All failures leave the band in its pre-call state so the next
    /// cycle can retry; see [`PlanError`].
    pub fn plan(
        &mut self,
        initial_plan: &[PoseSE2],
        start_vel: Option<&Twist>,
        free_goal_vel: bool,
    ) -> Result<(), PlanError> {
        self.snapshot = self.inputs.snapshot();

        if self.teb.is_init() {
            let start = *initial_plan.first().ok_or(TebError::PlanTooShort)?;
            let goal = *initial_plan.last().ok_or(TebError::PlanTooShort)?;
            if self.should_reinit(&goal) {
                debug!("new goal outside the warm-start thresholds, reinitializing");
                self.teb.clear();
                self.init_band_from_plan(initial_plan)?;
            } else {
                self.teb.update_and_prune(
                    Some(&start),
                    Some(&goal),
                    self.config.trajectory.min_samples,
                );
            }
        } else {
            self.init_band_from_plan(initial_plan)?;
        }

        if let Some(velocity) = start_vel {
            self.set_velocity_start(*velocity);
        }
        if free_goal_vel {
            self.set_velocity_goal_free();
        } else {
            // Reactivate the previously set goal velocity (zero unless the
            // caller changed it).
            self.vel_goal.0 = true;
        }

        self.optimize_teb(
            self.config.optim.no_inner_iterations,
            self.config.optim.no_outer_iterations,
            None,
        )
    }

    /// Plan between an explicit start and goal pose.
    ///
    /// # Errors
    ///
    /// See [`PlanError`].
    pub fn plan_between(
        &mut self,
        start: &PoseSE2,
        goal: &PoseSE2,
        start_vel: Option<&Twist>,
        free_goal_vel: bool,
    ) -> Result<(), PlanError> {
        self.snapshot = self.inputs.snapshot();

        if self.teb.is_init() {
            if self.should_reinit(goal) {
                debug!("new goal outside the warm-start thresholds, reinitializing");
                self.teb.clear();
                self.init_band_between(start, goal)?;
            } else {
                self.teb
                    .update_and_prune(Some(start), Some(goal), self.config.trajectory.min_samples);
            }
        } else {
            self.init_band_between(start, goal)?;
        }

        if let Some(velocity) = start_vel {
            self.set_velocity_start(*velocity);
        }
        if free_goal_vel {
            self.set_velocity_goal_free();
        } else {
            self.vel_goal.0 = true;
        }

        self.optimize_teb(
            self.config.optim.no_inner_iterations,
            self.config.optim.no_outer_iterations,
            None,
        )
    }

    fn init_band_from_plan(&mut self, initial_plan: &[PoseSE2]) -> Result<(), TebError> {
        self.teb.init_from_plan(
            initial_plan,
            self.config.robot.max_vel_x,
            self.config.robot.max_vel_theta,
            self.config.trajectory.global_plan_overwrite_orientation,
            self.config.trajectory.min_samples,
            self.config.trajectory.allow_init_with_backwards_motion,
        )
    }

    fn init_band_between(&mut self, start: &PoseSE2, goal: &PoseSE2) -> Result<(), TebError> {
        // No intermediate samples: auto-resize fills the band before the
        // first optimization.
        self.teb.init_from_start_goal(
            *start,
            *goal,
            0,
            self.config.robot.max_vel_x,
            self.config.trajectory.min_samples,
            self.config.trajectory.allow_init_with_backwards_motion,
        )
    }

    /// Warm-start decision for an initialized band.
    fn should_reinit(&self, new_goal: &PoseSE2) -> bool {
        match self.config.update_mode {
            UpdateMode::DynamicAware => {
                // Trade warm-start continuity for a fresh response to
                // moving obstacles once the band spans enough distance.
                self.dynamic_obstacle_in_scene
                    && (self.teb.pose(0).position() - self.teb.back_pose().position()).norm()
                        > DYNAMIC_REINIT_MIN_SPAN
            }
            UpdateMode::Classic => {
                let goal_shift =
                    (new_goal.position() - self.teb.back_pose().position()).norm();
                let goal_rotation =
                    shortest_angular_distance(self.teb.back_pose().theta(), new_goal.theta())
                        .abs();
                goal_shift >= self.config.trajectory.force_reinit_new_goal_dist
                    || goal_rotation >= self.config.trajectory.force_reinit_new_goal_angular
            }
        }
    }

    /// The outer loop: resize, build, optimize, tear down; obstacle
    /// weights escalate across outer iterations.
    ///
    /// # Errors
    ///
    /// See [`PlanError`]; the graph is always cleared before returning.
    pub fn optimize_teb(
        &mut self,
        iterations_innerloop: usize,
        iterations_outerloop: usize,
        compute_cost: Option<CostScales>,
    ) -> Result<(), PlanError> {
        if !self.config.optim.optimization_activate {
            return Err(PlanError::OptimizationDeactivated);
        }

        // The fixed-point resize produces the stable temporal spacing that
        // x-y-t planning against moving obstacles needs; without them the
        // single-pass mode is cheaper.
        let fast_mode = !self.config.obstacles.include_dynamic_obstacles;

        let mut weight_multiplier = 1.0;
        for outer_iteration in 0..iterations_outerloop {
            if self.config.trajectory.teb_autosize {
                self.teb.auto_resize(
                    self.config.trajectory.dt_ref.get(),
                    self.config.trajectory.dt_hysteresis,
                    self.config.trajectory.min_samples,
                    self.config.trajectory.max_samples,
                    fast_mode,
                );
            }

            if let Err(error) = self.build_graph(weight_multiplier) {
                self.clear_graph();
                return Err(error);
            }
            if let Err(error) = self.optimize_graph(iterations_innerloop) {
                self.clear_graph();
                return Err(error);
            }

            if outer_iteration == iterations_outerloop - 1 {
                if let Some(scales) = compute_cost {
                    self.compute_current_cost(scales);
                }
            }

            self.clear_graph();
            weight_multiplier *= self.config.optim.weight_adapt_factor;
        }

        Ok(())
    }

    /// Build vertices and every active edge set.
    ///
    /// # Errors
    ///
    /// Fails when the previous graph was not torn down.
    pub fn build_graph(&mut self, weight_multiplier: Float) -> Result<(), PlanError> {
        if !self.optimizer.is_empty() {
            warn!("cannot build the graph: it is not empty, call clear_graph first");
            return Err(PlanError::GraphNotEmpty);
        }

        self.optimizer
            .set_compute_batch_statistics(self.config.recovery.divergence_detection_enable);
        self.optimizer
            .set_verbose(self.config.optim.optimization_verbose);

        self.add_teb_vertices();

        // Per-vertex obstacle association happens on every rebuild; the
        // lists are never persisted across outer iterations.
        let associator = ObstacleAssociator::new(
            &self.config,
            self.snapshot.grid.as_ref(),
            &self.snapshot.reports,
        );
        let outcome = if self.config.obstacles.legacy_obstacle_association {
            associator.associate_legacy(&self.teb, &self.obstacles)
        } else {
            associator.associate(&self.teb, &self.obstacles)
        };
        self.dynamic_obstacle_in_scene = outcome.dynamic_obstacle_in_scene;
        self.obstacles_per_vertex = outcome.obstacles_per_vertex;

        if let Some(visualization) = &self.visualization {
            visualization.publish_obstacle_markers(&self.obstacles_per_vertex);
            visualization.publish_time_diffs(&self.teb.timediffs());
        }

        self.add_edges_obstacles(weight_multiplier);
        if self.config.obstacles.include_dynamic_obstacles {
            self.add_edges_dynamic_obstacles();
        }
        self.add_edges_via_points();
        self.add_edges_velocity();
        self.add_edges_acceleration();
        self.add_edges_time_optimal();
        self.add_edges_shortest_path();
        if self.config.robot.min_turning_radius == 0.0
            || self.config.optim.weight_kinematics_turning_radius == 0.0
        {
            self.add_edges_kinematics_diff_drive();
        } else {
            self.add_edges_kinematics_carlike();
        }
        self.add_edges_prefer_rotdir();
        if self.config.optim.weight_velocity_obstacle_ratio > 0.0 {
            self.add_edges_velocity_obstacle_ratio();
        }

        Ok(())
    }

    /// Run the inner Levenberg-Marquardt iterations.
    ///
    /// # Errors
    ///
    /// Fails on a degenerate configuration, a too-small band, or an
    /// optimizer that performed no iterations.
    pub fn optimize_graph(&mut self, iterations: usize) -> Result<(), PlanError> {
        if self.config.robot.max_vel_x < 0.01 {
            warn!(
                max_vel_x = self.config.robot.max_vel_x,
                "optimize_graph(): max velocity below 0.01 m/s, aborting"
            );
            return Err(PlanError::DegenerateConfiguration(
                self.config.robot.max_vel_x,
            ));
        }
        if !self.teb.is_init() || self.teb.size_poses() < self.config.trajectory.min_samples {
            warn!(
                size = self.teb.size_poses(),
                "optimize_graph(): band empty or too small, skipping optimization"
            );
            return Err(PlanError::TrajectoryTooSmall {
                size: self.teb.size_poses(),
                min_samples: self.config.trajectory.min_samples,
            });
        }

        self.optimizer.initialize();
        let iterations_performed = self.optimizer.optimize(&mut self.teb, iterations);
        if iterations_performed == 0 {
            error!("optimize_graph(): optimization failed, no iterations performed");
            return Err(PlanError::NoIterations);
        }
        Ok(())
    }

    /// Tear down the transient graph; band values survive.
    pub fn clear_graph(&mut self) {
        self.optimizer.clear();
    }

    /// Whether the last inner iteration ended above the configured χ²
    /// threshold. Callers discard the trajectory and trigger recovery.
    #[must_use]
    pub fn has_diverged(&self) -> bool {
        self.config.recovery.divergence_detection_enable
            && self
                .optimizer
                .has_diverged(self.config.recovery.divergence_detection_max_chi_squared)
    }

    fn add_teb_vertices(&mut self) {
        for i in 0..self.teb.size_poses() {
            let fixed = i == 0 || i == self.teb.size_poses() - 1;
            self.optimizer.add_vertex(VertexKey::Pose(i), fixed);
            if i < self.teb.size_timediffs() {
                self.optimizer.add_vertex(VertexKey::TimeDiff(i), false);
            }
        }
    }

    fn add_edges_obstacles(&mut self, weight_multiplier: Float) {
        if self.config.optim.weight_obstacle == 0.0 || weight_multiplier == 0.0 {
            return;
        }

        let min_obstacle_dist = self.config.obstacles.min_obstacle_dist.get();
        let inflated = self.config.obstacles.inflation_dist > min_obstacle_dist;
        let weight = self.config.optim.weight_obstacle * weight_multiplier;

        // The first pose only carries obstacle edges when the ratio edges
        // need its association.
        let first_vertex = usize::from(self.config.optim.weight_velocity_obstacle_ratio == 0.0);

        for (index, obstacles) in self.obstacles_per_vertex.iter().enumerate() {
            if index < first_vertex {
                continue;
            }
            for obstacle in obstacles {
                let edge = if inflated {
                    Edge::new(
                        vec![VertexKey::Pose(index)],
                        DMatrix::from_diagonal(
                            &nalgebra::DVector::from_vec(vec![
                                weight,
                                self.config.optim.weight_inflation,
                            ]),
                        ),
                        EdgeKind::InflatedObstacle(InflatedObstacleEdge {
                            obstacle: ObstaclePtr::clone(obstacle),
                            footprint: Arc::clone(&self.footprint),
                            min_obstacle_dist,
                            inflation_dist: self.config.obstacles.inflation_dist,
                            penalty_epsilon: self.config.optim.penalty_epsilon,
                        }),
                    )
                } else {
                    Edge::new(
                        vec![VertexKey::Pose(index)],
                        DMatrix::identity(1, 1) * weight,
                        EdgeKind::Obstacle(ObstacleEdge {
                            obstacle: ObstaclePtr::clone(obstacle),
                            footprint: Arc::clone(&self.footprint),
                            min_obstacle_dist,
                            penalty_epsilon: self.config.optim.penalty_epsilon,
                        }),
                    )
                };
                self.optimizer.add_edge(edge);
            }
        }
    }

    fn add_edges_dynamic_obstacles(&mut self) {
        if self.config.optim.weight_dynamic_obstacle == 0.0 {
            return;
        }

        let information = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
            self.config.optim.weight_dynamic_obstacle,
            self.config.optim.weight_dynamic_obstacle_inflation,
        ]));

        let n = self.teb.size_poses();
        for obstacle in &self.obstacles {
            if !obstacle.is_dynamic() {
                continue;
            }
            // The first and last pose are fixed; constrain everything in
            // between at its accumulated trajectory time.
            let mut time = self.teb.time_diff(0);
            for i in 1..n.saturating_sub(1) {
                self.optimizer.add_edge(Edge::new(
                    vec![VertexKey::Pose(i)],
                    information.clone(),
                    EdgeKind::DynamicObstacle(DynamicObstacleEdge {
                        obstacle: ObstaclePtr::clone(obstacle),
                        footprint: Arc::clone(&self.footprint),
                        time,
                        min_obstacle_dist: self.config.obstacles.min_obstacle_dist.get(),
                        inflation_dist: self.config.obstacles.dynamic_obstacle_inflation_dist,
                        penalty_epsilon: self.config.optim.penalty_epsilon,
                    }),
                ));
                time += self.teb.time_diff(i);
            }
        }
    }

    fn add_edges_via_points(&mut self) {
        if self.config.optim.weight_viapoint == 0.0 || self.via_points.is_empty() {
            return;
        }

        let n = self.teb.size_poses();
        if n < 3 {
            // No degrees of freedom for reaching via-points.
            return;
        }

        let mut start_pose_idx = 0;
        for via_point in &self.via_points {
            let mut index = self.teb.find_closest_trajectory_pose(via_point, start_pose_idx);
            if self.config.trajectory.via_points_ordered {
                // Leave a degree of freedom between consecutive via-points.
                start_pose_idx = index + 2;
            }

            if index > n - 2 {
                index = n - 2;
            }
            if index < 1 {
                if self.config.trajectory.via_points_ordered {
                    index = 1;
                } else {
                    debug!("skipping a via-point behind the current robot pose");
                    continue;
                }
            }

            self.optimizer.add_edge(Edge::new(
                vec![VertexKey::Pose(index)],
                DMatrix::identity(1, 1) * self.config.optim.weight_viapoint,
                EdgeKind::ViaPoint(ViaPointEdge {
                    via_point: *via_point,
                }),
            ));
        }
    }

    fn add_edges_velocity(&mut self) {
        let optim = &self.config.optim;
        let robot = &self.config.robot;
        let n = self.teb.size_poses();

        if robot.max_vel_y == 0.0 {
            // Non-holonomic robot.
            if optim.weight_max_vel_x == 0.0 && optim.weight_max_vel_theta == 0.0 {
                return;
            }
            let information = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
                optim.weight_max_vel_x,
                optim.weight_max_vel_theta,
            ]));
            for i in 0..n - 1 {
                self.optimizer.add_edge(Edge::new(
                    vec![
                        VertexKey::Pose(i),
                        VertexKey::Pose(i + 1),
                        VertexKey::TimeDiff(i),
                    ],
                    information.clone(),
                    EdgeKind::Velocity(VelocityEdge {
                        max_vel_x: robot.max_vel_x,
                        max_vel_theta: robot.max_vel_theta,
                        penalty_epsilon: optim.penalty_epsilon,
                    }),
                ));
            }
        } else {
            if optim.weight_max_vel_x == 0.0
                && optim.weight_max_vel_y == 0.0
                && optim.weight_max_vel_theta == 0.0
            {
                return;
            }
            let information = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
                optim.weight_max_vel_x,
                optim.weight_max_vel_y,
                optim.weight_max_vel_theta,
            ]));
            for i in 0..n - 1 {
                self.optimizer.add_edge(Edge::new(
                    vec![
                        VertexKey::Pose(i),
                        VertexKey::Pose(i + 1),
                        VertexKey::TimeDiff(i),
                    ],
                    information.clone(),
                    EdgeKind::VelocityHolonomic(VelocityHolonomicEdge {
                        max_vel_x: robot.max_vel_x,
                        max_vel_y: robot.max_vel_y,
                        max_vel_theta: robot.max_vel_theta,
                        penalty_epsilon: optim.penalty_epsilon,
                    }),
                ));
            }
        }
    }

    fn add_edges_acceleration(&mut self) {
        let optim = &self.config.optim;
        let robot = &self.config.robot;
        if optim.weight_acc_lim_x == 0.0 && optim.weight_acc_lim_theta == 0.0 {
            return;
        }

        let holonomic = robot.max_vel_y > 0.0 && robot.acc_lim_y > 0.0;
        let limits = AccelerationLimits {
            acc_lim_x: robot.acc_lim_x,
            acc_lim_y: robot.acc_lim_y,
            acc_lim_theta: robot.acc_lim_theta,
            penalty_epsilon: optim.penalty_epsilon,
            holonomic,
        };
        let information = if holonomic {
            DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
                optim.weight_acc_lim_x,
                optim.weight_acc_lim_y,
                optim.weight_acc_lim_theta,
            ]))
        } else {
            DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
                optim.weight_acc_lim_x,
                optim.weight_acc_lim_theta,
            ]))
        };

        let n = self.teb.size_poses();

        if self.vel_start.0 {
            self.optimizer.add_edge(Edge::new(
                vec![
                    VertexKey::Pose(0),
                    VertexKey::Pose(1),
                    VertexKey::TimeDiff(0),
                ],
                information.clone(),
                EdgeKind::AccelerationStart(AccelerationStartEdge {
                    limits: limits.clone(),
                    start_velocity: self.vel_start.1,
                }),
            ));
        }

        for i in 0..n.saturating_sub(2) {
            self.optimizer.add_edge(Edge::new(
                vec![
                    VertexKey::Pose(i),
                    VertexKey::Pose(i + 1),
                    VertexKey::Pose(i + 2),
                    VertexKey::TimeDiff(i),
                    VertexKey::TimeDiff(i + 1),
                ],
                information.clone(),
                EdgeKind::Acceleration(AccelerationEdge {
                    limits: limits.clone(),
                }),
            ));
        }

        if self.vel_goal.0 {
            self.optimizer.add_edge(Edge::new(
                vec![
                    VertexKey::Pose(n - 2),
                    VertexKey::Pose(n - 1),
                    VertexKey::TimeDiff(self.teb.size_timediffs() - 1),
                ],
                information,
                EdgeKind::AccelerationGoal(AccelerationGoalEdge {
                    limits,
                    goal_velocity: self.vel_goal.1,
                }),
            ));
        }
    }

    fn add_edges_time_optimal(&mut self) {
        if self.config.optim.weight_optimaltime == 0.0 {
            return;
        }
        let information = DMatrix::identity(1, 1) * self.config.optim.weight_optimaltime;
        for i in 0..self.teb.size_timediffs() {
            self.optimizer.add_edge(Edge::new(
                vec![VertexKey::TimeDiff(i)],
                information.clone(),
                EdgeKind::TimeOptimal(TimeOptimalEdge),
            ));
        }
    }

    fn add_edges_shortest_path(&mut self) {
        if self.config.optim.weight_shortest_path == 0.0 {
            return;
        }
        let information = DMatrix::identity(1, 1) * self.config.optim.weight_shortest_path;
        for i in 0..self.teb.size_poses() - 1 {
            self.optimizer.add_edge(Edge::new(
                vec![VertexKey::Pose(i), VertexKey::Pose(i + 1)],
                information.clone(),
                EdgeKind::ShortestPath(ShortestPathEdge),
            ));
        }
    }

    fn add_edges_kinematics_diff_drive(&mut self) {
        let optim = &self.config.optim;
        if optim.weight_kinematics_nh == 0.0 && optim.weight_kinematics_forward_drive == 0.0 {
            return;
        }
        let information = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
            optim.weight_kinematics_nh,
            optim.weight_kinematics_forward_drive,
        ]));
        for i in 0..self.teb.size_poses() - 1 {
            self.optimizer.add_edge(Edge::new(
                vec![VertexKey::Pose(i), VertexKey::Pose(i + 1)],
                information.clone(),
                EdgeKind::KinematicsDiffDrive(KinematicsDiffDriveEdge),
            ));
        }
    }

    fn add_edges_kinematics_carlike(&mut self) {
        let optim = &self.config.optim;
        if optim.weight_kinematics_nh == 0.0 && optim.weight_kinematics_turning_radius == 0.0 {
            return;
        }
        let information = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
            optim.weight_kinematics_nh,
            optim.weight_kinematics_turning_radius,
        ]));
        for i in 0..self.teb.size_poses() - 1 {
            self.optimizer.add_edge(Edge::new(
                vec![VertexKey::Pose(i), VertexKey::Pose(i + 1)],
                information.clone(),
                EdgeKind::KinematicsCarlike(KinematicsCarlikeEdge {
                    min_turning_radius: self.config.robot.min_turning_radius,
                }),
            ));
        }
    }

    fn add_edges_prefer_rotdir(&mut self) {
        if self.prefer_rotdir == RotType::None || self.config.optim.weight_prefer_rotdir == 0.0 {
            return;
        }
        let edge = match self.prefer_rotdir {
            RotType::Left => PreferRotDirEdge::left(),
            RotType::Right => PreferRotDirEdge::right(),
            RotType::None => return,
        };
        let information = DMatrix::identity(1, 1) * self.config.optim.weight_prefer_rotdir;
        let n = self.teb.size_poses();
        for i in 0..(n - 1).min(PREFER_ROTDIR_POSES) {
            self.optimizer.add_edge(Edge::new(
                vec![VertexKey::Pose(i), VertexKey::Pose(i + 1)],
                information.clone(),
                EdgeKind::PreferRotDir(edge),
            ));
        }
    }

    fn add_edges_velocity_obstacle_ratio(&mut self) {
        let optim = &self.config.optim;
        let obstacles_cfg = &self.config.obstacles;
        let information = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![
            optim.weight_velocity_obstacle_ratio,
            optim.weight_velocity_obstacle_ratio,
        ]));

        let n = self.teb.size_poses();
        for (index, obstacles) in self.obstacles_per_vertex.iter().enumerate() {
            if index + 1 >= n {
                continue;
            }
            for obstacle in obstacles {
                self.optimizer.add_edge(Edge::new(
                    vec![
                        VertexKey::Pose(index),
                        VertexKey::Pose(index + 1),
                        VertexKey::TimeDiff(index),
                    ],
                    information.clone(),
                    EdgeKind::VelocityObstacleRatio(VelocityObstacleRatioEdge {
                        obstacle: ObstaclePtr::clone(obstacle),
                        footprint: Arc::clone(&self.footprint),
                        max_vel_x: self.config.robot.max_vel_x,
                        max_vel_theta: self.config.robot.max_vel_theta,
                        ratio_max_vel: obstacles_cfg.obstacle_proximity_ratio_max_vel,
                        proximity_lower_bound: obstacles_cfg.obstacle_proximity_lower_bound,
                        proximity_upper_bound: obstacles_cfg.obstacle_proximity_upper_bound,
                    }),
                ));
            }
        }
    }

    /// Scaled cost of the current band. Rebuilds a temporary graph when
    /// called between cycles.
    pub fn compute_current_cost(&mut self, scales: CostScales) {
        let graph_existed = !self.optimizer.is_empty();
        if !graph_existed && self.build_graph(1.0).is_err() {
            return;
        }

        let mut cost = 0.0;
        if scales.alternative_time {
            // Edge-based time cost depends on the sample count, which the
            // resize hysteresis keeps shifting; the plain sum does not.
            cost += self.teb.sum_all_time_diffs();
        }

        for (edge_type, chi2) in self.optimizer.per_edge_chi2(&self.teb) {
            if scales.alternative_time && edge_type == EdgeType::TimeOptimal {
                continue;
            }
            let info = edge_type_info(edge_type);
            let mut scaled = chi2;
            if info.obstacle_cost {
                scaled *= scales.obstacle;
            }
            if info.viapoint_cost {
                scaled *= scales.viapoint;
            }
            cost += scaled;
        }
        self.cost = cost;

        if !graph_existed {
            self.clear_graph();
        }
    }

    /// Twist between two poses over `dt`. For a non-holonomic robot the
    /// longitudinal velocity is signed by projecting the displacement on
    /// the heading.
    #[must_use]
    pub fn extract_velocity(&self, pose1: &PoseSE2, pose2: &PoseSE2, dt: Float) -> Twist {
        if dt <= 0.0 {
            return Twist::zero();
        }

        let delta_s = pose2.position() - pose1.position();
        let (vx, vy) = if self.config.robot.max_vel_y == 0.0 {
            let direction = delta_s.dot(&pose1.orientation_unit_vec());
            (direction.signum() * delta_s.norm() / dt, 0.0)
        } else {
            let cos_theta1 = pose1.theta().cos();
            let sin_theta1 = pose1.theta().sin();
            (
                (cos_theta1 * delta_s.x + sin_theta1 * delta_s.y) / dt,
                (-sin_theta1 * delta_s.x + cos_theta1 * delta_s.y) / dt,
            )
        };
        let omega = shortest_angular_distance(pose1.theta(), pose2.theta()) / dt;
        Twist::new(vx, vy, omega)
    }

    /// The commanded twist, averaged over up to `look_ahead_poses` band
    /// intervals or until the accumulated time reaches
    /// `dt_ref * look_ahead_poses`, whichever comes first.
    ///
    /// # Errors
    ///
    /// Fails when the band holds fewer than two poses or the accumulated
    /// interval is not positive.
    pub fn get_velocity_command(&self, look_ahead_poses: usize) -> Result<Twist, PlanError> {
        if self.teb.size_poses() < 2 {
            error!("get_velocity_command(): the trajectory contains less than 2 poses");
            return Err(PlanError::TrajectoryTooSmall {
                size: self.teb.size_poses(),
                min_samples: 2,
            });
        }

        let upper = (self.teb.size_poses() - 1)
            .saturating_sub(self.config.trajectory.prevent_look_ahead_poses_near_goal)
            .max(1);
        let mut look_ahead = look_ahead_poses.clamp(1, upper);

        let horizon = self.config.trajectory.dt_ref.get() * look_ahead as Float;
        let mut dt = 0.0;
        let mut counter = 0;
        while counter < look_ahead {
            dt += self.teb.time_diff(counter);
            if dt >= horizon {
                look_ahead = counter + 1;
                break;
            }
            counter += 1;
        }

        if dt <= 0.0 {
            error!("get_velocity_command(): non-positive accumulated time difference");
            return Err(PlanError::NonpositiveTimeDiff);
        }

        Ok(self.extract_velocity(self.teb.pose(0), self.teb.pose(look_ahead), dt))
    }

    /// Twist at every band pose: the boundary velocities at both ends,
    /// finite differences in between. `n + 1` entries.
    #[must_use]
    pub fn get_velocity_profile(&self) -> Vec<Twist> {
        let mut profile = Vec::with_capacity(self.teb.size_poses() + 1);
        profile.push(self.vel_start.1);
        for ((pose1, pose2), dt) in self
            .teb
            .poses()
            .iter()
            .tuple_windows()
            .zip(self.teb.timediffs())
        {
            profile.push(self.extract_velocity(pose1, pose2, dt));
        }
        profile.push(self.vel_goal.1);
        profile
    }

    /// The full time-stamped trajectory; interior velocities are central
    /// differences of the neighbouring intervals.
    #[must_use]
    pub fn get_full_trajectory(&self) -> Vec<TrajectoryPoint> {
        let n = self.teb.size_poses();
        if n == 0 {
            return Vec::new();
        }

        let mut trajectory = Vec::with_capacity(n);
        let mut current_time = 0.0;

        trajectory.push(TrajectoryPoint {
            pose: *self.teb.pose(0),
            velocity: self.vel_start.1,
            time_from_start: current_time,
        });

        if n > 1 {
            current_time += self.teb.time_diff(0);
            for i in 1..n - 1 {
                let before = self.extract_velocity(
                    self.teb.pose(i - 1),
                    self.teb.pose(i),
                    self.teb.time_diff(i - 1),
                );
                let after = self.extract_velocity(
                    self.teb.pose(i),
                    self.teb.pose(i + 1),
                    self.teb.time_diff(i),
                );
                trajectory.push(TrajectoryPoint {
                    pose: *self.teb.pose(i),
                    velocity: Twist::new(
                        0.5 * (before.linear.x + after.linear.x),
                        0.5 * (before.linear.y + after.linear.y),
                        0.5 * (before.angular + after.angular),
                    ),
                    time_from_start: current_time,
                });
                current_time += self.teb.time_diff(i);
            }

            trajectory.push(TrajectoryPoint {
                pose: *self.teb.back_pose(),
                velocity: self.vel_goal.1,
                time_from_start: current_time,
            });
        }

        trajectory
    }

    /// A-posteriori feasibility: every pose up to the look-ahead index is
    /// checked against the collision model, with interpolated samples
    /// wherever consecutive poses are further apart than the inscribed
    /// radius or rotate more than the configured angular resolution.
    #[must_use]
    pub fn is_trajectory_feasible(
        &self,
        collision: &dyn CollisionModel,
        inscribed_radius: Float,
        look_ahead_idx: Option<usize>,
    ) -> bool {
        let n = self.teb.size_poses();
        if n == 0 {
            return false;
        }
        let look_ahead_idx = look_ahead_idx
            .filter(|&idx| idx < n)
            .unwrap_or(n - 1);

        for i in 0..=look_ahead_idx {
            if collision.in_collision(self.teb.pose(i)) {
                self.publish_infeasible(self.teb.pose(i));
                return false;
            }

            // If obstacles push two consecutive poses apart, their
            // midpoint may coincide with the obstacle; interpolate enough
            // samples to enforce the collision-check resolution.
            if i < look_ahead_idx {
                let delta_rot =
                    shortest_angular_distance(self.teb.pose(i).theta(), self.teb.pose(i + 1).theta());
                let delta_dist = self.teb.pose(i + 1).position() - self.teb.pose(i).position();

                let angular_resolution =
                    self.config.trajectory.min_resolution_collision_check_angular;
                let needs_interpolation = delta_rot.abs() > angular_resolution
                    || (inscribed_radius > 0.0 && delta_dist.norm() > inscribed_radius);
                if !needs_interpolation {
                    continue;
                }

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let additional_samples = {
                    let by_rotation = (delta_rot.abs() / angular_resolution).ceil();
                    let by_distance = if inscribed_radius > 0.0 {
                        (delta_dist.norm() / inscribed_radius).ceil()
                    } else {
                        1.0
                    };
                    (by_rotation.max(by_distance) as usize).saturating_sub(1)
                };

                let mut intermediate = *self.teb.pose(i);
                let steps = additional_samples as Float + 1.0;
                for _ in 0..additional_samples {
                    intermediate.set_position(intermediate.position() + delta_dist / steps);
                    intermediate.set_theta(normalize_theta(
                        intermediate.theta() + delta_rot / steps,
                    ));
                    if collision.in_collision(&intermediate) {
                        self.publish_infeasible(&intermediate);
                        return false;
                    }
                }
            }
        }
        true
    }

    fn publish_infeasible(&self, pose: &PoseSE2) {
        if let Some(visualization) = &self.visualization {
            visualization.publish_infeasible_pose(pose);
        }
    }

    /// Publish the local plan and, when configured, the feedback message.
    pub fn visualize(&self) {
        let Some(visualization) = &self.visualization else {
            return;
        };
        visualization.publish_local_plan(self.teb.poses());
        if self.config.trajectory.publish_feedback {
            visualization.publish_feedback(&FeedbackMessage {
                trajectory: self.get_full_trajectory(),
                cost: self.cost.is_finite().then_some(self.cost),
                obstacle_count: self.obstacles.len(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::footprint::PointFootprint;

    fn planner() -> TebOptimalPlanner {
        let mut config = TebConfig::default();
        config.robot.max_vel_x = 1.0;
        config.robot.max_vel_theta = 1.0;
        config.trajectory.min_samples = 5;
        TebOptimalPlanner::new(config, Arc::new(PointFootprint))
    }

    fn straight_plan() -> Vec<PoseSE2> {
        vec![PoseSE2::new(0.0, 0.0, 0.0), PoseSE2::new(5.0, 0.0, 0.0)]
    }

    #[test]
    fn graph_not_empty_is_detected() {
        let mut planner = planner();
        planner.plan(&straight_plan(), None, true).expect("plans");

        planner.build_graph(1.0).expect("first build");
        let result = planner.build_graph(1.0);
        assert!(matches!(result, Err(PlanError::GraphNotEmpty)));
        planner.clear_graph();
    }

    #[test]
    fn degenerate_velocity_rejects_the_call() {
        let mut planner = planner();
        planner.config.robot.max_vel_x = 0.005;
        let result = planner.plan(&straight_plan(), None, true);
        assert!(matches!(
            result,
            Err(PlanError::DegenerateConfiguration(_))
        ));
    }

    #[test]
    fn deactivated_optimization_is_refused() {
        let mut planner = planner();
        planner.config.optim.optimization_activate = false;
        let result = planner.plan(&straight_plan(), None, true);
        assert!(matches!(result, Err(PlanError::OptimizationDeactivated)));
    }

    #[test]
    fn velocity_profile_has_boundary_entries() {
        let mut planner = planner();
        planner.plan(&straight_plan(), None, false).expect("plans");

        let profile = planner.get_velocity_profile();
        assert_eq!(profile.len(), planner.teb().size_poses() + 1);
        assert_eq!(profile[0], Twist::zero());
        assert_eq!(*profile.last().expect("nonempty"), Twist::zero());
    }

    #[test]
    fn full_trajectory_is_time_stamped() {
        let mut planner = planner();
        planner.plan(&straight_plan(), None, true).expect("plans");

        let trajectory = planner.get_full_trajectory();
        assert_eq!(trajectory.len(), planner.teb().size_poses());
        assert_eq!(trajectory[0].time_from_start, 0.0);
        let mut previous = -1.0;
        for point in &trajectory {
            assert!(point.time_from_start > previous);
            previous = point.time_from_start;
        }
    }

    #[test]
    fn feasibility_interpolates_between_poses() {
        let mut planner = planner();
        planner.plan(&straight_plan(), None, true).expect("plans");

        // Everything is free.
        assert!(planner.is_trajectory_feasible(&|_: &PoseSE2| false, 0.1, None));

        // A collision band at x ≈ 2.5 must be caught even if no band pose
        // lands exactly inside it.
        let blocked = |pose: &PoseSE2| (pose.x() - 2.5).abs() < 0.12;
        assert!(!planner.is_trajectory_feasible(&blocked, 0.05, None));
    }
}
