//! End-to-end planning scenarios.

use std::sync::Arc;

use nalgebra::Vector2;
use teb_config::TebConfig;
use teb_planner::{
    footprint::PointFootprint,
    graph::EdgeType,
    obstacle::{Obstacle, ObstaclePtr},
    planner::TebOptimalPlanner,
    pose::{PoseSE2, Twist},
    visualization::RecordingVisualization,
    Float,
};

/// Baseline configuration for an idealized diff-drive robot: 1 m/s,
/// 0.3 s reference resolution, acceleration shaping disabled so cruise
/// velocity is reached immediately.
fn base_config() -> TebConfig {
    let mut config = TebConfig::default();
    config.robot.max_vel_x = 1.0;
    config.robot.max_vel_theta = 1.0;
    config.trajectory.dt_ref = 0.3.try_into().expect("0.3 > 0.0");
    config.trajectory.dt_hysteresis = 0.1;
    config.trajectory.min_samples = 5;
    config.optim.no_inner_iterations = 8;
    config.optim.no_outer_iterations = 4;
    config.optim.weight_acc_lim_x = 0.0;
    config.optim.weight_acc_lim_y = 0.0;
    config.optim.weight_acc_lim_theta = 0.0;
    config.obstacles.include_dynamic_obstacles = false;
    config
}

fn straight_plan() -> Vec<PoseSE2> {
    vec![PoseSE2::new(0.0, 0.0, 0.0), PoseSE2::new(5.0, 0.0, 0.0)]
}

fn planner_with(config: TebConfig) -> TebOptimalPlanner {
    TebOptimalPlanner::new(config, Arc::new(PointFootprint))
}

#[test]
fn straight_line_without_obstacles() {
    let mut planner = planner_with(base_config());
    planner.plan(&straight_plan(), None, true).expect("plans");

    let total_time = planner.teb().sum_all_time_diffs();
    assert!(
        (total_time - 5.0).abs() < 0.5,
        "total time {total_time} not within 5.0 ± 0.5 s"
    );

    let command = planner.get_velocity_command(1).expect("command");
    assert!(
        command.linear.x > 0.7,
        "commanded v_x {} too slow",
        command.linear.x
    );

    for twist in planner.get_velocity_profile() {
        assert!(
            twist.angular.abs() < 0.05,
            "unexpected rotation {} on a straight line",
            twist.angular
        );
    }

    assert!(planner.is_trajectory_feasible(&|_: &PoseSE2| false, 0.2, None));
}

#[test]
fn static_point_obstacle_bends_the_band() {
    let mut config = base_config();
    config.optim.no_inner_iterations = 10;
    config.optim.no_outer_iterations = 8;
    let visualization = Arc::new(RecordingVisualization::new());
    let mut planner =
        planner_with(config).with_visualization(Arc::<RecordingVisualization>::clone(&visualization));

    let obstacle = Vector2::new(2.5, 0.0);
    planner.set_obstacles(vec![ObstaclePtr::new(Obstacle::Point { position: obstacle })]);
    planner.plan(&straight_plan(), None, true).expect("plans");

    let min_clearance = planner
        .teb()
        .poses()
        .iter()
        .map(|pose| (pose.position() - obstacle).norm())
        .fold(Float::INFINITY, Float::min);
    assert!(
        min_clearance >= 0.4,
        "band came within {min_clearance} m of the obstacle"
    );

    let max_lateral = planner
        .teb()
        .poses()
        .iter()
        .map(|pose| pose.y().abs())
        .fold(0.0, Float::max);
    assert!(max_lateral > 0.0, "band never left the obstructed line");

    // The per-vertex obstacle markers were published on every rebuild.
    let recorded = visualization.recorded();
    assert!(!recorded.obstacle_markers.is_empty());
    assert!(recorded
        .obstacle_markers
        .iter()
        .any(|counts| counts.iter().sum::<usize>() > 0));
}

#[test]
fn warm_start_within_thresholds_keeps_the_band() {
    let mut config = base_config();
    config.trajectory.force_reinit_new_goal_dist = 0.2;
    config.trajectory.force_reinit_new_goal_angular = 0.1;
    let mut planner = planner_with(config);

    planner.plan(&straight_plan(), None, true).expect("plans");
    let poses_before = planner.teb().size_poses();

    let nudged_plan = vec![PoseSE2::new(0.0, 0.0, 0.0), PoseSE2::new(5.05, 0.0, 0.01)];
    planner.plan(&nudged_plan, None, true).expect("plans");
    let poses_after = planner.teb().size_poses();

    assert!(
        poses_before.abs_diff(poses_after) <= 1,
        "warm start changed the pose count from {poses_before} to {poses_after}"
    );
    assert!((planner.teb().back_pose().x() - 5.05).abs() < 1e-9);
}

#[test]
fn far_goal_change_forces_reinit() {
    let mut config = base_config();
    config.trajectory.force_reinit_new_goal_dist = 0.2;
    config.trajectory.force_reinit_new_goal_angular = 0.1;
    let mut planner = planner_with(config);

    planner.plan(&straight_plan(), None, true).expect("plans");
    let poses_before = planner.teb().size_poses();

    let far_plan = vec![PoseSE2::new(0.0, 0.0, 0.0), PoseSE2::new(10.0, 2.0, 1.0)];
    planner.plan(&far_plan, None, true).expect("plans");
    let poses_after = planner.teb().size_poses();

    // A path twice as long resamples into a clearly larger band.
    assert!(
        poses_after > poses_before + 5,
        "expected a reinitialized band, got {poses_before} -> {poses_after}"
    );
    assert!((planner.teb().back_pose().x() - 10.0).abs() < 1e-9);
    assert!((planner.teb().back_pose().theta() - 1.0).abs() < 1e-9);
}

#[test]
fn dynamic_obstacle_crossing_slows_and_deviates() {
    let mut config = base_config();
    config.obstacles.include_dynamic_obstacles = true;
    config.optim.no_inner_iterations = 10;
    config.optim.no_outer_iterations = 6;

    // Baseline: identical configuration, empty scene.
    let mut baseline = planner_with(config.clone());
    baseline.plan(&straight_plan(), None, true).expect("plans");
    let baseline_time = baseline.teb().sum_all_time_diffs();

    let mut planner = planner_with(config);

    planner.set_obstacles(vec![ObstaclePtr::new(Obstacle::Dynamic {
        position: Vector2::new(2.5, -2.0),
        velocity: Vector2::new(0.0, 0.5),
        acceleration: Vector2::zeros(),
        radius: 0.1,
    })]);
    // The same obstacle also arrives through the tracked-report stream.
    planner.input_slots().publish_obstacle_positions(&[
        2.5, -2.0, 0.0, 0.5, 0.0, 0.0, 0.5, 0.5,
    ]);

    planner.plan(&straight_plan(), None, true).expect("plans");

    assert!(planner.dynamic_obstacle_in_scene());

    let total_time = planner.teb().sum_all_time_diffs();
    assert!(
        total_time > baseline_time,
        "crossing obstacle did not slow the band: {total_time} <= {baseline_time}"
    );

    let max_lateral = planner
        .teb()
        .poses()
        .iter()
        .map(|pose| pose.y().abs())
        .fold(0.0, Float::max);
    assert!(
        max_lateral > 0.01,
        "band did not deviate from the predicted crossing"
    );
}

#[test]
fn velocity_command_look_ahead_uses_reached_horizon() {
    let mut planner = planner_with(base_config());

    // Hand-crafted band: three short intervals followed by a long one.
    let teb = planner.teb_mut();
    teb.add_pose(PoseSE2::new(0.0, 0.0, 0.0));
    teb.add_pose_and_time_diff(PoseSE2::new(0.2, 0.0, 0.0), 0.1);
    teb.add_pose_and_time_diff(PoseSE2::new(0.4, 0.0, 0.0), 0.1);
    teb.add_pose_and_time_diff(PoseSE2::new(0.6, 0.0, 0.0), 0.1);
    teb.add_pose_and_time_diff(PoseSE2::new(1.6, 0.0, 0.0), 1.0);

    let command = planner.get_velocity_command(3).expect("command");
    // The first three intervals cover 0.6 m in 0.3 s.
    assert!((command.linear.x - 2.0).abs() < 1e-9);

    // Consistency with direct extraction over one interval.
    let one = planner.get_velocity_command(1).expect("command");
    let reference = planner.extract_velocity(
        planner.teb().pose(0),
        planner.teb().pose(1),
        planner.teb().time_diff(0),
    );
    assert!((one.linear.x - reference.linear.x).abs() < 1e-12);
    assert!((one.angular - reference.angular).abs() < 1e-12);
}

#[test]
fn pose_pair_entry_builds_an_equivalent_band() {
    let mut planner = planner_with(base_config());
    planner
        .plan_between(
            &PoseSE2::new(0.0, 0.0, 0.0),
            &PoseSE2::new(5.0, 0.0, 0.0),
            None,
            true,
        )
        .expect("plans");

    assert!(planner.teb().size_poses() >= 5);
    assert_eq!(
        planner.teb().size_timediffs(),
        planner.teb().size_poses() - 1
    );
    assert!((planner.teb().back_pose().x() - 5.0).abs() < 1e-9);
    let total_time = planner.teb().sum_all_time_diffs();
    assert!((total_time - 5.0).abs() < 0.5);
}

#[test]
fn zero_weights_remove_edge_sets_entirely() {
    let mut config = base_config();
    config.optim.weight_shortest_path = 0.0;
    config.optim.weight_obstacle = 0.0;
    config.optim.weight_viapoint = 0.0;
    let mut planner = planner_with(config);

    planner.set_obstacles(vec![ObstaclePtr::new(Obstacle::point(2.5, 0.1))]);
    planner.set_via_points(vec![Vector2::new(2.0, 0.5)]);
    planner.plan(&straight_plan(), None, true).expect("plans");

    planner.build_graph(1.0).expect("builds");
    let optimizer = planner.optimizer();
    assert_eq!(optimizer.count_edges_of(EdgeType::ShortestPath), 0);
    assert_eq!(optimizer.count_edges_of(EdgeType::Obstacle), 0);
    assert_eq!(optimizer.count_edges_of(EdgeType::InflatedObstacle), 0);
    assert_eq!(optimizer.count_edges_of(EdgeType::ViaPoint), 0);
    assert_eq!(optimizer.count_edges_of(EdgeType::Acceleration), 0);
    assert!(optimizer.count_edges_of(EdgeType::TimeOptimal) > 0);
    assert!(optimizer.count_edges_of(EdgeType::Velocity) > 0);
    assert!(optimizer.count_edges_of(EdgeType::KinematicsDiffDrive) > 0);
    planner.clear_graph();
}

#[test]
fn boundary_poses_stay_fixed_through_optimization() {
    let mut planner = planner_with(base_config());
    planner.plan(&straight_plan(), None, true).expect("plans");

    let start = *planner.teb().pose(0);
    let goal = *planner.teb().back_pose();

    planner.optimize_teb(5, 2, None).expect("optimizes");

    assert_eq!(*planner.teb().pose(0), start);
    assert_eq!(*planner.teb().back_pose(), goal);
}

#[test]
fn via_points_attract_the_band() {
    let mut config = base_config();
    config.optim.weight_viapoint = 10.0;
    let mut planner = planner_with(config);
    planner.set_via_points(vec![Vector2::new(2.5, 0.4)]);
    planner.plan(&straight_plan(), None, true).expect("plans");

    let closest = planner
        .teb()
        .poses()
        .iter()
        .map(|pose| (pose.position() - Vector2::new(2.5, 0.4)).norm())
        .fold(Float::INFINITY, Float::min);
    assert!(
        closest < 0.3,
        "band stayed {closest} m away from the via-point"
    );
}

#[test]
fn divergence_detection_flags_impossible_problems() {
    let mut config = base_config();
    config.recovery.divergence_detection_enable = true;
    config.recovery.divergence_detection_max_chi_squared = 1e-6;
    let mut planner = planner_with(config);
    planner.plan(&straight_plan(), None, true).expect("plans");

    // Any realistic band keeps a residual above this absurd threshold.
    assert!(planner.has_diverged());

    let mut lenient = planner_with(base_config());
    lenient.plan(&straight_plan(), None, true).expect("plans");
    assert!(!lenient.has_diverged());
}

#[test]
fn start_velocity_feeds_the_command_chain() {
    let mut config = base_config();
    // Re-enable acceleration shaping for this one.
    config.optim.weight_acc_lim_x = 1.0;
    config.optim.weight_acc_lim_theta = 1.0;
    let mut planner = planner_with(config);

    let cruising = Twist::new(1.0, 0.0, 0.0);
    planner
        .plan(&straight_plan(), Some(&cruising), true)
        .expect("plans");

    let profile = planner.get_velocity_profile();
    assert_eq!(profile[0], cruising);
}
