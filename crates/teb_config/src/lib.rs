//! Typed configuration for the TEB trajectory optimizer.
//!
//! Every tunable recognized by the planner lives in one of the sections
//! below. Sections deserialize from TOML with kebab-case keys and each
//! carries defaults usable out of the box, so a config file only needs to
//! override what it cares about.

use serde::{Deserialize, Serialize};
use typed_floats::StrictlyPositiveFinite;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// How `plan()` decides between warm-starting the previous band and
/// reinitializing from scratch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateMode {
    /// Warm-start whenever the new goal stays within the reinit thresholds.
    #[default]
    Classic,
    /// Reinitialize whenever a dynamic obstacle is in the scene and the
    /// band still spans more than a meter; warm-start otherwise.
    DynamicAware,
}

/// **Trajectory section**
/// Temporal resolution and lifecycle of the elastic band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrajectorySection {
    /// Desired temporal resolution between consecutive poses.
    /// SI unit: s
    pub dt_ref: StrictlyPositiveFinite<f64>,
    /// Hysteresis around `dt_ref` before the band is resized.
    /// SI unit: s
    pub dt_hysteresis: f64,
    /// Minimum number of poses the band may shrink to.
    pub min_samples: usize,
    /// Maximum number of poses the band may grow to.
    pub max_samples: usize,
    /// Whether `auto_resize` runs at the top of every outer iteration.
    pub teb_autosize: bool,
    /// Overwrite the orientations of the coarse plan with the bearing to
    /// the next sample during initialization.
    pub global_plan_overwrite_orientation: bool,
    /// Permit initial samples that require driving backwards.
    pub allow_init_with_backwards_motion: bool,
    /// Goal displacement beyond which the band is reinitialized instead of
    /// warm-started. SI unit: m
    pub force_reinit_new_goal_dist: f64,
    /// Goal rotation beyond which the band is reinitialized instead of
    /// warm-started. SI unit: rad
    pub force_reinit_new_goal_angular: f64,
    /// Attach via-points in plan order instead of greedily.
    pub via_points_ordered: bool,
    /// Angular resolution enforced by the a-posteriori feasibility check.
    /// SI unit: rad
    pub min_resolution_collision_check_angular: f64,
    /// Keep the velocity-command look-ahead this many poses away from the
    /// goal.
    pub prevent_look_ahead_poses_near_goal: usize,
    /// Emit the planner feedback message after each cycle.
    #[serde(default = "TrajectorySection::default_publish_feedback")]
    pub publish_feedback: bool,
}

impl TrajectorySection {
    fn default_publish_feedback() -> bool {
        false
    }
}

impl Default for TrajectorySection {
    fn default() -> Self {
        Self {
            dt_ref: 0.3.try_into().expect("0.3 > 0.0"),
            dt_hysteresis: 0.1,
            min_samples: 3,
            max_samples: 500,
            teb_autosize: true,
            global_plan_overwrite_orientation: true,
            allow_init_with_backwards_motion: false,
            force_reinit_new_goal_dist: 1.0,
            force_reinit_new_goal_angular: std::f64::consts::FRAC_PI_2,
            via_points_ordered: false,
            min_resolution_collision_check_angular: std::f64::consts::PI,
            prevent_look_ahead_poses_near_goal: 0,
            publish_feedback: Self::default_publish_feedback(),
        }
    }
}

/// **Robot section**
/// Kinematic and dynamic limits of the base.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RobotSection {
    /// SI unit: m/s
    pub max_vel_x: f64,
    /// Set to zero for a non-holonomic base. SI unit: m/s
    pub max_vel_y: f64,
    /// SI unit: rad/s
    pub max_vel_theta: f64,
    /// SI unit: m/s²
    pub acc_lim_x: f64,
    /// SI unit: m/s²
    pub acc_lim_y: f64,
    /// SI unit: rad/s²
    pub acc_lim_theta: f64,
    /// Zero selects the differential-drive kinematics edges; a positive
    /// radius selects the car-like edges. SI unit: m
    pub min_turning_radius: f64,
}

impl Default for RobotSection {
    fn default() -> Self {
        Self {
            max_vel_x: 0.4,
            max_vel_y: 0.0,
            max_vel_theta: 0.3,
            acc_lim_x: 0.5,
            acc_lim_y: 0.5,
            acc_lim_theta: 0.5,
            min_turning_radius: 0.0,
        }
    }
}

/// **Obstacles section**
/// Clearance targets and association behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ObstaclesSection {
    /// Hard clearance target. SI unit: m
    pub min_obstacle_dist: StrictlyPositiveFinite<f64>,
    /// Soft cushion beyond `min_obstacle_dist`; the inflated obstacle edge
    /// is only built while this exceeds the hard target. SI unit: m
    pub inflation_dist: f64,
    /// Soft cushion for predicted dynamic obstacle positions. SI unit: m
    pub dynamic_obstacle_inflation_dist: f64,
    /// Predict moving obstacles along the trajectory timeline.
    pub include_dynamic_obstacles: bool,
    /// Legacy association: number of band poses an obstacle is attached to.
    pub obstacle_poses_affected: usize,
    /// Use the legacy closest-pose association instead of the per-vertex
    /// association.
    pub legacy_obstacle_association: bool,
    /// Obstacles closer than `min_obstacle_dist` times this factor are
    /// always associated with the current pose.
    pub obstacle_association_force_inclusion_factor: f64,
    /// Fraction of the velocity limits admitted by the
    /// velocity-obstacle-ratio edge at full clearance.
    #[serde(default = "ObstaclesSection::default_obstacle_proximity_ratio_max_vel")]
    pub obstacle_proximity_ratio_max_vel: f64,
    /// Clearance at or below which the ratio edge admits zero velocity.
    /// SI unit: m
    #[serde(default = "ObstaclesSection::default_obstacle_proximity_lower_bound")]
    pub obstacle_proximity_lower_bound: f64,
    /// Clearance at or above which the ratio edge stops limiting velocity.
    /// SI unit: m
    #[serde(default = "ObstaclesSection::default_obstacle_proximity_upper_bound")]
    pub obstacle_proximity_upper_bound: f64,
}

impl ObstaclesSection {
    fn default_obstacle_proximity_ratio_max_vel() -> f64 {
        1.0
    }

    fn default_obstacle_proximity_lower_bound() -> f64 {
        0.0
    }

    fn default_obstacle_proximity_upper_bound() -> f64 {
        0.5
    }
}

impl Default for ObstaclesSection {
    fn default() -> Self {
        Self {
            min_obstacle_dist: 0.5.try_into().expect("0.5 > 0.0"),
            inflation_dist: 0.6,
            dynamic_obstacle_inflation_dist: 0.6,
            include_dynamic_obstacles: true,
            obstacle_poses_affected: 25,
            legacy_obstacle_association: false,
            obstacle_association_force_inclusion_factor: 1.5,
            obstacle_proximity_ratio_max_vel: Self::default_obstacle_proximity_ratio_max_vel(),
            obstacle_proximity_lower_bound: Self::default_obstacle_proximity_lower_bound(),
            obstacle_proximity_upper_bound: Self::default_obstacle_proximity_upper_bound(),
        }
    }
}

/// **Optimization section**
/// Iteration counts and the weight of every soft constraint. A weight of
/// zero removes the corresponding edge set from the graph entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OptimSection {
    /// Levenberg-Marquardt iterations per graph build.
    pub no_inner_iterations: usize,
    /// Resize/build/optimize cycles per `plan()` call.
    pub no_outer_iterations: usize,
    /// Master switch; `optimize_teb` refuses to run when false.
    pub optimization_activate: bool,
    pub optimization_verbose: bool,
    /// Soft margin added inside the velocity, acceleration and kinematics
    /// penalties.
    pub penalty_epsilon: f64,

    pub weight_max_vel_x: f64,
    pub weight_max_vel_y: f64,
    pub weight_max_vel_theta: f64,
    pub weight_acc_lim_x: f64,
    pub weight_acc_lim_y: f64,
    pub weight_acc_lim_theta: f64,
    /// Non-holonomic rolling constraint. Keep this high; it is the only
    /// edge gluing heading to motion direction.
    pub weight_kinematics_nh: f64,
    pub weight_kinematics_forward_drive: f64,
    pub weight_kinematics_turning_radius: f64,
    pub weight_optimaltime: f64,
    pub weight_shortest_path: f64,
    pub weight_obstacle: f64,
    pub weight_inflation: f64,
    pub weight_dynamic_obstacle: f64,
    pub weight_dynamic_obstacle_inflation: f64,
    pub weight_viapoint: f64,
    pub weight_prefer_rotdir: f64,
    /// Couples admissible speed to the clearance from associated
    /// obstacles; zero disables the edge set and also shifts the
    /// per-vertex association to skip the first pose.
    pub weight_velocity_obstacle_ratio: f64,
    /// Obstacle weights are multiplied by this factor after every outer
    /// iteration.
    pub weight_adapt_factor: f64,
}

impl Default for OptimSection {
    fn default() -> Self {
        Self {
            no_inner_iterations: 5,
            no_outer_iterations: 4,
            optimization_activate: true,
            optimization_verbose: false,
            penalty_epsilon: 0.1,

            weight_max_vel_x: 2.0,
            weight_max_vel_y: 2.0,
            weight_max_vel_theta: 1.0,
            weight_acc_lim_x: 1.0,
            weight_acc_lim_y: 1.0,
            weight_acc_lim_theta: 1.0,
            weight_kinematics_nh: 1000.0,
            weight_kinematics_forward_drive: 1.0,
            weight_kinematics_turning_radius: 1.0,
            weight_optimaltime: 1.0,
            weight_shortest_path: 0.0,
            weight_obstacle: 50.0,
            weight_inflation: 0.1,
            weight_dynamic_obstacle: 50.0,
            weight_dynamic_obstacle_inflation: 0.1,
            weight_viapoint: 1.0,
            weight_prefer_rotdir: 50.0,
            weight_velocity_obstacle_ratio: 0.0,
            weight_adapt_factor: 2.0,
        }
    }
}

/// **Recovery section**
/// Divergence detection over the optimizer's batch statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecoverySection {
    pub divergence_detection_enable: bool,
    /// χ² of the last inner iteration above which the trajectory is
    /// rejected.
    pub divergence_detection_max_chi_squared: f64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            divergence_detection_enable: false,
            divergence_detection_max_chi_squared: 10.0,
        }
    }
}

/// Collection of all the sections recognized by the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TebConfig {
    #[serde(default)]
    pub trajectory: TrajectorySection,
    #[serde(default)]
    pub robot: RobotSection,
    #[serde(default)]
    pub obstacles: ObstaclesSection,
    #[serde(default)]
    pub optim: OptimSection,
    #[serde(default)]
    pub recovery: RecoverySection,
    /// Runtime-tunable warm-start policy.
    #[serde(default)]
    pub update_mode: UpdateMode,
}

impl TebConfig {
    /// Parse a config file from a given path.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if the file cannot be read or parsed.
    pub fn from_file<P>(path: P) -> Result<Self, ParseError>
    where
        P: AsRef<std::path::Path>,
    {
        std::fs::read_to_string(path)
            .map_err(Into::into)
            .and_then(|contents| Self::parse(contents.as_str()))
    }

    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if the text is not valid TOML for this
    /// schema.
    pub fn parse(contents: &str) -> Result<Self, ParseError> {
        toml::from_str(contents).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_config_is_consistent() {
        let config = TebConfig::default();
        assert!(config.trajectory.min_samples <= config.trajectory.max_samples);
        assert!(config.trajectory.dt_hysteresis < config.trajectory.dt_ref.get());
        assert!(config.obstacles.inflation_dist > config.obstacles.min_obstacle_dist.get());
        assert_eq!(config.update_mode, UpdateMode::Classic);
    }

    #[test]
    fn parse_partial_toml_overrides() {
        let config = TebConfig::parse(
            r#"
            update-mode = "dynamic-aware"

            [trajectory]
            dt-ref = 0.25
            dt-hysteresis = 0.05
            min-samples = 5
            max-samples = 100
            teb-autosize = true
            global-plan-overwrite-orientation = false
            allow-init-with-backwards-motion = false
            force-reinit-new-goal-dist = 0.2
            force-reinit-new-goal-angular = 0.1
            via-points-ordered = true
            min-resolution-collision-check-angular = 3.14159
            prevent-look-ahead-poses-near-goal = 1

            [optim]
            no-inner-iterations = 8
            no-outer-iterations = 3
            optimization-activate = true
            optimization-verbose = false
            penalty-epsilon = 0.05
            weight-max-vel-x = 2.0
            weight-max-vel-y = 0.0
            weight-max-vel-theta = 1.0
            weight-acc-lim-x = 1.0
            weight-acc-lim-y = 0.0
            weight-acc-lim-theta = 1.0
            weight-kinematics-nh = 1000.0
            weight-kinematics-forward-drive = 1.0
            weight-kinematics-turning-radius = 1.0
            weight-optimaltime = 1.0
            weight-shortest-path = 0.0
            weight-obstacle = 50.0
            weight-inflation = 0.1
            weight-dynamic-obstacle = 50.0
            weight-dynamic-obstacle-inflation = 0.1
            weight-viapoint = 1.0
            weight-prefer-rotdir = 50.0
            weight-velocity-obstacle-ratio = 0.0
            weight-adapt-factor = 2.0
            "#,
        )
        .expect("valid TOML");

        assert_eq!(config.update_mode, UpdateMode::DynamicAware);
        assert_eq!(config.trajectory.min_samples, 5);
        assert_eq!(config.optim.no_inner_iterations, 8);
        // Untouched sections fall back to defaults.
        assert_eq!(config.robot.max_vel_x, RobotSection::default().max_vel_x);
        assert!(config.recovery.divergence_detection_max_chi_squared > 0.0);
    }

    #[test]
    fn parse_rejects_nonpositive_dt_ref() {
        let result = TebConfig::parse(
            r#"
            [trajectory]
            dt-ref = 0.0
            dt-hysteresis = 0.1
            min-samples = 3
            max-samples = 500
            teb-autosize = true
            global-plan-overwrite-orientation = true
            allow-init-with-backwards-motion = false
            force-reinit-new-goal-dist = 1.0
            force-reinit-new-goal-angular = 1.57
            via-points-ordered = false
            min-resolution-collision-check-angular = 3.14159
            prevent-look-ahead-poses-near-goal = 0
            "#,
        );
        assert!(result.is_err());
    }
}
