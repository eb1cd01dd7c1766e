//! Levenberg-Marquardt adapter over the hyper-graph.
//!
//! Vertices are registered with a stable integer id in insertion order;
//! the planner interleaves pose and time-difference vertices, which keeps
//! the normal equations banded. Edges are transient: [`TebOptimizer::clear`]
//! drops them together with the vertex table while the band itself keeps
//! all values (the vertices are index handles, not owners).

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::{
    graph::{edges::Edge, VertexKey},
    pose::PoseSE2,
    teb::TimedElasticBand,
    Float,
};

/// Multiplier on the largest Hessian diagonal entry used to seed the
/// damping factor.
const INITIAL_LAMBDA_FACTOR: Float = 1e-5;
/// Give up on an iteration after this many rejected damping attempts.
const MAX_STEP_ATTEMPTS: usize = 8;

/// Summary of one accepted inner iteration.
#[derive(Debug, Clone, Copy)]
pub struct BatchStatistics {
    pub iteration: usize,
    /// Sum of squared, information-weighted edge residuals after the
    /// iteration.
    pub chi2: Float,
}

#[derive(Debug, Clone, Copy)]
struct VertexEntry {
    key: VertexKey,
    fixed: bool,
    /// Start column in the reduced system; `None` for fixed vertices.
    column: Option<usize>,
}

#[derive(Debug, Default)]
pub struct TebOptimizer {
    vertices: Vec<VertexEntry>,
    slots: HashMap<VertexKey, usize>,
    edges: Vec<Edge>,
    stats: Vec<BatchStatistics>,
    free_dimension: usize,
    initialized: bool,
    verbose: bool,
    compute_batch_statistics: bool,
}

impl TebOptimizer {
    #[must_use]
    pub fn new() -> Self {
        // Touch the one-shot edge-type registry here so it initializes
        // exactly once per process no matter how many planner instances
        // are constructed, possibly concurrently.
        let _ = crate::graph::edge_type_registry();
        Self::default()
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn set_compute_batch_statistics(&mut self, enable: bool) {
        self.compute_batch_statistics = enable;
    }

    /// Register a variable. Returns its stable integer id (insertion
    /// order).
    pub fn add_vertex(&mut self, key: VertexKey, fixed: bool) -> usize {
        debug_assert!(
            !self.slots.contains_key(&key),
            "vertex registered twice: {key:?}"
        );
        let id = self.vertices.len();
        self.vertices.push(VertexEntry {
            key,
            fixed,
            column: None,
        });
        self.slots.insert(key, id);
        self.initialized = false;
        id
    }

    /// Attach a soft constraint. All referenced vertices must already be
    /// registered.
    pub fn add_edge(&mut self, edge: Edge) {
        debug_assert!(
            edge.vertices().iter().all(|v| self.slots.contains_key(v)),
            "edge references an unregistered vertex"
        );
        self.edges.push(edge);
    }

    #[must_use]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.edges.is_empty()
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges of one catalogue type currently in the graph.
    #[must_use]
    pub fn count_edges_of(&self, edge_type: crate::graph::EdgeType) -> usize {
        self.edges
            .iter()
            .filter(|e| e.edge_type() == edge_type)
            .count()
    }

    /// Lay out the reduced system: free vertices receive contiguous
    /// column ranges in registration order.
    pub fn initialize(&mut self) {
        let mut column = 0;
        for entry in &mut self.vertices {
            entry.column = if entry.fixed {
                None
            } else {
                let start = column;
                column += entry.key.dimension();
                Some(start)
            };
        }
        self.free_dimension = column;
        self.stats.clear();
        self.initialized = true;
    }

    /// Run up to `max_iterations` damped Gauss-Newton iterations, writing
    /// accepted steps back into the band. Returns the number of accepted
    /// iterations.
    pub fn optimize(&mut self, teb: &mut TimedElasticBand, max_iterations: usize) -> usize {
        if !self.initialized || self.free_dimension == 0 || self.edges.is_empty() {
            return 0;
        }

        let mut current_chi2 = self.total_chi2(teb);
        if !current_chi2.is_finite() {
            warn!("optimize(): non-finite initial chi2, rejecting");
            return 0;
        }

        let mut lambda = 0.0;
        let mut performed = 0;

        for iteration in 0..max_iterations {
            let (hessian, gradient) = self.assemble(teb);
            if iteration == 0 {
                let max_diagonal = (0..self.free_dimension)
                    .map(|i| hessian[(i, i)].abs())
                    .fold(0.0, Float::max);
                lambda = INITIAL_LAMBDA_FACTOR * max_diagonal.max(1.0);
            }

            let mut accepted = false;
            for _ in 0..MAX_STEP_ATTEMPTS {
                let mut damped = hessian.clone();
                for i in 0..self.free_dimension {
                    damped[(i, i)] += lambda;
                }
                let Some(cholesky) = damped.cholesky() else {
                    lambda *= 10.0;
                    continue;
                };
                let step = cholesky.solve(&gradient);

                let backup = BandBackup::capture(teb);
                self.apply_step(teb, &step);
                let new_chi2 = self.total_chi2(teb);

                if new_chi2.is_finite() && new_chi2 <= current_chi2 {
                    current_chi2 = new_chi2;
                    lambda = (lambda * 0.5).max(1e-12);
                    accepted = true;
                    break;
                }
                backup.restore(teb);
                lambda *= 10.0;
            }

            if !accepted {
                break;
            }
            performed += 1;
            if self.compute_batch_statistics {
                self.stats.push(BatchStatistics {
                    iteration,
                    chi2: current_chi2,
                });
            }
            if self.verbose {
                debug!(iteration, chi2 = current_chi2, lambda, "LM iteration");
            }
        }

        performed
    }

    /// Per-iteration statistics of the most recent [`optimize`] run.
    /// Survives [`clear`] so divergence can be checked after teardown.
    ///
    /// [`optimize`]: TebOptimizer::optimize
    /// [`clear`]: TebOptimizer::clear
    #[must_use]
    pub fn batch_statistics(&self) -> &[BatchStatistics] {
        &self.stats
    }

    /// Whether the last inner iteration ended above the given χ²
    /// threshold.
    #[must_use]
    pub fn has_diverged(&self, max_chi_squared: Float) -> bool {
        self.stats
            .last()
            .is_some_and(|stats| stats.chi2 > max_chi_squared)
    }

    /// Drop all edges and vertex entries. Band values are untouched: the
    /// vertex table holds indices, never trajectory state.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.slots.clear();
        self.edges.clear();
        self.free_dimension = 0;
        self.initialized = false;
    }

    /// Sum of squared, information-weighted residuals over all edges.
    #[must_use]
    pub fn total_chi2(&self, teb: &TimedElasticBand) -> Float {
        self.edges
            .iter()
            .map(|edge| edge.chi2(&gather(teb, edge)))
            .sum()
    }

    /// χ² of every edge at the current band values, with its type.
    #[must_use]
    pub fn per_edge_chi2(
        &self,
        teb: &TimedElasticBand,
    ) -> Vec<(crate::graph::EdgeType, Float)> {
        self.edges
            .iter()
            .map(|edge| (edge.edge_type(), edge.chi2(&gather(teb, edge))))
            .collect()
    }

    fn column_of(&self, key: VertexKey) -> Option<usize> {
        self.slots
            .get(&key)
            .and_then(|&slot| self.vertices[slot].column)
    }

    fn assemble(&self, teb: &TimedElasticBand) -> (DMatrix<Float>, DVector<Float>) {
        let dim = self.free_dimension;
        let mut hessian = DMatrix::zeros(dim, dim);
        let mut gradient = DVector::zeros(dim);

        for edge in &self.edges {
            let x = gather(teb, edge);
            let error = edge.error(&x);
            let jacobian = edge.numeric_jacobian(&x);

            let jt_w = jacobian.transpose() * edge.information();
            let h_local = &jt_w * &jacobian;
            let b_local = &jt_w * &error;

            let mut offsets = Vec::with_capacity(edge.vertices().len());
            let mut acc = 0;
            for vertex in edge.vertices() {
                offsets.push(acc);
                acc += vertex.dimension();
            }

            for (i, &key_i) in edge.vertices().iter().enumerate() {
                let Some(col_i) = self.column_of(key_i) else {
                    continue;
                };
                let dim_i = key_i.dimension();
                for r in 0..dim_i {
                    gradient[col_i + r] -= b_local[offsets[i] + r];
                }
                for (j, &key_j) in edge.vertices().iter().enumerate() {
                    let Some(col_j) = self.column_of(key_j) else {
                        continue;
                    };
                    let dim_j = key_j.dimension();
                    for r in 0..dim_i {
                        for c in 0..dim_j {
                            hessian[(col_i + r, col_j + c)] +=
                                h_local[(offsets[i] + r, offsets[j] + c)];
                        }
                    }
                }
            }
        }

        (hessian, gradient)
    }

    fn apply_step(&self, teb: &mut TimedElasticBand, step: &DVector<Float>) {
        for entry in &self.vertices {
            let Some(column) = entry.column else {
                continue;
            };
            match entry.key {
                VertexKey::Pose(i) => {
                    teb.pose_mut(i)
                        .apply_increment(step[column], step[column + 1], step[column + 2]);
                }
                VertexKey::TimeDiff(i) => {
                    let dt = teb.time_diff(i) + step[column];
                    teb.set_time_diff(i, dt);
                }
            }
        }
    }
}

/// Stack the current values of an edge's vertices in declaration order.
fn gather(teb: &TimedElasticBand, edge: &Edge) -> DVector<Float> {
    let mut x = DVector::zeros(edge.stacked_dimension());
    let mut offset = 0;
    for &key in edge.vertices() {
        match key {
            VertexKey::Pose(i) => {
                let pose = teb.pose(i);
                x[offset] = pose.x();
                x[offset + 1] = pose.y();
                x[offset + 2] = pose.theta();
                offset += 3;
            }
            VertexKey::TimeDiff(i) => {
                x[offset] = teb.time_diff(i);
                offset += 1;
            }
        }
    }
    x
}

struct BandBackup {
    poses: Vec<PoseSE2>,
    timediffs: Vec<Float>,
}

impl BandBackup {
    fn capture(teb: &TimedElasticBand) -> Self {
        Self {
            poses: teb.poses().to_vec(),
            timediffs: teb.timediffs(),
        }
    }

    fn restore(&self, teb: &mut TimedElasticBand) {
        for (i, pose) in self.poses.iter().enumerate() {
            *teb.pose_mut(i) = *pose;
        }
        for (i, &dt) in self.timediffs.iter().enumerate() {
            teb.set_time_diff(i, dt);
        }
    }
}
