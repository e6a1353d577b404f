//! boxel-cluster — single-linkage clustering of depth frames into boxes.
//!
//! Points within the distance threshold of each other (inclusive) are
//! connected; connected components of that graph are the clusters, and each
//! cluster folds into one axis-aligned bounding box. Components smaller than
//! the configured minimum are dropped as speckle.

use std::collections::VecDeque;

use anyhow::{ensure, Result};
use boxel_core::{Aabb, FrameView};
use boxel_nn::GridIndex;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// connectivity distance, meters (inclusive)
    pub distance_threshold: f32,
    /// components with fewer members are discarded
    pub min_cluster_size: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { distance_threshold: 0.05, min_cluster_size: 30 }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.distance_threshold.is_finite() && self.distance_threshold > 0.0,
            "distance_threshold must be strictly positive, got {}",
            self.distance_threshold
        );
        Ok(())
    }
}

/// Cluster a frame's points and return one bounding box per cluster.
///
/// Components grow by breadth-first search seeded from the first unvisited
/// point in input order, and boxes come out in ascending seed order, so
/// identical input and config give identical output. A chain of points each
/// within threshold of the next joins transitively, however far apart the
/// endpoints end up.
///
/// Pure function of its arguments: no state survives the call.
pub fn find_clusters(points: FrameView<'_>, cfg: &ClusterConfig) -> Result<Vec<Aabb>> {
    cfg.validate()?;
    if points.is_empty() {
        return Ok(Vec::new());
    }

    let index = GridIndex::build(points, cfg.distance_threshold);
    let mut visited = vec![false; points.len()];
    let mut queue = VecDeque::new();
    let mut members = Vec::new();
    let mut neighbors = Vec::new();
    let mut boxes = Vec::new();

    for seed in 0..points.len() {
        if visited[seed] { continue; }
        visited[seed] = true;
        queue.push_back(seed);
        members.clear();

        while let Some(i) = queue.pop_front() {
            members.push(i);
            index.radius_into(i, cfg.distance_threshold, &mut neighbors);
            for &j in &neighbors {
                if !visited[j] {
                    visited[j] = true;
                    queue.push_back(j);
                }
            }
        }

        if members.len() < cfg.min_cluster_size { continue; }
        boxes.push(fold_aabb(points, &members));
    }

    debug!("clustered {} points into {} boxes", points.len(), boxes.len());
    Ok(boxes)
}

/// Reference implementation: O(n²) pairwise connectivity, no spatial index.
/// Produces the identical partition and boxes as [`find_clusters`] for any
/// valid input; the grid path is a performance option, not a behavior change.
pub fn find_clusters_naive(points: FrameView<'_>, cfg: &ClusterConfig) -> Result<Vec<Aabb>> {
    cfg.validate()?;
    if points.is_empty() {
        return Ok(Vec::new());
    }

    let r2 = cfg.distance_threshold * cfg.distance_threshold;
    let mut visited = vec![false; points.len()];
    let mut queue = VecDeque::new();
    let mut members = Vec::new();
    let mut boxes = Vec::new();

    for seed in 0..points.len() {
        if visited[seed] { continue; }
        visited[seed] = true;
        queue.push_back(seed);
        members.clear();

        while let Some(i) = queue.pop_front() {
            members.push(i);
            for j in 0..points.len() {
                if !visited[j] && dist2(points, i, j) <= r2 {
                    visited[j] = true;
                    queue.push_back(j);
                }
            }
        }

        if members.len() < cfg.min_cluster_size { continue; }
        boxes.push(fold_aabb(points, &members));
    }
    Ok(boxes)
}

fn fold_aabb(points: FrameView<'_>, members: &[usize]) -> Aabb {
    let mut aabb = Aabb::from_point(corner(points, members[0]));
    for &i in &members[1..] {
        aabb.merge(corner(points, i));
    }
    aabb
}

#[inline]
fn corner(v: FrameView<'_>, i: usize) -> [f32; 3] {
    [v.x[i], v.y[i], v.z[i]]
}

#[inline]
fn dist2(v: FrameView<'_>, i: usize, j: usize) -> f32 {
    (v.x[i] - v.x[j]).powi(2) + (v.y[i] - v.y[j]).powi(2) + (v.z[i] - v.z[j]).powi(2)
}
