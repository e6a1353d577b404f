//! boxel-core — frame data model and shared geometry types.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// One depth sample: camera-space position plus the source's confidence score.
/// Produced fresh each frame; never retained across frames.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub confidence: f32,
}

impl DepthPoint {
    pub fn new(x: f32, y: f32, z: f32, confidence: f32) -> Self {
        Self { x, y, z, confidence }
    }
    pub fn position(&self) -> Point3<f32> { Point3::new(self.x, self.y, self.z) }
}

/// Structure-of-Arrays depth frame.
/// Every point carries a confidence, so it lives as a hot column next to
/// x/y/z instead of an optional attribute map.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct DepthFrame {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub confidence: Vec<f32>,
}

impl DepthFrame {
    pub fn len(&self) -> usize { self.x.len() }
    pub fn is_empty(&self) -> bool { self.x.is_empty() }
    pub fn push(&mut self, px: f32, py: f32, pz: f32, conf: f32) {
        self.x.push(px); self.y.push(py); self.z.push(pz); self.confidence.push(conf);
    }
    pub fn push_point(&mut self, p: DepthPoint) { self.push(p.x, p.y, p.z, p.confidence) }
    pub fn reserve(&mut self, n: usize) {
        self.x.reserve(n); self.y.reserve(n); self.z.reserve(n); self.confidence.reserve(n);
    }
    pub fn point(&self, i: usize) -> DepthPoint {
        DepthPoint { x: self.x[i], y: self.y[i], z: self.z[i], confidence: self.confidence[i] }
    }
    pub fn iter(&self) -> impl Iterator<Item = DepthPoint> + '_ {
        (0..self.len()).map(move |i| self.point(i))
    }
}

impl FromIterator<DepthPoint> for DepthFrame {
    fn from_iter<T: IntoIterator<Item = DepthPoint>>(iter: T) -> Self {
        let mut f = DepthFrame::default();
        for p in iter { f.push_point(p); }
        f
    }
}

/// Zero-copy x/y/z view (slice-of-SoA). Geometry-only consumers — the
/// neighbor index and the clustering engine — never see confidence.
#[derive(Copy, Clone)]
pub struct FrameView<'a> {
    pub x: &'a [f32],
    pub y: &'a [f32],
    pub z: &'a [f32],
}

impl<'a> FrameView<'a> {
    pub fn len(&self) -> usize { self.x.len() }
    pub fn is_empty(&self) -> bool { self.x.is_empty() }
    pub fn position(&self, i: usize) -> Point3<f32> {
        Point3::new(self.x[i], self.y[i], self.z[i])
    }
}

impl<'a> From<&'a DepthFrame> for FrameView<'a> {
    fn from(f: &'a DepthFrame) -> Self { Self { x: &f.x, y: &f.y, z: &f.z } }
}

/// Axis-aligned bounding box over one cluster of points.
/// min <= max on every axis; `point_count` >= 1 (boxes are born from a first
/// point, never empty).
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
    pub point_count: usize,
}

impl Aabb {
    pub fn from_point(p: [f32; 3]) -> Self { Self { min: p, max: p, point_count: 1 } }

    /// Fold another member point into the box.
    pub fn merge(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
        self.point_count += 1;
    }

    pub fn contains(&self, p: [f32; 3]) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    pub fn center(&self) -> Point3<f32> {
        Point3::new(
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        )
    }

    pub fn extent(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}
