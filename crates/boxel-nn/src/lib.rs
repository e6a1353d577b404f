//! boxel-nn — neighbor index for 3D frames (exact uniform grid).

use boxel_core::FrameView;
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use smallvec::SmallVec;

#[derive(Copy, Clone, Debug)]
pub struct Neighbor {
    pub idx: usize,
    pub dist2: f32,
}

/// Geometry-first neighborhood queries over a frame.
pub trait NeighborIndex3 {
    /// All points within `r` of point `i` (inclusive), excluding `i` itself.
    fn radius(&self, i: usize, r: f32) -> SmallVec<[Neighbor; 128]>;
}

/// Uniform grid hash, cell size = r (good for radius queries).
/// Queries are exact for any radius <= the build cell size.
pub struct GridIndex<'a> {
    pts: FrameView<'a>,
    inv_cell: f32,
    buckets: HashMap<[i32; 3], Vec<usize>>,
}

impl<'a> GridIndex<'a> {
    pub fn build(pts: FrameView<'a>, cell: f32) -> Self {
        let inv = 1.0 / cell.max(1e-12);
        let mut buckets: HashMap<[i32; 3], Vec<usize>> = HashMap::new();
        for i in 0..pts.len() {
            let key = [
                (pts.x[i] * inv).floor() as i32,
                (pts.y[i] * inv).floor() as i32,
                (pts.z[i] * inv).floor() as i32,
            ];
            match buckets.entry(key) {
                Entry::Vacant(v) => { v.insert(vec![i]); }
                Entry::Occupied(mut o) => o.get_mut().push(i),
            }
        }
        Self { pts, inv_cell: inv, buckets }
    }

    fn key_of(&self, i: usize) -> [i32; 3] {
        [
            (self.pts.x[i] * self.inv_cell).floor() as i32,
            (self.pts.y[i] * self.inv_cell).floor() as i32,
            (self.pts.z[i] * self.inv_cell).floor() as i32,
        ]
    }

    /// Same query as [`NeighborIndex3::radius`] but writing indices into
    /// `out` (cleared first). Sweeps that query once per point reuse one
    /// buffer and keep the hot loop allocation-free.
    pub fn radius_into(&self, i: usize, r: f32, out: &mut Vec<usize>) {
        out.clear();
        let p = [self.pts.x[i], self.pts.y[i], self.pts.z[i]];
        let key = self.key_of(i);
        let r2 = r * r;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let k = [key[0] + dx, key[1] + dy, key[2] + dz];
                    if let Some(bin) = self.buckets.get(&k) {
                        for &j in bin {
                            if j == i { continue; }
                            let d2 = (self.pts.x[j] - p[0]).powi(2)
                                + (self.pts.y[j] - p[1]).powi(2)
                                + (self.pts.z[j] - p[2]).powi(2);
                            if d2 <= r2 { out.push(j); }
                        }
                    }
                }
            }
        }
    }
}

impl<'a> NeighborIndex3 for GridIndex<'a> {
    fn radius(&self, i: usize, r: f32) -> SmallVec<[Neighbor; 128]> {
        let mut out = SmallVec::<[Neighbor; 128]>::new();
        let p = [self.pts.x[i], self.pts.y[i], self.pts.z[i]];
        let key = self.key_of(i);
        let r2 = r * r;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let k = [key[0] + dx, key[1] + dy, key[2] + dz];
                    if let Some(bin) = self.buckets.get(&k) {
                        for &j in bin {
                            if j == i { continue; }
                            let d2 = (self.pts.x[j] - p[0]).powi(2)
                                + (self.pts.y[j] - p[1]).powi(2)
                                + (self.pts.z[j] - p[2]).powi(2);
                            if d2 <= r2 { out.push(Neighbor { idx: j, dist2: d2 }); }
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxel_core::DepthFrame;

    fn frame(pts: &[[f32; 3]]) -> DepthFrame {
        let mut f = DepthFrame::default();
        for p in pts { f.push(p[0], p[1], p[2], 1.0); }
        f
    }

    #[test]
    fn radius_is_inclusive_at_exact_distance() {
        let f = frame(&[[0.0, 0.0, 0.0], [0.1, 0.0, 0.0]]);
        let idx = GridIndex::build((&f).into(), 0.1);
        let hits = idx.radius(0, 0.1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].idx, 1);
    }

    #[test]
    fn finds_neighbors_across_cell_boundaries() {
        // 0.09 apart but in adjacent grid cells for cell size 0.1
        let f = frame(&[[0.05, 0.0, 0.0], [0.14, 0.0, 0.0], [0.9, 0.9, 0.9]]);
        let idx = GridIndex::build((&f).into(), 0.1);
        let mut out = Vec::new();
        idx.radius_into(0, 0.1, &mut out);
        assert_eq!(out, vec![1]);
        idx.radius_into(2, 0.1, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn query_never_returns_the_query_point() {
        let f = frame(&[[0.0; 3], [0.0; 3], [0.0; 3]]);
        let idx = GridIndex::build((&f).into(), 0.1);
        let hits = idx.radius(1, 0.1);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|n| n.idx != 1));
    }
}
