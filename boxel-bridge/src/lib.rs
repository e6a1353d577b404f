//! boxel-bridge — one-shot frame processing for embedding hosts.

use anyhow::Result;
use boxel_cluster::find_clusters;
use boxel_core::{Aabb, DepthFrame};
use boxel_session::{filter_confidence, PipelineConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameReport {
    pub points_in: usize,
    pub points_kept: usize,
    pub boxes: Vec<Aabb>,
    /// member count of the biggest cluster; 0 when none survived
    pub largest_cluster: usize,
}

/// One frame in, one report out. A host render loop calls this once per
/// frame and draws `boxes`; all state lives with the caller.
pub fn process_frame(frame: &DepthFrame, cfg: &PipelineConfig) -> Result<FrameReport> {
    cfg.validate()?;
    let kept = filter_confidence(frame, cfg.min_confidence);
    let boxes = find_clusters((&kept).into(), &cfg.cluster)?;
    let largest_cluster = boxes.iter().map(|b| b.point_count).max().unwrap_or(0);
    Ok(FrameReport {
        points_in: frame.len(),
        points_kept: kept.len(),
        boxes,
        largest_cluster,
    })
}
