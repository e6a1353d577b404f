//! boxel-viewer — wireframe box view boundary.

use anyhow::Result;
use boxel_core::Aabb;
use boxel_session::BoxSink;

/// Placeholder viewer until we wire egui/wgpu or Rerun.
pub fn show(_title: &str, _boxes: &[Aabb]) -> Result<()> {
    // no-op
    Ok(())
}

/// Accepts boxes and drops them. Stands in where a host renderer would
/// draw wireframes.
#[derive(Default)]
pub struct NullSink;

impl BoxSink for NullSink {
    fn draw(&mut self, _boxes: &[Aabb]) -> Result<()> {
        Ok(())
    }
}
