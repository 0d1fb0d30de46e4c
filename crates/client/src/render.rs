use cubeconnect::{Renderer, WorldSnapshot};
use glam::Vec3;

/// Frames between camera reports at info level.
const REPORT_INTERVAL: u64 = 120;

/// Render sink for headless runs. Snapshot transforms are paired with the
/// registered drawables by position and logged instead of drawn.
#[derive(Debug)]
pub struct LogRenderer {
    drawables: Vec<String>,
    frames: u64,
    camera_position: Option<Vec3>,
}

impl LogRenderer {
    pub fn new(drawables: Vec<String>) -> Self {
        Self {
            drawables,
            frames: 0,
            camera_position: None,
        }
    }

    pub fn with_cubes(count: usize) -> Self {
        Self::new((0..count).map(|i| format!("cube-{}", i)).collect())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn camera_position(&self) -> Option<Vec3> {
        self.camera_position
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, snapshot: &WorldSnapshot) {
        if snapshot.transforms.len() != self.drawables.len() {
            log::warn!(
                "Snapshot carries {} transforms for {} drawables, skipping frame",
                snapshot.transforms.len(),
                self.drawables.len()
            );
            return;
        }

        for (name, transform) in self.drawables.iter().zip(&snapshot.transforms) {
            log::trace!("{} at {}", name, transform.w_axis.truncate());
        }

        self.frames += 1;
        self.camera_position = Some(snapshot.camera.position);

        if self.frames % REPORT_INTERVAL == 1 {
            log::info!(
                "Frame {}: camera at {}, {} drawables",
                self.frames,
                snapshot.camera.position,
                self.drawables.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat4;

    use super::*;
    use cubeconnect::CameraState;

    #[test]
    fn test_renders_matching_snapshot() {
        let mut renderer = LogRenderer::with_cubes(2);
        let camera = CameraState {
            position: Vec3::new(1.0, 2.0, 3.0),
            ..Default::default()
        };

        renderer.render(&WorldSnapshot::new(camera, vec![Mat4::IDENTITY; 2]));

        assert_eq!(renderer.frames(), 1);
        assert_eq!(renderer.camera_position(), Some(Vec3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_skips_mismatched_snapshot() {
        let mut renderer = LogRenderer::with_cubes(3);
        renderer.render(&WorldSnapshot::new(CameraState::default(), vec![Mat4::IDENTITY]));

        assert_eq!(renderer.frames(), 0);
        assert_eq!(renderer.camera_position(), None);
    }
}
