use glam::{Mat4, Vec3};

use super::DecodeError;

const MATRIX_FLOATS: usize = 16;
const HEADER_FLOATS: usize = 2 * MATRIX_FLOATS + 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub camera_to_clip: Mat4,
    pub world_to_camera: Mat4,
    pub position: Vec3,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            camera_to_clip: Mat4::IDENTITY,
            world_to_camera: Mat4::IDENTITY,
            position: Vec3::ZERO,
        }
    }
}

impl CameraState {
    /// Combined world-to-clip transform, as a renderer would upload it.
    pub fn view_projection(&self) -> Mat4 {
        self.camera_to_clip * self.world_to_camera
    }
}

/// Full authoritative render state for one server tick.
///
/// `transforms` holds one local-to-world matrix per registered drawable, in
/// registration order. The wire layout does not carry the count, so both
/// ends must agree on it out of band; [`WorldSnapshot::decode`] takes the
/// locally registered count and rejects anything that does not match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldSnapshot {
    pub camera: CameraState,
    pub transforms: Vec<Mat4>,
}

impl WorldSnapshot {
    pub fn new(camera: CameraState, transforms: Vec<Mat4>) -> Self {
        Self { camera, transforms }
    }

    pub fn encoded_len(drawable_count: usize) -> usize {
        (HEADER_FLOATS + drawable_count * MATRIX_FLOATS) * size_of::<f32>()
    }

    /// Most drawables whose snapshot still fits in `max_bytes`.
    pub fn max_drawables(max_bytes: usize) -> usize {
        (max_bytes / size_of::<f32>()).saturating_sub(HEADER_FLOATS) / MATRIX_FLOATS
    }

    pub fn drawable_count(&self) -> usize {
        self.transforms.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut floats =
            Vec::with_capacity(HEADER_FLOATS + self.transforms.len() * MATRIX_FLOATS);
        floats.extend_from_slice(&self.camera.camera_to_clip.to_cols_array());
        floats.extend_from_slice(&self.camera.world_to_camera.to_cols_array());
        floats.extend_from_slice(&self.camera.position.to_array());
        for transform in &self.transforms {
            floats.extend_from_slice(&transform.to_cols_array());
        }
        bytemuck::cast_slice::<f32, u8>(&floats).to_vec()
    }

    pub fn decode(bytes: &[u8], drawable_count: usize) -> Result<Self, DecodeError> {
        let expected = Self::encoded_len(drawable_count);
        if bytes.len() != expected {
            return Err(DecodeError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }

        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(bytes);
        let (header, body) = floats.split_at(HEADER_FLOATS);

        let camera = CameraState {
            camera_to_clip: Mat4::from_cols_slice(&header[..MATRIX_FLOATS]),
            world_to_camera: Mat4::from_cols_slice(&header[MATRIX_FLOATS..2 * MATRIX_FLOATS]),
            position: Vec3::from_slice(&header[2 * MATRIX_FLOATS..]),
        };

        let transforms = body
            .chunks_exact(MATRIX_FLOATS)
            .map(Mat4::from_cols_slice)
            .collect();

        Ok(Self { camera, transforms })
    }
}
