use std::collections::HashMap;

use glam::{EulerRot, Mat4, Quat, Vec2, Vec3};

use cubeconnect::{CameraState, InputSample, Keys, Simulation};

const MOVE_SPEED: f32 = 5.0;
const FAST_MOVE_SPEED: f32 = 10.0;
const MOUSE_SENSITIVITY: f32 = 0.003;
const PITCH_LIMIT: f32 = 1.5;
const SPIN_RATE: f32 = 0.8;

const FOV_Y: f32 = std::f32::consts::FRAC_PI_3;
const ASPECT_RATIO: f32 = 16.0 / 9.0;
const NEAR: f32 = 0.1;
const FAR: f32 = 100.0;

#[derive(Debug, Clone)]
struct Drawable {
    position: Vec3,
    scale: f32,
    spin_axis: Vec3,
    angle: f32,
}

impl Drawable {
    fn local_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::splat(self.scale),
            Quat::from_axis_angle(self.spin_axis, self.angle),
            self.position,
        )
    }
}

/// Demo world: a row of spinning cubes and one shared fly camera steered by
/// whichever clients sent input this tick.
#[derive(Debug)]
pub struct Scene {
    drawables: Vec<Drawable>,
    camera_position: Vec3,
    yaw: f32,
    pitch: f32,
    pending: Vec<InputSample>,
    last_mouse: HashMap<u32, Vec2>,
}

impl Scene {
    pub fn new(drawable_count: usize) -> Self {
        let center = (drawable_count.max(1) - 1) as f32 / 2.0;
        let drawables = (0..drawable_count)
            .map(|i| Drawable {
                position: Vec3::new((i as f32 - center) * 2.5, 0.0, -5.0),
                scale: 1.0,
                spin_axis: Vec3::new(1.0, 1.0 + i as f32, 0.5).normalize(),
                angle: 0.0,
            })
            .collect();

        Self {
            drawables,
            camera_position: Vec3::new(0.0, 1.5, 4.0),
            yaw: 0.0,
            pitch: 0.0,
            pending: Vec::new(),
            last_mouse: HashMap::new(),
        }
    }

    pub fn drawable_count(&self) -> usize {
        self.drawables.len()
    }

    fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0)
    }

    fn movement(&self, sample: &InputSample) -> Vec3 {
        let mut local = Vec3::ZERO;
        if sample.is_pressed(Keys::F) {
            local.z -= 1.0;
        }
        if sample.is_pressed(Keys::B) {
            local.z += 1.0;
        }
        if sample.is_pressed(Keys::R) {
            local.x += 1.0;
        }
        if sample.is_pressed(Keys::L) {
            local.x -= 1.0;
        }
        if sample.is_pressed(Keys::U) {
            local.y += 1.0;
        }
        if sample.is_pressed(Keys::D) {
            local.y -= 1.0;
        }

        if local.length_squared() < 0.001 {
            return Vec3::ZERO;
        }

        let speed = if sample.is_pressed(Keys::SHIFT) {
            FAST_MOVE_SPEED
        } else {
            MOVE_SPEED
        };
        let yaw_only = Quat::from_rotation_y(self.yaw);
        yaw_only * local.normalize() * speed
    }
}

impl Simulation for Scene {
    fn apply_input(&mut self, sample: &InputSample) {
        if let Some(last) = self.last_mouse.insert(sample.client_id, sample.mouse_position) {
            let delta = sample.mouse_position - last;
            self.yaw -= delta.x * MOUSE_SENSITIVITY;
            self.pitch = (self.pitch - delta.y * MOUSE_SENSITIVITY).clamp(-PITCH_LIMIT, PITCH_LIMIT);
        }
        self.pending.push(*sample);
    }

    fn advance(&mut self, dt: f32) {
        for sample in std::mem::take(&mut self.pending) {
            self.camera_position += self.movement(&sample) * dt;
        }

        for drawable in &mut self.drawables {
            drawable.angle = (drawable.angle + SPIN_RATE * dt) % std::f32::consts::TAU;
        }
    }

    fn camera(&self) -> CameraState {
        let forward = self.orientation() * Vec3::NEG_Z;
        CameraState {
            camera_to_clip: Mat4::perspective_rh(FOV_Y, ASPECT_RATIO, NEAR, FAR),
            world_to_camera: Mat4::look_to_rh(self.camera_position, forward, Vec3::Y),
            position: self.camera_position,
        }
    }

    fn transforms(&self) -> Vec<Mat4> {
        self.drawables.iter().map(Drawable::local_to_world).collect()
    }

    fn client_left(&mut self, client_id: u32) {
        self.last_mouse.remove(&client_id);
        self.pending.retain(|s| s.client_id != client_id);
    }
}
