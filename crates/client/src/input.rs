use glam::Vec2;

use cubeconnect::{InputSample, InputSource, Keys};

/// Headless stand-in for window input: holds a fixed key set and sweeps the
/// mouse in a slow circle so the server camera visibly turns.
#[derive(Debug)]
pub struct ScriptedInput {
    keys: Keys,
    center: Vec2,
    radius: f32,
    angular_step: f32,
    tick: u64,
}

impl ScriptedInput {
    pub fn new(keys: Keys) -> Self {
        Self {
            keys,
            center: Vec2::new(640.0, 360.0),
            radius: 120.0,
            angular_step: 0.02,
            tick: 0,
        }
    }

    fn mouse_position(&self) -> Vec2 {
        let angle = self.tick as f32 * self.angular_step;
        let (sin, cos) = angle.sin_cos();
        self.center + Vec2::new(cos, sin) * self.radius
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self) -> InputSample {
        let sample = InputSample::new(self.keys, self.mouse_position(), 0);
        self.tick += 1;
        sample
    }
}

/// Parses key names such as `f`, `shift` or `mouse_left`.
pub fn parse_keys<S: AsRef<str>>(names: &[S]) -> anyhow::Result<Keys> {
    let mut keys = Keys::empty();
    for name in names {
        let name = name.as_ref().trim();
        if name.is_empty() {
            continue;
        }
        let key = Keys::from_name(&name.to_ascii_uppercase())
            .ok_or_else(|| anyhow::anyhow!("unknown key '{}'", name))?;
        keys |= key;
    }
    Ok(keys)
}
