use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use super::{DecodeError, read_record};

bitflags! {
    /// Keys and mouse buttons sampled once per client tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Keys: u32 {
        const F = 1 << 0;
        const B = 1 << 1;
        const R = 1 << 2;
        const L = 1 << 3;
        const U = 1 << 4;
        const D = 1 << 5;
        const SHIFT = 1 << 6;
        const MOUSE_LEFT = 1 << 7;
        const MOUSE_RIGHT = 1 << 8;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct InputRecord {
    keys: u32,
    mouse_x: f32,
    mouse_y: f32,
    client_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputSample {
    pub keys: Keys,
    pub mouse_position: Vec2,
    pub client_id: u32,
}

impl InputSample {
    pub const SIZE: usize = size_of::<InputRecord>();

    pub fn new(keys: Keys, mouse_position: Vec2, client_id: u32) -> Self {
        Self {
            keys,
            mouse_position,
            client_id,
        }
    }

    pub fn with_identity(mut self, client_id: u32) -> Self {
        self.client_id = client_id;
        self
    }

    #[inline]
    pub fn is_pressed(&self, keys: Keys) -> bool {
        self.keys.contains(keys)
    }

    #[inline]
    pub fn set_pressed(&mut self, keys: Keys, pressed: bool) {
        self.keys.set(keys, pressed);
    }

    pub fn encode(&self) -> Vec<u8> {
        let record = InputRecord {
            keys: self.keys.bits(),
            mouse_x: self.mouse_position.x,
            mouse_y: self.mouse_position.y,
            client_id: self.client_id,
        };
        bytemuck::bytes_of(&record).to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let record = read_record::<InputRecord>(bytes)?;
        Ok(Self {
            keys: Keys::from_bits_truncate(record.keys),
            mouse_position: Vec2::new(record.mouse_x, record.mouse_y),
            client_id: record.client_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_round_trip() {
        let mut sample = InputSample::new(Keys::F, Vec2::new(10.0, 20.0), 1);
        sample.set_pressed(Keys::SHIFT | Keys::MOUSE_RIGHT, true);

        let decoded = InputSample::decode(&sample.encode()).unwrap();
        assert_eq!(decoded, sample);
        assert!(decoded.is_pressed(Keys::F));
        assert!(decoded.is_pressed(Keys::SHIFT));
        assert!(!decoded.is_pressed(Keys::B));
    }

    #[test]
    fn test_input_decode_ignores_unknown_key_bits() {
        let mut bytes = InputSample::new(Keys::U, Vec2::ZERO, 3).encode();
        bytes[..4].copy_from_slice(&(Keys::U.bits() | 1 << 31).to_ne_bytes());
        let decoded = InputSample::decode(&bytes).unwrap();
        assert_eq!(decoded.keys, Keys::U);
        assert_eq!(decoded.client_id, 3);
    }

    #[test]
    fn test_input_size_mismatch() {
        let bytes = InputSample::default().encode();
        assert_eq!(
            InputSample::decode(&bytes[..15]),
            Err(DecodeError::SizeMismatch {
                expected: 16,
                actual: 15
            })
        );

        let mut long = bytes.clone();
        long.push(0);
        assert!(InputSample::decode(&long).is_err());
    }

    #[test]
    fn test_identity_stamp() {
        let sample = InputSample::new(Keys::D, Vec2::new(1.0, 2.0), 0).with_identity(9);
        assert_eq!(sample.client_id, 9);
        assert_eq!(sample.keys, Keys::D);
    }
}
