//! Fixed-layout wire records exchanged between client and server.
//!
//! No record carries a type tag or version: the receiver knows which record
//! to expect from its own state and validates it by exact byte length.
//! Fields are written in native byte order, so both ends must share
//! endianness.

mod identity;
mod input;
mod snapshot;

pub use identity::IdentityAssignment;
pub use input::{InputSample, Keys};
pub use snapshot::{CameraState, WorldSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

fn read_record<T: bytemuck::Pod>(bytes: &[u8]) -> Result<T, DecodeError> {
    bytemuck::try_pod_read_unaligned(bytes).map_err(|_| DecodeError::SizeMismatch {
        expected: size_of::<T>(),
        actual: bytes.len(),
    })
}
