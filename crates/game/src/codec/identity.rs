use super::{DecodeError, read_record};

/// Sent once by the server, right after the handshake, to tell a client
/// which identity to stamp on its input samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityAssignment {
    pub client_id: u32,
}

impl IdentityAssignment {
    pub const SIZE: usize = size_of::<u32>();

    pub fn new(client_id: u32) -> Self {
        Self { client_id }
    }

    pub fn encode(&self) -> Vec<u8> {
        bytemuck::bytes_of(&self.client_id).to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        read_record::<u32>(bytes).map(Self::new)
    }
}
