use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const MAX_DATAGRAM_SIZE: usize = 8192;
/// Largest payload slice one frame carries, so a frame fits a typical MTU.
/// Bigger reliable payloads travel as numbered fragments.
pub const MAX_FRAGMENT_SIZE: usize = 1200;
pub const MAX_PAYLOAD_SIZE: usize = 1 << 20;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x4355_4245;
pub const DEFAULT_PORT: u16 = 7777;

pub const CHANNEL_COUNT: u8 = 2;
/// Input samples, identity assignments and world snapshots.
pub const STATE_CHANNEL: u8 = 0;
/// Reserved for control traffic so it never queues behind state updates.
pub const CONTROL_CHANNEL: u8 = 1;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

const _: () = assert!(MAX_PAYLOAD_SIZE.div_ceil(MAX_FRAGMENT_SIZE) <= u16::MAX as usize);

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u32,
    /// Chosen by the client per connection attempt; frames from an older
    /// connection on the same address carry a different salt.
    pub salt: u64,
}

impl FrameHeader {
    pub fn new(salt: u64) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            salt,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum FrameBody {
    Connect { channel_count: u8 },
    Accept,
    Reject { reason: String },
    /// One fragment of a reliable payload. Fragments of a payload take
    /// consecutive sequence numbers, `fragment` counting from 0.
    Reliable {
        channel: u8,
        sequence: u32,
        fragment: u16,
        fragment_count: u16,
        payload: Vec<u8>,
    },
    Unreliable { channel: u8, payload: Vec<u8> },
    Ack { channel: u8, next_expected: u32 },
    Ping,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Frame {
    pub header: FrameHeader,
    pub body: FrameBody,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
}

impl Frame {
    pub fn new(salt: u64, body: FrameBody) -> Self {
        Self {
            header: FrameHeader::new(salt),
            body,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(FrameError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, FrameError> {
        // Datagrams land in an arbitrary byte buffer; archived data must be aligned.
        let mut aligned = AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(FrameError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(!sequence_greater_than(5, 5));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_reliable_frame_serialization() {
        let frame = Frame::new(
            0xfeed,
            FrameBody::Reliable {
                channel: STATE_CHANNEL,
                sequence: 7,
                fragment: 1,
                fragment_count: 3,
                payload: vec![1, 2, 3, 4],
            },
        );

        let bytes = frame.serialize().unwrap();
        let decoded = Frame::deserialize(&bytes).unwrap();

        assert!(decoded.header.is_valid());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_reject_reason_survives() {
        let frame = Frame::new(
            1,
            FrameBody::Reject {
                reason: "server full".to_string(),
            },
        );
        let decoded = Frame::deserialize(&frame.serialize().unwrap()).unwrap();
        assert_eq!(
            decoded.body,
            FrameBody::Reject {
                reason: "server full".to_string()
            }
        );
    }

    #[test]
    fn test_full_fragment_fits_datagram() {
        let frame = Frame::new(
            u64::MAX,
            FrameBody::Reliable {
                channel: STATE_CHANNEL,
                sequence: u32::MAX,
                fragment: u16::MAX,
                fragment_count: u16::MAX,
                payload: vec![0xab; MAX_FRAGMENT_SIZE],
            },
        );
        let bytes = frame.serialize().unwrap();
        assert!(bytes.len() <= MAX_DATAGRAM_SIZE);
        assert!(bytes.len() < 1500);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Frame::deserialize(&[0xde, 0xad, 0xbe, 0xef, 0, 1, 2]).is_err());
        assert!(Frame::deserialize(&[]).is_err());
    }

    #[test]
    fn test_foreign_header_is_invalid() {
        let mut header = FrameHeader::new(3);
        header.version = PROTOCOL_VERSION + 1;
        assert!(!header.is_valid());
    }
}
