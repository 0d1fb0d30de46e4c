mod channel;
mod connection;
mod context;
mod error;
mod protocol;
mod session;
mod stats;

pub use channel::{DueFrame, Fragment, ReliableReceiver, ReliableSender};
pub use connection::{Connection, PeerState};
pub use context::NetworkContext;
pub use error::{ConnectError, InitError, SendError, TransportError};
pub use protocol::{
    CHANNEL_COUNT, CONTROL_CHANNEL, DEFAULT_PORT, Frame, FrameBody, FrameError, FrameHeader,
    MAX_DATAGRAM_SIZE, MAX_FRAGMENT_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION,
    STATE_CHANNEL, sequence_greater_than,
};
pub use session::{Delivery, Event, Role, Session, SessionConfig, Transport};
pub use stats::{NetworkStats, PacketLossSimulation};

/// Brings the network subsystem up. Keep the returned context alive for as
/// long as any session is in use.
pub fn initialize() -> Result<NetworkContext, InitError> {
    NetworkContext::initialize()
}
