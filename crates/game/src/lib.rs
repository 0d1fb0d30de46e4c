pub mod codec;
pub mod net;
pub mod pacer;
pub mod sync;

pub use codec::{CameraState, DecodeError, IdentityAssignment, InputSample, Keys, WorldSnapshot};
pub use net::{
    CHANNEL_COUNT, CONTROL_CHANNEL, ConnectError, Connection, DEFAULT_PORT, Delivery, Event,
    InitError, NetworkContext, NetworkStats, PacketLossSimulation, PeerState, Role, STATE_CHANNEL,
    SendError, Session, SessionConfig, Transport, TransportError,
};
pub use pacer::FramePacer;
pub use sync::{
    ClientRecord, ClientState, ClientSync, ClientSyncStats, InputSource, PeerPhase, Renderer,
    ServerSync, Simulation, TickReport,
};
