use std::io;

use super::connection::Connection;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("network subsystem unavailable: {0}")]
    Unavailable(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("no free peer slot on the local host")]
    NoPeerSlot,
    #[error("no connect acknowledgment before the timeout")]
    Timeout,
    #[error("peer rejected the connection: {0}")]
    PeerRejected(String),
    #[error("socket error while connecting: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection {0} is not connected")]
    NotConnected(Connection),
    #[error("channel {0} does not exist")]
    InvalidChannel(u8),
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}
