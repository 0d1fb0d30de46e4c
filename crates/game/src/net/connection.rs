use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::channel::{ReliableReceiver, ReliableSender};
use super::protocol::CHANNEL_COUNT;

/// Handle naming one peer of a [`Session`](super::Session).
///
/// Handles are never reused within a session, so a stale handle can only
/// ever fail to resolve; it cannot alias a newer peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Connection(u32);

impl Connection {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

#[derive(Debug)]
pub(crate) struct Peer {
    pub connection: Connection,
    pub addr: SocketAddr,
    pub salt: u64,
    pub state: PeerState,
    pub senders: Vec<ReliableSender>,
    pub receivers: Vec<ReliableReceiver>,
    pub last_receive_time: Instant,
    pub last_send_time: Instant,
    pub reject_reason: Option<String>,
}

impl Peer {
    fn new(connection: Connection, addr: SocketAddr, salt: u64, state: PeerState) -> Self {
        let now = Instant::now();
        Self {
            connection,
            addr,
            salt,
            state,
            senders: (0..CHANNEL_COUNT).map(|_| ReliableSender::new()).collect(),
            receivers: (0..CHANNEL_COUNT).map(|_| ReliableReceiver::new()).collect(),
            last_receive_time: now,
            last_send_time: now,
            reject_reason: None,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.duration_since(self.last_receive_time) > timeout
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_receive_time = now;
    }

    pub fn in_flight(&self) -> usize {
        self.senders.iter().map(ReliableSender::in_flight).sum()
    }
}

#[derive(Debug)]
pub(crate) struct PeerTable {
    by_addr: HashMap<SocketAddr, Connection>,
    peers: HashMap<Connection, Peer>,
    next_connection_id: u32,
    max_peers: usize,
}

impl PeerTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            by_addr: HashMap::new(),
            peers: HashMap::new(),
            next_connection_id: 1,
            max_peers,
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.peers.len() < self.max_peers
    }

    pub fn insert(&mut self, addr: SocketAddr, salt: u64, state: PeerState) -> Option<Connection> {
        if !self.has_free_slot() || self.by_addr.contains_key(&addr) {
            return None;
        }

        let connection = Connection(self.next_connection_id);
        self.next_connection_id += 1;

        self.peers
            .insert(connection, Peer::new(connection, addr, salt, state));
        self.by_addr.insert(addr, connection);

        Some(connection)
    }

    pub fn lookup(&self, addr: &SocketAddr) -> Option<Connection> {
        self.by_addr.get(addr).copied()
    }

    pub fn get(&self, connection: Connection) -> Option<&Peer> {
        self.peers.get(&connection)
    }

    pub fn get_mut(&mut self, connection: Connection) -> Option<&mut Peer> {
        self.peers.get_mut(&connection)
    }

    pub fn remove(&mut self, connection: Connection) -> Option<Peer> {
        let peer = self.peers.remove(&connection)?;
        self.by_addr.remove(&peer.addr);
        Some(peer)
    }

    pub fn connections(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> = self.peers.keys().copied().collect();
        connections.sort();
        connections
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_handles_are_never_reused() {
        let mut table = PeerTable::new(2);

        let first = table.insert(addr(1000), 1, PeerState::Connected).unwrap();
        table.remove(first);
        let second = table.insert(addr(1000), 2, PeerState::Connected).unwrap();

        assert_ne!(first, second);
        assert!(table.get(first).is_none());
        assert_eq!(table.lookup(&addr(1000)), Some(second));
    }

    #[test]
    fn test_table_respects_peer_limit() {
        let mut table = PeerTable::new(1);

        assert!(table.insert(addr(1000), 1, PeerState::Connecting).is_some());
        assert!(!table.has_free_slot());
        assert!(table.insert(addr(1001), 2, PeerState::Connecting).is_none());
    }

    #[test]
    fn test_duplicate_address_is_refused() {
        let mut table = PeerTable::new(4);
        table.insert(addr(1000), 1, PeerState::Connected).unwrap();
        assert!(table.insert(addr(1000), 9, PeerState::Connected).is_none());
        assert_eq!(table.connections().len(), 1);
    }

    #[test]
    fn test_connected_count_ignores_pending_peers() {
        let mut table = PeerTable::new(4);
        table.insert(addr(1000), 1, PeerState::Connecting).unwrap();
        table.insert(addr(1001), 2, PeerState::Connected).unwrap();
        assert_eq!(table.connected_count(), 1);
        assert_eq!(table.connections().len(), 2);
    }

    #[test]
    fn test_peer_timeout() {
        let mut table = PeerTable::new(1);
        let connection = table.insert(addr(1000), 1, PeerState::Connected).unwrap();
        let peer = table.get_mut(connection).unwrap();

        let now = Instant::now();
        peer.touch(now);
        assert!(!peer.is_timed_out(Duration::from_secs(1), now));
        assert!(peer.is_timed_out(Duration::from_secs(1), now + Duration::from_secs(2)));
    }
}
