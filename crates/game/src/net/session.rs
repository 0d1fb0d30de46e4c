use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use super::channel::{DueFrame, Fragment};
use super::connection::{Connection, PeerState, PeerTable};
use super::context::NetworkContext;
use super::error::{ConnectError, SendError, TransportError};
use super::protocol::{
    CHANNEL_COUNT, Frame, FrameBody, MAX_DATAGRAM_SIZE, MAX_FRAGMENT_SIZE, MAX_PAYLOAD_SIZE,
};
use super::stats::{NetworkStats, PacketLossSimulation, rand_u64};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(Connection),
    Receive {
        connection: Connection,
        channel: u8,
        payload: Vec<u8>,
    },
    Disconnect(Connection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Resent until acknowledged, released to the receiver in send order.
    /// Payloads larger than one frame are fragmented and reassembled.
    #[default]
    Reliable,
    /// Fire and forget. A payload too large for one frame is sent reliably.
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub peer_timeout: Duration,
    pub keepalive_interval: Duration,
    pub resend_interval: Duration,
    pub connect_retry_interval: Duration,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_millis(500),
            resend_interval: Duration::from_millis(100),
            connect_retry_interval: Duration::from_millis(250),
            packet_loss: None,
        }
    }
}

/// The operations the synchronizers need from a transport.
pub trait Transport {
    /// Drains the events that arrive within `timeout`. Returns as soon as at
    /// least one event is available; `Duration::ZERO` never blocks.
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Event>, TransportError>;

    /// Queues a payload. Nothing is guaranteed to be on the wire until
    /// [`Transport::flush`] (or the next poll).
    fn send(
        &mut self,
        connection: Connection,
        payload: &[u8],
        channel: u8,
        delivery: Delivery,
    ) -> Result<(), SendError>;

    /// Reliable send of the same payload to every connected peer.
    fn broadcast(&mut self, payload: &[u8], channel: u8) -> Result<(), SendError>;

    fn flush(&mut self) -> Result<(), TransportError>;

    fn disconnect(&mut self, connection: Connection);
}

/// A UDP host carrying reliable-ordered channels to a bounded set of peers.
pub struct Session {
    socket: UdpSocket,
    local_addr: SocketAddr,
    role: Role,
    config: SessionConfig,
    peers: PeerTable,
    outgoing: Vec<(SocketAddr, Frame)>,
    events: VecDeque<Event>,
    stats: NetworkStats,
    recv_buffer: Vec<u8>,
    _context: NetworkContext,
}

impl Session {
    /// A host with a single peer slot, bound to an ephemeral port.
    pub fn client(context: &NetworkContext, config: SessionConfig) -> Result<Self, TransportError> {
        Self::bind(context, (Ipv4Addr::UNSPECIFIED, 0), Role::Client, 1, config)
    }

    pub fn listen(
        context: &NetworkContext,
        port: u16,
        max_clients: usize,
        config: SessionConfig,
    ) -> Result<Self, TransportError> {
        Self::bind(
            context,
            (Ipv4Addr::UNSPECIFIED, port),
            Role::Server,
            max_clients,
            config,
        )
    }

    pub fn bind<A: ToSocketAddrs>(
        context: &NetworkContext,
        addr: A,
        role: Role,
        max_peers: usize,
        config: SessionConfig,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        log::debug!(
            "{:?} session bound to {} ({} peer slots)",
            role,
            local_addr,
            max_peers
        );

        Ok(Self {
            socket,
            local_addr,
            role,
            config,
            peers: PeerTable::new(max_peers),
            outgoing: Vec::new(),
            events: VecDeque::new(),
            stats: NetworkStats::default(),
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE],
            _context: context.clone(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn peer_state(&self, connection: Connection) -> Option<PeerState> {
        self.peers.get(connection).map(|p| p.state)
    }

    pub fn peer_addr(&self, connection: Connection) -> Option<SocketAddr> {
        self.peers.get(connection).map(|p| p.addr)
    }

    /// Reliable frames queued or sent but not yet acknowledged. A fragmented
    /// payload counts once per fragment.
    pub fn in_flight(&self, connection: Connection) -> usize {
        self.peers.get(connection).map_or(0, |p| p.in_flight())
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.peers
            .connections()
            .into_iter()
            .filter(|c| self.peer_state(*c) == Some(PeerState::Connected))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.peers.connected_count()
    }

    /// Handshakes with `addr`, blocking for up to `timeout`. A timed-out
    /// attempt is reset on both ends rather than left half-open.
    pub fn connect<A: ToSocketAddrs>(
        &mut self,
        addr: A,
        timeout: Duration,
    ) -> Result<Connection, ConnectError> {
        let want_ipv4 = self.local_addr.is_ipv4();
        let addr = addr
            .to_socket_addrs()?
            .find(|a| a.is_ipv4() == want_ipv4)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no reachable address for peer")
            })?;

        let salt = rand_u64();
        let connection = self
            .peers
            .insert(addr, salt, PeerState::Connecting)
            .ok_or(ConnectError::NoPeerSlot)?;

        log::info!("Connecting to {} as {}", addr, connection);

        let deadline = Instant::now() + timeout;
        let mut next_attempt = Instant::now();

        loop {
            match self.peer_state(connection) {
                Some(PeerState::Connected) => {
                    log::info!("Connected to {}", addr);
                    return Ok(connection);
                }
                Some(PeerState::Connecting) => {}
                _ => {
                    let reason = self
                        .peers
                        .remove(connection)
                        .and_then(|p| p.reject_reason)
                        .unwrap_or_else(|| "connection closed".to_string());
                    log::warn!("Connection to {} rejected: {}", addr, reason);
                    return Err(ConnectError::PeerRejected(reason));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                log::warn!("Connection to {} timed out", addr);
                self.disconnect(connection);
                return Err(ConnectError::Timeout);
            }

            if now >= next_attempt {
                self.queue(
                    addr,
                    Frame::new(
                        salt,
                        FrameBody::Connect {
                            channel_count: CHANNEL_COUNT,
                        },
                    ),
                );
                self.transmit()?;
                next_attempt = now + self.config.connect_retry_interval;
            }

            let wait = deadline.min(next_attempt).saturating_duration_since(now);
            self.receive_datagrams(wait)?;
        }
    }

    pub fn poll(&mut self, timeout: Duration) -> Result<Vec<Event>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.service_peers(Instant::now());
            self.transmit()?;
            self.receive_datagrams(Duration::ZERO)?;

            let now = Instant::now();
            if !self.events.is_empty() || now >= deadline {
                break;
            }

            let wait = (deadline - now).min(self.config.resend_interval);
            self.receive_datagrams(wait)?;
        }

        self.transmit()?;
        Ok(self.events.drain(..).collect())
    }

    pub fn send(
        &mut self,
        connection: Connection,
        payload: &[u8],
        channel: u8,
        delivery: Delivery,
    ) -> Result<(), SendError> {
        check_payload(payload, channel)?;

        let peer = self
            .peers
            .get_mut(connection)
            .filter(|p| p.state == PeerState::Connected)
            .ok_or(SendError::NotConnected(connection))?;

        match delivery {
            Delivery::Unreliable if payload.len() > MAX_FRAGMENT_SIZE => {
                log::debug!(
                    "{}-byte unreliable payload exceeds one frame, sending reliably",
                    payload.len()
                );
                peer.senders[channel as usize].push(payload.to_vec());
            }
            Delivery::Reliable => {
                peer.senders[channel as usize].push(payload.to_vec());
            }
            Delivery::Unreliable => {
                let frame = Frame::new(
                    peer.salt,
                    FrameBody::Unreliable {
                        channel,
                        payload: payload.to_vec(),
                    },
                );
                let addr = peer.addr;
                self.queue(addr, frame);
            }
        }

        Ok(())
    }

    pub fn broadcast(&mut self, payload: &[u8], channel: u8) -> Result<(), SendError> {
        check_payload(payload, channel)?;

        for connection in self.connections() {
            self.send(connection, payload, channel, Delivery::Reliable)?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TransportError> {
        self.service_peers(Instant::now());
        self.transmit()?;
        Ok(())
    }

    /// Tells the peer we are leaving and forgets it. No Disconnect event is
    /// raised locally for a disconnect we initiated.
    pub fn disconnect(&mut self, connection: Connection) {
        if self.peer_state(connection) == Some(PeerState::Connected) {
            if let Err(e) = self.flush() {
                log::warn!("Failed to flush before disconnecting {}: {}", connection, e);
            }
        }

        let Some(peer) = self.peers.get_mut(connection) else {
            return;
        };
        peer.state = PeerState::Disconnecting;
        let (addr, salt) = (peer.addr, peer.salt);

        self.queue(addr, Frame::new(salt, FrameBody::Disconnect));
        if let Err(e) = self.transmit() {
            log::warn!("Failed to send disconnect to {}: {}", addr, e);
        }

        self.peers.remove(connection);
        log::info!("Disconnected {} ({})", connection, addr);
    }

    pub fn disconnect_all(&mut self) {
        for connection in self.peers.connections() {
            self.disconnect(connection);
        }
    }

    fn queue(&mut self, addr: SocketAddr, frame: Frame) {
        self.outgoing.push((addr, frame));
    }

    /// Drops a peer that went away on its own and reports it.
    fn drop_peer(&mut self, connection: Connection) {
        if let Some(peer) = self.peers.remove(connection) {
            if peer.state == PeerState::Connected {
                self.events.push_back(Event::Disconnect(connection));
            }
        }
    }

    fn service_peers(&mut self, now: Instant) {
        let timed_out: Vec<Connection> = self
            .peers
            .iter()
            .filter(|p| {
                p.state == PeerState::Connected && p.is_timed_out(self.config.peer_timeout, now)
            })
            .map(|p| p.connection)
            .collect();

        for connection in timed_out {
            log::warn!("Peer {} timed out", connection);
            self.drop_peer(connection);
        }

        let mut frames = Vec::new();
        for peer in self.peers.iter_mut() {
            if peer.state != PeerState::Connected {
                continue;
            }

            let queued_before = frames.len();
            for (index, sender) in peer.senders.iter_mut().enumerate() {
                for DueFrame {
                    sequence,
                    fragment,
                    payload,
                    is_resend,
                } in sender.due(now, self.config.resend_interval)
                {
                    if is_resend {
                        self.stats.resends += 1;
                    }
                    frames.push((
                        peer.addr,
                        Frame::new(
                            peer.salt,
                            FrameBody::Reliable {
                                channel: index as u8,
                                sequence,
                                fragment: fragment.index,
                                fragment_count: fragment.count,
                                payload,
                            },
                        ),
                    ));
                }
            }

            if frames.len() > queued_before {
                peer.last_send_time = now;
            } else if now.duration_since(peer.last_send_time) >= self.config.keepalive_interval {
                frames.push((peer.addr, Frame::new(peer.salt, FrameBody::Ping)));
                peer.last_send_time = now;
            }
        }

        self.outgoing.extend(frames);
    }

    fn transmit(&mut self) -> io::Result<()> {
        for (addr, frame) in std::mem::take(&mut self.outgoing) {
            let data = match frame.serialize() {
                Ok(data) => data,
                Err(e) => {
                    log::error!("Failed to serialize frame for {}: {}", addr, e);
                    continue;
                }
            };

            if self
                .config
                .packet_loss
                .as_ref()
                .is_some_and(PacketLossSimulation::should_drop)
            {
                self.stats.packets_dropped += 1;
                continue;
            }

            match self.socket.send_to(&data, addr) {
                Ok(bytes) => {
                    self.stats.packets_sent += 1;
                    self.stats.bytes_sent += bytes as u64;
                }
                Err(e) if is_transient(&e) => {
                    log::debug!("Datagram to {} not sent: {}", addr, e);
                    self.stats.packets_dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Waits up to `wait` for the first datagram, then drains whatever else
    /// is already queued on the socket.
    fn receive_datagrams(&mut self, wait: Duration) -> io::Result<()> {
        if !wait.is_zero() {
            self.socket.set_nonblocking(false)?;
            self.socket.set_read_timeout(Some(wait))?;
            let result = self.socket.recv_from(&mut self.recv_buffer);
            self.socket.set_nonblocking(true)?;

            match result {
                Ok((size, addr)) => self.handle_datagram(size, addr),
                Err(ref e) if is_transient(e) => {}
                Err(e) => return Err(e),
            }
        }

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => self.handle_datagram(size, addr),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if is_transient(e) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn handle_datagram(&mut self, size: usize, addr: SocketAddr) {
        self.stats.packets_received += 1;
        self.stats.bytes_received += size as u64;

        let frame = match Frame::deserialize(&self.recv_buffer[..size]) {
            Ok(frame) if frame.header.is_valid() => frame,
            Ok(_) => {
                log::debug!("Dropping datagram with foreign header from {}", addr);
                self.stats.packets_dropped += 1;
                return;
            }
            Err(e) => {
                log::debug!("Dropping malformed datagram from {}: {}", addr, e);
                self.stats.packets_dropped += 1;
                return;
            }
        };

        let salt = frame.header.salt;
        match frame.body {
            FrameBody::Connect { channel_count } => self.handle_connect(addr, salt, channel_count),
            body => match self.peers.lookup(&addr) {
                Some(connection) => self.handle_peer_frame(connection, salt, body),
                None => {
                    log::trace!("Ignoring frame from unknown address {}", addr);
                    self.stats.packets_dropped += 1;
                }
            },
        }
    }

    fn handle_connect(&mut self, addr: SocketAddr, salt: u64, channel_count: u8) {
        if self.role != Role::Server {
            return;
        }

        if let Some(existing) = self.peers.lookup(&addr) {
            if self.peers.get(existing).is_some_and(|p| p.salt == salt) {
                // Our accept was lost; the client is retrying.
                self.queue(addr, Frame::new(salt, FrameBody::Accept));
                return;
            }
            log::info!("{} reconnected from {}, dropping stale peer", existing, addr);
            self.drop_peer(existing);
        }

        if channel_count != CHANNEL_COUNT {
            log::warn!(
                "Rejecting {}: expects {} channels, we carry {}",
                addr,
                channel_count,
                CHANNEL_COUNT
            );
            self.queue(
                addr,
                Frame::new(
                    salt,
                    FrameBody::Reject {
                        reason: "channel count mismatch".to_string(),
                    },
                ),
            );
            return;
        }

        match self.peers.insert(addr, salt, PeerState::Connected) {
            Some(connection) => {
                log::info!("Peer {} connected from {}", connection, addr);
                self.queue(addr, Frame::new(salt, FrameBody::Accept));
                self.events.push_back(Event::Connect(connection));
            }
            None => {
                log::warn!("Rejecting {}: no free peer slot", addr);
                self.queue(
                    addr,
                    Frame::new(
                        salt,
                        FrameBody::Reject {
                            reason: "server full".to_string(),
                        },
                    ),
                );
            }
        }
    }

    fn handle_peer_frame(&mut self, connection: Connection, salt: u64, body: FrameBody) {
        let now = Instant::now();
        let Some(peer) = self.peers.get_mut(connection) else {
            return;
        };

        if peer.salt != salt {
            self.stats.packets_dropped += 1;
            return;
        }
        peer.touch(now);

        match body {
            FrameBody::Accept => {
                if peer.state == PeerState::Connecting {
                    peer.state = PeerState::Connected;
                }
            }
            FrameBody::Reject { reason } => {
                if peer.state == PeerState::Connecting {
                    peer.state = PeerState::Disconnected;
                    peer.reject_reason = Some(reason);
                }
            }
            FrameBody::Reliable {
                channel,
                sequence,
                fragment,
                fragment_count,
                payload,
            } => {
                if peer.state != PeerState::Connected || channel >= CHANNEL_COUNT {
                    return;
                }

                let fragment = Fragment {
                    index: fragment,
                    count: fragment_count,
                };
                let receiver = &mut peer.receivers[channel as usize];
                let delivered = receiver.receive(sequence, fragment, payload);
                let next_expected = receiver.next_expected();
                let addr = peer.addr;

                for payload in delivered {
                    self.events.push_back(Event::Receive {
                        connection,
                        channel,
                        payload,
                    });
                }
                self.queue(
                    addr,
                    Frame::new(
                        salt,
                        FrameBody::Ack {
                            channel,
                            next_expected,
                        },
                    ),
                );
            }
            FrameBody::Unreliable { channel, payload } => {
                if peer.state == PeerState::Connected && channel < CHANNEL_COUNT {
                    self.events.push_back(Event::Receive {
                        connection,
                        channel,
                        payload,
                    });
                }
            }
            FrameBody::Ack {
                channel,
                next_expected,
            } => {
                if channel < CHANNEL_COUNT {
                    if let Some(rtt) = peer.senders[channel as usize].acknowledge(next_expected, now)
                    {
                        self.stats.record_rtt(rtt);
                    }
                }
            }
            FrameBody::Disconnect => {
                if peer.state == PeerState::Connecting {
                    peer.state = PeerState::Disconnected;
                    peer.reject_reason = Some("peer closed the connection".to_string());
                    return;
                }
                log::info!("Peer {} disconnected", connection);
                self.drop_peer(connection);
            }
            FrameBody::Ping | FrameBody::Connect { .. } => {}
        }
    }
}

impl Transport for Session {
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Event>, TransportError> {
        Session::poll(self, timeout)
    }

    fn send(
        &mut self,
        connection: Connection,
        payload: &[u8],
        channel: u8,
        delivery: Delivery,
    ) -> Result<(), SendError> {
        Session::send(self, connection, payload, channel, delivery)
    }

    fn broadcast(&mut self, payload: &[u8], channel: u8) -> Result<(), SendError> {
        Session::broadcast(self, payload, channel)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Session::flush(self)
    }

    fn disconnect(&mut self, connection: Connection) {
        Session::disconnect(self, connection)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

fn check_payload(payload: &[u8], channel: u8) -> Result<(), SendError> {
    if channel >= CHANNEL_COUNT {
        return Err(SendError::InvalidChannel(channel));
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(SendError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}
