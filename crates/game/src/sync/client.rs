use std::net::ToSocketAddrs;
use std::time::Duration;

use crate::codec::{IdentityAssignment, WorldSnapshot};
use crate::net::{
    ConnectError, Connection, Delivery, Event, STATE_CHANNEL, SendError, Session, Transport,
    TransportError,
};
use crate::pacer::FramePacer;

use super::{InputSource, Renderer};

/// How long one identity poll blocks when the pacer is unbounded.
const IDENTITY_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    AwaitingIdentity,
    Active { client_id: u32 },
    Disconnected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSyncStats {
    pub inputs_sent: u64,
    pub snapshots_applied: u64,
    /// Snapshots decoded but replaced by a newer one in the same tick.
    pub snapshots_superseded: u64,
    pub payloads_dropped: u64,
}

/// Client side of the replication protocol.
///
/// Waits for the server's identity assignment, then sends one input sample
/// per tick and hands the newest snapshot of that tick to the renderer.
#[derive(Debug)]
pub struct ClientSync {
    state: ClientState,
    connection: Option<Connection>,
    drawable_count: usize,
    stats: ClientSyncStats,
}

impl ClientSync {
    pub fn new(drawable_count: usize) -> Self {
        Self {
            state: ClientState::Connecting,
            connection: None,
            drawable_count,
            stats: ClientSyncStats::default(),
        }
    }

    /// Wraps a connection that was established elsewhere.
    pub fn with_connection(connection: Connection, drawable_count: usize) -> Self {
        Self {
            state: ClientState::AwaitingIdentity,
            connection: Some(connection),
            ..Self::new(drawable_count)
        }
    }

    pub fn connect<A: ToSocketAddrs>(
        &mut self,
        session: &mut Session,
        addr: A,
        timeout: Duration,
    ) -> Result<Connection, ConnectError> {
        match session.connect(addr, timeout) {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = ClientState::AwaitingIdentity;
                Ok(connection)
            }
            Err(e) => {
                self.state = ClientState::Disconnected;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn client_id(&self) -> Option<u32> {
        match self.state {
            ClientState::Active { client_id } => Some(client_id),
            _ => None,
        }
    }

    pub fn connection(&self) -> Option<Connection> {
        self.connection
    }

    pub fn drawable_count(&self) -> usize {
        self.drawable_count
    }

    pub fn stats(&self) -> ClientSyncStats {
        self.stats
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == ClientState::Disconnected
    }

    /// Polls once for the identity assignment. Anything that does not
    /// decode as one is dropped.
    pub fn poll_identity<T: Transport>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<Option<u32>, TransportError> {
        match self.state {
            ClientState::AwaitingIdentity => {}
            ClientState::Active { client_id } => return Ok(Some(client_id)),
            _ => return Ok(None),
        }

        for event in transport.poll(timeout)? {
            match event {
                Event::Receive {
                    connection,
                    channel,
                    payload,
                } if self.connection == Some(connection) => {
                    if channel != STATE_CHANNEL {
                        log::warn!("Dropping payload on unexpected channel {}", channel);
                        self.stats.payloads_dropped += 1;
                        continue;
                    }
                    if self.state != ClientState::AwaitingIdentity {
                        self.stats.payloads_dropped += 1;
                        continue;
                    }
                    match IdentityAssignment::decode(&payload) {
                        Ok(assignment) => {
                            log::info!("Assigned identity {}", assignment.client_id);
                            self.state = ClientState::Active {
                                client_id: assignment.client_id,
                            };
                        }
                        Err(e) => {
                            log::warn!("Dropping payload while awaiting identity: {}", e);
                            self.stats.payloads_dropped += 1;
                        }
                    }
                }
                Event::Disconnect(connection) if self.connection == Some(connection) => {
                    self.mark_disconnected();
                }
                event => log::debug!("Ignoring {:?} while awaiting identity", event),
            }
        }

        Ok(self.client_id())
    }

    /// Blocks, one paced tick at a time, until an identity is assigned or
    /// the connection drops. Returns `None` in the latter case.
    pub fn await_identity<T: Transport>(
        &mut self,
        transport: &mut T,
        pacer: &mut FramePacer,
    ) -> Result<Option<u32>, TransportError> {
        while self.state == ClientState::AwaitingIdentity {
            pacer.hold();
            pacer.update();

            let timeout = match pacer.interval() {
                Some(_) => pacer.remaining(),
                None => IDENTITY_POLL_INTERVAL,
            };
            if let Some(client_id) = self.poll_identity(transport, timeout)? {
                return Ok(Some(client_id));
            }
        }

        Ok(self.client_id())
    }

    /// One active tick: send an input sample, poll, and render the newest
    /// snapshot that arrived. Does nothing outside the active state.
    pub fn tick<T, I, R>(
        &mut self,
        transport: &mut T,
        input: &mut I,
        renderer: &mut R,
        poll_timeout: Duration,
    ) -> Result<ClientState, TransportError>
    where
        T: Transport,
        I: InputSource,
        R: Renderer,
    {
        let (ClientState::Active { client_id }, Some(connection)) = (self.state, self.connection)
        else {
            return Ok(self.state);
        };

        let sample = input.sample().with_identity(client_id);
        match transport.send(connection, &sample.encode(), STATE_CHANNEL, Delivery::Reliable) {
            Ok(()) => self.stats.inputs_sent += 1,
            Err(SendError::NotConnected(_)) => {
                self.mark_disconnected();
                return Ok(self.state);
            }
            Err(e) => log::error!("Failed to queue input sample: {}", e),
        }
        transport.flush()?;

        let mut latest = None;
        for event in transport.poll(poll_timeout)? {
            match event {
                Event::Receive {
                    connection: from,
                    channel,
                    ..
                } if from == connection && channel != STATE_CHANNEL => {
                    log::warn!("Dropping payload on unexpected channel {}", channel);
                    self.stats.payloads_dropped += 1;
                }
                Event::Receive {
                    connection: from,
                    payload,
                    ..
                } if from == connection => {
                    match WorldSnapshot::decode(&payload, self.drawable_count) {
                        Ok(snapshot) => {
                            if latest.replace(snapshot).is_some() {
                                self.stats.snapshots_superseded += 1;
                            }
                        }
                        Err(e) => {
                            log::warn!("Dropping undecodable snapshot: {}", e);
                            self.stats.payloads_dropped += 1;
                        }
                    }
                }
                Event::Disconnect(from) if from == connection => self.mark_disconnected(),
                event => log::debug!("Ignoring {:?}", event),
            }
        }

        if let Some(snapshot) = latest {
            log::trace!("Applying snapshot with {} transforms", snapshot.drawable_count());
            renderer.render(&snapshot);
            self.stats.snapshots_applied += 1;
        }

        Ok(self.state)
    }

    pub fn disconnect<T: Transport>(&mut self, transport: &mut T) {
        if let Some(connection) = self.connection.take() {
            transport.disconnect(connection);
        }
        self.state = ClientState::Disconnected;
    }

    fn mark_disconnected(&mut self) {
        if self.state != ClientState::Disconnected {
            log::info!("Connection to server lost");
        }
        self.state = ClientState::Disconnected;
        self.connection = None;
    }
}
