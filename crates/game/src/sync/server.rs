use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::codec::{IdentityAssignment, InputSample, WorldSnapshot};
use crate::net::{Connection, Delivery, Event, STATE_CHANNEL, Transport, TransportError};

use super::Simulation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPhase {
    Connected,
    /// Identity sent; no input seen yet.
    Identified,
    Active,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_id: u32,
    pub connection: Connection,
    pub phase: PeerPhase,
    pub inputs_applied: u64,
}

impl ClientRecord {
    fn receives_snapshots(&self) -> bool {
        matches!(self.phase, PeerPhase::Identified | PeerPhase::Active)
    }
}

/// What happened during one server tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub joined: Vec<u32>,
    pub left: Vec<u32>,
    pub inputs_applied: usize,
    pub inputs_dropped: usize,
    /// Clients the snapshot was broadcast to. Zero when nobody was connected.
    pub recipients: usize,
}

/// Server side of the replication protocol.
///
/// Identities come from a counter that starts at 1 and never goes back, so
/// an identity is never handed to a second connection.
#[derive(Debug)]
pub struct ServerSync {
    clients: BTreeMap<u32, ClientRecord>,
    by_connection: HashMap<Connection, u32>,
    next_client_id: u32,
    tick: u64,
}

impl Default for ServerSync {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerSync {
    pub fn new() -> Self {
        Self {
            clients: BTreeMap::new(),
            by_connection: HashMap::new(),
            next_client_id: 1,
            tick: 0,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn client(&self, client_id: u32) -> Option<&ClientRecord> {
        self.clients.get(&client_id)
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }

    pub fn client_count(&self) -> usize {
        self.clients
            .values()
            .filter(|r| r.receives_snapshots())
            .count()
    }

    pub fn tick<T, S>(
        &mut self,
        transport: &mut T,
        simulation: &mut S,
        poll_timeout: Duration,
        dt: f32,
    ) -> Result<TickReport, TransportError>
    where
        T: Transport,
        S: Simulation,
    {
        let mut report = TickReport {
            tick: self.tick,
            ..Default::default()
        };
        let mut latest: BTreeMap<u32, InputSample> = BTreeMap::new();

        for event in transport.poll(poll_timeout)? {
            match event {
                Event::Connect(connection) => {
                    if let Some(client_id) = self.admit(transport, connection) {
                        report.joined.push(client_id);
                    }
                }
                Event::Receive {
                    connection,
                    channel,
                    ..
                } if channel != STATE_CHANNEL => {
                    log::warn!("Dropping payload from {} on channel {}", connection, channel);
                    report.inputs_dropped += 1;
                }
                Event::Receive {
                    connection,
                    payload,
                    ..
                } => match self.attribute(connection, &payload) {
                    Some(sample) => {
                        if latest.insert(sample.client_id, sample).is_some() {
                            log::trace!("Input from {} superseded", sample.client_id);
                        }
                    }
                    None => report.inputs_dropped += 1,
                },
                Event::Disconnect(connection) => {
                    if let Some(client_id) = self.release(connection) {
                        latest.remove(&client_id);
                        simulation.client_left(client_id);
                        report.left.push(client_id);
                    }
                }
            }
        }

        for sample in latest.values() {
            if let Some(record) = self.clients.get_mut(&sample.client_id) {
                record.phase = PeerPhase::Active;
                record.inputs_applied += 1;
            }
            simulation.apply_input(sample);
            report.inputs_applied += 1;
        }

        simulation.advance(dt);

        let recipients = self.client_count();
        if recipients > 0 {
            let snapshot = WorldSnapshot::new(simulation.camera(), simulation.transforms());
            match transport.broadcast(&snapshot.encode(), STATE_CHANNEL) {
                Ok(()) => report.recipients = recipients,
                Err(e) => log::error!("Failed to broadcast snapshot: {}", e),
            }
        }

        transport.flush()?;
        self.clients
            .retain(|_, record| record.phase != PeerPhase::Disconnected);
        self.tick += 1;

        Ok(report)
    }

    /// Disconnects every client and forgets them.
    pub fn shutdown<T: Transport>(&mut self, transport: &mut T) {
        for record in self.clients.values() {
            if record.phase != PeerPhase::Disconnected {
                transport.disconnect(record.connection);
            }
        }
        self.clients.clear();
        self.by_connection.clear();
    }

    fn admit<T: Transport>(&mut self, transport: &mut T, connection: Connection) -> Option<u32> {
        if self.by_connection.contains_key(&connection) {
            log::warn!("Duplicate connect event for {}", connection);
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let mut record = ClientRecord {
            client_id,
            connection,
            phase: PeerPhase::Connected,
            inputs_applied: 0,
        };

        let assignment = IdentityAssignment::new(client_id).encode();
        match transport.send(connection, &assignment, STATE_CHANNEL, Delivery::Reliable) {
            Ok(()) => {
                log::info!("Client {} joined on {}", client_id, connection);
                record.phase = PeerPhase::Identified;
            }
            Err(e) => {
                log::warn!("Failed to assign identity {} to {}: {}", client_id, connection, e);
                record.phase = PeerPhase::Disconnected;
            }
        }

        self.by_connection.insert(connection, client_id);
        self.clients.insert(client_id, record);
        Some(client_id)
    }

    /// Decodes an input sample and checks that its identity belongs to the
    /// sending connection and is still live.
    fn attribute(&self, connection: Connection, payload: &[u8]) -> Option<InputSample> {
        let sample = match InputSample::decode(payload) {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("Dropping undecodable input from {}: {}", connection, e);
                return None;
            }
        };

        let Some(record) = self.clients.get(&sample.client_id) else {
            log::warn!(
                "Dropping input for unknown identity {} from {}",
                sample.client_id,
                connection
            );
            return None;
        };

        if record.connection != connection {
            log::warn!(
                "Dropping input from {} claiming identity {} owned by {}",
                connection,
                sample.client_id,
                record.connection
            );
            return None;
        }

        if !record.receives_snapshots() {
            log::debug!("Dropping input for inactive identity {}", sample.client_id);
            return None;
        }

        Some(sample)
    }

    fn release(&mut self, connection: Connection) -> Option<u32> {
        let client_id = self.by_connection.remove(&connection)?;
        if let Some(record) = self.clients.get_mut(&client_id) {
            record.phase = PeerPhase::Disconnected;
        }
        log::info!("Client {} left", client_id);
        Some(client_id)
    }
}
