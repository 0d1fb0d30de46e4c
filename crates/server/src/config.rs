use std::time::Duration;

use anyhow::{Result, ensure};

use cubeconnect::net::MAX_PAYLOAD_SIZE;
use cubeconnect::{PacketLossSimulation, SessionConfig, WorldSnapshot};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    /// Must match the count every client registers.
    pub drawable_count: usize,
    pub peer_timeout: Duration,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_clients: 4,
            drawable_count: 3,
            peer_timeout: Duration::from_secs(10),
            packet_loss: None,
        }
    }
}

impl ServerConfig {
    /// Rejects a drawable count whose snapshot would not fit in one payload.
    pub fn validate(&self) -> Result<()> {
        let max = WorldSnapshot::max_drawables(MAX_PAYLOAD_SIZE);
        ensure!(
            self.drawable_count <= max,
            "{} drawables exceed the snapshot limit of {}",
            self.drawable_count,
            max
        );
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            peer_timeout: self.peer_timeout,
            packet_loss: self.packet_loss.clone(),
            ..Default::default()
        }
    }
}
