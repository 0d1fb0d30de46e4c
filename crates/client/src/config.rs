use std::time::Duration;

use anyhow::{Result, ensure};

use cubeconnect::net::MAX_PAYLOAD_SIZE;
use cubeconnect::{SessionConfig, WorldSnapshot};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub frame_rate: u32,
    /// Must match the server's drawable count.
    pub drawable_count: usize,
    pub tick_limit: Option<u64>,
    pub peer_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            frame_rate: 60,
            drawable_count: 3,
            tick_limit: None,
            peer_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
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
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_drawable_count() {
        assert!(ClientConfig::default().validate().is_ok());

        let config = ClientConfig {
            drawable_count: usize::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
