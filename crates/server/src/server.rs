use std::net::{SocketAddr, ToSocketAddrs};

use cubeconnect::{
    FramePacer, NetworkContext, Role, ServerSync, Session, TickReport, TransportError,
};

use crate::config::ServerConfig;
use crate::simulation::Scene;

/// Seconds between periodic traffic summaries.
const STATS_INTERVAL_SECS: u32 = 5;

pub struct GameServer {
    session: Session,
    sync: ServerSync,
    scene: Scene,
    pacer: FramePacer,
    config: ServerConfig,
}

impl GameServer {
    pub fn new<A: ToSocketAddrs>(
        context: &NetworkContext,
        bind_addr: A,
        config: ServerConfig,
    ) -> Result<Self, TransportError> {
        let session = Session::bind(
            context,
            bind_addr,
            Role::Server,
            config.max_clients,
            config.session_config(),
        )?;

        Ok(Self {
            session,
            sync: ServerSync::new(),
            scene: Scene::new(config.drawable_count),
            pacer: FramePacer::new(config.tick_rate),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.session.local_addr()
    }

    pub fn run(&mut self, max_ticks: Option<u64>) -> Result<(), TransportError> {
        while max_ticks.is_none_or(|max| self.sync.tick_count() < max) {
            self.tick_once()?;
        }
        self.shutdown();
        Ok(())
    }

    pub fn tick_once(&mut self) -> Result<TickReport, TransportError> {
        self.pacer.hold();
        self.pacer.update();

        let report = self.sync.tick(
            &mut self.session,
            &mut self.scene,
            self.pacer.remaining(),
            self.pacer.delta_time(),
        )?;

        if !report.joined.is_empty() || !report.left.is_empty() {
            log::info!(
                "{} of {} client slots in use",
                self.sync.client_count(),
                self.config.max_clients
            );
        }

        if report.tick % stats_interval_ticks(self.config.tick_rate) == 0 && self.sync.client_count() > 0 {
            let stats = self.session.stats();
            log::debug!(
                "tick {}: sent {} ({} bytes), received {}, resends {}, dropped {}, rtt {:.1}ms",
                report.tick,
                stats.packets_sent,
                stats.bytes_sent,
                stats.packets_received,
                stats.resends,
                stats.packets_dropped,
                stats.rtt_ms
            );
        }

        Ok(report)
    }

    pub fn shutdown(&mut self) {
        log::info!("Disconnecting {} clients", self.sync.client_count());
        self.sync.shutdown(&mut self.session);
    }
}

fn stats_interval_ticks(tick_rate: u32) -> u64 {
    u64::from(tick_rate.max(1)) * u64::from(STATS_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_interval_ticks() {
        assert_eq!(stats_interval_ticks(60), 300);
        assert_eq!(stats_interval_ticks(0), 5);
        assert_eq!(stats_interval_ticks(u32::MAX), u64::from(u32::MAX) * 5);
    }
}
