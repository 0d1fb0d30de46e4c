use std::time::Duration;

/// Drops a fraction of outgoing datagrams before they reach the socket.
#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    /// Fraction of datagrams to drop, in `0.0..=1.0`.
    pub loss_rate: f32,
}

impl PacketLossSimulation {
    pub fn new(loss_rate: f32) -> Self {
        Self {
            enabled: loss_rate > 0.0,
            loss_rate: loss_rate.clamp(0.0, 1.0),
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_rate <= 0.0 {
            return false;
        }
        rand_percent() < self.loss_rate
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub resends: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
}

impl NetworkStats {
    pub(crate) fn record_rtt(&mut self, sample: Duration) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let rtt = sample.as_secs_f32() * 1000.0;
        if self.rtt_ms == 0.0 {
            self.rtt_ms = rtt;
            self.rtt_variance = rtt / 2.0;
            return;
        }

        let diff = (rtt - self.rtt_ms).abs();
        self.rtt_variance = (1.0 - BETA) * self.rtt_variance + BETA * diff;
        self.rtt_ms = (1.0 - ALPHA) * self.rtt_ms + ALPHA * rtt;
    }
}

pub(crate) fn rand_percent() -> f32 {
    (rand_u64() >> 40) as f32 / (1u64 << 24) as f32
}

pub(crate) fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};
    use std::time::Instant;

    let mut hasher = RandomState::new().build_hasher();
    Instant::now().hash(&mut hasher);
    hasher.finish()
}
