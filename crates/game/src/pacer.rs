use std::thread;
use std::time::{Duration, Instant};

/// Paces a run-loop to a target tick rate. A rate of zero leaves the loop
/// unbounded.
///
/// A tick is `hold()` followed by `update()`. Between the two, the time left
/// in the current tick is available from [`FramePacer::remaining`] so that
/// network polling can spend it instead of sleeping.
#[derive(Debug)]
pub struct FramePacer {
    target_rate: u32,
    interval: Option<Duration>,
    last_tick: Instant,
    delta: Duration,
    frame: u64,
}

impl FramePacer {
    pub fn new(target_rate: u32) -> Self {
        let interval =
            (target_rate > 0).then(|| Duration::from_secs_f64(1.0 / target_rate as f64));

        Self {
            target_rate,
            interval,
            last_tick: Instant::now(),
            delta: Duration::ZERO,
            frame: 0,
        }
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Time until the next tick boundary. Zero when unbounded or overdue.
    pub fn remaining(&self) -> Duration {
        self.interval.map_or(Duration::ZERO, |interval| {
            interval.saturating_sub(self.last_tick.elapsed())
        })
    }

    /// Blocks the calling thread until the next tick boundary.
    pub fn hold(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }

    /// Starts a new tick and returns the wall-clock time since the last one.
    pub fn update(&mut self) -> Duration {
        let now = Instant::now();
        self.delta = now - self.last_tick;
        self.last_tick = now;
        self.frame += 1;
        self.delta
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn delta_time(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}
