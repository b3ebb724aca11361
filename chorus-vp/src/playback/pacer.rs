//! Real-time frame pacing
//!
//! One frame duration between sends. Missed ticks are delayed rather than
//! burst, so a slow decoder or a reconnect never causes a catch-up flood.

use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

pub struct Pacer {
    interval: Interval,
}

impl Pacer {
    pub fn new(frame_duration: Duration) -> Self {
        let mut interval = interval(frame_duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Wait for the next send slot. Cancel-safe.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    /// Next tick fires immediately (resume, new transport, new track after idle)
    pub fn reset(&mut self) {
        self.interval.reset_immediately();
    }
}
