//! Round-trip latency probing over the media data channel.

use crate::events::LatencySample;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use voice_protocol::OutboundMessage;

/// Metric name under which probe round trips are reported.
pub const PROBE_METRIC: &str = "rtt";

/// Emits `ping` on a fixed period and turns echoed `pong`s into samples.
///
/// Timestamps are milliseconds since the probe was created, read from a
/// monotonic clock, so wall-clock adjustments never produce negative samples.
#[derive(Debug)]
pub struct LatencyProbe {
    period: Duration,
    epoch: Instant,
    ticker: Option<Interval>,
}

impl LatencyProbe {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            epoch: Instant::now(),
            ticker: None,
        }
    }

    /// Arms the timer. The first tick fires one period from now. Restarting a
    /// running probe resets its phase.
    pub fn start(&mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    pub fn cancel(&mut self) {
        self.ticker = None;
    }

    /// Resolves at the next tick. Never resolves while the probe is stopped.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    pub fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    pub fn ping(&self) -> OutboundMessage {
        OutboundMessage::Ping {
            timestamp: self.now_ms(),
        }
    }

    /// Turns an echoed timestamp into a round-trip sample.
    pub fn on_pong(&self, timestamp: f64) -> LatencySample {
        LatencySample {
            kind: PROBE_METRIC.to_string(),
            value_ms: (self.now_ms() - timestamp).max(0.0),
        }
    }
}
