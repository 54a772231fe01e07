//! Heartbeat monitoring for open connections.
//!
//! A ping goes out on every tick of a fixed period (first tick at open).
//! A tick that finds the previous ping still unanswered counts as a miss;
//! `max_missed` consecutive misses declare the connection dead.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::debug;

/// Outcome of a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Send a ping now.
    SendPing,
    /// The peer stopped answering; close the connection.
    Dead { missed: u32 },
}

#[derive(Debug, Default)]
struct HeartbeatState {
    awaiting_pong: bool,
    missed: u32,
    last_ping: Option<DateTime<Utc>>,
    last_pong: Option<DateTime<Utc>>,
}

/// Ping/pong liveness tracker for one connection at a time.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    max_missed: u32,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, max_missed: u32) -> Self {
        Self {
            interval,
            max_missed: max_missed.max(1),
            state: Mutex::new(HeartbeatState::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tick source for a freshly opened connection. The first tick is immediate.
    pub fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Reset for a new connection.
    pub fn reset(&self) {
        *self.state.lock() = HeartbeatState::default();
    }

    /// Advance one period.
    pub fn on_tick(&self) -> HeartbeatVerdict {
        let mut state = self.state.lock();
        if state.awaiting_pong {
            state.missed += 1;
            if state.missed >= self.max_missed {
                return HeartbeatVerdict::Dead {
                    missed: state.missed,
                };
            }
        }
        state.awaiting_pong = true;
        state.last_ping = Some(Utc::now());
        HeartbeatVerdict::SendPing
    }

    /// Record that the peer answered.
    pub fn record_pong(&self) {
        let now = Utc::now();
        let mut state = self.state.lock();
        state.awaiting_pong = false;
        state.missed = 0;
        state.last_pong = Some(now);

        if let Some(ping_time) = state.last_ping {
            let rtt_ms = (now - ping_time).num_milliseconds();
            debug!(rtt_ms, "Received pong");
        }
    }

    pub fn missed(&self) -> u32 {
        self.state.lock().missed
    }

    pub fn stats(&self) -> HeartbeatStats {
        let state = self.state.lock();
        HeartbeatStats {
            last_ping: state.last_ping,
            last_pong: state.last_pong,
            awaiting_pong: state.awaiting_pong,
            missed: state.missed,
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub awaiting_pong: bool,
    pub missed: u32,
}
