//! Process-lifetime liveness counters.
//!
//! Written by the connection driver, read by the stats reporter. Every
//! counter sits behind one mutex so a [`StatsSnapshot`] is a consistent
//! point-in-time view. Nothing here is reset on reconnect.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use kw_core::time_util;

/// Point-in-time copy of all counters and timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub messages: u64,
    pub pings: u64,
    pub pongs: u64,
    pub errors: u64,
    pub reconnects: u64,
    /// Wall-clock ms when the current connection opened; `None` while down.
    pub connected_at_ms: Option<u64>,
    /// Wall-clock ms of the most recent message.
    pub last_message_at_ms: Option<u64>,
    /// Time since the tracker was created.
    pub uptime: Duration,
}

impl StatsSnapshot {
    /// Messages per minute of uptime, `None` before any time has passed.
    pub fn message_rate_per_min(&self) -> Option<f64> {
        let minutes = self.uptime.as_secs_f64() / 60.0;
        (minutes > 0.0).then(|| self.messages as f64 / minutes)
    }
}

#[derive(Debug, Default)]
struct Counters {
    messages: u64,
    pings: u64,
    pongs: u64,
    errors: u64,
    reconnects: u64,
    connected_at: Option<(Instant, u64)>,
    last_message_at_ms: Option<u64>,
}

/// Shared liveness tracker.
#[derive(Debug)]
pub struct LivenessTracker {
    started: Instant,
    inner: Mutex<Counters>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self { started: Instant::now(), inner: Mutex::new(Counters::default()) }
    }

    // A panic while holding the lock cannot leave the counters inconsistent,
    // so a poisoned lock is still usable.
    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one message and stamp `last_message_at`. Returns the new total.
    pub fn record_message(&self) -> u64 {
        let mut c = self.counters();
        c.messages += 1;
        c.last_message_at_ms = Some(time_util::now_ms());
        c.messages
    }

    pub fn record_ping(&self) {
        self.counters().pings += 1;
    }

    pub fn record_pong(&self) {
        self.counters().pongs += 1;
    }

    pub fn record_error(&self) {
        self.counters().errors += 1;
    }

    /// Count one reconnect attempt. Returns the new total.
    pub fn record_reconnect_attempt(&self) -> u64 {
        let mut c = self.counters();
        c.reconnects += 1;
        c.reconnects
    }

    pub fn record_connected(&self) {
        self.counters().connected_at = Some((Instant::now(), time_util::now_ms()));
    }

    /// Clear the connected-at stamp and return how long the connection lasted.
    ///
    /// `None` if no connection was established since the last disconnect.
    pub fn record_disconnected(&self) -> Option<Duration> {
        self.counters().connected_at.take().map(|(at, _)| at.elapsed())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.counters();
        StatsSnapshot {
            messages: c.messages,
            pings: c.pings,
            pongs: c.pongs,
            errors: c.errors,
            reconnects: c.reconnects,
            connected_at_ms: c.connected_at.map(|(_, ms)| ms),
            last_message_at_ms: c.last_message_at_ms,
            uptime: self.started.elapsed(),
        }
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}
