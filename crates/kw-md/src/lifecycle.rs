//! Connection lifecycle state machine.
//!
//! ```text
//!   Disconnected ──start──► Connecting ──on_open──► Connected
//!        ▲                      │                      │
//!        └──────── on_close ────┴──────────────────────┘
//!                  (stop pending) ──► Closing (terminal)
//! ```
//!
//! [`Lifecycle`] is driven by [`crate::client::FeedClient`], which feeds it
//! transport events one at a time. Handlers update the shared tracker and
//! latest-value table and decide whether to reconnect; they never block.

use std::sync::Arc;
use std::time::Duration;

use kw_core::FeedError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::latest::LatestTable;
use crate::router::{self, preview};
use crate::stats::LivenessTracker;
use crate::stream_name::Endpoint;

/// Reconnect delay ceiling.
pub const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponent at which the doubling stops growing.
const BACKOFF_MAX_EXP: u32 = 5;

/// A progress line is logged every this many messages.
const PROGRESS_EVERY: u64 = 50;

/// Connection state. Only [`Lifecycle`] writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Stop requested and observed; no further reconnects.
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based): `min(30s, 2^min(attempt, 5) s)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.min(BACKOFF_MAX_EXP);
    Duration::from_secs(secs).min(BACKOFF_CAP)
}

/// Attempt counter: reset on every open, bumped on every reconnecting close.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Bump the counter and return `(attempt, delay)`.
    pub fn next_delay(&mut self) -> (u32, Duration) {
        self.attempt = self.attempt.saturating_add(1);
        (self.attempt, backoff_delay(self.attempt))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Result of [`Lifecycle::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Open the endpoint. `first` is true only for the very first start.
    Connect { first: bool },
    /// A stop was pending; the machine is now `Closing`.
    Stopped,
}

/// Result of [`Lifecycle::on_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Wait `delay`, then call `start` again.
    Reconnect { attempt: u32, delay: Duration },
    /// A stop was pending; the machine is now `Closing`.
    Stopped,
}

pub struct Lifecycle {
    state: ConnectionState,
    endpoint: Endpoint,
    backoff: Backoff,
    started: bool,
    tracker: Arc<LivenessTracker>,
    latest: Arc<LatestTable>,
    state_tx: watch::Sender<ConnectionState>,
    stop_rx: watch::Receiver<bool>,
}

impl Lifecycle {
    pub fn new(
        endpoint: Endpoint,
        tracker: Arc<LivenessTracker>,
        latest: Arc<LatestTable>,
        state_tx: watch::Sender<ConnectionState>,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        state_tx.send_replace(ConnectionState::Disconnected);
        Self {
            state: ConnectionState::Disconnected,
            endpoint,
            backoff: Backoff::default(),
            started: false,
            tracker,
            latest,
            state_tx,
            stop_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn backoff_attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    fn stop_pending(&self) -> bool {
        *self.stop_rx.borrow()
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("state {} -> {}", self.state, next);
        }
        self.state = next;
        self.state_tx.send_replace(next);
    }

    /// Disconnected → Connecting, or → Closing if a stop is pending.
    pub fn start(&mut self) -> StartOutcome {
        if self.state == ConnectionState::Closing {
            return StartOutcome::Stopped;
        }
        if self.stop_pending() {
            self.set_state(ConnectionState::Closing);
            return StartOutcome::Stopped;
        }
        if self.state != ConnectionState::Disconnected {
            warn!("start() called while {}", self.state);
        }
        self.set_state(ConnectionState::Connecting);
        let first = !self.started;
        self.started = true;
        StartOutcome::Connect { first }
    }

    /// Connecting → Connected. Resets the backoff counter.
    pub fn on_open(&mut self) {
        self.backoff.reset();
        self.tracker.record_connected();
        self.set_state(ConnectionState::Connected);
        info!("connection established: {}", self.endpoint.url);
    }

    /// Count, decode, route and store one inbound message.
    pub fn on_message(&mut self, raw: &str) {
        let total = self.tracker.record_message();
        if total % PROGRESS_EVERY == 0 {
            info!("received {total} messages");
        }

        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                let err = FeedError::Decode(format!("{e}: {}", preview(raw)));
                error!("{err}");
                return;
            }
        };

        match router::route(value) {
            Ok(routed) => self.latest.upsert(routed.channel, routed.payload),
            Err(err) => warn!("{err}"),
        }
    }

    /// Count and log a transport error. The transport follows up with a close.
    pub fn on_error(&mut self, err: &FeedError) {
        self.tracker.record_error();
        error!("websocket error: {err}");
    }

    pub fn on_ping(&mut self, payload: &[u8]) {
        self.tracker.record_ping();
        debug!("ping received ({} bytes)", payload.len());
    }

    pub fn on_pong(&mut self, payload: &[u8]) {
        self.tracker.record_pong();
        debug!("pong received ({} bytes)", payload.len());
    }

    /// Connected|Connecting → Disconnected (or Closing when stopping).
    pub fn on_close(&mut self, code: Option<u16>, reason: &str) -> CloseOutcome {
        match self.tracker.record_disconnected() {
            Some(duration) => {
                info!("connection closed after {}", kw_core::time_util::format_hms(duration));
                info!("close code: {code:?}, reason: {reason:?}");
            }
            None => info!("connection closed before it was established ({reason})"),
        }

        if self.stop_pending() {
            self.set_state(ConnectionState::Closing);
            return CloseOutcome::Stopped;
        }

        self.set_state(ConnectionState::Disconnected);
        let (attempt, delay) = self.backoff.next_delay();
        let total = self.tracker.record_reconnect_attempt();
        warn!("reconnecting in {}s (attempt {attempt}, {total} total)", delay.as_secs());
        CloseOutcome::Reconnect { attempt, delay }
    }

    /// Stop observed while waiting to reconnect: finalize into `Closing`.
    pub fn finish_stop(&mut self) {
        self.set_state(ConnectionState::Closing);
    }
}
