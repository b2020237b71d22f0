//! Periodic status reporters.
//!
//! Two independent tasks, spawned once per client:
//! - latest-data reporter: one line per channel with the last close price
//!   and how stale it is;
//! - stats reporter: liveness counters, run time and message rate.
//!
//! Both only read shared state. Each tick copies what it needs first and
//! logs afterwards, so no lock is held while formatting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::latest::{LatestEntry, LatestTable};
use crate::lifecycle::ConnectionState;
use crate::stats::{LivenessTracker, StatsSnapshot};

/// Reporter periods.
#[derive(Debug, Clone, Copy)]
pub struct ReportIntervals {
    pub latest: Duration,
    pub stats: Duration,
}

impl Default for ReportIntervals {
    fn default() -> Self {
        Self { latest: Duration::from_secs(10), stats: Duration::from_secs(60) }
    }
}

/// Shared state the reporters read.
#[derive(Clone)]
pub struct ReportContext {
    pub tracker: Arc<LivenessTracker>,
    pub latest: Arc<LatestTable>,
    pub state_rx: watch::Receiver<ConnectionState>,
    pub stop_rx: watch::Receiver<bool>,
    pub symbol_count: usize,
}

impl ReportContext {
    fn connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }
}

/// Spawn both reporters. They exit once the stop signal turns `true`.
pub fn spawn_reporters(ctx: ReportContext, intervals: ReportIntervals) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(run_latest_reporter(ctx.clone(), intervals.latest)),
        tokio::spawn(run_stats_reporter(ctx, intervals.stats)),
    ]
}

/// Wait for the next tick. Returns `false` once a stop is observed.
async fn tick_or_stop(ticker: &mut tokio::time::Interval, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = ticker.tick() => !*stop_rx.borrow(),
        _ = async { let _ = stop_rx.wait_for(|stopped| *stopped).await; } => false,
    }
}

async fn run_latest_reporter(mut ctx: ReportContext, every: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    while tick_or_stop(&mut ticker, &mut ctx.stop_rx).await {
        for line in latest_report(&ctx, Instant::now()).unwrap_or_default() {
            info!("{line}");
        }
    }
}

async fn run_stats_reporter(mut ctx: ReportContext, every: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    while tick_or_stop(&mut ticker, &mut ctx.stop_rx).await {
        for line in stats_report(&ctx).unwrap_or_default() {
            info!("{line}");
        }
    }
}

/// Lines for one latest-data tick. `None` while not connected or when no
/// channel has data yet; the table is not read while disconnected.
fn latest_report(ctx: &ReportContext, now: Instant) -> Option<Vec<String>> {
    if !ctx.connected() {
        return None;
    }
    let rows = ctx.latest.snapshot();
    if rows.is_empty() {
        return None;
    }
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push("=== latest kline data ===".to_string());
    lines.extend(rows.iter().map(|(channel, entry)| format_latest_line(channel, entry, now)));
    lines.push("=========================".to_string());
    Some(lines)
}

/// Lines for one stats tick. `None` while not connected.
fn stats_report(ctx: &ReportContext) -> Option<Vec<String>> {
    let state = *ctx.state_rx.borrow();
    if state != ConnectionState::Connected {
        return None;
    }
    Some(format_stats_lines(&ctx.tracker.snapshot(), state, ctx.symbol_count))
}

/// `(interval, close)` from a kline event's `k` object, if present.
pub fn kline_summary(payload: &Value) -> Option<(&str, &str)> {
    let k = payload.get("k")?;
    Some((k.get("i")?.as_str()?, k.get("c")?.as_str()?))
}

/// One latest-data line, e.g. `BTCUSDT (1m): price=50000.00, delay=0.42s`.
pub fn format_latest_line(channel: &str, entry: &LatestEntry, now: Instant) -> String {
    let delay = now.saturating_duration_since(entry.updated_at).as_secs_f64();
    match kline_summary(&entry.payload) {
        Some((interval, close)) => format!("{channel} ({interval}): price={close}, delay={delay:.2}s"),
        None => format!("{channel}: last_update_ms={}, delay={delay:.2}s", entry.updated_at_ms),
    }
}

/// The stats block, header and footer included.
pub fn format_stats_lines(s: &StatsSnapshot, state: ConnectionState, symbol_count: usize) -> Vec<String> {
    let mut lines = vec![
        "=== connection stats ===".to_string(),
        format!("run time: {}", kw_core::time_util::format_hms(s.uptime)),
        format!("state: {state}"),
        format!("messages: {}", s.messages),
        format!("pings: {}", s.pings),
        format!("pongs: {}", s.pongs),
        format!("errors: {}", s.errors),
        format!("reconnects: {}", s.reconnects),
        format!("symbols: {symbol_count}"),
    ];
    if let Some(rate) = s.message_rate_per_min() {
        lines.push(format!("message rate: {rate:.2} msg/min"));
    }
    lines.push("========================".to_string());
    lines
}
