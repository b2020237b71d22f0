//! Feed client: drives the [`Lifecycle`] state machine over a [`Transport`].
//!
//! # Architecture
//!
//! ```text
//! FeedClient::run ──► Lifecycle::start ──► Transport::run (one session task)
//!        ▲                                     │ WsEvent via mpsc
//!        │           Lifecycle::on_* ◄─────────┘  (one at a time)
//!        └── retry wait (raced against stop) ◄── CloseOutcome::Reconnect
//! ```
//!
//! A single stop signal (`watch<bool>`) is the pending-stop flag seen by
//! `on_close`, the shutdown request seen by the transport, and the exit
//! signal for the reporters.
//!
//! The reconnect wait runs inline in the driver loop rather than on its own
//! task. Only one session is ever in flight, so nothing else is blocked by it.

use std::sync::Arc;
use std::time::Duration;

use kw_core::config::{FeedConfig, Subscription};
use kw_core::ws::{Transport, TungsteniteTransport, WsConnConfig, WsEvent};
use kw_core::FeedError;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::latest::LatestTable;
use crate::lifecycle::{CloseOutcome, ConnectionState, Lifecycle, StartOutcome};
use crate::reporter::{self, ReportContext, ReportIntervals};
use crate::stats::LivenessTracker;
use crate::stream_name::{self, Endpoint};

/// Transport event queue depth.
const EVENT_QUEUE: usize = 1024;

/// Cloneable handle that requests a stop from any task.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request a stop. Idempotent; safe before, during or after a connection.
    pub fn stop(&self) {
        if !self.tx.send_replace(true) {
            info!("stopping feed client");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// What one [`FeedClient::run`] did, returned once it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Transport sessions opened (connection attempts).
    pub sessions: u32,
    /// Reporter tasks spawned over the whole run.
    pub reporter_tasks: usize,
}

/// Long-running kline feed client.
pub struct FeedClient<T: Transport = TungsteniteTransport> {
    transport: Arc<T>,
    subscriptions: Vec<Subscription>,
    endpoint: Endpoint,
    conn_config: WsConnConfig,
    intervals: ReportIntervals,
    tracker: Arc<LivenessTracker>,
    latest: Arc<LatestTable>,
    state_tx: watch::Sender<ConnectionState>,
    stop: StopHandle,
}

impl FeedClient<TungsteniteTransport> {
    /// Client over the real WebSocket transport.
    pub fn from_config(config: &FeedConfig) -> Result<Self, FeedError> {
        Self::new(config, TungsteniteTransport)
    }
}

impl<T: Transport> FeedClient<T> {
    /// Validate the configuration and build the endpoint. Fails only with
    /// [`FeedError::Config`]; nothing is opened yet.
    pub fn new(config: &FeedConfig, transport: T) -> Result<Self, FeedError> {
        let subscriptions = config.subscriptions()?;
        let endpoint = stream_name::build_endpoint(&config.host, &subscriptions)?;
        let conn_config = WsConnConfig {
            url: endpoint.url.clone(),
            proxy: config.proxy.effective(),
            ping_interval: Some(config.heartbeat.interval()).filter(|d| !d.is_zero()),
            ping_timeout: config.heartbeat.timeout(),
        };
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            transport: Arc::new(transport),
            subscriptions,
            endpoint,
            conn_config,
            intervals: ReportIntervals::default(),
            tracker: Arc::new(LivenessTracker::new()),
            latest: Arc::new(LatestTable::new()),
            state_tx,
            stop: StopHandle { tx: Arc::new(stop_tx) },
        })
    }

    /// Override the reporter periods.
    pub fn with_report_intervals(mut self, intervals: ReportIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn tracker(&self) -> Arc<LivenessTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn latest(&self) -> Arc<LatestTable> {
        Arc::clone(&self.latest)
    }

    /// Receiver for connection-state snapshots.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Run until stopped. Reconnects indefinitely; returns once the state
    /// machine reaches `Closing` and the reporters have exited.
    pub async fn run(self) -> RunSummary {
        let FeedClient {
            transport,
            subscriptions,
            endpoint,
            conn_config,
            intervals,
            tracker,
            latest,
            state_tx,
            stop,
        } = self;

        let mut stop_rx = stop.tx.subscribe();
        let reporter_state_rx = state_tx.subscribe();
        let mut lifecycle =
            Lifecycle::new(endpoint, Arc::clone(&tracker), Arc::clone(&latest), state_tx, stop_rx.clone());
        let mut reporters = Vec::new();
        let mut summary = RunSummary::default();

        loop {
            match lifecycle.start() {
                StartOutcome::Stopped => break,
                StartOutcome::Connect { first } => {
                    if first {
                        let ctx = ReportContext {
                            tracker: Arc::clone(&tracker),
                            latest: Arc::clone(&latest),
                            state_rx: reporter_state_rx.clone(),
                            stop_rx: stop_rx.clone(),
                            symbol_count: subscriptions.len(),
                        };
                        reporters = reporter::spawn_reporters(ctx, intervals);
                        summary.reporter_tasks += reporters.len();
                    }
                }
            }

            summary.sessions += 1;
            info!("connecting to {}", conn_config.url);
            if let Some((host, port)) = &conn_config.proxy {
                info!("using HTTP proxy http://{host}:{port}");
            }

            match run_session(&transport, &conn_config, &mut lifecycle, stop_rx.clone()).await {
                CloseOutcome::Stopped => break,
                CloseOutcome::Reconnect { delay, .. } => {
                    if !retry_wait(delay, &mut stop_rx).await {
                        lifecycle.finish_stop();
                        break;
                    }
                }
            }
        }

        for handle in reporters {
            if let Err(e) = handle.await {
                warn!("reporter task failed: {e}");
            }
        }
        info!("feed client stopped ({})", lifecycle.state());
        summary
    }
}

/// Open one connection and feed its events to the state machine until it closes.
async fn run_session<T: Transport>(
    transport: &Arc<T>,
    conn_config: &WsConnConfig,
    lifecycle: &mut Lifecycle,
    shutdown: watch::Receiver<bool>,
) -> CloseOutcome {
    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
    let transport = Arc::clone(transport);
    let conn_config = conn_config.clone();
    let session = tokio::spawn(async move { transport.run(&conn_config, tx, shutdown).await });

    let mut outcome = None;
    while let Some(event) = rx.recv().await {
        match event {
            WsEvent::Open => lifecycle.on_open(),
            WsEvent::Message(raw) => lifecycle.on_message(&raw),
            WsEvent::Ping(p) => lifecycle.on_ping(&p),
            WsEvent::Pong(p) => lifecycle.on_pong(&p),
            WsEvent::Error(e) => lifecycle.on_error(&e),
            WsEvent::Close { code, reason } => {
                outcome = Some(lifecycle.on_close(code, &reason));
                break;
            }
        }
    }

    if let Err(e) = session.await {
        warn!("transport task failed: {e}");
    }
    outcome.unwrap_or_else(|| lifecycle.on_close(None, "transport ended without close"))
}

/// Sleep `delay` unless a stop arrives first. Returns `true` to reconnect.
async fn retry_wait(delay: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    if *stop_rx.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => !*stop_rx.borrow(),
        _ = async { let _ = stop_rx.wait_for(|stopped| *stopped).await; } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    /// Plays one scripted event list per session. A script without a
    /// `Close` (or running out of scripts) keeps the session open until
    /// shutdown.
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Vec<WsEvent>>>,
        opens: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Vec<WsEvent>>) -> (Self, Arc<AtomicUsize>) {
            let opens = Arc::new(AtomicUsize::new(0));
            (Self { scripts: Mutex::new(scripts.into()), opens: opens.clone() }, opens)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn run(
            &self,
            _config: &WsConnConfig,
            events: mpsc::Sender<WsEvent>,
            mut shutdown: watch::Receiver<bool>,
        ) {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| vec![WsEvent::Open]);
            for event in script {
                let is_close = matches!(event, WsEvent::Close { .. });
                let _ = events.send(event).await;
                if is_close {
                    return;
                }
            }
            let _ = shutdown.wait_for(|s| *s).await;
            let _ = events.send(WsEvent::Close { code: Some(1000), reason: "client shutdown".into() }).await;
        }
    }

    fn config(symbols: &[&str]) -> FeedConfig {
        FeedConfig { symbols: symbols.iter().map(|s| s.to_string()).collect(), ..Default::default() }
    }

    async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + limit;
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached within {limit:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn refused() -> Vec<WsEvent> {
        vec![
            WsEvent::Error(FeedError::Transport("connection refused".into())),
            WsEvent::Close { code: None, reason: "connection refused".into() },
        ]
    }

    #[test]
    fn empty_symbol_list_is_rejected_before_connecting() {
        let (transport, opens) = ScriptedTransport::new(vec![]);
        let res = FeedClient::new(&config(&[]), transport);
        assert!(matches!(res, Err(FeedError::Config(_))));
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unusable_host_or_heartbeat_is_rejected_before_connecting() {
        let (transport, opens) = ScriptedTransport::new(vec![]);
        let mut cfg = config(&["btcusdt"]);
        cfg.host = String::new();
        assert!(matches!(FeedClient::new(&cfg, transport), Err(FeedError::Config(_))));

        let (transport, _) = ScriptedTransport::new(vec![]);
        let mut cfg = config(&["btcusdt"]);
        cfg.heartbeat.ping_timeout_sec = 0;
        assert!(matches!(FeedClient::new(&cfg, transport), Err(FeedError::Config(_))));
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn proxy_and_heartbeat_flow_into_connection_config() {
        let mut cfg = config(&["BTCUSDT"]);
        cfg.proxy.enabled = true;
        let (transport, _) = ScriptedTransport::new(vec![]);
        let client = FeedClient::new(&cfg, transport).unwrap();
        assert_eq!(client.conn_config.proxy, Some(("192.168.8.66".to_string(), 6152)));
        assert_eq!(client.conn_config.ping_interval, Some(Duration::from_secs(20)));
        assert_eq!(client.conn_config.ping_timeout, Duration::from_secs(10));
        assert_eq!(client.endpoint().url, "wss://stream.binance.com:9443/ws/btcusdt@kline_1m");
    }

    #[tokio::test]
    async fn stop_before_run_never_connects() {
        let (transport, opens) = ScriptedTransport::new(vec![]);
        let client = FeedClient::new(&config(&["btcusdt"]), transport).unwrap();
        let state_rx = client.state_watch();
        client.stop();
        let summary = client.run().await;
        assert_eq!(summary, RunSummary::default());
        assert_eq!(opens.load(Ordering::SeqCst), 0);
        assert_eq!(*state_rx.borrow(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn stop_during_reconnect_wait_prevents_new_attempt() {
        let (transport, opens) = ScriptedTransport::new(vec![refused()]);
        let client = FeedClient::new(&config(&["btcusdt", "ethusdt"]), transport).unwrap();
        let tracker = client.tracker();
        let state_rx = client.state_watch();
        let stop = client.stop_handle();
        let task = tokio::spawn(client.run());

        wait_until(Duration::from_secs(2), || tracker.snapshot().reconnects == 1).await;
        assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);
        stop.stop();

        // The pending wait is 2s; a stop must cut it short.
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(*state_rx.borrow(), ConnectionState::Closing);
        assert_eq!(tracker.snapshot().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reporters_start_once_across_reconnects() {
        let (transport, opens) =
            ScriptedTransport::new(vec![refused(), refused(), refused(), vec![WsEvent::Open]]);
        let client = FeedClient::new(&config(&["btcusdt"]), transport).unwrap();
        let tracker = client.tracker();
        let state_rx = client.state_watch();
        let stop = client.stop_handle();
        let task = tokio::spawn(client.run());

        // Waits of 2s, 4s and 8s before the fourth session opens.
        wait_until(Duration::from_secs(60), || {
            opens.load(Ordering::SeqCst) == 4 && *state_rx.borrow() == ConnectionState::Connected
        })
        .await;

        stop.stop();
        let summary = task.await.unwrap();
        assert_eq!(summary, RunSummary { sessions: 4, reporter_tasks: 2 });
        assert_eq!(tracker.snapshot().reconnects, 3);
        assert_eq!(tracker.snapshot().errors, 3);
    }

    #[tokio::test]
    async fn events_flow_into_tracker_and_latest_table() {
        let session = vec![
            WsEvent::Open,
            WsEvent::Message(
                r#"{"stream":"btcusdt@kline_1m","data":{"k":{"i":"1m","c":"50000.00"}}}"#.into(),
            ),
            WsEvent::Message(r#"{"stream":"ethusdt@kline_1m","data":{"k":{"i":"1m","c":"3000.00"}}}"#.into()),
            WsEvent::Message("{broken".into()),
            WsEvent::Message(r#"{"result":null,"id":1}"#.into()),
            WsEvent::Ping(vec![1]),
            WsEvent::Pong(vec![]),
        ];
        let (transport, opens) = ScriptedTransport::new(vec![session]);
        let client = FeedClient::new(&config(&["btcusdt", "ethusdt"]), transport).unwrap();
        let tracker = client.tracker();
        let latest = client.latest();
        let state_rx = client.state_watch();
        let stop = client.stop_handle();
        let task = tokio::spawn(client.run());

        wait_until(Duration::from_secs(2), || tracker.snapshot().pongs == 1).await;
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);
        stop.stop();
        task.await.unwrap();

        let s = tracker.snapshot();
        assert_eq!((s.messages, s.pings, s.pongs, s.errors, s.reconnects), (4, 1, 1, 0, 0));
        assert_eq!(latest.len(), 2);
        assert_eq!(latest.get("ETHUSDT").unwrap().payload["k"]["c"], "3000.00");
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(*state_rx.borrow(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn reconnects_after_close_and_keeps_counters() {
        let first = vec![
            WsEvent::Open,
            WsEvent::Message(r#"{"s":"BTCUSDT","k":{"i":"1m","c":"1"}}"#.into()),
            WsEvent::Close { code: Some(1006), reason: "abnormal".into() },
        ];
        let second = vec![WsEvent::Open];
        let (transport, opens) = ScriptedTransport::new(vec![first, second]);
        let client = FeedClient::new(&config(&["btcusdt"]), transport).unwrap();
        let tracker = client.tracker();
        let state_rx = client.state_watch();
        let stop = client.stop_handle();
        let task = tokio::spawn(client.run());

        // First reconnect waits 2s.
        wait_until(Duration::from_secs(5), || {
            opens.load(Ordering::SeqCst) == 2 && *state_rx.borrow() == ConnectionState::Connected
        })
        .await;

        stop.stop();
        task.await.unwrap();
        let s = tracker.snapshot();
        assert_eq!((s.messages, s.reconnects), (1, 1));
        assert_eq!(*state_rx.borrow(), ConnectionState::Closing);
    }
}
