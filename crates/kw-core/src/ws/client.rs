//! Single WebSocket session with optional HTTP proxy and ping keep-alive.
//!
//! A [`Transport`] opens exactly one connection per [`Transport::run`] call
//! and reports everything that happens on it as [`WsEvent`]s:
//! 1. Connects to the endpoint (TLS, optionally through an HTTP proxy).
//! 2. Emits `Open`, then forwards text frames, pings and pongs.
//! 3. Sends periodic protocol pings and enforces the pong timeout.
//! 4. Emits exactly one `Close` when the session ends, for any reason.
//!
//! Reconnecting is left to the caller, which owns the backoff policy.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::proxy;
use crate::error::FeedError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One event observed on a connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// Handshake completed.
    Open,
    /// Text payload (binary frames are passed through lossily as UTF-8).
    Message(String),
    /// Protocol ping received (the pong reply is queued by tungstenite).
    Ping(Vec<u8>),
    /// Protocol pong received.
    Pong(Vec<u8>),
    /// Connection-level failure; a `Close` always follows.
    Error(FeedError),
    /// Session ended. `code` is `None` when no close frame was received.
    Close { code: Option<u16>, reason: String },
}

/// Configuration for a single WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsConnConfig {
    /// Full WebSocket URL (e.g. `wss://stream.binance.com:9443/ws/btcusdt@kline_1m`).
    pub url: String,
    /// HTTP proxy `(host, port)` to tunnel through.
    pub proxy: Option<(String, u16)>,
    /// Interval between protocol pings. `None` disables the heartbeat.
    pub ping_interval: Option<Duration>,
    /// How long to wait for a pong after a ping before failing the session.
    pub ping_timeout: Duration,
}

/// Something that can open a streaming connection and report its events.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open one connection and forward its events to `events` until it ends.
    ///
    /// Implementations must emit exactly one [`WsEvent::Close`] last, and must
    /// end the session promptly once `shutdown` turns `true`.
    async fn run(
        &self,
        config: &WsConnConfig,
        events: mpsc::Sender<WsEvent>,
        shutdown: watch::Receiver<bool>,
    );
}

/// Production transport backed by `tokio-tungstenite` with native TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn run(
        &self,
        config: &WsConnConfig,
        events: mpsc::Sender<WsEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if *shutdown.borrow() {
            emit(&events, close_event(None, "shutdown before connect")).await;
            return;
        }

        let ws_stream = tokio::select! {
            res = connect_ws(config) => match res {
                Ok(s) => s,
                Err(e) => {
                    let reason = e.to_string();
                    emit(&events, WsEvent::Error(e)).await;
                    emit(&events, close_event(None, &reason)).await;
                    return;
                }
            },
            _ = shutdown.changed() => {
                emit(&events, close_event(None, "shutdown during connect")).await;
                return;
            }
        };

        emit(&events, WsEvent::Open).await;
        let close = session_loop(config, ws_stream, &events, &mut shutdown).await;
        emit(&events, close).await;
    }
}

/// Read/ping loop for an established connection. Returns the `Close` event.
async fn session_loop(
    config: &WsConnConfig,
    ws_stream: WsStream,
    events: &mpsc::Sender<WsEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> WsEvent {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let mut ping_timer =
        config.ping_interval.map(|d| tokio::time::interval_at(Instant::now() + d, d));
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("shutdown signal received, closing connection");
                let _ = ws_write.send(Message::Close(None)).await;
                let _ = ws_write.close().await;
                return close_event(Some(1000), "client shutdown");
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        emit(events, WsEvent::Message(text.as_str().to_owned())).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        emit(events, WsEvent::Message(String::from_utf8_lossy(&data).into_owned())).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        // tungstenite queues the pong reply itself.
                        emit(events, WsEvent::Ping(data.to_vec())).await;
                    }
                    Some(Ok(Message::Pong(data))) => {
                        pong_deadline = None;
                        emit(events, WsEvent::Pong(data.to_vec())).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(f) => close_event(Some(u16::from(f.code)), f.reason.as_str()),
                            None => close_event(None, "close frame without status"),
                        };
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        emit(events, WsEvent::Error(FeedError::Transport(reason.clone()))).await;
                        return close_event(None, &reason);
                    }
                    None => return close_event(None, "stream ended"),
                }
            }

            _ = async {
                match ping_timer.as_mut() {
                    Some(t) => { t.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                debug!("sending ping");
                if let Err(e) = ws_write.send(Message::Ping(Vec::new().into())).await {
                    let reason = format!("ping send failed: {e}");
                    emit(events, WsEvent::Error(FeedError::Transport(reason.clone()))).await;
                    return close_event(None, &reason);
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + config.ping_timeout);
                }
            }

            _ = async {
                match pong_deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                let reason = format!("heartbeat timeout: no pong within {:?}", config.ping_timeout);
                emit(events, WsEvent::Error(FeedError::Transport(reason.clone()))).await;
                let _ = ws_write.close().await;
                return close_event(None, &reason);
            }
        }
    }
}

/// Establish the WebSocket connection, directly or through the HTTP proxy.
async fn connect_ws(config: &WsConnConfig) -> Result<WsStream, FeedError> {
    let request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| FeedError::Transport(format!("invalid request for {}: {e}", config.url)))?;

    let stream = match &config.proxy {
        Some((proxy_host, proxy_port)) => {
            let (host, port) = target_authority(&config.url)?;
            let tunnel = proxy::connect_tunnel(proxy_host, *proxy_port, &host, port).await?;
            let (stream, _response) = tokio_tungstenite::client_async_tls(request, tunnel)
                .await
                .map_err(|e| FeedError::Transport(format!("handshake via proxy failed: {e}")))?;
            stream
        }
        None => {
            let (stream, _response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| FeedError::Transport(format!("connect failed: {e}")))?;
            stream
        }
    };
    Ok(stream)
}

/// Extract `(host, port)` from a `ws://` / `wss://` URL.
fn target_authority(url: &str) -> Result<(String, u16), FeedError> {
    let parsed = url::Url::parse(url).map_err(|e| FeedError::Transport(format!("bad url {url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| FeedError::Transport(format!("url has no host: {url}")))?
        .to_string();
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| FeedError::Transport(format!("url has no port: {url}")))?;
    Ok((host, port))
}

fn close_event(code: Option<u16>, reason: &str) -> WsEvent {
    WsEvent::Close { code, reason: reason.to_string() }
}

async fn emit(events: &mpsc::Sender<WsEvent>, event: WsEvent) {
    // Receiver gone means the driver has already finished.
    let _ = events.send(event).await;
}
