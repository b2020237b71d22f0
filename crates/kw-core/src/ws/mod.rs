//! WebSocket transport: single-session client, heartbeat, HTTP proxy tunnel.

pub mod client;
pub mod proxy;

pub use client::{Transport, TungsteniteTransport, WsConnConfig, WsEvent};
