//! # kw-md
//!
//! Binance kline feed: connection lifecycle, message routing and liveness
//! tracking over a single reconnecting WebSocket.
//!
//! ## Architecture
//!
//! [`client::FeedClient`] owns the [`lifecycle::Lifecycle`] state machine and
//! feeds it transport events one at a time. Routed messages land in the
//! [`latest::LatestTable`]; counters live in the [`stats::LivenessTracker`].
//! Two [`reporter`] tasks read both and log status periodically.
//!
//! - [`stream_name`]: stream names and endpoint URL
//! - [`router`]: envelope / bare payload demultiplexing
//! - [`stats`]: process-lifetime counters
//! - [`latest`]: latest payload per channel
//! - [`lifecycle`]: state machine and backoff
//! - [`client`]: async driver and stop handle
//! - [`reporter`]: periodic status output

pub mod client;
pub mod latest;
pub mod lifecycle;
pub mod reporter;
pub mod router;
pub mod stats;
pub mod stream_name;

pub use client::{FeedClient, RunSummary, StopHandle};
pub use lifecycle::ConnectionState;
