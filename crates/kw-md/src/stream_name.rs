//! Binance kline stream naming and endpoint addressing.
//!
//! One subscription maps to one stream name `<symbol>@kline_<interval>`.
//! A single stream is opened on the raw `/ws/<name>` path; several streams
//! share one connection on the combined `/stream?streams=a/b/c` path, where
//! every message arrives wrapped in a `{"stream": .., "data": ..}` envelope.

use kw_core::{FeedError, config::Subscription};

/// Channel-type tag between the symbol and the interval.
pub const KLINE_TAG: &str = "@kline_";

/// How the endpoint addresses its streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// Raw stream, bare payloads.
    Single,
    /// Combined stream, enveloped payloads.
    Multiplexed,
}

/// The URL to open plus the stream names it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub mode: AddressingMode,
    pub streams: Vec<String>,
}

/// Stream name for one subscription, e.g. `btcusdt@kline_1m`.
pub fn stream_name(sub: &Subscription) -> String {
    format!("{}{KLINE_TAG}{}", sub.symbol.to_lowercase(), sub.interval)
}

/// Build the endpoint for `subs` on `host` (e.g. `stream.binance.com:9443`).
pub fn build_endpoint(host: &str, subs: &[Subscription]) -> Result<Endpoint, FeedError> {
    let streams: Vec<String> = subs.iter().map(stream_name).collect();
    match streams.as_slice() {
        [] => Err(FeedError::Config("subscription set is empty".into())),
        [only] => Ok(Endpoint {
            url: format!("wss://{host}/ws/{only}"),
            mode: AddressingMode::Single,
            streams,
        }),
        _ => Ok(Endpoint {
            url: format!("wss://{host}/stream?streams={}", streams.join("/")),
            mode: AddressingMode::Multiplexed,
            streams,
        }),
    }
}
