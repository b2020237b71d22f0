//! Routes decoded feed messages to the channel that produced them.
//!
//! Combined-stream messages carry an envelope:
//! `{"stream":"btcusdt@kline_1m","data":{...}}`. Raw-stream messages are the
//! bare event and name their symbol in `"s"`. Anything else is unroutable.

use kw_core::FeedError;
use serde_json::Value;

/// Maximum characters of a raw message kept in log previews.
pub const PREVIEW_CHARS: usize = 100;

/// A message resolved to its channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    /// Upper-cased symbol, e.g. `BTCUSDT`.
    pub channel: String,
    /// The event itself, envelope removed.
    pub payload: Value,
}

/// Resolve `msg` to `(channel, payload)`.
///
/// Pure: the same input always yields the same result. On failure the error
/// carries a preview of the message for logging.
pub fn route(msg: Value) -> Result<Routed, FeedError> {
    if let Value::Object(mut obj) = msg {
        if obj.contains_key("stream") && obj.contains_key("data") {
            if let Some(stream) = obj.get("stream").and_then(Value::as_str) {
                let channel = stream.split('@').next().unwrap_or(stream).to_uppercase();
                let payload = obj.remove("data").unwrap_or(Value::Null);
                return Ok(Routed { channel, payload });
            }
        } else if let Some(symbol) = obj.get("s").and_then(Value::as_str) {
            let channel = symbol.to_uppercase();
            return Ok(Routed { channel, payload: Value::Object(obj) });
        }
        return Err(FeedError::Unroutable(preview(&Value::Object(obj).to_string())));
    }
    Err(FeedError::Unroutable(preview(&msg.to_string())))
}

/// First [`PREVIEW_CHARS`] characters of `raw`, with `...` when cut.
pub fn preview(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() { format!("{head}...") } else { head }
}
