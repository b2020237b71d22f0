//! Typed error definitions for the kline feed client.
//!
//! Provides [`FeedError`] for the four failure classes the feed distinguishes.
//! Only [`FeedError::Config`] ever reaches a caller; the others are logged
//! and counted where they occur. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the kline feed client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Invalid or empty subscription set, bad config file. Fatal, raised
    /// before any connection attempt.
    #[error("config error: {0}")]
    Config(String),

    /// Connection, handshake, proxy, or heartbeat failure. Followed by a
    /// reconnect.
    #[error("transport error: {0}")]
    Transport(String),

    /// Payload shape not recognized. Carries a truncated preview.
    #[error("unroutable message: {0}")]
    Unroutable(String),

    /// Payload is not valid JSON.
    #[error("decode error: {0}")]
    Decode(String),
}
