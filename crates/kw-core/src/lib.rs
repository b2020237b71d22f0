//! # kw-core
//!
//! Core crate for the klinewatch feed client, providing:
//!
//! - **Configuration** (`config`): JSON config deserialization and subscription validation
//! - **Error types** (`error`): domain-specific `FeedError` via thiserror
//! - **WebSocket** (`ws`): single-session transport with heartbeat and HTTP proxy support
//! - **Time utilities** (`time_util`): wall-clock millis and h/m/s formatting
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod ws;

pub use error::FeedError;
