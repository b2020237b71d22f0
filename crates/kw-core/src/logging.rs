//! Logging setup for the feed client.
//!
//! Console output is human-readable. When a log directory is configured, a
//! second layer writes JSON lines to a daily-rotated file so long stability
//! runs can be grepped or loaded afterwards.
//!
//! `RUST_LOG` wins over the configured level. Without it, the WebSocket and
//! TLS crates are capped at `warn` so per-frame chatter does not drown the
//! connection lifecycle lines.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Dependency targets kept at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "native_tls"];

/// Install the global subscriber. Call once, before the client starts.
///
/// `log_level` accepts the CLI names (`warning` included); `file_prefix`
/// names the rotated files inside `log_dir`.
pub fn init_logging(log_level: &str, log_dir: Option<&str>, file_prefix: &str) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(log_level))
            .context("invalid default log directives")?,
    };

    let console_layer = fmt::layer().with_target(false);
    let file_layer = log_dir.map(|dir| {
        fmt::layer()
            .json()
            .with_writer(tracing_appender::rolling::daily(dir, file_prefix))
            .with_ansi(false)
            .with_thread_ids(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("global tracing subscriber already installed")?;
    Ok(())
}

/// Filter directives used when `RUST_LOG` is unset,
/// e.g. `info,tungstenite=warn,tokio_tungstenite=warn,native_tls=warn`.
pub fn default_directives(log_level: &str) -> String {
    let level = normalize_level(log_level);
    // Never louder than the requested level.
    let capped = if level == "error" { "error" } else { "warn" };
    let mut directives = level.to_string();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}={capped}"));
    }
    directives
}

/// Map a user-facing level name to an `EnvFilter` level.
///
/// Accepts `warning` as an alias for `warn`; anything unknown falls back to
/// `info`.
pub fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}
