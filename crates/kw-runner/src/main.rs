//! # kw-runner
//!
//! Entry point for the klinewatch feed client.
//!
//! Builds the configuration from an optional JSON file plus CLI flags,
//! starts the reconnecting kline feed, and runs until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! kw-runner --symbols btcusdt,ethusdt --interval 1m --log-level debug
//! kw-runner --config feed.json --proxy --proxy-host 127.0.0.1 --proxy-port 7890
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use kw_core::config::{self, FeedConfig};
use kw_md::FeedClient;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    #[value(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Binance kline WebSocket stability monitor.
#[derive(Parser)]
#[command(name = "kw-runner", about = "Binance kline WebSocket stability monitor")]
struct Cli {
    /// Optional configuration file (JSON). CLI flags override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tunnel the connection through an HTTP proxy.
    #[arg(long)]
    proxy: bool,

    /// HTTP proxy host.
    #[arg(long)]
    proxy_host: Option<String>,

    /// HTTP proxy port.
    #[arg(long)]
    proxy_port: Option<u16>,

    /// Comma-separated symbols (e.g. `btcusdt,ethusdt,bnbusdt`).
    #[arg(long)]
    symbols: Option<String>,

    /// Kline interval (e.g. `1m`).
    #[arg(long)]
    interval: Option<String>,

    /// Log level.
    #[arg(short, long, value_enum, ignore_case = true)]
    log_level: Option<LogLevel>,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,
}

impl Cli {
    /// Load the file config (or defaults) and apply CLI overrides.
    fn into_config(self) -> Result<FeedConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_config(path)?,
            None => FeedConfig::default(),
        };
        if self.proxy {
            cfg.proxy.enabled = true;
        }
        if let Some(host) = self.proxy_host {
            cfg.proxy.host = host;
        }
        if let Some(port) = self.proxy_port {
            cfg.proxy.port = port;
        }
        if let Some(raw) = self.symbols.as_deref() {
            cfg.symbols = config::parse_symbol_list(raw)?;
        }
        if let Some(interval) = self.interval {
            cfg.interval = interval;
        }
        if let Some(level) = self.log_level {
            cfg.log_level = level.as_str().to_string();
        }
        if self.log_dir.is_some() {
            cfg.log_dir = self.log_dir;
        }
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Cli::parse().into_config()?;

    // 1. Initialize logging
    kw_core::logging::init_logging(&cfg.log_level, cfg.log_dir.as_deref(), "kw-runner")?;

    info!(
        "kw-runner starting: symbols={}, interval={}, proxy={}",
        cfg.symbols.join(","),
        cfg.interval,
        if cfg.proxy.enabled { "enabled" } else { "disabled" },
    );

    // 2. Build the client; configuration errors are fatal here
    let client = FeedClient::from_config(&cfg)?;
    info!("endpoint: {}", client.endpoint().url);
    let symbols: Vec<&str> = client.subscriptions().iter().map(|s| s.symbol.as_str()).collect();
    info!("subscribed symbols: {}", symbols.join(", "));

    // 3. Run until Ctrl+C
    let stop = client.stop_handle();
    let driver = tokio::spawn(client.run());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("interrupt received, shutting down");

    // 4. Stop and wait for the driver and reporters to exit
    stop.stop();
    match driver.await {
        Ok(summary) => info!(
            "feed driver finished after {} connection attempt(s)",
            summary.sessions
        ),
        Err(e) => error!("feed driver ended abnormally: {e}"),
    }

    info!("goodbye");
    Ok(())
}
