//! Configuration for the kline feed client.
//!
//! Settings come from an optional JSON file and are then overridden by CLI
//! flags in the runner. Every field has a default, so an empty object `{}`
//! is a valid config.
//!
//! # Example config
//!
//! ```json
//! {
//!   "symbols": ["BTCUSDT", "ETHUSDT"],
//!   "interval": "1m",
//!   "log_level": "info",
//!   "proxy": { "enabled": true, "host": "192.168.8.66", "port": 6152 },
//!   "heartbeat": { "ping_interval_sec": 20, "ping_timeout_sec": 10 }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::FeedError;

/// Binance public market-data stream host.
pub const DEFAULT_HOST: &str = "stream.binance.com:9443";

/// Top-level feed config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Symbols to subscribe, any casing (e.g. `["btcusdt", "ETHUSDT"]`).
    pub symbols: Vec<String>,

    /// Kline interval shared by all subscriptions (e.g. `"1m"`).
    pub interval: String,

    /// Stream host including port.
    pub host: String,

    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,

    /// Optional directory for daily-rotating log files.
    pub log_dir: Option<String>,

    /// HTTP proxy settings.
    pub proxy: ProxyConfig,

    /// Protocol-level ping/pong settings.
    pub heartbeat: HeartbeatConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["btcusdt".into(), "ethusdt".into(), "bnbusdt".into()],
            interval: "1m".into(),
            host: DEFAULT_HOST.into(),
            log_level: "info".into(),
            log_dir: None,
            proxy: ProxyConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// HTTP `CONNECT` proxy used to tunnel the TLS WebSocket connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { enabled: false, host: "192.168.8.66".into(), port: 6152 }
    }
}

impl ProxyConfig {
    /// Returns `(host, port)` when the proxy is enabled.
    pub fn effective(&self) -> Option<(String, u16)> {
        self.enabled.then(|| (self.host.clone(), self.port))
    }
}

/// Heartbeat interval/timeout pair, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub ping_interval_sec: u64,
    pub ping_timeout_sec: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { ping_interval_sec: 20, ping_timeout_sec: 10 }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_sec)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_sec)
    }
}

/// One `(symbol, interval)` subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Symbol as given by the user; lower-cased only when building stream names.
    pub symbol: String,
    pub interval: String,
}

impl FeedConfig {
    /// Validate the config and turn the symbol list and interval into an
    /// ordered subscription set.
    ///
    /// Also rejects settings that could never produce a working session: an
    /// empty stream host, an enabled proxy without a host, and a zero pong
    /// timeout while pings are on.
    pub fn subscriptions(&self) -> Result<Vec<Subscription>, FeedError> {
        if self.host.trim().is_empty() {
            return Err(FeedError::Config("stream host is empty".into()));
        }
        if self.proxy.enabled && self.proxy.host.trim().is_empty() {
            return Err(FeedError::Config("proxy enabled but proxy host is empty".into()));
        }
        if self.heartbeat.ping_interval_sec > 0 && self.heartbeat.ping_timeout_sec == 0 {
            return Err(FeedError::Config("heartbeat ping_timeout_sec must be positive".into()));
        }
        if self.symbols.is_empty() {
            return Err(FeedError::Config("no symbols configured".into()));
        }
        if self.interval.trim().is_empty() {
            return Err(FeedError::Config("kline interval is empty".into()));
        }
        self.symbols
            .iter()
            .map(|s| {
                let symbol = s.trim();
                if symbol.is_empty() {
                    return Err(FeedError::Config("empty symbol in symbol list".into()));
                }
                Ok(Subscription { symbol: symbol.to_string(), interval: self.interval.trim().to_string() })
            })
            .collect()
    }
}

/// Split a comma-separated symbol list, trimming whitespace around each entry.
///
/// Empty entries are rejected rather than silently skipped.
pub fn parse_symbol_list(raw: &str) -> Result<Vec<String>, FeedError> {
    let symbols: Vec<String> = raw.split(',').map(|s| s.trim().to_string()).collect();
    if symbols.iter().any(String::is_empty) {
        return Err(FeedError::Config(format!("invalid symbol list: {raw:?}")));
    }
    Ok(symbols)
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<FeedConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: FeedConfig = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: FeedConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbols, vec!["btcusdt", "ethusdt", "bnbusdt"]);
        assert_eq!(cfg.interval, "1m");
        assert_eq!(cfg.host, DEFAULT_HOST);
        assert!(!cfg.proxy.enabled);
        assert_eq!(cfg.proxy.port, 6152);
        assert_eq!(cfg.heartbeat.interval(), Duration::from_secs(20));
        assert_eq!(cfg.heartbeat.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_proxy_block() {
        let cfg: FeedConfig =
            serde_json::from_str(r#"{"proxy":{"enabled":true,"port":8080}}"#).unwrap();
        assert_eq!(cfg.proxy.effective(), Some(("192.168.8.66".to_string(), 8080)));
    }

    #[test]
    fn symbol_list_trims() {
        let syms = parse_symbol_list(" btcusdt, ETHUSDT ,bnbusdt").unwrap();
        assert_eq!(syms, vec!["btcusdt", "ETHUSDT", "bnbusdt"]);
    }

    #[test]
    fn symbol_list_rejects_empty_entry() {
        assert!(matches!(parse_symbol_list("btcusdt,,ethusdt"), Err(FeedError::Config(_))));
        assert!(matches!(parse_symbol_list(""), Err(FeedError::Config(_))));
    }

    #[test]
    fn subscriptions_keep_order_and_case() {
        let cfg = FeedConfig { symbols: vec!["ETHUSDT".into(), "btcusdt".into()], ..Default::default() };
        let subs = cfg.subscriptions().unwrap();
        assert_eq!(subs[0], Subscription { symbol: "ETHUSDT".into(), interval: "1m".into() });
        assert_eq!(subs[1].symbol, "btcusdt");
    }

    #[test]
    fn empty_host_is_rejected() {
        let cfg: FeedConfig = serde_json::from_str(r#"{"host":"  "}"#).unwrap();
        assert!(matches!(cfg.subscriptions(), Err(FeedError::Config(_))));
    }

    #[test]
    fn zero_pong_timeout_is_rejected_while_pinging() {
        let cfg: FeedConfig =
            serde_json::from_str(r#"{"heartbeat":{"ping_timeout_sec":0}}"#).unwrap();
        assert!(matches!(cfg.subscriptions(), Err(FeedError::Config(_))));

        // With pings off the timeout is never used.
        let cfg: FeedConfig =
            serde_json::from_str(r#"{"heartbeat":{"ping_interval_sec":0,"ping_timeout_sec":0}}"#)
                .unwrap();
        assert!(cfg.subscriptions().is_ok());
    }

    #[test]
    fn enabled_proxy_needs_a_host() {
        let cfg: FeedConfig =
            serde_json::from_str(r#"{"proxy":{"enabled":true,"host":""}}"#).unwrap();
        assert!(matches!(cfg.subscriptions(), Err(FeedError::Config(_))));
    }

    #[test]
    fn subscriptions_reject_empty_set() {
        let cfg = FeedConfig { symbols: vec![], ..Default::default() };
        assert!(matches!(cfg.subscriptions(), Err(FeedError::Config(_))));
    }
}
