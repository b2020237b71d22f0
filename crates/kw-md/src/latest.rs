//! Latest payload per channel.
//!
//! Entries are created on a channel's first message, overwritten on every
//! later one and never removed. Readers get cloned entries so no lock is
//! held while they format output.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use ahash::AHashMap;
use serde_json::Value;

/// Last message seen on one channel.
#[derive(Debug, Clone)]
pub struct LatestEntry {
    /// Monotonic receive time, for staleness.
    pub updated_at: Instant,
    /// Wall-clock receive time in ms.
    pub updated_at_ms: u64,
    pub payload: Value,
}

#[derive(Debug, Default)]
pub struct LatestTable {
    entries: Mutex<AHashMap<String, LatestEntry>>,
}

impl LatestTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, AHashMap<String, LatestEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the entry for `channel`.
    pub fn upsert(&self, channel: String, payload: Value) {
        let entry = LatestEntry {
            updated_at: Instant::now(),
            updated_at_ms: kw_core::time_util::now_ms(),
            payload,
        };
        self.map().insert(channel, entry);
    }

    pub fn get(&self, channel: &str) -> Option<LatestEntry> {
        self.map().get(channel).cloned()
    }

    /// All entries, sorted by channel name.
    pub fn snapshot(&self) -> Vec<(String, LatestEntry)> {
        let mut rows: Vec<(String, LatestEntry)> =
            self.map().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_overwrites_same_channel() {
        let t = LatestTable::new();
        t.upsert("BTCUSDT".into(), json!({"k":{"c":"1"}}));
        t.upsert("BTCUSDT".into(), json!({"k":{"c":"2"}}));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("BTCUSDT").unwrap().payload, json!({"k":{"c":"2"}}));
    }

    #[test]
    fn snapshot_is_sorted() {
        let t = LatestTable::new();
        assert!(t.is_empty());
        t.upsert("ETHUSDT".into(), json!({}));
        t.upsert("BNBUSDT".into(), json!({}));
        t.upsert("BTCUSDT".into(), json!({}));
        let names: Vec<String> = t.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["BNBUSDT", "BTCUSDT", "ETHUSDT"]);
    }
}
