//! Time helpers shared by the tracker and the reporters.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Split a duration into whole `(hours, minutes, seconds)`.
pub fn split_hms(d: Duration) -> (u64, u64, u64) {
    let total = d.as_secs();
    (total / 3600, (total % 3600) / 60, total % 60)
}

/// Render a duration as `"1h 2m 5s"`.
pub fn format_hms(d: Duration) -> String {
    let (h, m, s) = split_hms(d);
    format!("{h}h {m}m {s}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hms_breakdown() {
        assert_eq!(split_hms(Duration::from_secs(3725)), (1, 2, 5));
        assert_eq!(format_hms(Duration::from_millis(59_999)), "0h 0m 59s");
        assert_eq!(format_hms(Duration::from_secs(90_061)), "25h 1m 1s");
    }

    #[test]
    fn now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
