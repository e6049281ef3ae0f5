use crate::cache::{Reading, ReadingCache};
use crate::types::TemperatureReport;

/// Human-readable relative age. Buckets truncate (floor), matching the
/// device UI: 60s reads "1 minutes ago", 3600s reads "1 hours ago".
pub fn format_age(age_ms: u64) -> String {
    let seconds = age_ms / 1_000;
    if seconds < 60 {
        format!("{seconds} seconds ago")
    } else if seconds < 3_600 {
        format!("{} minutes ago", seconds / 60)
    } else {
        format!("{} hours ago", seconds / 3_600)
    }
}

/// Merge both producer caches into one answer.
///
/// Precedence: a valid wireless reading wins, then a valid HTTP reading.
/// With neither valid the most recently written snapshot is reported with
/// `valid: false`; a station that has never seen an update reports zeros
/// and `"never"`.
pub fn build_report(
    wireless: &ReadingCache,
    http: &ReadingCache,
    now_ms: u64,
) -> TemperatureReport {
    let (chosen, valid) = if wireless.is_valid(now_ms) {
        (wireless.snapshot(), true)
    } else if http.is_valid(now_ms) {
        (http.snapshot(), true)
    } else {
        (latest_written(wireless.snapshot(), http.snapshot()), false)
    };

    match chosen {
        Some(reading) => TemperatureReport {
            temperature: reading.temperature,
            humidity: reading.humidity,
            valid,
            last_update: format_age(now_ms.wrapping_sub(reading.last_update_ms)),
        },
        None => TemperatureReport {
            temperature: 0.0,
            humidity: 0.0,
            valid: false,
            last_update: "never".to_string(),
        },
    }
}

// Wireless keeps precedence on a timestamp tie. Raw comparison: across a
// genuine counter wrap the ordering of two stale readings is unknowable.
fn latest_written(wireless: Option<Reading>, http: Option<Reading>) -> Option<Reading> {
    match (wireless, http) {
        (Some(w), Some(h)) => Some(if h.last_update_ms > w.last_update_ms { h } else { w }),
        (wireless, http) => wireless.or(http),
    }
}
