use std::sync::Mutex;

/// Which producer wrote the cached reading last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingSource {
    Wireless,
    Http,
}

/// One complete environmental reading plus its bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    /// Monotonic milliseconds at the moment of the update. Wraps at the
    /// clock's native width; consumers must compare with wrapping
    /// subtraction, never signed arithmetic.
    pub last_update_ms: u64,
    pub source: ReadingSource,
}

/// Single-slot cache holding the latest reading from one producer.
///
/// The slot is swapped as a whole record under the lock, so a reader can
/// never observe temperature, humidity, and timestamp from different
/// updates. An empty slot means no update has ever arrived, which also
/// means there is no timestamp to misread as fresh.
#[derive(Debug)]
pub struct ReadingCache {
    source: ReadingSource,
    freshness_window_ms: u64,
    slot: Mutex<Option<Reading>>,
}

impl ReadingCache {
    pub fn new(source: ReadingSource, freshness_window_ms: u64) -> Self {
        Self {
            source,
            freshness_window_ms,
            slot: Mutex::new(None),
        }
    }

    pub fn source(&self) -> ReadingSource {
        self.source
    }

    /// Overwrite the cached reading and stamp it with `now_ms`. Cannot fail.
    pub fn update(&self, temperature: f32, humidity: f32, now_ms: u64) {
        let reading = Reading {
            temperature,
            humidity,
            last_update_ms: now_ms,
            source: self.source,
        };
        *self.slot.lock().unwrap() = Some(reading);
    }

    /// Copy of the whole record, untorn. `None` before the first update.
    pub fn snapshot(&self) -> Option<Reading> {
        *self.slot.lock().unwrap()
    }

    /// Last stored temperature regardless of freshness (0.0 before any
    /// update). Callers must check `is_valid` separately.
    pub fn temperature(&self) -> f32 {
        self.snapshot().map(|reading| reading.temperature).unwrap_or(0.0)
    }

    /// Last stored humidity regardless of freshness (0.0 before any update).
    pub fn humidity(&self) -> f32 {
        self.snapshot().map(|reading| reading.humidity).unwrap_or(0.0)
    }

    /// Raw timestamp of the last update, for external formatting.
    pub fn last_update_ms(&self) -> Option<u64> {
        self.snapshot().map(|reading| reading.last_update_ms)
    }

    /// Milliseconds since the last update. Wrap-safe: computed with
    /// unsigned wrapping subtraction at the clock's width, so a counter
    /// wrap between update and query cannot produce a spuriously huge age.
    pub fn age_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_update_ms()
            .map(|last| now_ms.wrapping_sub(last))
    }

    /// `false` before any update; afterwards, whether the reading is still
    /// inside the freshness window.
    pub fn is_valid(&self, now_ms: u64) -> bool {
        self.age_ms(now_ms)
            .map(|age| age < self.freshness_window_ms)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW_MS: u64 = 30_000;

    fn cache() -> ReadingCache {
        ReadingCache::new(ReadingSource::Wireless, WINDOW_MS)
    }

    #[test]
    fn empty_cache_is_invalid_and_reports_zeros() {
        let cache = cache();

        assert!(!cache.is_valid(0));
        assert!(!cache.is_valid(u64::MAX));
        assert_eq!(cache.temperature(), 0.0);
        assert_eq!(cache.humidity(), 0.0);
        assert_eq!(cache.last_update_ms(), None);
        assert_eq!(cache.snapshot(), None);
    }

    #[test]
    fn update_stores_whole_record() {
        let cache = cache();
        cache.update(23.2, 54.0, 1_000);

        let reading = cache.snapshot().unwrap();
        assert_eq!(reading.temperature, 23.2);
        assert_eq!(reading.humidity, 54.0);
        assert_eq!(reading.last_update_ms, 1_000);
        assert_eq!(reading.source, ReadingSource::Wireless);
        assert!(cache.is_valid(1_000));
    }

    #[test]
    fn validity_expires_exactly_at_window() {
        let cache = cache();
        cache.update(20.0, 40.0, 5_000);

        assert!(cache.is_valid(5_000 + WINDOW_MS - 1));
        assert!(!cache.is_valid(5_000 + WINDOW_MS));
    }

    #[test]
    fn stale_values_remain_readable() {
        let cache = cache();
        cache.update(18.5, 40.1, 0);

        assert!(!cache.is_valid(WINDOW_MS * 10));
        assert_eq!(cache.temperature(), 18.5);
        assert_eq!(cache.humidity(), 40.1);
        assert_eq!(cache.last_update_ms(), Some(0));
    }

    #[test]
    fn age_survives_counter_wraparound() {
        let cache = cache();
        let just_before_wrap = u64::MAX - 10_000;
        cache.update(21.0, 50.0, just_before_wrap);

        // The clock has wrapped; 10_001 ticks to the wrap plus 4_999 after.
        let now = 4_999;
        assert_eq!(cache.age_ms(now), Some(15_000));
        assert!(cache.is_valid(now));

        // Once the wrapped age crosses the window the reading goes stale.
        assert!(!cache.is_valid(WINDOW_MS - 10_001));
    }

    #[test]
    fn later_update_replaces_earlier_one() {
        let cache = cache();
        cache.update(20.0, 40.0, 1_000);
        cache.update(25.0, 45.0, 2_000);

        let reading = cache.snapshot().unwrap();
        assert_eq!(reading.temperature, 25.0);
        assert_eq!(reading.humidity, 45.0);
        assert_eq!(reading.last_update_ms, 2_000);
    }
}
