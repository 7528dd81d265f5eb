//! Clock port. Production code uses `SystemClock`; tests inject
//! `MockClock` so timestamps and delays are deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Millisecond-format used for ISO-8601 UTC timestamps everywhere.
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[async_trait]
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// ISO-8601 UTC timestamp, e.g. `2026-08-01T12:34:56.789Z`.
    fn iso_now(&self) -> String;

    /// Cooperative sleep; mock clocks advance instead of waiting.
    async fn sleep(&self, duration: Duration);
}

fn iso_from_millis(millis: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .unwrap_or_else(Utc::now)
        .format(ISO_FORMAT)
        .to_string()
}

/// Wall-clock implementation.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }

    fn iso_now(&self) -> String {
        Utc::now().format(ISO_FORMAT).to_string()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock for tests. Each `iso_now` call advances by a fixed
/// step so consecutive timestamps are distinct; `sleep` advances without
/// waiting.
#[derive(Debug)]
pub struct MockClock {
    millis: AtomicU64,
    step_ms: u64,
}

impl MockClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
            step_ms: 1,
        }
    }

    pub fn with_step(start_millis: u64, step_ms: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
            step_ms,
        }
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn iso_now(&self) -> String {
        let now = self.millis.fetch_add(self.step_ms, Ordering::SeqCst);
        iso_from_millis(now)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration.as_millis() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_is_monotonic() {
        let clock = MockClock::new(1_000);
        let a = clock.iso_now();
        let b = clock.iso_now();
        assert!(a < b, "timestamps should advance: {a} vs {b}");
    }

    #[test]
    fn test_iso_format_shape() {
        let clock = MockClock::new(0);
        assert_eq!(clock.iso_now(), "1970-01-01T00:00:00.000Z");
    }

    #[tokio::test]
    async fn test_mock_sleep_advances_without_waiting() {
        let clock = MockClock::new(0);
        clock.sleep(Duration::from_secs(60)).await;
        assert_eq!(clock.now_millis(), 60_000);
    }
}
