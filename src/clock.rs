//! Clock Abstraction for Backup Runs
//!
//! Run timing (bucket date, start time, duration) goes through a clock so
//! tests can pin the calendar date and the elapsed time of a run.
//!
//! - `ProductionClock`: wall-clock time
//! - `SimulatedClock`: virtual time, advanced explicitly

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::{OffsetDateTime, UtcOffset};

/// Wall-clock timestamp in Unix milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BackupTimestamp(pub u64);

impl BackupTimestamp {
    pub fn from_millis(ms: u64) -> Self {
        BackupTimestamp(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn saturating_sub(&self, other: BackupTimestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }

    /// Calendar view of this timestamp at the given offset
    pub fn to_offset_datetime(&self, offset: UtcOffset) -> OffsetDateTime {
        let nanos = i128::from(self.0) * 1_000_000;
        // u64 millis always fit the supported range until year 9999
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
            .to_offset(offset)
    }
}

impl std::ops::Add<Duration> for BackupTimestamp {
    type Output = BackupTimestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        BackupTimestamp(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

/// Clock trait for time operations
pub trait BackupClock: Send + Sync + Clone + 'static {
    /// Get current time
    fn now(&self) -> BackupTimestamp;

    /// Get elapsed time since a previous timestamp
    fn elapsed(&self, since: BackupTimestamp) -> Duration {
        self.now().saturating_sub(since)
    }
}

/// Production clock using real system time
#[derive(Clone)]
pub struct ProductionClock {
    start: Instant,
    start_millis: u64,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        // A clock set before 1970 reads as the epoch rather than failing the run
        let start_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ProductionClock {
            start: Instant::now(),
            start_millis,
        }
    }
}

impl BackupClock for ProductionClock {
    fn now(&self) -> BackupTimestamp {
        let elapsed = self.start.elapsed().as_millis() as u64;
        BackupTimestamp(self.start_millis + elapsed)
    }
}

/// Simulated clock for deterministic testing
///
/// Time only advances when explicitly told to via `advance()` or `set()`.
#[derive(Clone)]
pub struct SimulatedClock {
    time_ms: Arc<AtomicU64>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedClock {
    /// Create a new simulated clock starting at the given time
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            time_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Start the clock at a calendar instant
    pub fn at(datetime: OffsetDateTime) -> Self {
        let ms = (datetime.unix_timestamp_nanos() / 1_000_000).max(0) as u64;
        Self::new(ms)
    }

    /// Advance time by the given duration
    pub fn advance(&self, duration: Duration) {
        self.time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set time to a specific value
    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl BackupClock for SimulatedClock {
    fn now(&self) -> BackupTimestamp {
        BackupTimestamp(self.time_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn test_production_clock() {
        let clock = ProductionClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = clock.now();

        assert!(t2.0 > t1.0, "Time should advance");
        assert!(t2.0 - t1.0 >= 10, "Should have elapsed at least 10ms");
    }

    #[test]
    fn test_simulated_clock_deterministic() {
        let clock = SimulatedClock::new(1000);

        assert_eq!(clock.now(), clock.now());

        clock.advance(Duration::from_millis(100));
        assert_eq!(clock.now().0, 1100);

        clock.set(5000);
        assert_eq!(clock.now().0, 5000);
    }

    #[test]
    fn test_simulated_clock_shared() {
        let clock = SimulatedClock::new(0);
        let clock2 = clock.clone();

        clock.advance(Duration::from_millis(100));
        assert_eq!(clock2.now().0, 100, "Clones should share state");
    }

    #[test]
    fn test_elapsed() {
        let clock = SimulatedClock::new(1000);
        let start = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.elapsed(start), Duration::from_secs(90));
    }

    #[test]
    fn test_calendar_view_respects_offset() {
        // 2024-03-04 20:30 UTC is already March 5th in Tokyo
        let clock = SimulatedClock::at(datetime!(2024-03-04 20:30 UTC));
        let local = clock.now().to_offset_datetime(offset!(+9));

        assert_eq!(local.year(), 2024);
        assert_eq!(u8::from(local.month()), 3);
        assert_eq!(local.day(), 5);
        assert_eq!(local.hour(), 5);
    }
}
