//! # Timestamp clocks
//!
//! Every upsert and remove is stamped with a timestamp taken from a [`Clock`].
//! The timestamp decides which version of a key wins during merges, and also
//! anchors TTL expiry, so it carries wall time in its high bits:
//!
//! ```text
//! timestamp = (wall_millis << 16) | logical_counter
//! ```
//!
//! The engine only relies on `tick()` being strictly increasing within a
//! process. Ordering across restarts relies on the wall clock not moving
//! backwards between runs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A hybrid-logical timestamp.
pub type Timestamp = u64;

/// Number of low bits reserved for the logical counter.
pub const LOGICAL_BITS: u32 = 16;

/// Exclusive upper bound of valid timestamps; bits 62 and 63 are used by the
/// sorted run record encoding.
pub const MAX_TIMESTAMP: Timestamp = 1 << 62;

/// Converts wall clock milliseconds to timestamp units.
pub fn from_millis(millis: u64) -> Timestamp {
    millis.saturating_mul(1 << LOGICAL_BITS)
}

/// Converts a duration to timestamp units.
pub fn duration_to_ticks(duration: Duration) -> Timestamp {
    from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Returns the wall clock milliseconds encoded in a timestamp.
pub fn physical_millis(ts: Timestamp) -> u64 {
    ts >> LOGICAL_BITS
}

/// A source of timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns a timestamp strictly greater than any previously returned by
    /// this clock.
    fn tick(&self) -> Timestamp;

    /// Returns the current time in timestamp units without advancing the
    /// clock. Used for expiry checks.
    fn now(&self) -> Timestamp;
}

/// Installs `max(wall, last + 1)` into `last` and returns it.
fn advance(last: &AtomicU64, wall: Timestamp) -> Timestamp {
    let mut prev = last.load(Ordering::Acquire);
    loop {
        let next = wall.max(prev + 1);
        match last.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

/// Wall clock milliseconds combined with a logical counter.
///
/// If the system clock steps backwards, or more than 65536 ticks are taken
/// within one millisecond, the counter keeps advancing from the last issued
/// timestamp so `tick()` never repeats or decreases.
#[derive(Debug, Default)]
pub struct HybridClock {
    last: AtomicU64,
}

impl HybridClock {
    /// Creates a new clock.
    pub fn new() -> Self {
        Self::default()
    }

    fn wall() -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        from_millis(millis)
    }
}

impl Clock for HybridClock {
    fn tick(&self) -> Timestamp {
        advance(&self.last, Self::wall())
    }

    fn now(&self) -> Timestamp {
        Self::wall().max(self.last.load(Ordering::Acquire))
    }
}

/// A clock whose wall time only moves when told to.
///
/// ```rust
/// use emberkv::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// let a = clock.tick();
/// let b = clock.tick();
/// assert!(b > a);
///
/// clock.advance(Duration::from_secs(1));
/// assert!(clock.tick() > b);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
    last: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `millis` milliseconds.
    pub fn new(millis: u64) -> Self {
        Self { millis: AtomicU64::new(millis), last: AtomicU64::new(0) }
    }

    /// Moves wall time forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        let _ = self
            .millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |millis| Some(millis.saturating_add(by)));
    }

    /// Sets wall time, possibly backwards. Ticks stay monotonic.
    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::Release);
    }

    /// Returns the current wall time in milliseconds.
    pub fn millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}

impl Clock for ManualClock {
    fn tick(&self) -> Timestamp {
        advance(&self.last, from_millis(self.millis()))
    }

    fn now(&self) -> Timestamp {
        from_millis(self.millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_hybrid_clock_strictly_increasing() {
        let clock = HybridClock::new();
        let mut prev = clock.tick();
        for _ in 0..100_000 {
            let next = clock.tick();
            assert!(next > prev);
            prev = next;
        }
        assert!(prev < MAX_TIMESTAMP);
    }

    #[test]
    fn test_hybrid_clock_unique_across_threads() {
        let clock = Arc::new(HybridClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || (0..10_000).map(|_| clock.tick()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.join().unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp {}", ts);
            }
        }
    }

    #[test]
    fn test_manual_clock_survives_backwards_step() {
        let clock = ManualClock::new(5_000);
        let before = clock.tick();
        clock.set_millis(1_000);
        let after = clock.tick();
        assert!(after > before);
        assert_eq!(clock.now(), from_millis(1_000));
    }

    #[test]
    fn test_manual_clock_advance_saturates() {
        let clock = ManualClock::new(u64::MAX - 10);
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.millis(), u64::MAX - 5);
        clock.advance(Duration::MAX);
        assert_eq!(clock.millis(), u64::MAX);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(physical_millis(from_millis(1234)), 1234);
        assert_eq!(duration_to_ticks(Duration::from_millis(3)), 3 << LOGICAL_BITS);
        assert_eq!(physical_millis(from_millis(7) | 0xFFFF), 7);
    }
}
