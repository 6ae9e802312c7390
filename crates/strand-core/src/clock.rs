//! Per-session logical clock for Part timestamps.
//!
//! Timestamps follow wall-clock milliseconds but never repeat or go
//! backwards: a reading at or before the previous one is bumped to
//! `previous + 1`.

/// Monotonic millisecond clock owned by one session.
#[derive(Clone, Debug, Default)]
pub struct LogicalClock {
    last: u64,
}

impl LogicalClock {
    /// Create a clock that has issued no timestamps yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next timestamp from the current wall clock.
    pub fn tick(&mut self) -> u64 {
        self.tick_at(now_ms())
    }

    /// Issue the next timestamp given an explicit wall-clock reading.
    pub fn tick_at(&mut self, wall_ms: u64) -> u64 {
        let next = if wall_ms > self.last {
            wall_ms
        } else {
            self.last + 1
        };
        self.last = next;
        next
    }

    /// Last timestamp issued (0 before the first tick).
    pub fn last(&self) -> u64 {
        self.last
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn follows_wall_clock_when_it_advances() {
        let mut clock = LogicalClock::new();
        assert_eq!(clock.tick_at(100), 100);
        assert_eq!(clock.tick_at(250), 250);
    }

    #[test]
    fn same_millisecond_collision_increments() {
        let mut clock = LogicalClock::new();
        assert_eq!(clock.tick_at(100), 100);
        assert_eq!(clock.tick_at(100), 101);
        assert_eq!(clock.tick_at(100), 102);
        assert_eq!(clock.tick_at(101), 103);
        assert_eq!(clock.tick_at(500), 500);
    }

    #[test]
    fn wall_clock_regression_never_goes_backwards() {
        let mut clock = LogicalClock::new();
        let _ = clock.tick_at(1_000);
        assert_eq!(clock.tick_at(10), 1_001);
    }

    #[test]
    fn tick_uses_real_time() {
        let mut clock = LogicalClock::new();
        let a = clock.tick();
        let b = clock.tick();
        assert!(a > 0);
        assert!(b > a);
    }

    proptest! {
        #[test]
        fn ticks_strictly_increase(readings in proptest::collection::vec(0u64..10_000, 1..200)) {
            let mut clock = LogicalClock::new();
            let mut prev = 0;
            for r in readings {
                let ts = clock.tick_at(r);
                prop_assert!(ts > prev);
                prop_assert!(ts >= r);
                prev = ts;
            }
        }
    }
}
