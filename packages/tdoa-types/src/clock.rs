//! Microsecond clocks.
//!
//! Every timestamp in the system comes from a `MicrosClock` handed in by the
//! caller, so tests and the simulator can drive time explicitly.

use std::cell::Cell;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Microsecond clock.
pub trait MicrosClock {
    fn now_us(&self) -> u64;
}

/// Microseconds since construction, backed by `Instant`.
///
/// The zero point is private to one process; use `SystemClock` for anything
/// compared across anchors.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrosClock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Microseconds since the Unix epoch.
///
/// Every process on a host reads the same zero point, and hosts agree as far
/// as their NTP/PTP discipline allows, so arrivals stamped with it can be
/// compared across anchors. A clock stepped backwards before the epoch reads 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl MicrosClock for SystemClock {
    fn now_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for tests and simulation. Single-threaded only.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self { now: Cell::new(start_us) }
    }

    pub fn set(&self, us: u64) {
        self.now.set(us);
    }

    pub fn advance(&self, us: u64) {
        self.now.set(self.now.get().saturating_add(us));
    }
}

impl MicrosClock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }

    #[test]
    fn test_system_clocks_share_a_zero_point() {
        let a = SystemClock::new();
        std::thread::sleep(std::time::Duration::from_millis(30));
        let b = SystemClock::new();

        let (ta, tb) = (a.now_us(), b.now_us());
        assert!(tb >= ta);
        assert!(tb - ta < 10_000, "a={ta} b={tb}");
        // Well past 2020-01-01.
        assert!(ta > 1_577_836_800_000_000);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(25);
        assert_eq!(clock.now_us(), 125);
        clock.set(7);
        assert_eq!(clock.now_us(), 7);
    }
}
