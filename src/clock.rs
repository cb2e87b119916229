use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock seconds and blocking sleep, swappable in tests.
pub trait Clock {
    /// Seconds since the unix epoch.
    fn now(&self) -> u64;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
