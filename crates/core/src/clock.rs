use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock source for message timestamps and snapshot ages.
pub trait Clock: Send + Sync {
    fn now_unix_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_millis() as u64)
    }
}

/// Settable clock for tests that need to jump days ahead.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_unix_millis: AtomicU64,
}

impl ManualClock {
    pub fn new(now_unix_millis: u64) -> Self {
        Self {
            now_unix_millis: AtomicU64::new(now_unix_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_unix_millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_unix_millis: u64) {
        self.now_unix_millis.store(now_unix_millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix_millis(&self) -> u64 {
        self.now_unix_millis.load(Ordering::SeqCst)
    }
}
