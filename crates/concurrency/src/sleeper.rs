//! Injectable sleeping
//!
//! The lock retry loop and the push drain poll both wait between attempts.
//! Going through [`Sleeper`] lets tests replace real sleeps with
//! [`VirtualSleeper`], which only records how long it was asked to wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Something that can block the current thread for a duration
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`
    fn sleep(&self, duration: Duration);
}

/// Real sleep via `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Returns immediately, accumulating the requested time
#[derive(Debug, Default)]
pub struct VirtualSleeper {
    slept_nanos: AtomicU64,
    calls: AtomicU64,
}

impl VirtualSleeper {
    /// Create a sleeper with nothing recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Total time requested so far
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.slept_nanos.load(Ordering::SeqCst))
    }

    /// Number of sleep calls so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Sleeper for VirtualSleeper {
    fn sleep(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.slept_nanos.fetch_add(nanos, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::yield_now();
    }
}
