//! Monotonic millisecond clock shared by the tables of one cluster
//!
//! Timestamps follow wall-clock epoch milliseconds but never repeat or go
//! backwards: if the wall clock has not advanced since the last call, the
//! previous timestamp plus one is returned.

use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing epoch-millisecond source
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicU64,
}

impl Clock {
    /// Create a clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Current wall time in epoch milliseconds
    pub fn wall_millis() -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }

    /// Next timestamp: at least the wall time and greater than any previous one
    pub fn tick(&self) -> u64 {
        let wall = Self::wall_millis();
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = wall.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Last timestamp handed out, 0 before the first tick
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_tick_is_strictly_increasing() {
        let clock = Clock::new();
        let mut prev = 0;
        for _ in 0..1000 {
            let ts = clock.tick();
            assert!(ts > prev);
            prev = ts;
        }
        assert_eq!(clock.last(), prev);
    }

    #[test]
    fn test_tick_tracks_wall_time() {
        let clock = Clock::new();
        let before = Clock::wall_millis();
        assert!(clock.tick() >= before);
    }

    #[test]
    fn test_concurrent_ticks_are_unique() {
        let clock = Arc::new(Clock::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || (0..500).map(|_| clock.tick()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
