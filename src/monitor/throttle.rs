//! Events-per-second limiter
//!
//! Scans over large trees can flood the transport; the throttle counts
//! pipeline admissions per one-second window and sleeps the calling thread
//! once the configured ceiling is reached. A ceiling of zero disables it.

use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};

struct Window {
    start: Instant,
    count: u32,
}

/// Sleep-based rate limiter shared by the scan and watcher threads
pub struct EventThrottle {
    max_eps: u32,
    window: Mutex<Window>,
}

impl EventThrottle {
    pub fn new(max_eps: u32) -> Self {
        Self {
            max_eps,
            window: Mutex::new(Window {
                start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Take one slot in the current window, sleeping into the next window
    /// when the ceiling is reached
    pub fn acquire(&self) {
        if self.max_eps == 0 {
            return;
        }

        loop {
            let wait = {
                let mut window = self.window.lock();
                if window.start.elapsed() >= Duration::from_secs(1) {
                    window.start = Instant::now();
                    window.count = 0;
                }
                if window.count < self.max_eps {
                    window.count += 1;
                    return;
                }
                Duration::from_secs(1).saturating_sub(window.start.elapsed())
            };

            thread::sleep(wait.max(Duration::from_millis(1)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_blocks() {
        let throttle = EventThrottle::new(0);
        let start = Instant::now();
        for _ in 0..10_000 {
            throttle.acquire();
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_ceiling_delays_excess() {
        let throttle = EventThrottle::new(50);
        let start = Instant::now();
        // Two windows worth of acquisitions must span at least one window
        for _ in 0..100 {
            throttle.acquire();
        }
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
