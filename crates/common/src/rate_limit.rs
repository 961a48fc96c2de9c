//! Sliding-window rate limiter for exchange requests.
//!
//! Tracks the timestamps of recent successful acquisitions and refuses (or
//! delays) new ones once the one-second window is full. Two instances guard
//! the exchange adapter: one for general requests, a stricter one for order
//! placement.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Token-bucket gate over a sliding one-second window.
///
/// At most `requests_per_second` acquisitions succeed within any one-second
/// window. `acquire` blocks the calling task until capacity frees up;
/// `try_acquire` returns immediately. Backpressure is by blocking the caller,
/// there is no queue of deferred requests.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_second: usize,
    max_burst: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_second` acquisitions per
    /// sliding second, with bursts capped at `max_burst`.
    pub fn new(requests_per_second: usize, max_burst: usize) -> Self {
        Self {
            requests_per_second: requests_per_second.max(1),
            max_burst: max_burst.max(1),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Acquire a slot, waiting until the window has capacity.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock();
                let now = Instant::now();
                Self::prune(&mut window, now);

                if window.len() < self.requests_per_second {
                    window.push_back(now);
                    return;
                }

                // Window is full: sleep until the oldest entry expires
                WINDOW.saturating_sub(now.duration_since(window[0]))
            };

            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Acquire a slot if one is free, without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut window = self.window.lock();
        let now = Instant::now();
        Self::prune(&mut window, now);

        if window.len() >= self.requests_per_second {
            return false;
        }

        // Burst cap: no more than max_burst acquisitions inside 100ms
        let burst_horizon = now - Duration::from_millis(100);
        let recent = window.iter().rev().take_while(|t| **t > burst_horizon).count();
        if recent >= self.max_burst {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Number of acquisitions currently inside the window.
    pub fn in_flight(&self) -> usize {
        let mut window = self.window.lock();
        Self::prune(&mut window, Instant::now());
        window.len()
    }

    fn prune(window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = window.front() {
            if now.duration_since(*front) > WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_acquire_up_to_limit() {
        let limiter = RateLimiter::new(3, 3);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.in_flight(), 3);
    }

    #[test]
    fn test_burst_cap_stricter_than_window() {
        let limiter = RateLimiter::new(10, 2);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        // Window has room for 10, but the burst cap refuses a third
        // acquisition inside the same instant.
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_window_frees() {
        let limiter = RateLimiter::new(2, 2);

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        // Third acquisition must wait for the first to age out of the window
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_no_more_than_n_per_window() {
        let limiter = RateLimiter::new(5, 5);

        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.in_flight(), 5);
        assert!(!limiter.try_acquire());
    }
}
