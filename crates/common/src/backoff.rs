//! Delay schedules for failing operations.

use rand::Rng;
use std::time::Duration;

/// Hands out a growing pause between attempts of a failing operation.
///
/// Two loops consume this: the exchange adapter's request retry (initial
/// delay, multiplier and attempt cap come from its retry config) and the
/// market stream's reconnect loop (unbounded attempts, delay capped so a
/// long outage keeps probing once a minute). The schedule is a cursor
/// over a geometric series: each call returns the current delay, then
/// advances the cursor by `multiplier`, saturating at `max_delay`.
///
/// When `jitter_factor` is non-zero, each returned delay is displaced by
/// a random amount of up to that fraction of itself, in either direction,
/// so parallel clients recovering from the same outage do not hammer the
/// venue in lockstep.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    cursor: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, 0.1)
    }
}

impl ExponentialBackoff {
    /// Build a schedule starting at `initial`, growing by `multiplier` per
    /// attempt, saturating at `max_delay`.
    ///
    /// A multiplier under 1.0 would shrink the pauses between attempts and
    /// is clamped to 1.0; a negative jitter fraction is clamped to 0.
    pub fn new(
        initial: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            initial,
            cursor: initial,
            max_delay,
            multiplier: multiplier.max(1.0),
            jitter_factor: jitter_factor.max(0.0),
            attempt: 0,
        }
    }

    /// Return the delay for the next attempt and advance the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.cursor;

        let advanced = self.cursor.as_secs_f64() * self.multiplier;
        self.cursor = Duration::from_secs_f64(advanced.min(self.max_delay.as_secs_f64()));
        self.attempt = self.attempt.saturating_add(1);

        self.displace(delay)
    }

    /// Restart the schedule after a successful attempt.
    pub fn reset(&mut self) {
        self.cursor = self.initial;
        self.attempt = 0;
    }

    /// Attempts handed out since construction or the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn displace(&self, delay: Duration) -> Duration {
        let bound = delay.as_secs_f64() * self.jitter_factor;
        if bound <= 0.0 {
            return delay;
        }

        let offset = rand::thread_rng().gen_range(-bound..=bound);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(multiplier: f64) -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10), multiplier, 0.0)
    }

    #[test]
    fn test_schedule_is_geometric_until_the_cap() {
        let mut backoff = schedule(2.0);
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();

        // 1, 2, 4, 8, then saturated at the 10s cap
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn test_first_delay_is_the_initial_delay() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(250),
            Duration::from_secs(10),
            3.0,
            0.0,
        );

        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(750));
    }

    #[test]
    fn test_reset_restarts_the_schedule() {
        let mut backoff = schedule(2.0);
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_its_fraction() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(60), 2.0, 0.2);

        for _ in 0..20 {
            let secs = backoff.next_delay().as_secs_f64();
            // Undisplaced delays run from the 10s start to the 60s cap, so
            // every jittered value sits inside [10 * 0.8, 60 * 1.2]
            assert!(secs <= 60.0 * 1.2, "delay {} above jittered cap", secs);
            assert!(secs >= 10.0 * 0.8, "delay {} below jittered floor", secs);
        }
    }

    #[test]
    fn test_shrinking_multiplier_clamped_flat() {
        let mut backoff = schedule(0.25);

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
