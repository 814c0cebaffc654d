use rand::Rng;
use std::time::Duration;

/// Exponential dial backoff with randomized jitter.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    ///
    /// # Examples
    ///
    /// ```
    /// use rdvc::backoff::Backoff;
    /// use std::time::Duration;
    /// let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5));
    /// let delay = backoff.next_delay();
    /// assert!(delay >= Duration::from_millis(75)); // 100ms * 0.75 jitter
    /// assert!(delay <= Duration::from_millis(125)); // 100ms * 1.25 jitter
    /// ```
    #[must_use]
    pub const fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    /// Delay before the next attempt: `initial * 2^attempt` capped at `max`,
    /// with ±25% jitter.
    pub fn next_delay(&mut self) -> Duration {
        let doubled = self.initial.saturating_mul(1u32 << self.attempt.min(16));
        let capped = doubled.min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        capped.mul_f64(jitter)
    }

    /// Forget past attempts and start over from the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
