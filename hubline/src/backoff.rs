//! Delays between connection attempts

use std::time::Duration;

use tokio::time::Instant;

/// Determines how long to wait before the next connection attempt
///
/// Returning `None` indicates that no further attempts should be made.
pub trait ReconnectPolicy: Send + Sync {
    /// The delay to wait after `attempts` consecutive failed attempts
    fn next_delay(&self, attempts: u32) -> Option<Duration>;
}

impl<P: ReconnectPolicy + ?Sized> ReconnectPolicy for std::sync::Arc<P> {
    #[inline]
    fn next_delay(&self, attempts: u32) -> Option<Duration> {
        (**self).next_delay(attempts)
    }
}

/// A two-tier retry schedule that never gives up
///
/// The first `threshold` attempts are retried quickly to recover from
/// transient blips. After that the longer delay applies indefinitely so a
/// remote that is down for a while is not hammered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TieredBackoff {
    threshold: u32,
    short_delay: Duration,
    long_delay: Duration,
}

impl Default for TieredBackoff {
    /// Default schedule
    ///
    /// Retries every 2 seconds for the first 10 attempts, then every 30 seconds.
    fn default() -> Self {
        Self {
            threshold: 10,
            short_delay: Duration::from_secs(2),
            long_delay: Duration::from_secs(30),
        }
    }
}

impl TieredBackoff {
    /// Constructs a new schedule
    ///
    /// Attempts numbered below `threshold` wait `short_delay`; all later
    /// attempts wait `long_delay`.
    pub const fn new(threshold: u32, short_delay: Duration, long_delay: Duration) -> Self {
        Self {
            threshold,
            short_delay,
            long_delay,
        }
    }

    /// The number of attempts retried with the short delay
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// The delay used before the threshold is reached
    pub const fn short_delay(&self) -> Duration {
        self.short_delay
    }

    /// The delay used once the threshold is reached
    pub const fn long_delay(&self) -> Duration {
        self.long_delay
    }
}

impl ReconnectPolicy for TieredBackoff {
    fn next_delay(&self, attempts: u32) -> Option<Duration> {
        if attempts < self.threshold {
            Some(self.short_delay)
        } else {
            Some(self.long_delay)
        }
    }
}

/// Progress through one sequence of reconnection attempts
#[derive(Clone, Copy, Debug)]
pub struct RetryState {
    attempts: u32,
    started_at: Instant,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    /// Starts a new sequence with no failed attempts
    pub fn new() -> Self {
        Self {
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    /// The number of consecutive failed attempts
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time spent in the current sequence
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Records a failed attempt
    pub fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Resets the sequence after a successful connection
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
