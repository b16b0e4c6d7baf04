//! Coalesces parsed fragments into display-sized flushes.

use std::time::Duration;

use tokio::time::Instant;

/// Default spacing between flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct TokenBatcher {
    buffer: String,
    interval: Duration,
    last_flush: Instant,
}

impl TokenBatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            buffer: String::new(),
            interval,
            last_flush: Instant::now(),
        }
    }

    /// Buffers a fragment. Returns the batch when the interval has elapsed.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.buffer.push_str(fragment);
        self.take_if_due(Instant::now())
    }

    /// Returns the batch if `now` is at or past the deadline and there is
    /// something buffered.
    pub fn take_if_due(&mut self, now: Instant) -> Option<String> {
        if self.buffer.is_empty() || now < self.deadline() {
            return None;
        }
        self.take(now)
    }

    /// Unconditional flush used on terminal states.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        self.take(Instant::now())
    }

    /// Instant at which the buffered text becomes due.
    pub fn deadline(&self) -> Instant {
        self.last_flush + self.interval
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn take(&mut self, now: Instant) -> Option<String> {
        self.last_flush = now;
        Some(std::mem::take(&mut self.buffer))
    }
}

impl Default for TokenBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}
